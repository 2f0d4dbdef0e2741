//! Input checks for the pass-through operations.
//!
//! Vendor lookup and file transfer are handled by external collaborators;
//! the core only decides whether their inputs are acceptable.

use crate::DiscoveryError;
use std::path::{Path, PathBuf};

/// Whether `value` looks like `aa:bb:cc:dd:ee:ff` (`-` separators allowed).
pub fn is_hardware_address(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 17 {
        return false;
    }

    bytes.iter().enumerate().all(|(i, b)| {
        if i % 3 == 2 {
            *b == b':' || *b == b'-'
        } else {
            b.is_ascii_hexdigit()
        }
    })
}

/// Check the address given to a vendor lookup
pub fn validate_lookup_address(value: Option<&str>) -> Result<&str, DiscoveryError> {
    match value {
        Some(mac) if is_hardware_address(mac) => Ok(mac),
        _ => Err(DiscoveryError::InvalidInput(
            "invalid or missing MAC address".to_string(),
        )),
    }
}

/// A validated file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub address: String,
    pub file: PathBuf,
}

/// Check the inputs of a file transfer: a non-empty target address and a
/// file that exists on disk
pub fn validate_transfer(
    address: Option<&str>,
    file: Option<&Path>,
) -> Result<TransferRequest, DiscoveryError> {
    let address = address.map(str::trim).unwrap_or_default();
    let file = match file {
        Some(path) if !address.is_empty() => path,
        _ => {
            return Err(DiscoveryError::InvalidInput(
                "missing address or image file".to_string(),
            ))
        }
    };

    if !file.is_file() {
        return Err(DiscoveryError::InvalidInput(format!(
            "file not found: {}",
            file.display()
        )));
    }

    Ok(TransferRequest {
        address: address.to_string(),
        file: file.to_path_buf(),
    })
}
