//! Hardware address heuristic
//!
//! Many vendors append the advertiser's MAC to their manufacturer data, so the
//! trailing six bytes are a useful guess. Nothing guarantees it: the result is
//! a best-effort value and is exposed as `derived_address`, never as a MAC.

/// Number of trailing payload bytes used for the derived address
pub const DERIVED_ADDRESS_LEN: usize = 6;

/// Derive a colon-hex address from the last six bytes of a manufacturer
/// payload. Returns `None` for absent or short payloads.
pub fn derive_address(payload: Option<&[u8]>) -> Option<String> {
    let payload = payload?;
    if payload.len() < DERIVED_ADDRESS_LEN {
        return None;
    }

    let tail = &payload[payload.len() - DERIVED_ADDRESS_LEN..];
    let octets: Vec<String> = tail.iter().map(|b| format!("{:02x}", b)).collect();
    Some(octets.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_takes_last_six_bytes() {
        let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        assert_eq!(
            derive_address(Some(&payload)),
            Some("33:44:55:66:77:88".to_string())
        );
    }

    #[test]
    fn test_exactly_six_bytes() {
        let payload = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6];
        assert_eq!(
            derive_address(Some(&payload)),
            Some("a1:b2:c3:d4:e5:f6".to_string())
        );
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(derive_address(Some(&[0x01, 0x02, 0x03, 0x04, 0x05])), None);
        assert_eq!(derive_address(Some(&[])), None);
    }

    #[test]
    fn test_absent_payload() {
        assert_eq!(derive_address(None), None);
    }

    #[test]
    fn test_zero_padded_octets() {
        let payload = [0x4c, 0x00, 0x00, 0x01, 0x0a, 0x00, 0x0f, 0x00];
        assert_eq!(
            derive_address(Some(&payload)),
            Some("00:01:0a:00:0f:00".to_string())
        );
    }
}
