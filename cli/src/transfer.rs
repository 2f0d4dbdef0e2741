// File transfer over an existing Bluetooth link
//
// Spawns the configured transfer tool directly (no shell) as
// `<command> --device=<address> <file>`.

use anyhow::{Context, Result};
use blueprobe_core::validate::TransferRequest;
use tokio::process::Command;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct FileTransfer {
    command: String,
}

impl FileTransfer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run the transfer and return the tool's stdout
    pub async fn send(&self, request: &TransferRequest) -> Result<String> {
        info!(
            "Sending {} to {} via {}",
            request.file.display(),
            request.address,
            self.command
        );

        let output = Command::new(&self.command)
            .arg(format!("--device={}", request.address))
            .arg(&request.file)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Send failed: {}", stderr.trim());
            anyhow::bail!("{} exited with {}: {}", self.command, output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
