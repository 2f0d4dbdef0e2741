// Configuration management for the BlueProbe service
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/blueprobe/config.json
// - Linux: ~/.config/blueprobe/config.json
// - Windows: %APPDATA%\blueprobe\config.json

use anyhow::{Context, Result};
use blueprobe_core::ScanConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP port
    pub listen_port: u16,

    /// Address the HTTP server binds to
    pub bind_address: String,

    /// Base URL of the MAC vendor lookup service
    pub vendor_lookup_url: String,

    /// Directory for rolling log files. Logs go to stderr when unset.
    pub log_dir: Option<String>,

    /// Scanning and connection settings
    pub scan: ScanSettings,

    /// File transfer settings
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Length of one scan session in milliseconds
    pub scan_window_ms: u64,

    /// Connect ceiling in seconds (0 = wait for the radio)
    pub connect_timeout_secs: u64,

    /// Which Bluetooth adapter to use
    pub adapter_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Where uploads are stored before transfer
    pub upload_dir: Option<String>,

    /// Transfer tool invoked as `<command> --device=<address> <file>`
    pub sendto_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 3000,
            bind_address: "0.0.0.0".to_string(),
            vendor_lookup_url: "https://api.macvendors.com".to_string(),
            log_dir: None,
            scan: ScanSettings::default(),
            transfer: TransferSettings::default(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            scan_window_ms: 5000,
            connect_timeout_secs: 30,
            adapter_index: 0,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            upload_dir: None, // Resolved under the data directory
            sendto_command: "bluetooth-sendto".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("blueprobe");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("blueprobe");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    /// Set a config value in memory
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "listen_port" => {
                self.listen_port = value.parse().context("Invalid port number")?;
            }
            "bind_address" => {
                value
                    .parse::<std::net::IpAddr>()
                    .context("Invalid IP address")?;
                self.bind_address = value.to_string();
            }
            "vendor_lookup_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    anyhow::bail!("Vendor lookup URL must start with http:// or https://");
                }
                self.vendor_lookup_url = value.trim_end_matches('/').to_string();
            }
            "log_dir" => {
                self.log_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "scan_window_ms" => {
                let window: u64 = value.parse().context("Invalid number")?;
                if window == 0 {
                    anyhow::bail!("Scan window must be > 0");
                }
                self.scan.scan_window_ms = window;
            }
            "connect_timeout_secs" => {
                self.scan.connect_timeout_secs = value.parse().context("Invalid number")?;
            }
            "adapter_index" => {
                self.scan.adapter_index = value.parse().context("Invalid number")?;
            }
            "upload_dir" => {
                self.transfer.upload_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "sendto_command" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Transfer command cannot be empty");
                }
                self.transfer.sendto_command = value.to_string();
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "listen_port" => Some(self.listen_port.to_string()),
            "bind_address" => Some(self.bind_address.clone()),
            "vendor_lookup_url" => Some(self.vendor_lookup_url.clone()),
            "log_dir" => self.log_dir.clone(),
            "scan_window_ms" => Some(self.scan.scan_window_ms.to_string()),
            "connect_timeout_secs" => Some(self.scan.connect_timeout_secs.to_string()),
            "adapter_index" => Some(self.scan.adapter_index.to_string()),
            "upload_dir" => self.transfer.upload_dir.clone(),
            "sendto_command" => Some(self.transfer.sendto_command.clone()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("listen_port".to_string(), self.listen_port.to_string()),
            ("bind_address".to_string(), self.bind_address.clone()),
            ("vendor_lookup_url".to_string(), self.vendor_lookup_url.clone()),
            ("log_dir".to_string(), self.log_dir.clone().unwrap_or_else(|| "(stderr)".to_string())),
            ("scan_window_ms".to_string(), format!("{}ms", self.scan.scan_window_ms)),
            ("connect_timeout_secs".to_string(), format!("{}s", self.scan.connect_timeout_secs)),
            ("adapter_index".to_string(), self.scan.adapter_index.to_string()),
            ("upload_dir".to_string(), self.transfer.upload_dir.clone().unwrap_or_else(|| "(auto)".to_string())),
            ("sendto_command".to_string(), self.transfer.sendto_command.clone()),
        ]
    }

    /// Discovery timing for the core
    pub fn scan_config(&self) -> Result<ScanConfig> {
        let timeout = match self.scan.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let config = ScanConfig::new(Duration::from_millis(self.scan.scan_window_ms))
            .context("Invalid scan window")?
            .with_connect_timeout(timeout);
        Ok(config)
    }

    /// Socket address for the HTTP server
    pub fn socket_addr(&self, port_override: Option<u16>) -> Result<SocketAddr> {
        let ip = self
            .bind_address
            .parse::<std::net::IpAddr>()
            .context("Invalid bind address")?;
        Ok(SocketAddr::new(ip, port_override.unwrap_or(self.listen_port)))
    }

    /// Upload directory, falling back to `<data dir>/uploads`
    pub fn upload_dir(&self) -> Result<PathBuf> {
        match &self.transfer.upload_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::data_dir()?.join("uploads")),
        }
    }
}
