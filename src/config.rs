//! Daemon configuration.
//!
//! Built-in defaults, overridden by an optional `key = value` file, then by
//! `PROXYBOOT_*` environment variables. Command-line flags are applied on top
//! by the binary.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use macaddr::MacAddr6;
use tracing::warn;

use crate::booter::BootSpec;
use crate::domain::Firmware;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/proxyboot.conf";
const ENV_PREFIX: &str = "PROXYBOOT_";
const IMAGE_KEY_PREFIX: &str = "image_";

const DEFAULT_DHCP_PORT: u16 = 67;
const DEFAULT_TFTP_PORT: u16 = 69;
const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the DHCP and TFTP sockets bind to.
    pub listen_addr: Ipv4Addr,
    pub dhcp_port: u16,
    pub tftp_port: u16,
    /// Port of the HTTP endpoint named in iPXE chainload URLs.
    pub http_port: u16,
    /// Interface used when arrival interfaces cannot be determined.
    pub interface: Option<String>,
    pub log_level: String,
    /// Boot image file per firmware type.
    pub images: HashMap<Firmware, PathBuf>,
    pub kernel: Option<String>,
    pub initrd: Vec<String>,
    pub cmdline: String,
    /// When set, only these machines are offered a boot.
    pub allowed_macs: Option<Vec<MacAddr6>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: Ipv4Addr::UNSPECIFIED,
            dhcp_port: DEFAULT_DHCP_PORT,
            tftp_port: DEFAULT_TFTP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            interface: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            images: HashMap::new(),
            kernel: None,
            initrd: Vec::new(),
            cmdline: String::new(),
            allowed_macs: None,
        }
    }
}

impl Config {
    /// Load defaults, then `path` (if given, or the default path if it
    /// exists), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        let file = match path {
            Some(path) => Some(path),
            None if default_path.exists() => Some(default_path),
            None => None,
        };

        if let Some(file) = file {
            let content = std::fs::read_to_string(file).map_err(|source| ConfigError::Io {
                path: file.display().to_string(),
                source,
            })?;
            config.apply_file(&content)?;
        }

        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `key = value` lines. Blank lines and `#` comments are skipped.
    pub fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConfigError::Invalid(format!("line {}: expected key = value", number + 1))
            })?;
            self.set(key.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Apply `PROXYBOOT_<KEY>` variables; other variables are ignored.
    pub fn apply_env(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                // Read by the binary before loading.
                if key == "CONFIG" {
                    continue;
                }
                self.set(&key.to_lowercase(), &value).map_err(|e| match e {
                    ConfigError::Invalid(message) => {
                        ConfigError::Invalid(format!("{}: {}", name, message))
                    }
                    other => other,
                })?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "listen_addr" => self.listen_addr = parse(key, value)?,
            "dhcp_port" => self.dhcp_port = parse(key, value)?,
            "tftp_port" => self.tftp_port = parse(key, value)?,
            "http_port" => self.http_port = parse(key, value)?,
            "interface" => self.interface = non_empty(value),
            "log_level" => self.log_level = value.to_string(),
            "kernel" => self.kernel = non_empty(value),
            "initrd" => self.initrd = split_list(value).map(str::to_string).collect(),
            "cmdline" => self.cmdline = value.to_string(),
            "allow" => {
                let macs = split_list(value)
                    .map(|mac| parse::<MacAddr6>(key, mac))
                    .collect::<Result<Vec<_>, _>>()?;
                self.allowed_macs = Some(macs);
            }
            _ => match key.strip_prefix(IMAGE_KEY_PREFIX).map(Firmware::from_config_key) {
                Some(Some(firmware)) => {
                    self.images.insert(firmware, PathBuf::from(value));
                }
                Some(None) => {
                    return Err(ConfigError::Invalid(format!("unknown image type in {}", key)));
                }
                None => warn!("Ignoring unknown config key {:?}", key),
            },
        }
        Ok(())
    }

    /// Configured images, in firmware code order.
    pub fn image_paths(&self) -> Vec<(Firmware, PathBuf)> {
        Firmware::ALL
            .iter()
            .filter_map(|fw| self.images.get(fw).map(|path| (*fw, path.clone())))
            .collect()
    }

    /// The static boot spec, if a kernel is configured.
    pub fn boot_spec(&self) -> Option<BootSpec> {
        self.kernel.as_ref().map(|kernel| BootSpec {
            kernel: kernel.clone(),
            initrd: self.initrd.clone(),
            cmdline: self.cmdline.clone(),
        })
    }

    /// Filter directive for `tracing_subscriber::EnvFilter`.
    pub fn tracing_filter(&self) -> String {
        format!("proxyboot={level},proxybootd={level}", level = self.log_level)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid {}: {}", key, value)))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
