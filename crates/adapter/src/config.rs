//! Adapter configuration management
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [[devices]]
//! name = "stlink"
//! vendor_id = "0x0483"
//! product_id = "0x5740"
//! ```
//!
//! Transfer timeouts are fixed and deliberately absent from the file.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub general: GeneralSettings,
    /// Named devices usable in place of VID/PID pairs
    #[serde(default)]
    pub devices: Vec<DeviceAlias>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
}

/// A named VID/PID pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAlias {
    pub name: String,
    /// Hex with `0x` prefix, e.g. "0x0483"
    pub vendor_id: String,
    /// Hex with `0x` prefix, e.g. "0x5740"
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DeviceAlias {
    /// Parsed `(vendor_id, product_id)`
    pub fn ids(&self) -> Result<(u16, u16)> {
        Ok((
            parse_hex_id(&self.vendor_id, "VID")?,
            parse_hex_id(&self.product_id, "PID")?,
        ))
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
            },
            devices: Vec::new(),
        }
    }
}

impl AdapterConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-adapter/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AdapterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-adapter").join("config.toml")
        } else {
            PathBuf::from(".config/usb-adapter/config.toml")
        }
    }

    /// Look up a device alias by name
    pub fn find_alias(&self, name: &str) -> Option<&DeviceAlias> {
        self.devices.iter().find(|alias| alias.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        let mut names = HashSet::new();
        for alias in &self.devices {
            if alias.name.is_empty() {
                return Err(anyhow!("Empty device name in devices list"));
            }
            if !names.insert(alias.name.as_str()) {
                return Err(anyhow!("Duplicate device name '{}'", alias.name));
            }
            alias.ids()?;
        }

        Ok(())
    }
}

/// Parse a `0x`-prefixed hex ID of 1-4 digits
pub fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
        return Err(anyhow!(
            "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
            name,
            id
        ));
    };

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<AdapterConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    AdapterConfig::load(Some(path_buf))
}
