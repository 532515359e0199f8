//! Configuration management for partyfinder
//!
//! All configuration is loaded from `./config/partyfinder.toml` unless a path
//! is given on the command line. Defaults live only in the config template.

use crate::artifact::{ArtifactPaths, SchemaPolicy};
use crate::period::Period;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/partyfinder.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/partyfinder.toml");

/// Name of the per-device first-party suffix file.
pub const FIRST_PARTY_FILE: &str = "first_party_domains.txt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    #[error("Unknown manufacturer '{0}' (not present in [manufacturers])")]
    UnknownManufacturer(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub whois: WhoisConfig,
    #[serde(default)]
    pub manufacturers: HashMap<String, ManufacturerTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub base_dir: PathBuf,
    pub output_dir: PathBuf,
    pub years: Vec<String>,
    #[serde(default)]
    pub first_party_file: Option<PathBuf>,
    #[serde(default)]
    pub manufacturer: Option<String>,
}

/// File names inside a period directory.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_domain_list_dir")]
    pub domain_list_dir: String,
    #[serde(default = "default_contacted_domains")]
    pub contacted_domains: String,
    #[serde(default = "default_unique_domains")]
    pub unique_domains: String,
    #[serde(default = "default_ip_domain_map")]
    pub ip_domain_map: String,
}

fn default_domain_list_dir() -> String {
    "domain_list".to_string()
}

fn default_contacted_domains() -> String {
    "contacted_domains.json".to_string()
}

fn default_unique_domains() -> String {
    "unique_domains.json".to_string()
}

fn default_ip_domain_map() -> String {
    "ip_domain_map.pkl".to_string()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            domain_list_dir: default_domain_list_dir(),
            contacted_domains: default_contacted_domains(),
            unique_domains: default_unique_domains(),
            ip_domain_map: default_ip_domain_map(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub unique_wildcard: SchemaPolicy,
}

/// Live WHOIS fallback settings
#[derive(Debug, Clone, Deserialize)]
pub struct WhoisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_whois_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub system_fallback: bool,
    #[serde(default = "default_whois_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub servers_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_whois_timeout_secs() -> u64 {
    10
}

fn default_whois_concurrency() -> usize {
    1
}

impl Default for WhoisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_whois_timeout_secs(),
            system_fallback: true,
            concurrency: default_whois_concurrency(),
            servers_file: None,
        }
    }
}

/// Static manufacturer -> domain table
#[derive(Debug, Clone, Deserialize)]
pub struct ManufacturerTable {
    #[serde(default)]
    pub version: String,
    pub domains: Vec<String>,
}

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub years: Option<Vec<String>>,
    pub wildcard_policy: Option<SchemaPolicy>,
    pub disable_whois: bool,
    pub whois_timeout_secs: Option<u64>,
    pub whois_concurrency: Option<usize>,
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl AppConfig {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and re-validate.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(device) = &overrides.device {
            self.device.id = device.clone();
        }
        if let Some(base_dir) = &overrides.base_dir {
            self.device.base_dir = base_dir.clone();
        }
        if let Some(output_dir) = &overrides.output_dir {
            self.device.output_dir = output_dir.clone();
        }
        if let Some(years) = &overrides.years {
            self.device.years = years.clone();
        }
        if let Some(policy) = overrides.wildcard_policy {
            self.schema.unique_wildcard = policy;
        }
        if overrides.disable_whois {
            self.whois.enabled = false;
        }
        if let Some(secs) = overrides.whois_timeout_secs {
            self.whois.timeout_secs = secs;
        }
        if let Some(concurrency) = overrides.whois_concurrency {
            self.whois.concurrency = concurrency;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.id.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "device.id".to_string(),
            });
        }
        if self.device.id.contains('/') || self.device.id.contains('\\') {
            return Err(ConfigError::InvalidValue {
                field: "device.id".to_string(),
                value: self.device.id.clone(),
            });
        }
        if self.device.years.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "device.years".to_string(),
            });
        }
        for year in &self.device.years {
            if year.is_empty() || !year.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::InvalidValue {
                    field: "device.years".to_string(),
                    value: year.clone(),
                });
            }
        }

        for (field, value) in [
            ("artifacts.domain_list_dir", &self.artifacts.domain_list_dir),
            ("artifacts.contacted_domains", &self.artifacts.contacted_domains),
            ("artifacts.unique_domains", &self.artifacts.unique_domains),
            ("artifacts.ip_domain_map", &self.artifacts.ip_domain_map),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: field.to_string(),
                });
            }
        }

        if self.whois.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "whois.timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.whois.concurrency == 0 || self.whois.concurrency > 32 {
            return Err(ConfigError::InvalidValue {
                field: "whois.concurrency (1-32)".to_string(),
                value: self.whois.concurrency.to_string(),
            });
        }

        if let Some(name) = &self.device.manufacturer {
            if !self.manufacturers.contains_key(name) {
                return Err(ConfigError::UnknownManufacturer(name.clone()));
            }
        }

        Ok(())
    }

    /// `<base_dir>/<device>`
    pub fn device_dir(&self) -> PathBuf {
        expand_home(&self.device.base_dir).join(&self.device.id)
    }

    /// `<base_dir>/<device>/<year>/<Mon>_<year>`
    pub fn period_dir(&self, period: &Period) -> PathBuf {
        self.device_dir().join(&period.year).join(period.folder_name())
    }

    /// Artifact locations for a period. When the configured IP map is absent
    /// but a `.json` sibling exists, the sibling is used.
    pub fn artifact_paths(&self, period: &Period) -> ArtifactPaths {
        let list_dir = self.period_dir(period).join(&self.artifacts.domain_list_dir);
        let mut ip_map = list_dir.join(&self.artifacts.ip_domain_map);
        if !ip_map.exists() {
            let json_sibling = ip_map.with_extension("json");
            if json_sibling.exists() {
                ip_map = json_sibling;
            }
        }

        ArtifactPaths {
            contacted: list_dir.join(&self.artifacts.contacted_domains),
            unique: list_dir.join(&self.artifacts.unique_domains),
            ip_map,
        }
    }

    /// Path of the device's first-party suffix file.
    pub fn first_party_file(&self) -> PathBuf {
        match &self.device.first_party_file {
            Some(path) => expand_home(path),
            None => self.device_dir().join(FIRST_PARTY_FILE),
        }
    }

    /// Domains from the selected manufacturer table, if any.
    pub fn manufacturer_domains(&self) -> &[String] {
        self.device
            .manufacturer
            .as_ref()
            .and_then(|name| self.manufacturers.get(name))
            .map(|table| table.domains.as_slice())
            .unwrap_or(&[])
    }

    /// `<output_dir>/<device>`
    pub fn device_output_dir(&self) -> PathBuf {
        expand_home(&self.device.output_dir).join(&self.device.id)
    }

    /// Create default configuration file at `path`
    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config_at(path)?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}
