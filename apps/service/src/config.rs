use std::{env, fmt, fs, path, time::Duration};

use metadata_trust::{RoleType, TrustStoreConfiguration};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to write config file {}: {source}", .path.display())]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config directory available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub trust_anchors: TrustAnchorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Base URI per-entity metadata is fetched from
    pub source_uri: String,
    pub environment: String,
    pub min_refresh_delay_secs: u64,
    pub max_refresh_delay_secs: u64,
    /// Role descriptors whose certificates must chain to the entity's anchor
    pub filter_roles: Vec<RoleType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAnchorConfig {
    /// JWK Set locations, tried in order
    pub uris: Vec<String>,
    pub refresh_interval_secs: u64,
    pub min_refresh_delay_secs: u64,
    /// Keystore every anchor's leaf certificate must chain to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore: Option<TrustStoreConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
    pub stats_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
            stats_interval_secs: 300,
        }
    }
}

impl MetadataConfig {
    pub fn min_refresh_delay(&self) -> Duration {
        Duration::from_secs(self.min_refresh_delay_secs)
    }

    pub fn max_refresh_delay(&self) -> Duration {
        Duration::from_secs(self.max_refresh_delay_secs)
    }
}

impl TrustAnchorConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn min_refresh_delay(&self) -> Duration {
        Duration::from_secs(self.min_refresh_delay_secs)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/federation-trust/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("federation-trust/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata: MetadataConfig {
                source_uri: "https://metadata.federation.example/entity".into(),
                environment: "production".into(),
                min_refresh_delay_secs: 60,
                max_refresh_delay_secs: 600,
                filter_roles: vec![RoleType::IdpSso],
            },
            trust_anchors: TrustAnchorConfig {
                uris: vec!["https://trust-anchors.federation.example/jwks".into()],
                refresh_interval_secs: 3600,
                min_refresh_delay_secs: 5,
                keystore: None,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        let roles = self
            .metadata
            .filter_roles
            .iter()
            .map(RoleType::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let anchor_uris = self.trust_anchors.uris.join(", ");
        let keystore = self
            .trust_anchors
            .keystore
            .as_ref()
            .map(|keystore| keystore.path.display().to_string())
            .unwrap_or_else(|| "(none)".into());

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Metadata")?;
        write_1(f, "Source URI", &self.metadata.source_uri)?;
        write_1(f, "Environment", &self.metadata.environment)?;
        write_1(f, "Min Refresh Delay (s)", &self.metadata.min_refresh_delay_secs)?;
        write_1(f, "Max Refresh Delay (s)", &self.metadata.max_refresh_delay_secs)?;
        write_1(f, "Filtered Roles", &roles)?;
        write_title_1(f, "Trust Anchors")?;
        write_1(f, "URIs", &anchor_uris)?;
        write_1(f, "Refresh Interval (s)", &self.trust_anchors.refresh_interval_secs)?;
        write_1(f, "Keystore", &keystore)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/federation-trust/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadFailed {
                path: config_path.clone(),
                source,
            })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;
        let write_failed = |source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }
}
