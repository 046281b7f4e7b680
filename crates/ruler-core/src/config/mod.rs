mod logging;
mod ring;

pub use logging::LoggingConfig;
pub use ring::RingConfig;

use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RulerError};

static ENV_VAR: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern")
});

/// Root configuration for a ruler instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulerConfig {
    /// Identity of this instance in the ring.
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Ring membership configuration.
    #[serde(default)]
    pub ring: RingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RulerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RulerError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| RulerError::Config(format!("Failed to parse config: {}", e)))?;
        config.ring.validate()?;
        Ok(config)
    }
}

/// Instance identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance ID. The binary falls back to the hostname.
    pub id: Option<String>,

    /// Address advertised in the ring.
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Availability zone.
    #[serde(default)]
    pub zone: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: None,
            addr: default_addr(),
            zone: String::new(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:9095".to_string()
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    for cap in ENV_VAR.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
