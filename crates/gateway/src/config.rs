//! Gateway configuration.

use ledgerbench_types::{ChainId, TxKind};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,

    /// Ledger endpoint (base URL).
    pub endpoint: String,

    /// Number of signing identities requests are spread over.
    pub identities: usize,

    /// Seed the identities are derived from.
    pub key_seed: u64,

    /// Transaction kinds requests may ask for.
    pub enabled_kinds: Vec<TxKind>,

    /// Chain targeted by cross-chain messages.
    pub target_chain: ChainId,

    /// Maximum submissions in flight across all requests.
    pub max_in_flight: usize,

    /// How long a request waits for its confirmation.
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Duration,

    /// Recently observed hashes remembered for late registrations.
    pub recent_cache_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
            endpoint: "http://127.0.0.1:8080".to_string(),
            identities: 16,
            key_seed: 1000,
            enabled_kinds: TxKind::ALL.to_vec(),
            target_chain: ChainId(2),
            max_in_flight: 256,
            confirmation_timeout: Duration::from_secs(30),
            recent_cache_size: 4096,
        }
    }
}

impl GatewayConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identities == 0 {
            return Err(ConfigError::Invalid("identities cannot be 0".into()));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight cannot be 0".into()));
        }
        if self.enabled_kinds.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one transaction kind must be enabled".into(),
            ));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "confirmation_timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Whether requests may ask for `kind`.
    pub fn is_enabled(&self, kind: TxKind) -> bool {
        self.enabled_kinds.contains(&kind)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_identities(mut self, identities: usize) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_key_seed(mut self, seed: u64) -> Self {
        self.key_seed = seed;
        self
    }

    pub fn with_enabled_kinds(mut self, kinds: Vec<TxKind>) -> Self {
        self.enabled_kinds = kinds;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert!(TxKind::ALL.iter().all(|k| config.is_enabled(*k)));
    }

    #[test]
    fn test_parse_toml() {
        let config = GatewayConfig::from_toml_str(
            r#"
            listen_addr = "0.0.0.0:9100"
            identities = 4
            enabled_kinds = ["transfer", "invoke"]
            confirmation_timeout = "2s"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.identities, 4);
        assert!(!config.is_enabled(TxKind::CrossChain));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_validation() {
        assert!(GatewayConfig::default().with_identities(0).validate().is_err());
        assert!(GatewayConfig::default()
            .with_enabled_kinds(Vec::new())
            .validate()
            .is_err());
        assert!(matches!(
            GatewayConfig::from_toml_str("max_in_flight = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "identities = 2\n").unwrap();
        assert_eq!(GatewayConfig::from_file(&path).unwrap().identities, 2);
    }
}
