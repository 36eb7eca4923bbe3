//! Client configuration loaded from TOML.
//!
//! ```toml
//! relays = ["wss://relay.damus.io", "wss://nos.lol"]
//! connect_timeout_ms = 5000
//! subscription_timeout_ms = 5000
//! max_relays = 16
//! event_store_capacity = 10000
//! ```

use crate::error::{ClientError, Result};
use crate::manager::ManagerConfig;
use crate::relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Public relays used when a config names none.
pub const DEFAULT_RELAYS: [&str; 4] = [
    "wss://relay.damus.io",
    "wss://relay.nostr.band",
    "wss://nos.lol",
    "wss://relay.snort.social",
];

/// Top-level client settings. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Initial relay list; the caller decides when to connect.
    pub relays: Vec<String>,
    pub connect_timeout_ms: u64,
    pub subscription_timeout_ms: u64,
    pub max_relays: usize,
    pub event_store_capacity: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(ToString::to_string).collect(),
            connect_timeout_ms: 5_000,
            subscription_timeout_ms: 5_000,
            max_relays: 16,
            event_store_capacity: None,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|error| ClientError::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), error))
        })?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.subscription_timeout_ms == 0 {
            return Err(ClientError::Config(
                "subscription_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.relays.len() > self.max_relays {
            return Err(ClientError::Config(format!(
                "{} relays configured but max_relays is {}",
                self.relays.len(),
                self.max_relays
            )));
        }
        Ok(())
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_relays: self.max_relays,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            subscription_timeout: Duration::from_millis(self.subscription_timeout_ms),
            event_store_capacity: self.event_store_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() -> Result<()> {
        let config = ClientConfig::from_toml_str("")?;
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.relays.len(), DEFAULT_RELAYS.len());
        assert!(config.relays.iter().all(|relay| relay.starts_with("wss://")));

        let manager = config.manager_config();
        assert_eq!(manager.connect_timeout, Duration::from_secs(5));
        assert_eq!(manager.subscription_timeout, Duration::from_secs(5));
        assert_eq!(manager.max_relays, 16);
        assert_eq!(manager.event_store_capacity, None);
        Ok(())
    }

    #[test]
    fn partial_document_overrides_selected_keys() -> Result<()> {
        let config = ClientConfig::from_toml_str(
            r#"
relays = ["wss://relay.damus.io", "ws://127.0.0.1:7000"]
subscription_timeout_ms = 1500
event_store_capacity = 100
"#,
        )?;
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.connect_timeout_ms, 5_000);
        assert_eq!(
            config.manager_config().subscription_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(config.event_store_capacity, Some(100));
        Ok(())
    }

    #[test]
    fn explicit_empty_relay_list_is_kept() -> Result<()> {
        let config = ClientConfig::from_toml_str("relays = []")?;
        assert!(config.relays.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_invalid_documents() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = vec![
            Case {
                name: "wrong type",
                input: "relays = \"wss://relay.damus.io\"",
                expected_error_fragment: "config error",
            },
            Case {
                name: "zero connect timeout",
                input: "connect_timeout_ms = 0",
                expected_error_fragment: "connect_timeout_ms must be greater than zero",
            },
            Case {
                name: "zero subscription timeout",
                input: "subscription_timeout_ms = 0",
                expected_error_fragment: "subscription_timeout_ms must be greater than zero",
            },
            Case {
                name: "too many relays",
                input: "relays = [\"ws://a\", \"ws://b\"]\nmax_relays = 1",
                expected_error_fragment: "max_relays is 1",
            },
        ];

        for case in cases {
            let result = ClientConfig::from_toml_str(case.input);
            assert!(result.is_err(), "{}: expected an error", case.name);

            if let Err(error) = result {
                let rendered = error.to_string();
                assert!(
                    rendered.contains(case.expected_error_fragment),
                    "{}: expected error fragment '{}' in '{}'",
                    case.name,
                    case.expected_error_fragment,
                    rendered
                );
            }
        }
    }

    #[test]
    fn loads_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "relays = [\"wss://nos.lol\"]")?;
        writeln!(file, "connect_timeout_ms = 250")?;

        let config = ClientConfig::load(file.path())?;
        assert_eq!(config.relays, vec!["wss://nos.lol".to_string()]);
        assert_eq!(
            config.relay_config().connect_timeout,
            Duration::from_millis(250)
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_a_config_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = ClientConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ClientError::Config(_))));
        Ok(())
    }
}
