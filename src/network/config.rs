//! Session Configuration
//!
//! One serde-loadable struct for everything tunable. JSON files may omit any
//! field; environment variables override individual knobs on top.
//!
//! | Variable                        | Field                                |
//! |---------------------------------|--------------------------------------|
//! | `REPLICA_SERVER_HZ`             | `server.tick_hz`                     |
//! | `REPLICA_ONLY_SEND_CHANGES`     | `server.only_send_changes`           |
//! | `REPLICA_INTERPOLATE`           | `client.interpolate`                 |
//! | `REPLICA_BARRIER_TIMEOUT_SECS`  | `server.barrier_timeout_secs` (`none` disables) |
//! | `REPLICA_REFRESH_SECS`          | `server.refresh_secs` (`none` disables) |
//! | `REPLICA_DEBUG_MESSAGES`        | `debug_messages`                     |

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::client::ClientConfig;
use super::server::ServerConfig;
use crate::game::movement::MovementConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document did not parse.
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An override variable held an unparseable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

/// Full session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Server role
    pub server: ServerConfig,
    /// Client role
    pub client: ClientConfig,
    /// Shared movement constants
    pub movement: MovementConfig,
    /// Trace every routed message
    pub debug_messages: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            movement: MovementConfig::default(),
            debug_messages: cfg!(feature = "debug-tracing"),
        }
    }
}

impl NetConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults with the process environment applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from any key/value source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(hz) = parse::<f32, _>(&lookup, "REPLICA_SERVER_HZ")? {
            self.server.tick_hz = hz;
        }
        if let Some(flag) = parse_bool(&lookup, "REPLICA_ONLY_SEND_CHANGES")? {
            self.server.only_send_changes = flag;
        }
        if let Some(flag) = parse_bool(&lookup, "REPLICA_INTERPOLATE")? {
            self.client.interpolate = flag;
        }
        if let Some(secs) = parse_optional_secs(&lookup, "REPLICA_BARRIER_TIMEOUT_SECS")? {
            self.server.barrier_timeout_secs = secs;
        }
        if let Some(secs) = parse_optional_secs(&lookup, "REPLICA_REFRESH_SECS")? {
            self.server.refresh_secs = secs;
        }
        if let Some(flag) = parse_bool(&lookup, "REPLICA_DEBUG_MESSAGES")? {
            self.debug_messages = flag;
        }
        debug!(?self, "Configuration overrides applied");
        Ok(())
    }
}

fn parse<V: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &'static str) -> Result<Option<V>, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
        None => Ok(None),
    }
}

/// Seconds, or `none` for `Some(None)`.
fn parse_optional_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &'static str,
) -> Result<Option<Option<f32>>, ConfigError> {
    match lookup(key) {
        Some(raw) if raw.trim().eq_ignore_ascii_case("none") => Ok(Some(None)),
        Some(_) => parse(lookup, key).map(|secs| secs.map(Some)),
        None => Ok(None),
    }
}

fn parse_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError> {
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { key, value: raw }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NetConfig::from_json_str(r#"{ "server": { "tick_hz": 30.0 } }"#).unwrap();
        assert_eq!(config.server.tick_hz, 30.0);
        assert!(config.server.only_send_changes);
        assert_eq!(config.client.init_retry_secs, 0.5);
        assert_eq!(config.movement.speed, 5.0);
    }

    #[test]
    fn test_bad_json_is_error() {
        assert!(matches!(NetConfig::from_json_str("{"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = NetConfig::default();
        config
            .apply_overrides(source(&[
                ("REPLICA_SERVER_HZ", "20"),
                ("REPLICA_ONLY_SEND_CHANGES", "false"),
                ("REPLICA_INTERPOLATE", "off"),
                ("REPLICA_BARRIER_TIMEOUT_SECS", "none"),
                ("REPLICA_REFRESH_SECS", "0.5"),
                ("REPLICA_DEBUG_MESSAGES", "1"),
            ]))
            .unwrap();

        assert_eq!(config.server.tick_hz, 20.0);
        assert!(!config.server.only_send_changes);
        assert!(!config.client.interpolate);
        assert_eq!(config.server.barrier_timeout_secs, None);
        assert_eq!(config.server.refresh_secs, Some(0.5));
        assert!(config.debug_messages);
    }

    #[test]
    fn test_invalid_override_names_key() {
        let mut config = NetConfig::default();
        let err = config
            .apply_overrides(source(&[("REPLICA_SERVER_HZ", "fast")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "REPLICA_SERVER_HZ", .. }));
    }
}
