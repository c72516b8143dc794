//! Settings types. Every struct deserializes with `default`, so a partial
//! file only overrides what it names.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GamelinkSettings {
    /// Listener and session settings.
    pub server: ServerSettings,
    /// Dynamic sub-command settings.
    pub commands: CommandSettings,
    /// Simulation tick settings.
    pub tick: TickSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl GamelinkSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if !(1..=1000).contains(&self.tick.ticks_per_second) {
            return Err(SettingsError::InvalidValue(format!(
                "tick.ticksPerSecond must be 1..=1000, got {}",
                self.tick.ticks_per_second
            )));
        }
        if self.commands.root_label.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "commands.rootLabel must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket port. `0` picks an ephemeral port.
    pub port: u16,
    /// Credential a client must present in `hello.sig`. Empty accepts any hello.
    pub shared_secret: String,
    /// Outbound frames buffered per session. Events beyond it are dropped;
    /// reading commands pauses until their replies fit.
    pub max_send_queue: usize,
    /// Upper bound on waiting for the server to quiesce on stop.
    pub shutdown_timeout_ms: u64,
    /// Pause between stopping the old server and starting the new one on reload.
    pub reload_grace_ms: u64,
}

impl ServerSettings {
    /// [`Self::shutdown_timeout_ms`] as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// [`Self::reload_grace_ms`] as a `Duration`.
    pub fn reload_grace(&self) -> Duration {
        Duration::from_millis(self.reload_grace_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            shared_secret: String::new(),
            max_send_queue: 256,
            shutdown_timeout_ms: 10_000,
            reload_grace_ms: 150,
        }
    }
}

/// Dynamic sub-command settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSettings {
    /// Static root command every dynamic sub-command lives under.
    pub root_label: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            root_label: "gamelink".to_string(),
        }
    }
}

/// Simulation tick settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TickSettings {
    /// Ticks per second, `1..=1000`.
    pub ticks_per_second: u32,
}

impl TickSettings {
    /// Time between tick starts.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            ticks_per_second: 20,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`).
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = GamelinkSettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 3001);
        assert!(s.server.shared_secret.is_empty());
        assert_eq!(s.server.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(s.server.reload_grace(), Duration::from_millis(150));
        assert_eq!(s.commands.root_label, "gamelink");
        assert_eq!(s.tick.interval(), Duration::from_millis(50));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn camel_case_keys() {
        let v = serde_json::to_value(GamelinkSettings::default()).unwrap();
        assert!(v["server"].get("sharedSecret").is_some());
        assert!(v["server"].get("shutdownTimeoutMs").is_some());
        assert!(v["commands"].get("rootLabel").is_some());
        assert!(v["tick"].get("ticksPerSecond").is_some());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let s: GamelinkSettings =
            serde_json::from_str(r#"{"server":{"port":4000}}"#).unwrap();
        assert_eq!(s.server.port, 4000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.commands.root_label, "gamelink");
    }

    #[test]
    fn validate_rejects_zero_queue() {
        let mut s = GamelinkSettings::default();
        s.server.max_send_queue = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_tick_rate() {
        let mut s = GamelinkSettings::default();
        s.tick.ticks_per_second = 0;
        assert!(s.validate().is_err());
        s.tick.ticks_per_second = 5000;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_root() {
        let mut s = GamelinkSettings::default();
        s.commands.root_label = "  ".into();
        assert!(s.validate().is_err());
    }
}
