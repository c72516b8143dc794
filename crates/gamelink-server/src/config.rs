//! Server configuration.

use std::time::Duration;

use gamelink_settings::ServerSettings;
use secrecy::SecretString;

/// Configuration for one [`BridgeServer`](crate::BridgeServer) instance.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind. `0` picks an ephemeral port.
    pub port: u16,
    /// Credential clients must present in `hello.sig`. `None` accepts any hello.
    pub shared_secret: Option<SecretString>,
    /// Outbound frames buffered per session.
    pub max_send_queue: usize,
    /// Upper bound for [`BridgeServer::shutdown`](crate::BridgeServer::shutdown).
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            shared_secret: None,
            max_send_queue: 256,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        let shared_secret = (!settings.shared_secret.is_empty())
            .then(|| SecretString::from(settings.shared_secret.clone()));
        Self {
            host: settings.host.clone(),
            port: settings.port,
            shared_secret,
            max_send_queue: settings.max_send_queue.max(1),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}
