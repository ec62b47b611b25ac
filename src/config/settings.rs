use std::time::Duration;

use serde::Deserialize;

use crate::utils::{BrokerError, Result};

/// Smallest encoded message: four u16 length/type fields plus the checksum.
pub const MIN_MSG_SIZE: usize = crate::broker::message::MIN_ENCODED_LEN;

/// Length prefixes on the wire are u16, so no message can be larger.
pub const MAX_WIRE_MSG_SIZE: usize = u16::MAX as usize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listeners, the broker engine, the client and
/// logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Bind address and the two listener ports.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub send_port: u16,
    pub fetch_port: u16,
}

/// Operational parameters of the broker engine.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Upper bound on an encoded message, in bytes.
    pub max_msg_size: usize,
    /// Decode attempts allowed per inbound connection.
    pub max_tries: u32,
    pub dispatch_interval_ms: u64,
    pub read_timeout_ms: u64,
    /// Connections served concurrently by each listener.
    pub max_connections: usize,
    /// 0 disables expiry.
    pub message_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub max_retries: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled
/// from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub send_port: Option<u16>,
    pub fetch_port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_msg_size: Option<usize>,
    pub max_tries: Option<u32>,
    pub dispatch_interval_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub max_connections: Option<usize>,
    pub message_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                send_port: 18888,
                fetch_port: 18889,
            },
            broker: BrokerSettings {
                max_msg_size: 4096,
                max_tries: 3,
                dispatch_interval_ms: 2000,
                read_timeout_ms: 5000,
                max_connections: 16,
                message_ttl_secs: 0,
            },
            client: ClientSettings {
                max_retries: 3,
                timeout_ms: 5000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlay whatever was specified on top of `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let client = self.client.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                send_port: server.send_port.unwrap_or(default.server.send_port),
                fetch_port: server.fetch_port.unwrap_or(default.server.fetch_port),
            },
            broker: BrokerSettings {
                max_msg_size: broker.max_msg_size.unwrap_or(default.broker.max_msg_size),
                max_tries: broker.max_tries.unwrap_or(default.broker.max_tries),
                dispatch_interval_ms: broker
                    .dispatch_interval_ms
                    .unwrap_or(default.broker.dispatch_interval_ms),
                read_timeout_ms: broker
                    .read_timeout_ms
                    .unwrap_or(default.broker.read_timeout_ms),
                max_connections: broker
                    .max_connections
                    .unwrap_or(default.broker.max_connections),
                message_ttl_secs: broker
                    .message_ttl_secs
                    .unwrap_or(default.broker.message_ttl_secs),
            },
            client: ClientSettings {
                max_retries: client.max_retries.unwrap_or(default.client.max_retries),
                timeout_ms: client.timeout_ms.unwrap_or(default.client.timeout_ms),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

impl Settings {
    /// Reject combinations the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let broker = &self.broker;
        if !(MIN_MSG_SIZE..=MAX_WIRE_MSG_SIZE).contains(&broker.max_msg_size) {
            return Err(invalid(format!(
                "broker.max_msg_size must be within {MIN_MSG_SIZE}..={MAX_WIRE_MSG_SIZE}, got {}",
                broker.max_msg_size
            )));
        }
        if broker.max_tries == 0 {
            return Err(invalid("broker.max_tries must be at least 1"));
        }
        if broker.dispatch_interval_ms == 0 {
            return Err(invalid("broker.dispatch_interval_ms must be at least 1"));
        }
        if broker.max_connections == 0 {
            return Err(invalid("broker.max_connections must be at least 1"));
        }
        if self.server.send_port != 0 && self.server.send_port == self.server.fetch_port {
            return Err(invalid(format!(
                "server.send_port and server.fetch_port must differ, both are {}",
                self.server.send_port
            )));
        }
        Ok(())
    }

    pub fn send_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.send_port)
    }

    pub fn fetch_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.fetch_port)
    }
}

impl BrokerSettings {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn message_ttl(&self) -> Option<Duration> {
        (self.message_ttl_secs > 0).then(|| Duration::from_secs(self.message_ttl_secs))
    }
}

impl ClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn invalid(message: impl Into<String>) -> BrokerError {
    BrokerError::InvalidConfig {
        message: message.into(),
    }
}
