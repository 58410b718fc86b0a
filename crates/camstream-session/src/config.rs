use std::fmt;
use std::time::Duration;

use camstream_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};
use camstream_transport::{Endpoint, DEFAULT_PORT};
use serde::Deserialize;

/// Keepalive period used by the device's own clients.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 3000;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default capacity of the media broadcast channel.
pub const DEFAULT_MEDIA_CAPACITY: usize = 1024;

/// Configuration for one device session.
///
/// Deserializable from any serde format; missing fields take their defaults.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Device hostname or IP address.
    pub host: String,
    /// Port serving both the capability query and the stream.
    pub port: u16,
    pub username: String,
    /// Sent to the device in every credentialed request. Never logged.
    pub password: String,
    /// Log in against the main stream (`true`) or the sub stream.
    pub main_stream: bool,
    /// Period of the background keepalive.
    pub keepalive_interval_ms: u64,
    /// Buffered events per subscriber before lagging subscribers skip ahead.
    pub event_capacity: usize,
    /// Buffered media payloads per subscriber. Separate from the event
    /// channel so bulk video never evicts motion or close events.
    pub media_capacity: usize,
    /// Largest inbound or outbound frame payload accepted.
    pub max_payload_size: usize,
}

impl SessionConfig {
    /// Config for `host` with default port and empty credentials.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            main_stream: true,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            media_capacity: DEFAULT_MEDIA_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .field("main_stream", &self.main_stream)
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("event_capacity", &self.event_capacity)
            .field("media_capacity", &self.media_capacity)
            .field("max_payload_size", &self.max_payload_size)
            .finish()
    }
}
