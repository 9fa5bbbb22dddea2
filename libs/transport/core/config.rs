//! Transport configuration

use crate::engine::EngineConfig;
use std::time::Duration;

/// Configuration for a [`Transport`](crate::Transport)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Sent as `User-Agent` on every request and on the WebSocket upgrade
    pub user_agent: String,

    /// TCP connect (and TLS handshake) deadline for HTTP requests
    pub connect_timeout: Duration,

    /// Overall deadline for one HTTP request, redirects included
    pub request_timeout: Duration,

    /// Deadline for the WebSocket connect + upgrade
    pub handshake_timeout: Duration,

    /// Redirects followed before a request fails
    pub max_redirects: usize,

    /// Largest accepted WebSocket frame payload
    pub max_frame_payload: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("muse-transport/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            max_redirects: 10,
            max_frame_payload: 16 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    /// Create a configuration with the given user agent and default limits
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            user_agent: self.user_agent.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            handshake_timeout: self.handshake_timeout,
            max_redirects: self.max_redirects,
            max_frame_payload: self.max_frame_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = TransportConfig::new("agent/1.0")
            .with_connect_timeout(Duration::from_secs(1))
            .with_request_timeout(Duration::from_secs(2))
            .with_handshake_timeout(Duration::from_secs(3))
            .with_max_redirects(0);

        assert_eq!(config.user_agent, "agent/1.0");
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.max_redirects, 0);

        let engine = config.engine_config();
        assert_eq!(engine.user_agent, "agent/1.0");
        assert_eq!(engine.max_redirects, 0);
    }
}
