//! Engine connection configuration.

use serde::{Deserialize, Serialize};

/// Environment variable naming the engine endpoint.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// How a [`crate::Pool`] reaches the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Engine address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// `None` uses the platform's local default socket.
    pub docker_host: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Negotiate the API version with the daemon on connect
    pub negotiate_version: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            timeout_seconds: 120,
            negotiate_version: true,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the endpoint taken from `DOCKER_HOST` when set.
    pub fn from_env() -> Self {
        let docker_host = std::env::var(DOCKER_HOST_ENV)
            .ok()
            .filter(|host| !host.trim().is_empty());
        Self {
            docker_host,
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn negotiate_version(mut self, enabled: bool) -> Self {
        self.negotiate_version = enabled;
        self
    }
}
