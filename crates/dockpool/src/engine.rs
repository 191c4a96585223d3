//! Container engine trait and the snapshots it reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::PoolResult;
use crate::options::RunSpec;
use crate::resource::PortMap;

/// Event action emitted when a container's probe first passes.
pub const HEALTHY_ACTION: &str = "health_status: healthy";

/// Event action emitted when a container's probe keeps failing.
pub const UNHEALTHY_ACTION: &str = "health_status: unhealthy";

/// Live health of a container as reported by inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No healthcheck configured
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    /// Whether a container in this state can be handed out without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::None | Self::Healthy)
    }
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSnapshot {
    pub id: String,
    /// `None` when the engine reports no health section at all.
    pub health: Option<HealthStatus>,
    /// Creation time on the engine's clock.
    pub created: Option<DateTime<Utc>>,
    pub ports: PortMap,
}

impl ContainerSnapshot {
    pub fn is_ready(&self) -> bool {
        self.health.map_or(true, |h| h.is_ready())
    }
}

/// A health status change for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    pub container_id: String,
    /// Engine action string, e.g. `health_status: healthy`.
    pub action: String,
    pub time: Option<DateTime<Utc>>,
}

impl HealthEvent {
    pub fn new(container_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            action: action.into(),
            time: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.action == HEALTHY_ACTION
    }

    pub fn is_unhealthy(&self) -> bool {
        self.action == UNHEALTHY_ACTION
    }
}

/// Health events for one container; an `Err` item or the end of the stream
/// means the subscription is broken.
pub type HealthEventStream = BoxStream<'static, PoolResult<HealthEvent>>;

/// The slice of a container engine the pool drives.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable.
    async fn ping(&self) -> PoolResult<()>;

    /// Check if an image exists locally.
    async fn image_exists(&self, image: &str) -> PoolResult<bool>;

    /// Pull an image, optionally for a specific platform.
    async fn pull_image(&self, image: &str, platform: Option<&str>) -> PoolResult<()>;

    /// Create a container from a validated spec and return its id.
    async fn create_container(&self, spec: &RunSpec) -> PoolResult<String>;

    async fn start_container(&self, id: &str) -> PoolResult<()>;

    async fn inspect_container(&self, id: &str) -> PoolResult<ContainerSnapshot>;

    /// Subscribe to health status changes of one container, starting with
    /// those recorded at or after `since`.
    ///
    /// The subscription may only be established on the first poll; events
    /// between `since` and that point must still be delivered.
    fn health_events(&self, id: &str, since: DateTime<Utc>) -> HealthEventStream;

    /// Kill the container without signal negotiation.
    async fn kill_container(&self, id: &str) -> PoolResult<()>;

    /// Force-remove the container, running or not.
    async fn remove_container(&self, id: &str) -> PoolResult<()>;
}
