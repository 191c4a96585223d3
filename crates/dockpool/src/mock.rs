//! Mock container engine for testing.
//!
//! Provides a scriptable implementation of the ContainerEngine trait for use
//! in tests without a running Docker daemon. Inspect results, health events
//! and per-method failures are configured up front; every call is captured
//! for verification.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::engine::{ContainerEngine, ContainerSnapshot, HealthEvent, HealthEventStream, HealthStatus};
use crate::error::{PoolError, PoolResult};
use crate::options::RunSpec;
use crate::resource::PortMap;

/// How the scripted health event stream ends after its queued events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStreamEnd {
    /// Stay open without yielding anything else.
    Pending,
    /// Yield a transport error.
    Error(String),
    /// End the stream.
    Close,
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    /// Image reference or container id the call addressed.
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
struct MockContainer {
    running: bool,
    auto_remove: bool,
    created: DateTime<Utc>,
}

/// Mock container engine for testing.
#[derive(Clone)]
pub struct MockEngine {
    /// Whether ping succeeds.
    available: Arc<RwLock<bool>>,
    /// Images that "exist" locally.
    existing_images: Arc<RwLock<Vec<String>>>,
    /// Images the registry does not know.
    missing_images: Arc<RwLock<Vec<String>>>,
    /// Health reported by successive inspects; the last entry repeats.
    health: Arc<RwLock<VecDeque<Option<HealthStatus>>>>,
    /// Published ports reported by inspect.
    ports: Arc<RwLock<PortMap>>,
    /// Actions yielded by health event subscriptions.
    events: Arc<RwLock<Vec<String>>>,
    /// Timestamped events the engine has recorded; replayed by `since`.
    history: Arc<RwLock<Vec<HealthEvent>>>,
    /// Actions recorded right after successive inspects.
    after_inspect: Arc<RwLock<VecDeque<String>>>,
    events_end: Arc<RwLock<EventStreamEnd>>,
    /// Method name to the error message it fails with.
    failures: Arc<RwLock<HashMap<String, String>>>,
    containers: Arc<RwLock<HashMap<String, MockContainer>>>,
    created_specs: Arc<RwLock<Vec<RunSpec>>>,
    pull_platforms: Arc<RwLock<Vec<Option<String>>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a new mock engine: reachable, no images, no healthcheck.
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            existing_images: Arc::new(RwLock::new(Vec::new())),
            missing_images: Arc::new(RwLock::new(Vec::new())),
            health: Arc::new(RwLock::new(VecDeque::new())),
            ports: Arc::new(RwLock::new(PortMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            after_inspect: Arc::new(RwLock::new(VecDeque::new())),
            events_end: Arc::new(RwLock::new(EventStreamEnd::Pending)),
            failures: Arc::new(RwLock::new(HashMap::new())),
            containers: Arc::new(RwLock::new(HashMap::new())),
            created_specs: Arc::new(RwLock::new(Vec::new())),
            pull_platforms: Arc::new(RwLock::new(Vec::new())),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = available;
        self
    }

    /// Add an image that should "exist" locally.
    pub fn add_existing_image(self, image: impl Into<String>) -> Self {
        self.existing_images.write().push(image.into());
        self
    }

    /// Make pulls of `image` fail as if the registry had no such tag.
    pub fn add_missing_image(self, image: impl Into<String>) -> Self {
        self.missing_images.write().push(image.into());
        self
    }

    /// Health reported by every inspect.
    pub fn with_health(self, health: Option<HealthStatus>) -> Self {
        *self.health.write() = VecDeque::from([health]);
        self
    }

    /// Health reported by successive inspects; the last value repeats.
    pub fn with_health_sequence(self, sequence: Vec<Option<HealthStatus>>) -> Self {
        *self.health.write() = sequence.into();
        self
    }

    pub fn with_ports(self, ports: PortMap) -> Self {
        *self.ports.write() = ports;
        self
    }

    /// Queue a health event action for every subscription.
    pub fn add_health_event(self, action: impl Into<String>) -> Self {
        self.events.write().push(action.into());
        self
    }

    /// Record `action` for the inspected container right after the next
    /// inspect not yet claimed by an earlier call.
    pub fn with_transition_after_inspect(self, action: impl Into<String>) -> Self {
        self.after_inspect.write().push_back(action.into());
        self
    }

    /// Record a health event for `id` at the current time.
    pub fn record_health_event(&self, id: &str, action: impl Into<String>) {
        self.history.write().push(HealthEvent {
            container_id: id.to_string(),
            action: action.into(),
            time: Some(Utc::now()),
        });
    }

    pub fn with_events_end(self, end: EventStreamEnd) -> Self {
        *self.events_end.write() = end;
        self
    }

    /// Make `method` fail with `message`.
    pub fn fail_method(self, method: &str, message: impl Into<String>) -> Self {
        self.failures.write().insert(method.to_string(), message.into());
        self
    }

    /// Ids of containers that have been created and not yet removed.
    pub fn live_containers(&self) -> Vec<String> {
        self.containers.read().keys().cloned().collect()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.containers
            .read()
            .get(id)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Specs passed to create_container, in call order.
    pub fn created_specs(&self) -> Vec<RunSpec> {
        self.created_specs.read().clone()
    }

    /// Platform hints passed to pull_image, in call order.
    pub fn pull_platforms(&self) -> Vec<Option<String>> {
        self.pull_platforms.read().clone()
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.method == method)
    }

    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    fn record_call(&self, method: &str, target: Option<&str>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            target: target.map(str::to_string),
        });
    }

    fn check_failure(&self, method: &str) -> PoolResult<()> {
        match self.failures.read().get(method) {
            Some(message) => Err(PoolError::Engine(message.clone())),
            None => Ok(()),
        }
    }

    fn next_health(&self) -> Option<HealthStatus> {
        let mut health = self.health.write();
        if health.len() > 1 {
            health.pop_front().flatten()
        } else {
            health.front().copied().flatten()
        }
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> PoolResult<()> {
        self.record_call("ping", None);
        if *self.available.read() {
            Ok(())
        } else {
            Err(PoolError::DockerNotAvailable("mock engine is offline".into()))
        }
    }

    async fn image_exists(&self, image: &str) -> PoolResult<bool> {
        self.record_call("image_exists", Some(image));
        self.check_failure("image_exists")?;
        Ok(self.existing_images.read().iter().any(|i| i == image))
    }

    async fn pull_image(&self, image: &str, platform: Option<&str>) -> PoolResult<()> {
        self.record_call("pull_image", Some(image));
        self.pull_platforms.write().push(platform.map(str::to_string));
        self.check_failure("pull_image")?;
        if self.missing_images.read().iter().any(|i| i == image) {
            return Err(PoolError::ImageNotFound(image.to_string()));
        }
        self.existing_images.write().push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &RunSpec) -> PoolResult<String> {
        self.record_call("create_container", Some(spec.image()));
        self.check_failure("create_container")?;
        let id = format!("mock-{}", Uuid::new_v4().simple());
        let auto_remove = spec.host.as_ref().map_or(true, |h| h.auto_remove);
        self.containers.write().insert(
            id.clone(),
            MockContainer {
                running: false,
                auto_remove,
                created: Utc::now(),
            },
        );
        self.created_specs.write().push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> PoolResult<()> {
        self.record_call("start_container", Some(id));
        self.check_failure("start_container")?;
        match self.containers.write().get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(PoolError::NotFound(id.to_string())),
        }
    }

    async fn inspect_container(&self, id: &str) -> PoolResult<ContainerSnapshot> {
        self.record_call("inspect_container", Some(id));
        self.check_failure("inspect_container")?;
        let created = match self.containers.read().get(id) {
            Some(container) => container.created,
            None => return Err(PoolError::NotFound(id.to_string())),
        };
        let snapshot = ContainerSnapshot {
            id: id.to_string(),
            health: self.next_health(),
            created: Some(created),
            ports: self.ports.read().clone(),
        };
        let transition = self.after_inspect.write().pop_front();
        if let Some(action) = transition {
            self.record_health_event(id, action);
        }
        Ok(snapshot)
    }

    fn health_events(&self, id: &str, since: DateTime<Utc>) -> HealthEventStream {
        self.record_call("health_events", Some(id));
        let container_id = id.to_string();

        // Like the daemon, the history is only read once the stream is polled.
        let history = Arc::clone(&self.history);
        let replay_id = container_id.clone();
        let replay = stream::once(async move {
            let replayed: Vec<PoolResult<HealthEvent>> = history
                .read()
                .iter()
                .filter(|e| e.container_id == replay_id && e.time.map_or(false, |t| t >= since))
                .cloned()
                .map(Ok)
                .collect();
            stream::iter(replayed)
        })
        .flatten();

        let queued: Vec<PoolResult<HealthEvent>> = self
            .events
            .read()
            .iter()
            .map(|action| Ok(HealthEvent::new(container_id.clone(), action.clone())))
            .collect();

        let tail: HealthEventStream = match self.events_end.read().clone() {
            EventStreamEnd::Pending => stream::pending().boxed(),
            EventStreamEnd::Error(message) => {
                stream::once(async move { Err(PoolError::Engine(message)) }).boxed()
            }
            EventStreamEnd::Close => stream::empty().boxed(),
        };

        replay.chain(stream::iter(queued)).chain(tail).boxed()
    }

    async fn kill_container(&self, id: &str) -> PoolResult<()> {
        self.record_call("kill_container", Some(id));
        self.check_failure("kill_container")?;
        let mut containers = self.containers.write();
        match containers.get(id).cloned() {
            None => Err(PoolError::NotFound(id.to_string())),
            Some(container) if !container.running => Err(PoolError::Engine(format!(
                "container {} is not running",
                id
            ))),
            Some(container) => {
                if container.auto_remove {
                    containers.remove(id);
                } else if let Some(c) = containers.get_mut(id) {
                    c.running = false;
                }
                Ok(())
            }
        }
    }

    async fn remove_container(&self, id: &str) -> PoolResult<()> {
        self.record_call("remove_container", Some(id));
        self.check_failure("remove_container")?;
        match self.containers.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(PoolError::NotFound(id.to_string())),
        }
    }
}
