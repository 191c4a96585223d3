//! The resource pool: provision ready containers and tear them down.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::docker::DockerEngine;
use crate::engine::ContainerEngine;
use crate::error::{PoolError, PoolResult, Step};
use crate::options::{RunOption, RunSpec};
use crate::readiness::{wait_until_healthy, Readiness};
use crate::resource::Resource;

/// Handle to one container engine connection.
///
/// Cloning is cheap and clones share the connection. `run` and `purge` keep
/// no state on the pool, so any number of them may run concurrently.
#[derive(Clone)]
pub struct Pool {
    engine: Arc<dyn ContainerEngine>,
}

impl Pool {
    /// Connect to the engine named by `DOCKER_HOST`, or the local default.
    pub async fn new() -> PoolResult<Self> {
        Self::connect(&PoolConfig::from_env()).await
    }

    pub async fn connect(config: &PoolConfig) -> PoolResult<Self> {
        let engine = DockerEngine::connect(config).await?;
        Ok(Self::with_engine(engine))
    }

    /// Use a custom engine, such as [`crate::MockEngine`].
    pub fn with_engine(engine: impl ContainerEngine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    /// Provision a container from `image` and `options` and wait until it is
    /// ready.
    ///
    /// Any failure after the container exists removes it before the error is
    /// returned. Cancellation through `cancel` is the exception: the call
    /// returns [`PoolError::Cancelled`] right away and the container, if one
    /// was created, is left for the caller to purge via
    /// [`PoolError::orphan`].
    pub async fn run(
        &self,
        image: &str,
        options: impl IntoIterator<Item = RunOption>,
        cancel: &CancellationToken,
    ) -> PoolResult<Resource> {
        let spec = RunSpec::build(image, options)?;
        self.run_spec(&spec, cancel).await
    }

    /// Like [`Pool::run`], for a spec built ahead of time.
    pub async fn run_spec(&self, spec: &RunSpec, cancel: &CancellationToken) -> PoolResult<Resource> {
        spec.validate()?;
        self.ensure_image(spec.image(), spec.platform.as_deref(), cancel)
            .await?;

        let id = guarded(
            cancel,
            Step::CreateContainer,
            None,
            self.engine.create_container(spec),
        )
        .await?;
        debug!("Created container {} from {}", id, spec.image());

        if let Err(err) = guarded(
            cancel,
            Step::StartContainer,
            Some(&id),
            self.engine.start_container(&id),
        )
        .await
        {
            if !err.is_cancelled() {
                self.discard(&id, false).await;
            }
            return Err(err);
        }

        match self.wait_ready(spec, &id, cancel).await {
            Ok(resource) => Ok(resource),
            Err(err) => {
                if !err.is_cancelled() {
                    self.discard(&id, true).await;
                }
                Err(err)
            }
        }
    }

    /// Kill the container behind `resource`.
    ///
    /// `None` is a no-op. Containers are created with auto-remove, so a kill
    /// also releases their storage. A container that is already gone yields
    /// an error for which [`PoolError::is_not_found`] holds.
    pub async fn purge(
        &self,
        resource: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> PoolResult<()> {
        let Some(resource) = resource else {
            return Ok(());
        };
        guarded(
            cancel,
            Step::KillContainer,
            Some(resource.id()),
            self.engine.kill_container(resource.id()),
        )
        .await?;
        debug!("Purged container {}", resource.id());
        Ok(())
    }

    async fn ensure_image(
        &self,
        image: &str,
        platform: Option<&str>,
        cancel: &CancellationToken,
    ) -> PoolResult<()> {
        let exists = guarded(cancel, Step::PullImage, None, self.engine.image_exists(image)).await?;
        if exists {
            debug!("Image {} present locally", image);
            return Ok(());
        }
        guarded(
            cancel,
            Step::PullImage,
            None,
            self.engine.pull_image(image, platform),
        )
        .await
    }

    async fn wait_ready(
        &self,
        spec: &RunSpec,
        id: &str,
        cancel: &CancellationToken,
    ) -> PoolResult<Resource> {
        let requested_at = Utc::now();
        let snapshot = guarded(
            cancel,
            Step::InspectContainer,
            Some(id),
            self.engine.inspect_container(id),
        )
        .await?;
        if !spec.gates_on_health() || snapshot.is_ready() {
            return Ok(Resource::new(id, snapshot.ports));
        }

        info!("Waiting for container {} to become healthy", id);
        // Replaying from creation delivers a transition that lands between
        // the inspect above and the first poll of the subscription.
        let since = snapshot.created.unwrap_or(requested_at);
        let events = self.engine.health_events(id, since);

        match wait_until_healthy(id, events, cancel).await {
            Readiness::Healthy => {
                info!("Container {} is healthy", id);
                Ok(Resource::new(id, snapshot.ports))
            }
            Readiness::Failed(e) => Err(PoolError::at(Step::WaitHealthy, Some(id), e)),
            Readiness::Cancelled => Err(PoolError::Cancelled {
                step: Step::WaitHealthy,
                container_id: Some(id.to_string()),
            }),
        }
    }

    /// Best-effort cleanup after a failed `run`; the caller's token is not
    /// consulted and failures are only logged.
    async fn discard(&self, id: &str, started: bool) {
        let result = if started {
            self.engine.kill_container(id).await
        } else {
            self.engine.remove_container(id).await
        };
        match result {
            Ok(()) => debug!("Discarded container {}", id),
            Err(e) if e.is_not_found() => debug!("Container {} already gone", id),
            Err(e) => warn!("Failed to clean up container {}: {}", id, e),
        }
    }
}

/// Run one engine call, racing it against `cancel` and tagging its error with
/// `step`.
async fn guarded<T>(
    cancel: &CancellationToken,
    step: Step,
    container_id: Option<&str>,
    call: impl Future<Output = PoolResult<T>>,
) -> PoolResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PoolError::Cancelled {
            step,
            container_id: container_id.map(str::to_string),
        }),
        result = call => result.map_err(|e| PoolError::at(step, container_id, e)),
    }
}
