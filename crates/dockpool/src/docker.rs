//! Docker implementation of ContainerEngine.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, EndpointSettings, EventMessage, HealthConfig, HealthStatusEnum,
    HostConfig, Mount as EngineMount, MountTypeEnum,
};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::engine::{ContainerEngine, ContainerSnapshot, HealthEvent, HealthEventStream, HealthStatus};
use crate::error::{PoolError, PoolResult};
use crate::options::{HealthCheck, Mount, MountKind, RunSpec};
use crate::resource::{Port, PortBinding, PortMap};

/// Docker-based container engine.
#[derive(Clone)]
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the local default socket.
    pub async fn new() -> PoolResult<Self> {
        Self::connect(&PoolConfig::from_env()).await
    }

    /// Connect to a specific engine address.
    pub async fn with_host(host: &str) -> PoolResult<Self> {
        Self::connect(&PoolConfig::new().host(host)).await
    }

    pub async fn connect(config: &PoolConfig) -> PoolResult<Self> {
        let mut client = client(config)?;

        if config.negotiate_version {
            client = client
                .negotiate_version()
                .await
                .map_err(|e| PoolError::DockerNotAvailable(e.to_string()))?;
        }

        let engine = Self { client };
        engine.ping().await?;
        debug!(host = ?config.docker_host, "Connected to Docker");
        Ok(engine)
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Docker) -> Self {
        Self { client }
    }
}

/// Build a client for the configured endpoint. Nothing is sent until the
/// first request.
fn client(config: &PoolConfig) -> PoolResult<Docker> {
    let timeout = config.timeout_seconds;
    let client = match config.docker_host.as_deref() {
        None => Docker::connect_with_local_defaults()?,
        #[cfg(unix)]
        Some(host) if host.starts_with("unix://") => {
            Docker::connect_with_unix(host, timeout, API_DEFAULT_VERSION)?
        }
        #[cfg(windows)]
        Some(host) if host.starts_with("npipe://") => {
            Docker::connect_with_named_pipe(host, timeout, API_DEFAULT_VERSION)?
        }
        Some(host) => Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION)?,
    };
    // The local defaults carry bollard's own timeout.
    Ok(client.with_timeout(Duration::from_secs(timeout)))
}

/// Split an image reference into the `fromImage`/`tag` pair the pull API
/// expects. Untagged references resolve to `latest`; digests stay inline.
fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

fn health_config(check: &HealthCheck) -> HealthConfig {
    HealthConfig {
        test: Some(check.test.clone()),
        interval: check.interval.map(nanos),
        timeout: check.timeout.map(nanos),
        retries: check.retries.map(i64::from),
        start_period: check.start_period.map(nanos),
        ..Default::default()
    }
}

fn engine_mount(mount: &Mount) -> EngineMount {
    let (typ, source) = match mount.kind {
        MountKind::Bind => (MountTypeEnum::BIND, Some(mount.source.clone())),
        MountKind::Volume => (MountTypeEnum::VOLUME, Some(mount.source.clone())),
        MountKind::Tmpfs => (MountTypeEnum::TMPFS, None),
    };
    EngineMount {
        target: Some(mount.target.clone()),
        source,
        typ: Some(typ),
        read_only: Some(mount.read_only),
        ..Default::default()
    }
}

/// Translate a run spec into the create-container request body.
fn container_config(spec: &RunSpec) -> Config<String> {
    let container = spec.container.clone().unwrap_or_default();
    let host = spec.host.clone().unwrap_or_default();

    let host_config = HostConfig {
        mounts: Some(host.mounts.iter().map(engine_mount).collect()),
        auto_remove: Some(host.auto_remove),
        publish_all_ports: Some(host.publish_all_ports),
        network_mode: host.network_mode,
        ..Default::default()
    };

    let exposed_ports = (!container.exposed_ports.is_empty()).then(|| {
        container
            .exposed_ports
            .iter()
            .map(|port| (port.to_string(), HashMap::new()))
            .collect()
    });

    let networking_config = spec
        .networking
        .as_ref()
        .filter(|net| !net.endpoints.is_empty())
        .map(|net| NetworkingConfig {
            endpoints_config: net
                .endpoints
                .iter()
                .map(|(name, endpoint)| {
                    let settings = EndpointSettings {
                        aliases: (!endpoint.aliases.is_empty()).then(|| endpoint.aliases.clone()),
                        ..Default::default()
                    };
                    (name.clone(), settings)
                })
                .collect(),
        });

    Config {
        image: Some(container.image),
        cmd: container.cmd,
        entrypoint: container.entrypoint,
        env: (!container.env.is_empty()).then_some(container.env),
        labels: (!container.labels.is_empty()).then(|| container.labels.into_iter().collect()),
        exposed_ports,
        working_dir: container.working_dir,
        user: container.user,
        healthcheck: spec.health.as_ref().map(health_config),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn health_status(response: &ContainerInspectResponse) -> Option<HealthStatus> {
    let status = response.state.as_ref()?.health.as_ref()?.status.as_ref()?;
    Some(match status {
        HealthStatusEnum::EMPTY | HealthStatusEnum::NONE => HealthStatus::None,
        HealthStatusEnum::STARTING => HealthStatus::Starting,
        HealthStatusEnum::HEALTHY => HealthStatus::Healthy,
        HealthStatusEnum::UNHEALTHY => HealthStatus::Unhealthy,
    })
}

fn published_ports(response: ContainerInspectResponse) -> PortMap {
    let raw = response
        .network_settings
        .and_then(|settings| settings.ports)
        .unwrap_or_default();

    let mut ports = PortMap::new();
    for (key, bindings) in raw {
        let port = match key.parse::<Port>() {
            Ok(port) => port,
            Err(e) => {
                debug!("Skipping port {}: {}", key, e);
                continue;
            }
        };
        let bindings = bindings
            .unwrap_or_default()
            .into_iter()
            .map(|b| PortBinding::new(b.host_ip.unwrap_or_default(), b.host_port.unwrap_or_default()))
            .collect();
        ports.insert(port, bindings);
    }
    ports
}

fn health_event(container_id: &str, message: EventMessage) -> HealthEvent {
    HealthEvent {
        container_id: container_id.to_string(),
        action: message.action.unwrap_or_default(),
        time: message.time.and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

fn created_at(response: &ContainerInspectResponse) -> Option<DateTime<Utc>> {
    let created = response.created.as_deref()?;
    DateTime::parse_from_rfc3339(created)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Health status events of one container, replayed from `since` onwards.
fn events_options(id: &str, since: DateTime<Utc>) -> EventsOptions<String> {
    let mut filters = HashMap::new();
    filters.insert("type".to_string(), vec!["container".to_string()]);
    filters.insert("container".to_string(), vec![id.to_string()]);
    filters.insert("event".to_string(), vec!["health_status".to_string()]);

    EventsOptions {
        since: Some(format!(
            "{}.{:09}",
            since.timestamp(),
            since.timestamp_subsec_nanos()
        )),
        filters,
        ..Default::default()
    }
}

/// 404s name the missing object; everything else is passed through.
fn not_found(err: bollard::errors::Error, what: impl FnOnce() -> PoolError) -> PoolError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => what(),
        e => e.into(),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> PoolResult<()> {
        self.client
            .ping()
            .await
            .map_err(|e| PoolError::DockerNotAvailable(e.to_string()))?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> PoolResult<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str, platform: Option<&str>) -> PoolResult<()> {
        info!("Pulling image {}", image);

        let (from_image, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            platform: platform.unwrap_or_default(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(not_found(e, || PoolError::ImageNotFound(image.to_string()))),
            }
        }

        info!("Image {} pulled successfully", image);
        Ok(())
    }

    async fn create_container(&self, spec: &RunSpec) -> PoolResult<String> {
        let options = (spec.container_name.is_some() || spec.platform.is_some()).then(|| {
            CreateContainerOptions {
                name: spec.container_name.clone().unwrap_or_default(),
                platform: spec.platform.clone(),
            }
        });

        let response = self
            .client
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| not_found(e, || PoolError::ImageNotFound(spec.image().to_string())))?;

        debug!("Created container {} from {}", response.id, spec.image());
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> PoolResult<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found(e, || PoolError::NotFound(id.to_string())))
    }

    async fn inspect_container(&self, id: &str) -> PoolResult<ContainerSnapshot> {
        let response = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found(e, || PoolError::NotFound(id.to_string())))?;

        Ok(ContainerSnapshot {
            id: response.id.clone().unwrap_or_else(|| id.to_string()),
            health: health_status(&response),
            created: created_at(&response),
            ports: published_ports(response),
        })
    }

    fn health_events(&self, id: &str, since: DateTime<Utc>) -> HealthEventStream {
        let container_id = id.to_string();
        self.client
            .events(Some(events_options(id, since)))
            .map(move |item| {
                item.map(|message| health_event(&container_id, message))
                    .map_err(PoolError::from)
            })
            .boxed()
    }

    async fn kill_container(&self, id: &str) -> PoolResult<()> {
        self.client
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| not_found(e, || PoolError::NotFound(id.to_string())))
    }

    async fn remove_container(&self, id: &str) -> PoolResult<()> {
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| not_found(e, || PoolError::NotFound(id.to_string())))
    }
}
