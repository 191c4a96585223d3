//! Run specification and the composable options that build it.
//!
//! A [`RunSpec`] starts from an image and the pool defaults (publish all
//! exposed ports, auto-remove on stop) and is then shaped by an ordered list
//! of [`RunOption`]s. Each option targets one section of the draft; sections
//! that do not exist yet are allocated on first use.
//!
//! ```rust
//! use std::time::Duration;
//! use dockpool::options::{self, RunSpec};
//!
//! let spec = RunSpec::build(
//!     "postgres:16",
//!     [
//!         options::with_env("POSTGRES_PASSWORD", "secret"),
//!         options::with_healthcheck_shell("pg_isready -U postgres", Duration::from_secs(1)),
//!         options::with_tmpfs("/var/lib/postgresql/data"),
//!     ],
//! )
//! .unwrap();
//!
//! assert_eq!(spec.image(), "postgres:16");
//! assert!(spec.gates_on_health());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};
use crate::resource::Port;

/// Kind of a container mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

/// A mount attached to the container, applied in attachment order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    /// Host path for binds, volume name for volumes, empty for tmpfs.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl AsRef<Path>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.as_ref().to_string_lossy().to_string(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: name.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Tmpfs,
            source: String::new(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Health probe executed by the engine inside the container.
///
/// `test` follows the engine convention: `["CMD", args..]`,
/// `["CMD-SHELL", command]`, or `["NONE"]` to disable an image healthcheck.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
}

impl HealthCheck {
    /// Probe run through the container's shell.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command.into()],
            ..Default::default()
        }
    }

    /// Probe executed directly, without a shell.
    pub fn exec(args: Vec<String>) -> Self {
        let mut test = vec!["CMD".to_string()];
        test.extend(args);
        Self {
            test,
            ..Default::default()
        }
    }

    /// Explicitly disables any healthcheck baked into the image.
    pub fn disabled() -> Self {
        Self {
            test: vec!["NONE".to_string()],
            ..Default::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn start_period(mut self, period: Duration) -> Self {
        self.start_period = Some(period);
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.test.first().map(String::as_str) == Some("NONE")
    }

    fn validate(&self) -> PoolResult<()> {
        match self.test.first().map(String::as_str) {
            None => Err(PoolError::InvalidSpec(
                "healthcheck has no probe command".into(),
            )),
            Some("CMD") | Some("CMD-SHELL")
                if self.test[1..].iter().all(|arg| arg.trim().is_empty()) =>
            {
                Err(PoolError::InvalidSpec(format!(
                    "healthcheck {} has an empty probe command",
                    self.test[0]
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Container section: what runs inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Ports to expose beyond the image's own list
    pub exposed_ports: Vec<Port>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Host section: how the engine wires the container to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub mounts: Vec<Mount>,
    /// Reclaim the container once it stops, so a kill is a full teardown.
    pub auto_remove: bool,
    pub publish_all_ports: bool,
    pub network_mode: Option<String>,
}

impl Default for HostSpec {
    fn default() -> Self {
        Self {
            mounts: Vec::new(),
            auto_remove: true,
            publish_all_ports: true,
            network_mode: None,
        }
    }
}

/// Per-network endpoint settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub aliases: Vec<String>,
}

/// Networking section: networks to attach at create time, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub endpoints: BTreeMap<String, EndpointSpec>,
}

/// The full description of one container to provision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub container_name: Option<String>,
    /// Platform hint such as `linux/amd64` or `arm64`.
    pub platform: Option<String>,
    pub container: Option<ContainerSpec>,
    pub health: Option<HealthCheck>,
    pub host: Option<HostSpec>,
    pub networking: Option<NetworkSpec>,
    /// Gate on a healthcheck defined by the image itself.
    pub wait_for_image_healthcheck: bool,
}

impl RunSpec {
    /// A draft with the pool defaults for `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            container: Some(ContainerSpec::new(image)),
            host: Some(HostSpec::default()),
            ..Default::default()
        }
    }

    /// Apply `options` in order on top of [`RunSpec::new`] and validate the
    /// result.
    ///
    /// Stops at the first failing option and reports its zero-based position;
    /// later options are not applied.
    pub fn build(
        image: impl Into<String>,
        options: impl IntoIterator<Item = RunOption>,
    ) -> PoolResult<Self> {
        let mut spec = Self::new(image);
        for (index, option) in options.into_iter().enumerate() {
            option
                .apply(&mut spec)
                .map_err(|e| PoolError::InvalidOption {
                    index,
                    reason: e.to_string(),
                })?;
        }
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.image().trim().is_empty() {
            return Err(PoolError::InvalidSpec("image must not be empty".into()));
        }
        if let Some(health) = &self.health {
            health.validate()?;
        }
        Ok(())
    }

    pub fn image(&self) -> &str {
        self.container
            .as_ref()
            .map(|c| c.image.as_str())
            .unwrap_or_default()
    }

    /// Whether `run` should wait for the container to report healthy.
    pub fn gates_on_health(&self) -> bool {
        match &self.health {
            Some(health) => !health.is_disabled(),
            None => self.wait_for_image_healthcheck,
        }
    }

    pub fn container_mut(&mut self) -> &mut ContainerSpec {
        self.container.get_or_insert_with(Default::default)
    }

    pub fn health_mut(&mut self) -> &mut HealthCheck {
        self.health.get_or_insert_with(Default::default)
    }

    pub fn host_mut(&mut self) -> &mut HostSpec {
        self.host.get_or_insert_with(Default::default)
    }

    pub fn networking_mut(&mut self) -> &mut NetworkSpec {
        self.networking.get_or_insert_with(Default::default)
    }
}

type Modifier<T> = Box<dyn FnOnce(&mut T) -> PoolResult<()> + Send>;

/// A single modification of a [`RunSpec`], scoped to one of its sections.
pub enum RunOption {
    Run(Modifier<RunSpec>),
    Container(Modifier<ContainerSpec>),
    Health(Modifier<HealthCheck>),
    Host(Modifier<HostSpec>),
    Networking(Modifier<NetworkSpec>),
}

impl RunOption {
    pub fn run(f: impl FnOnce(&mut RunSpec) -> PoolResult<()> + Send + 'static) -> Self {
        Self::Run(Box::new(f))
    }

    pub fn container(f: impl FnOnce(&mut ContainerSpec) -> PoolResult<()> + Send + 'static) -> Self {
        Self::Container(Box::new(f))
    }

    pub fn health(f: impl FnOnce(&mut HealthCheck) -> PoolResult<()> + Send + 'static) -> Self {
        Self::Health(Box::new(f))
    }

    pub fn host(f: impl FnOnce(&mut HostSpec) -> PoolResult<()> + Send + 'static) -> Self {
        Self::Host(Box::new(f))
    }

    pub fn networking(f: impl FnOnce(&mut NetworkSpec) -> PoolResult<()> + Send + 'static) -> Self {
        Self::Networking(Box::new(f))
    }

    /// Apply to `spec`, allocating the targeted section if it is missing.
    pub fn apply(self, spec: &mut RunSpec) -> PoolResult<()> {
        match self {
            Self::Run(f) => f(spec),
            Self::Container(f) => f(spec.container_mut()),
            Self::Health(f) => f(spec.health_mut()),
            Self::Host(f) => f(spec.host_mut()),
            Self::Networking(f) => f(spec.networking_mut()),
        }
    }
}

impl fmt::Debug for RunOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let section = match self {
            Self::Run(_) => "Run",
            Self::Container(_) => "Container",
            Self::Health(_) => "Health",
            Self::Host(_) => "Host",
            Self::Networking(_) => "Networking",
        };
        write!(f, "RunOption::{}(..)", section)
    }
}

/// Names follow the engine rule `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
fn check_name(what: &str, name: &str) -> PoolResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PoolError::InvalidSpec(format!("invalid {} {:?}", what, name)))
    }
}

pub fn with_container_name(name: impl Into<String>) -> RunOption {
    let name = name.into();
    RunOption::run(move |spec| {
        let name = name.strip_prefix('/').unwrap_or(&name).to_string();
        check_name("container name", &name)?;
        spec.container_name = Some(name);
        Ok(())
    })
}

pub fn with_platform(platform: impl Into<String>) -> RunOption {
    let platform = platform.into();
    RunOption::run(move |spec| {
        spec.platform = Some(platform);
        Ok(())
    })
}

pub fn with_mount(mount: Mount) -> RunOption {
    RunOption::host(move |host| {
        if mount.target.is_empty() {
            return Err(PoolError::InvalidSpec("mount target must not be empty".into()));
        }
        host.mounts.push(mount);
        Ok(())
    })
}

pub fn with_bind_mount(source: impl AsRef<Path>, target: impl Into<String>) -> RunOption {
    with_mount(Mount::bind(source, target))
}

pub fn with_volume(name: impl Into<String>, target: impl Into<String>) -> RunOption {
    with_mount(Mount::volume(name, target))
}

pub fn with_tmpfs(target: impl Into<String>) -> RunOption {
    with_mount(Mount::tmpfs(target))
}

/// Override the image's default command.
pub fn with_cmd<I, S>(cmd: I) -> RunOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cmd: Vec<String> = cmd.into_iter().map(Into::into).collect();
    RunOption::container(move |c| {
        c.cmd = Some(cmd);
        Ok(())
    })
}

pub fn with_entrypoint<I, S>(entrypoint: I) -> RunOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let entrypoint: Vec<String> = entrypoint.into_iter().map(Into::into).collect();
    RunOption::container(move |c| {
        c.entrypoint = Some(entrypoint);
        Ok(())
    })
}

/// Run `script` through `/bin/sh -c`.
pub fn with_shell(script: impl Into<String>) -> RunOption {
    with_cmd(["/bin/sh".to_string(), "-c".to_string(), script.into()])
}

pub fn with_env(key: impl Into<String>, value: impl Into<String>) -> RunOption {
    let (key, value) = (key.into(), value.into());
    RunOption::container(move |c| {
        if key.is_empty() || key.contains('=') {
            return Err(PoolError::InvalidSpec(format!(
                "invalid environment variable name {:?}",
                key
            )));
        }
        let prefix = format!("{}=", key);
        c.env.retain(|entry| !entry.starts_with(&prefix));
        c.env.push(format!("{}{}", prefix, value));
        Ok(())
    })
}

pub fn with_label(key: impl Into<String>, value: impl Into<String>) -> RunOption {
    let (key, value) = (key.into(), value.into());
    RunOption::container(move |c| {
        c.labels.insert(key, value);
        Ok(())
    })
}

pub fn with_exposed_port(port: Port) -> RunOption {
    RunOption::container(move |c| {
        if !c.exposed_ports.contains(&port) {
            c.exposed_ports.push(port);
        }
        Ok(())
    })
}

pub fn with_auto_remove(enabled: bool) -> RunOption {
    RunOption::host(move |host| {
        host.auto_remove = enabled;
        Ok(())
    })
}

/// Disable health gating, including any healthcheck baked into the image.
pub fn without_healthcheck() -> RunOption {
    RunOption::run(|spec| {
        spec.health = Some(HealthCheck::disabled());
        spec.wait_for_image_healthcheck = false;
        Ok(())
    })
}

pub fn with_healthcheck(check: HealthCheck) -> RunOption {
    RunOption::run(move |spec| {
        spec.health = Some(check);
        Ok(())
    })
}

/// Probe with a shell command every `interval`.
pub fn with_healthcheck_shell(command: impl Into<String>, interval: Duration) -> RunOption {
    let command = command.into();
    RunOption::health(move |health| {
        health.test = vec!["CMD-SHELL".to_string(), command];
        health.interval = Some(interval);
        Ok(())
    })
}

pub fn with_health_retries(retries: u32) -> RunOption {
    RunOption::health(move |health| {
        health.retries = Some(retries);
        Ok(())
    })
}

pub fn with_health_timeout(timeout: Duration) -> RunOption {
    RunOption::health(move |health| {
        health.timeout = Some(timeout);
        Ok(())
    })
}

/// Wait for the image's own `HEALTHCHECK` even though none is set here.
pub fn with_image_healthcheck() -> RunOption {
    RunOption::run(|spec| {
        spec.wait_for_image_healthcheck = true;
        Ok(())
    })
}

/// Attach the container to `network` under the given aliases.
pub fn with_network<I, S>(network: impl Into<String>, aliases: I) -> RunOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let network = network.into();
    let aliases: Vec<String> = aliases.into_iter().map(Into::into).collect();
    RunOption::networking(move |net| {
        check_name("network name", &network)?;
        for alias in &aliases {
            check_name("network alias", alias)?;
        }
        net.endpoints
            .entry(network)
            .or_default()
            .aliases
            .extend(aliases);
        Ok(())
    })
}

pub fn with_network_mode(mode: impl Into<String>) -> RunOption {
    let mode = mode.into();
    RunOption::host(move |host| {
        host.network_mode = Some(mode);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_defaults() {
        let spec = RunSpec::build("nginx:latest", []).unwrap();
        assert_eq!(spec.image(), "nginx:latest");
        let host = spec.host.as_ref().unwrap();
        assert!(host.auto_remove);
        assert!(host.publish_all_ports);
        assert!(spec.health.is_none());
        assert!(spec.networking.is_none());
        assert!(!spec.gates_on_health());
    }

    #[test]
    fn test_last_write_wins() {
        let spec =
            RunSpec::build("nginx", [with_container_name("a"), with_container_name("b")]).unwrap();
        assert_eq!(spec.container_name.as_deref(), Some("b"));
    }

    #[test]
    fn test_mounts_keep_order() {
        let m1 = Mount::bind("/src", "/app");
        let m2 = Mount::tmpfs("/tmp/cache");
        let m3 = Mount::bind("/src", "/app");
        let spec = RunSpec::build(
            "nginx",
            [with_mount(m1.clone()), with_mount(m2.clone()), with_mount(m3.clone())],
        )
        .unwrap();
        assert_eq!(spec.host.unwrap().mounts, vec![m1, m2, m3]);
    }

    #[test]
    fn test_health_section_allocated_lazily() {
        let spec = RunSpec::build(
            "nginx",
            [
                with_cmd(["nginx", "-g", "daemon off;"]),
                with_healthcheck_shell("curl -f localhost", Duration::from_secs(1)),
            ],
        )
        .unwrap();
        let container = spec.container.as_ref().unwrap();
        assert_eq!(container.image, "nginx");
        assert_eq!(container.cmd.as_ref().unwrap().len(), 3);
        let health = spec.health.as_ref().unwrap();
        assert_eq!(health.test, vec!["CMD-SHELL", "curl -f localhost"]);
        assert_eq!(health.interval, Some(Duration::from_secs(1)));
        assert!(spec.gates_on_health());
    }

    #[test]
    fn test_container_section_reallocated_after_reset() {
        let spec = RunSpec::build(
            "",
            [
                RunOption::run(|spec| {
                    spec.container = None;
                    Ok(())
                }),
                RunOption::container(|c| {
                    c.image = "redis:7".into();
                    Ok(())
                }),
            ],
        )
        .unwrap();
        assert_eq!(spec.image(), "redis:7");
    }

    #[test]
    fn test_health_retries_without_probe_is_rejected() {
        let err = RunSpec::build("nginx", [with_health_retries(3)]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidSpec(_)));
    }

    #[test]
    fn test_empty_shell_probe_is_rejected() {
        let err = RunSpec::build("nginx", [with_healthcheck(HealthCheck::shell("  "))]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidSpec(_)));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let err = RunSpec::build("  ", []).unwrap_err();
        assert!(matches!(err, PoolError::InvalidSpec(_)));
    }

    #[test]
    fn test_failing_option_reports_index_and_stops() {
        let err = RunSpec::build(
            "nginx",
            [
                with_container_name("ok"),
                with_network("backend", ["db", "bad alias!"]),
                with_container_name("never-applied"),
            ],
        )
        .unwrap_err();
        match err {
            PoolError::InvalidOption { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("bad alias!"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_later_options_not_applied_after_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let err = RunSpec::build(
            "nginx",
            [
                with_container_name("first"),
                with_container_name("-bad"),
                RunOption::run(move |_| {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, PoolError::InvalidOption { index: 1, .. }));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_without_healthcheck_disables_gating() {
        let spec = RunSpec::build(
            "nginx",
            [with_image_healthcheck(), without_healthcheck()],
        )
        .unwrap();
        assert!(spec.health.as_ref().unwrap().is_disabled());
        assert!(!spec.gates_on_health());
    }

    #[test]
    fn test_image_healthcheck_gates() {
        let spec = RunSpec::build("warashi/nginx:ok", [with_image_healthcheck()]).unwrap();
        assert!(spec.health.is_none());
        assert!(spec.gates_on_health());
    }

    #[test]
    fn test_shell_wraps_command() {
        let spec = RunSpec::build("alpine", [with_shell("sleep 5 && echo done")]).unwrap();
        assert_eq!(
            spec.container.unwrap().cmd.unwrap(),
            vec!["/bin/sh", "-c", "sleep 5 && echo done"]
        );
    }

    #[test]
    fn test_env_overrides_same_key() {
        let spec = RunSpec::build(
            "alpine",
            [with_env("MODE", "a"), with_env("OTHER", "x"), with_env("MODE", "b")],
        )
        .unwrap();
        assert_eq!(spec.container.unwrap().env, vec!["OTHER=x", "MODE=b"]);
    }

    #[test]
    fn test_network_aliases_accumulate() {
        let spec = RunSpec::build(
            "nginx",
            [
                with_network("backend", ["web"]),
                with_network("backend", ["www"]),
                with_network_mode("backend"),
            ],
        )
        .unwrap();
        let endpoints = spec.networking.unwrap().endpoints;
        assert_eq!(endpoints["backend"].aliases, vec!["web", "www"]);
        assert_eq!(spec.host.unwrap().network_mode.as_deref(), Some("backend"));
    }

    #[test]
    fn test_container_name_strips_leading_slash() {
        let spec = RunSpec::build("nginx", [with_container_name("/web-1")]).unwrap();
        assert_eq!(spec.container_name.as_deref(), Some("web-1"));
    }
}
