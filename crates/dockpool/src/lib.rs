//! # dockpool
//!
//! Disposable containers for integration tests.
//!
//! A [`Pool`] provisions one container per call to [`Pool::run`], waits until
//! the service inside is actually usable, and hands back a [`Resource`] that
//! resolves published ports to host addresses. [`Pool::purge`] kills the
//! container; it is created with auto-remove, so nothing is left behind.
//!
//! # Features
//!
//! - **Readiness**: waits on the engine's health events when a healthcheck is
//!   configured, returns immediately when none is
//! - **Composable options**: ordered [`RunOption`]s shape the [`RunSpec`]
//! - **Cleanup on failure**: a container that fails to start or to become
//!   healthy is removed before the error is returned
//! - **Cancellation**: every engine call races a caller-supplied token
//! - **Mock Engine**: for testing without a Docker daemon
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use dockpool::{options, Pool};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Pool::new().await?;
//!     let cancel = CancellationToken::new();
//!
//!     let redis = pool
//!         .run(
//!             "redis:7",
//!             [options::with_healthcheck_shell("redis-cli ping", Duration::from_millis(500))],
//!             &cancel,
//!         )
//!         .await?;
//!
//!     println!("redis at {}", redis.host_port("tcp", "6379")?);
//!
//!     pool.purge(Some(&redis), &cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod mock;
pub mod options;
pub mod pool;
pub mod readiness;
pub mod resource;

pub use config::PoolConfig;
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerSnapshot, HealthEvent, HealthEventStream, HealthStatus};
pub use error::{PoolError, PoolResult, Step};
pub use mock::{CapturedCall, EventStreamEnd, MockEngine};
pub use options::{HealthCheck, Mount, MountKind, RunOption, RunSpec};
pub use pool::Pool;
pub use resource::{Port, PortBinding, PortMap, Protocol, Resource};
