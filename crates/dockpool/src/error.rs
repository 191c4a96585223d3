//! Error types for the pool.

use std::fmt;

use thiserror::Error;

use crate::resource::Resource;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// A provisioning or teardown step, used to tag errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    PullImage,
    CreateContainer,
    StartContainer,
    InspectContainer,
    WaitHealthy,
    KillContainer,
    RemoveContainer,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullImage => "pull image",
            Self::CreateContainer => "create container",
            Self::StartContainer => "start container",
            Self::InspectContainer => "inspect container",
            Self::WaitHealthy => "wait for healthy",
            Self::KillContainer => "kill container",
            Self::RemoveContainer => "remove container",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while provisioning, inspecting or tearing down
/// containers.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Docker not available: {0}")]
    DockerNotAvailable(String),

    #[error("Invalid option #{index}: {reason}")]
    InvalidOption { index: usize, reason: String },

    #[error("Invalid run specification: {0}")]
    InvalidSpec(String),

    #[error("{step} failed{}: {source}", fmt_container(.container_id))]
    Step {
        step: Step,
        container_id: Option<String>,
        #[source]
        source: Box<PoolError>,
    },

    #[error("Cancelled during {step}{}", fmt_container(.container_id))]
    Cancelled {
        step: Step,
        container_id: Option<String>,
    },

    #[error("Health event stream closed")]
    EventStreamClosed,

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    #[error("Engine error: {0}")]
    Engine(String),
}

fn fmt_container(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" for container {}", id),
        None => String::new(),
    }
}

impl PoolError {
    /// Tag an error with the step that produced it.
    pub fn at(step: Step, container_id: Option<&str>, source: PoolError) -> Self {
        Self::Step {
            step,
            container_id: container_id.map(str::to_string),
            source: Box::new(source),
        }
    }

    /// The step this error was raised in, if it was tagged with one.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step { step, .. } | Self::Cancelled { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The container the failing call was addressing, if any.
    pub fn container_id(&self) -> Option<&str> {
        match self {
            Self::Step {
                container_id: Some(id),
                ..
            }
            | Self::Cancelled {
                container_id: Some(id),
                ..
            } => Some(id),
            Self::Step { source, .. } => source.container_id(),
            _ => None,
        }
    }

    /// Whether the caller's cancellation token ended the call.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the engine reported the container or image as gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::ImageNotFound(_) => true,
            Self::DockerApi(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }) => true,
            Self::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// A handle for a container left running by a cancelled `run`.
    ///
    /// The pool does not purge on caller cancellation; pass the returned
    /// handle to [`crate::Pool::purge`] to release it.
    pub fn orphan(&self) -> Option<Resource> {
        match self {
            Self::Cancelled {
                container_id: Some(id),
                ..
            } => Some(Resource::detached(id.clone())),
            _ => None,
        }
    }
}
