// src/utils/errors.rs
//! Error taxonomy for the component runtime
//!
//! Every failure surfaced by the runtime is a [`CvmError`]. Failures that
//! cross a process boundary travel as a [`RemoteFailure`] and are rebuilt
//! into the same variant on the calling side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CvmError>;

/// Runtime errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CvmError {
    /// Contract/port mismatch at build time
    #[error("Construction error: {0}")]
    Construction(String),

    /// Duplicate connect, disconnect when unconnected, unresolvable peer
    #[error("Connection error: {0}")]
    Connection(String),

    /// A port could not be torn down during shutdown
    #[error("Shutdown failure: {0}")]
    ShutdownFailure(String),

    /// Unknown type, bad constructor arguments or unreachable creation target
    #[error("Creation service error: {0}")]
    CreationService(String),

    /// Misuse of a synchronization tool or of the manager
    #[error("Tool protocol error: {0}")]
    ToolProtocol(String),

    /// Invalid lifecycle transition
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// A task submitted to a component executor failed or panicked
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The target component no longer accepts requests
    #[error("Component terminated: {0}")]
    ComponentTerminated(String),

    /// A barrier was reset while callers were waiting on it
    #[error("Broken barrier: {0}")]
    BrokenBarrier(String),

    /// Network transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error category carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Construction,
    Connection,
    ShutdownFailure,
    CreationService,
    ToolProtocol,
    Lifecycle,
    TaskFailed,
    ComponentTerminated,
    BrokenBarrier,
    Transport,
    Serialization,
    Config,
}

/// Serializable form of a [`CvmError`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    /// Message of the original error
    pub message: String,
}

impl CvmError {
    /// Category of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            CvmError::Construction(_) => FailureKind::Construction,
            CvmError::Connection(_) => FailureKind::Connection,
            CvmError::ShutdownFailure(_) => FailureKind::ShutdownFailure,
            CvmError::CreationService(_) => FailureKind::CreationService,
            CvmError::ToolProtocol(_) => FailureKind::ToolProtocol,
            CvmError::Lifecycle(_) => FailureKind::Lifecycle,
            CvmError::TaskFailed(_) => FailureKind::TaskFailed,
            CvmError::ComponentTerminated(_) => FailureKind::ComponentTerminated,
            CvmError::BrokenBarrier(_) => FailureKind::BrokenBarrier,
            CvmError::Transport(_) => FailureKind::Transport,
            CvmError::Serialization(_) => FailureKind::Serialization,
            CvmError::Config(_) => FailureKind::Config,
        }
    }

    /// Message without the category prefix
    pub fn message(&self) -> &str {
        match self {
            CvmError::Construction(m)
            | CvmError::Connection(m)
            | CvmError::ShutdownFailure(m)
            | CvmError::CreationService(m)
            | CvmError::ToolProtocol(m)
            | CvmError::Lifecycle(m)
            | CvmError::TaskFailed(m)
            | CvmError::ComponentTerminated(m)
            | CvmError::BrokenBarrier(m)
            | CvmError::Transport(m)
            | CvmError::Serialization(m)
            | CvmError::Config(m) => m,
        }
    }

    /// Convert into the wire representation
    pub fn to_remote(&self) -> RemoteFailure {
        RemoteFailure {
            kind: self.kind(),
            message: self.message().to_string(),
        }
    }
}

impl From<RemoteFailure> for CvmError {
    fn from(failure: RemoteFailure) -> Self {
        let m = failure.message;
        match failure.kind {
            FailureKind::Construction => CvmError::Construction(m),
            FailureKind::Connection => CvmError::Connection(m),
            FailureKind::ShutdownFailure => CvmError::ShutdownFailure(m),
            FailureKind::CreationService => CvmError::CreationService(m),
            FailureKind::ToolProtocol => CvmError::ToolProtocol(m),
            FailureKind::Lifecycle => CvmError::Lifecycle(m),
            FailureKind::TaskFailed => CvmError::TaskFailed(m),
            FailureKind::ComponentTerminated => CvmError::ComponentTerminated(m),
            FailureKind::BrokenBarrier => CvmError::BrokenBarrier(m),
            FailureKind::Transport => CvmError::Transport(m),
            FailureKind::Serialization => CvmError::Serialization(m),
            FailureKind::Config => CvmError::Config(m),
        }
    }
}

impl From<serde_json::Error> for CvmError {
    fn from(e: serde_json::Error) -> Self {
        CvmError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for CvmError {
    fn from(e: std::io::Error) -> Self {
        CvmError::Transport(e.to_string())
    }
}

impl From<config::ConfigError> for CvmError {
    fn from(e: config::ConfigError) -> Self {
        CvmError::Config(e.to_string())
    }
}
