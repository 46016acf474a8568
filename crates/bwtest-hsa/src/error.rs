//! Runtime error types.

use crate::runtime::{AgentId, BufferId, PoolId, SignalId};
use thiserror::Error;

/// Errors produced by a [`CopyRuntime`](crate::CopyRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("pool {pool} cannot satisfy {size} bytes ({available} available)")]
    OutOfMemory { pool: PoolId, size: usize, available: usize },

    #[error("unknown memory pool {0}")]
    UnknownPool(PoolId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("invalid buffer {0:?}")]
    InvalidBuffer(BufferId),

    #[error("invalid signal {0:?}")]
    InvalidSignal(SignalId),

    #[error("agent {agent} may not access buffer {buffer:?}")]
    AccessDenied { agent: AgentId, buffer: BufferId },

    #[error("buffer {0:?} is not resident in host memory")]
    NotHostAccessible(BufferId),

    #[error("copy of {size} bytes exceeds buffer {buffer:?} of {capacity} bytes")]
    CopyOutOfBounds { buffer: BufferId, size: usize, capacity: usize },

    #[error("signal {0:?} waited on without being re-armed")]
    SignalNotArmed(SignalId),

    #[error("signal {0:?} has no completed copy to time")]
    CopyNotComplete(SignalId),

    #[error("async copy profiling is disabled")]
    ProfilingDisabled,

    #[error("copy engine unavailable: {0}")]
    EngineUnavailable(String),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;
