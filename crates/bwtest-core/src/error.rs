//! Benchmark engine error types.
//!
//! Every variant here is fatal for the run. A data mismatch found during
//! validation is not an error: it is recorded on the transaction as a
//! [`Comparison::Mismatch`](crate::Comparison) and the sweep carries on.

use bwtest_hsa::{AgentId, BufferId, PoolId, RuntimeError};
use thiserror::Error;

/// Fatal failures of the copy benchmark engine.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("pool {pool} could not allocate {size} bytes")]
    Allocation {
        pool: PoolId,
        size: usize,
        #[source]
        source: RuntimeError,
    },

    #[error("agent {agent} was refused access to buffer {buffer:?}")]
    Access {
        agent: AgentId,
        buffer: BufferId,
        #[source]
        source: RuntimeError,
    },

    #[error("internal consistency failure: {0}")]
    InternalConsistency(String),

    #[error("async copy of {size} bytes could not be issued")]
    Copy {
        size: usize,
        #[source]
        source: RuntimeError,
    },

    #[error("completion signal operation failed")]
    Signal(#[source] RuntimeError),

    #[error("device copy time unavailable")]
    Timing(#[source] RuntimeError),

    #[error("host validation buffer could not be accessed")]
    HostAccess(#[source] RuntimeError),

    #[error("async copy profiling could not be toggled")]
    Profiling(#[source] RuntimeError),

    #[error("releasing benchmark resources failed")]
    Teardown(#[source] RuntimeError),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, BenchError>;
