//! The platform runtime trait the copy engine is written against.

use crate::error::Result;
use crate::topology::Topology;
use serde::{Deserialize, Serialize};

/// Index of an agent in the topology's agent list.
pub type AgentId = usize;
/// Index of a pool in the topology's pool list.
pub type PoolId = usize;

/// Opaque handle to an allocated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Opaque handle to a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u64);

/// How a waiter observes a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Spin without yielding; lowest wake latency.
    #[default]
    Active,
    /// Yield the thread until the signal changes.
    Blocked,
}

/// One asynchronous copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRequest {
    pub dst: BufferId,
    pub dst_agent: AgentId,
    pub src: BufferId,
    pub src_agent: AgentId,
    pub size: usize,
    /// Decremented to zero when the copy completes.
    pub signal: SignalId,
}

/// Device-reported start and end of one completed copy, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CopyTimestamps {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl CopyTimestamps {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    /// The span covering both copies.
    pub fn union(&self, other: &Self) -> Self {
        Self { start_ns: self.start_ns.min(other.start_ns), end_ns: self.end_ns.max(other.end_ns) }
    }
}

/// Memory, signal and copy primitives of a heterogeneous platform.
///
/// All methods take `&self`; implementations synchronise internally.
pub trait CopyRuntime {
    /// The topology this runtime was discovered with.
    fn topology(&self) -> &Topology;

    /// Allocate `size` bytes in `pool`.
    fn allocate(&self, pool: PoolId, size: usize) -> Result<BufferId>;

    /// Release a buffer.
    fn free(&self, buffer: BufferId) -> Result<()>;

    /// Allow `agent` to reference `buffer`. Idempotent and additive.
    fn allow_access(&self, agent: AgentId, buffer: BufferId) -> Result<()>;

    fn create_signal(&self, initial: i64) -> Result<SignalId>;

    fn destroy_signal(&self, signal: SignalId) -> Result<()>;

    /// Set a signal's value; storing `1` re-arms it.
    fn store_signal(&self, signal: SignalId, value: i64) -> Result<()>;

    /// Block until the signal value is below 1, returning the observed value.
    fn wait_signal(&self, signal: SignalId, mode: WaitMode) -> Result<i64>;

    /// Issue a copy. Returns as soon as the copy is queued.
    fn async_copy(&self, request: CopyRequest) -> Result<()>;

    /// Device timestamps of the last copy completed on `signal`.
    fn copy_time(&self, signal: SignalId) -> Result<CopyTimestamps>;

    /// Toggle device timestamp capture for async copies.
    fn set_copy_profiling(&self, enabled: bool) -> Result<()>;

    /// Fill a host-resident buffer with `byte`.
    fn fill(&self, buffer: BufferId, byte: u8) -> Result<()>;

    /// Read the first `len` bytes of a host-resident buffer.
    fn read(&self, buffer: BufferId, len: usize) -> Result<Vec<u8>>;
}
