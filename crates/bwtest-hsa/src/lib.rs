//! `bwtest-hsa`: the platform seam the copy benchmark runs against.
//!
//! The benchmark engine only ever sees the [`CopyRuntime`] trait: allocate a
//! buffer in a pool, grant an agent access to it, arm and wait on completion
//! signals, issue asynchronous copies and read back device timestamps.
//!
//! | Module     | Contents                                                  |
//! |------------|-----------------------------------------------------------|
//! | `topology` | Agents, memory pools and the accessibility matrix         |
//! | `runtime`  | The [`CopyRuntime`] trait and its handle types            |
//! | `sim`      | [`SimRuntime`], a host-memory runtime with a device clock |
//! | `error`    | [`RuntimeError`]                                          |
//!
//! # Usage
//!
//! ```rust
//! use bwtest_hsa::{CopyRequest, CopyRuntime, SimRuntime, Topology, WaitMode};
//!
//! let runtime = SimRuntime::new(Topology::single_gpu()).unwrap();
//! let host = runtime.topology().host_pool().unwrap();
//! let src = runtime.allocate(host.index, 1024).unwrap();
//! let dst = runtime.allocate(host.index, 1024).unwrap();
//! let signal = runtime.create_signal(1).unwrap();
//! runtime.fill(src, 0x23).unwrap();
//! runtime
//!     .async_copy(CopyRequest { dst, dst_agent: 0, src, src_agent: 0, size: 1024, signal })
//!     .unwrap();
//! runtime.wait_signal(signal, WaitMode::Blocked).unwrap();
//! assert_eq!(runtime.read(dst, 4).unwrap(), vec![0x23; 4]);
//! ```

pub mod error;
pub mod runtime;
pub mod sim;
pub mod topology;

pub use error::{Result, RuntimeError};
pub use runtime::{
    AgentId, BufferId, CopyRequest, CopyRuntime, CopyTimestamps, PoolId, SignalId, WaitMode,
};
pub use sim::{SimRuntime, SimStats};
pub use topology::{
    AccessMatrix, AccessMode, AccessTier, Agent, DeviceKind, LinkModel, MemoryPool, Topology,
    TopologyError,
};
