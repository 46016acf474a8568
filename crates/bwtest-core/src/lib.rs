//! `bwtest-core`: the copy benchmark engine.
//!
//! For every copy transaction the engine provisions buffers sized to the
//! largest sweep entry, grants the minimal cross-agent access, then walks the
//! size sweep running timed asynchronous copies. Each size yields a wall-clock
//! time measured across all iterations and, when the copy touches an
//! accelerator, a device time read back from the copy's own timestamps.
//!
//! ```text
//! PROVISION -> (seed)? -> [ARM -> COPY -> WAIT -> (check)? -> RECORD]* -> TEARDOWN
//! ```
//!
//! The engine is generic over [`bwtest_hsa::CopyRuntime`], so the same code
//! drives a hardware runtime or the simulated one.

pub mod access;
pub mod aggregate;
pub mod driver;
pub mod engine;
pub mod error;
pub mod progress;
pub mod provision;
pub mod timer;
pub mod transaction;

pub use access::{AccessPlan, access_plan, acquire_cross_access, acquire_pool_access};
pub use aggregate::{Bandwidth, bandwidth_gbps, compute_copy_time};
pub use driver::{BenchmarkDriver, RunSummary};
pub use engine::CopyEngine;
pub use error::{BenchError, Result};
pub use progress::{Progress, ProgressToken};
pub use provision::{
    CLEAR_PATTERN, CopyBuffers, CopyEndpoints, HostBuffers, SEED_PATTERN, release_buffers,
};
pub use timer::PerfTimer;
pub use transaction::{Comparison, DeviceTiming, RequestKind, SizeResult, Transaction};
