//! Buffer and signal provisioning with guaranteed release.
//!
//! Everything allocated for a transaction lives in a [`ResourceSet`] owned by
//! a [`CopyBuffers`] or [`HostBuffers`] value. Releasing is explicit so that
//! teardown failures surface as [`BenchError::Teardown`]; if a value is
//! dropped without being released (an early `?` return) the drop releases it
//! and logs any failure.

use crate::access::acquire_cross_access;
use crate::error::{BenchError, Result};
use bwtest_hsa::{AgentId, BufferId, CopyRuntime, PoolId, SignalId, Topology};
use tracing::{debug, error};

/// Byte the host seed buffer is filled with.
pub const SEED_PATTERN: u8 = 0x23;
/// Byte the host readback buffer is cleared to.
pub const CLEAR_PATTERN: u8 = 0x00;

/// Pools and owning agents at both ends of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyEndpoints {
    pub src_pool: PoolId,
    pub dst_pool: PoolId,
    pub src_agent: AgentId,
    pub dst_agent: AgentId,
}

impl CopyEndpoints {
    /// Look up the owning agents of both pools.
    pub fn resolve(topology: &Topology, src_pool: PoolId, dst_pool: PoolId) -> Result<Self> {
        let owner = |pool: PoolId| {
            topology
                .pool(pool)
                .map(|p| p.owner)
                .ok_or_else(|| BenchError::InternalConsistency(format!("unknown pool {pool}")))
        };
        Ok(Self { src_pool, dst_pool, src_agent: owner(src_pool)?, dst_agent: owner(dst_pool)? })
    }

    /// The same endpoints with source and destination swapped.
    pub fn reversed(self) -> Self {
        Self {
            src_pool: self.dst_pool,
            dst_pool: self.src_pool,
            src_agent: self.dst_agent,
            dst_agent: self.src_agent,
        }
    }
}

/// Buffers and signals acquired together and released together.
struct ResourceSet<'r, R: CopyRuntime + ?Sized> {
    runtime: &'r R,
    buffers: Vec<BufferId>,
    signals: Vec<SignalId>,
    released: bool,
}

impl<'r, R: CopyRuntime + ?Sized> ResourceSet<'r, R> {
    fn new(runtime: &'r R) -> Self {
        Self { runtime, buffers: Vec::new(), signals: Vec::new(), released: false }
    }

    fn allocate(&mut self, pool: PoolId, size: usize) -> Result<BufferId> {
        let buffer = self
            .runtime
            .allocate(pool, size)
            .map_err(|source| BenchError::Allocation { pool, size, source })?;
        debug!(pool, size, ?buffer, "allocated copy buffer");
        self.buffers.push(buffer);
        Ok(buffer)
    }

    /// Create a signal armed for one copy.
    fn create_signal(&mut self) -> Result<SignalId> {
        let signal = self.runtime.create_signal(1).map_err(BenchError::Signal)?;
        self.signals.push(signal);
        Ok(signal)
    }

    /// Free every buffer, then destroy every signal. All releases are
    /// attempted; the first failure is returned.
    fn release(&mut self) -> Result<()> {
        self.released = true;
        let mut first_err = None;
        for buffer in self.buffers.drain(..) {
            if let Err(e) = self.runtime.free(buffer) {
                first_err.get_or_insert(e);
            }
        }
        for signal in self.signals.drain(..) {
            if let Err(e) = self.runtime.destroy_signal(signal) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), |e| Err(BenchError::Teardown(e)))
    }
}

impl<R: CopyRuntime + ?Sized> Drop for ResourceSet<'_, R> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.release()
        {
            error!(error = %e, "failed to release benchmark resources");
        }
    }
}

/// Source and destination buffers plus the completion signal of one copy
/// direction.
pub struct CopyBuffers<'r, R: CopyRuntime + ?Sized> {
    pub src: BufferId,
    pub dst: BufferId,
    pub signal: SignalId,
    pub endpoints: CopyEndpoints,
    resources: ResourceSet<'r, R>,
}

impl<'r, R: CopyRuntime + ?Sized> CopyBuffers<'r, R> {
    /// Allocate `size` bytes in both pools, create an armed signal and grant
    /// the cross access the copy needs.
    pub fn allocate(runtime: &'r R, size: usize, endpoints: CopyEndpoints) -> Result<Self> {
        let mut resources = ResourceSet::new(runtime);
        let src = resources.allocate(endpoints.src_pool, size)?;
        let dst = resources.allocate(endpoints.dst_pool, size)?;
        let signal = resources.create_signal()?;
        acquire_cross_access(runtime, endpoints.src_agent, src, endpoints.dst_agent, dst)?;
        Ok(Self { src, dst, signal, endpoints, resources })
    }

    pub fn release(mut self) -> Result<()> {
        self.resources.release()
    }
}

/// Host-resident seed and readback buffers used for validation.
pub struct HostBuffers<'r, R: CopyRuntime + ?Sized> {
    /// Filled with [`SEED_PATTERN`].
    pub src: BufferId,
    /// Cleared to [`CLEAR_PATTERN`]; receives the copied data.
    pub dst: BufferId,
    pub signal: SignalId,
    pub host_agent: AgentId,
    resources: ResourceSet<'r, R>,
}

impl<'r, R: CopyRuntime + ?Sized> HostBuffers<'r, R> {
    /// Allocate both buffers in the host's default pool and grant the access
    /// needed to seed `forward.src` and read back `forward.dst`.
    pub fn allocate(runtime: &'r R, size: usize, forward: &CopyBuffers<'r, R>) -> Result<Self> {
        let topology = runtime.topology();
        let host_agent = topology
            .host_agent()
            .ok_or_else(|| BenchError::InternalConsistency("topology has no host agent".into()))?
            .index;
        let host_pool = topology
            .host_pool()
            .ok_or_else(|| BenchError::InternalConsistency("host agent has no memory pool".into()))?
            .index;
        let ends = forward.endpoints;

        let mut resources = ResourceSet::new(runtime);
        let src = resources.allocate(host_pool, size)?;
        acquire_cross_access(runtime, host_agent, src, ends.src_agent, forward.src)?;
        let dst = resources.allocate(host_pool, size)?;
        acquire_cross_access(runtime, ends.dst_agent, forward.dst, host_agent, dst)?;

        runtime.fill(src, SEED_PATTERN).map_err(BenchError::HostAccess)?;
        runtime.fill(dst, CLEAR_PATTERN).map_err(BenchError::HostAccess)?;

        let signal = resources.create_signal()?;
        Ok(Self { src, dst, signal, host_agent, resources })
    }

    pub fn release(mut self) -> Result<()> {
        self.resources.release()
    }
}

/// Release the forward buffers and, for a bidirectional transaction, the
/// reverse buffers.
pub fn release_buffers<R: CopyRuntime + ?Sized>(
    forward: CopyBuffers<'_, R>,
    reverse: Option<CopyBuffers<'_, R>>,
) -> Result<()> {
    let fwd = forward.release();
    let rev = reverse.map_or(Ok(()), CopyBuffers::release);
    fwd.and(rev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bwtest_hsa::{AccessMode, SimRuntime};

    #[test]
    fn endpoints_resolve_owners() {
        let topo = Topology::single_gpu();
        let ends = CopyEndpoints::resolve(&topo, 0, 2).unwrap();
        assert_eq!((ends.src_agent, ends.dst_agent), (0, 1));
        let rev = ends.reversed();
        assert_eq!((rev.src_pool, rev.dst_pool, rev.src_agent, rev.dst_agent), (2, 0, 1, 0));
    }

    #[test]
    fn unknown_pool_is_inconsistent() {
        let topo = Topology::single_gpu();
        assert!(matches!(
            CopyEndpoints::resolve(&topo, 0, 9),
            Err(BenchError::InternalConsistency(_))
        ));
    }

    #[test]
    fn copy_buffers_release_everything() {
        let rt = SimRuntime::new(Topology::single_gpu()).unwrap();
        let ends = CopyEndpoints::resolve(rt.topology(), 0, 2).unwrap();
        let bufs = CopyBuffers::allocate(&rt, 4096, ends).unwrap();
        assert_eq!(rt.stats().live_buffers(), 2);
        assert_eq!(rt.stats().live_signals(), 1);
        bufs.release().unwrap();
        assert_eq!(rt.stats().live_buffers(), 0);
        assert_eq!(rt.stats().live_signals(), 0);
    }

    #[test]
    fn failed_allocation_frees_partial_work() {
        let rt = SimRuntime::new(Topology::single_gpu().with_pool_capacity(2, 1024)).unwrap();
        let ends = CopyEndpoints::resolve(rt.topology(), 0, 2).unwrap();
        let err = CopyBuffers::allocate(&rt, 4096, ends).err().unwrap();
        assert!(matches!(err, BenchError::Allocation { pool: 2, size: 4096, .. }));
        assert_eq!(rt.stats().live_buffers(), 0);
    }

    #[test]
    fn dropped_buffers_are_released() {
        let rt = SimRuntime::new(Topology::single_gpu()).unwrap();
        let ends = CopyEndpoints::resolve(rt.topology(), 0, 2).unwrap();
        drop(CopyBuffers::allocate(&rt, 1024, ends).unwrap());
        assert_eq!(rt.stats().live_buffers(), 0);
        assert_eq!(rt.stats().live_signals(), 0);
    }

    #[test]
    fn rejected_grant_is_access_error() {
        let topo = Topology::single_gpu().with_access(1, 0, AccessMode::None);
        let rt = SimRuntime::new(topo).unwrap();
        let ends = CopyEndpoints::resolve(rt.topology(), 0, 2).unwrap();
        let err = CopyBuffers::allocate(&rt, 1024, ends).err().unwrap();
        assert!(matches!(err, BenchError::Access { agent: 1, .. }));
        assert_eq!(rt.stats().live_buffers(), 0);
    }

    #[test]
    fn host_buffers_are_seeded() {
        let rt = SimRuntime::new(Topology::single_gpu()).unwrap();
        let ends = CopyEndpoints::resolve(rt.topology(), 0, 2).unwrap();
        let fwd = CopyBuffers::allocate(&rt, 256, ends).unwrap();
        let host = HostBuffers::allocate(&rt, 256, &fwd).unwrap();
        assert_eq!(rt.read(host.src, 256).unwrap(), vec![SEED_PATTERN; 256]);
        assert_eq!(rt.read(host.dst, 256).unwrap(), vec![CLEAR_PATTERN; 256]);
        assert_eq!(rt.buffer_pool(host.src), Some(0));
        host.release().unwrap();
        release_buffers(fwd, None).unwrap();
        assert_eq!(rt.stats().live_buffers(), 0);
    }

    #[test]
    fn release_buffers_handles_reverse() {
        let rt = SimRuntime::new(Topology::single_gpu()).unwrap();
        let ends = CopyEndpoints::resolve(rt.topology(), 0, 2).unwrap();
        let fwd = CopyBuffers::allocate(&rt, 256, ends).unwrap();
        let rev = CopyBuffers::allocate(&rt, 256, ends.reversed()).unwrap();
        assert_eq!(rt.stats().live_buffers(), 4);
        release_buffers(fwd, Some(rev)).unwrap();
        let stats = rt.stats();
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.live_signals(), 0);
    }
}
