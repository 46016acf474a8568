//! Simulated runtime backed by host memory.
//!
//! Buffers are plain byte vectors. Copies are queued to a background DMA
//! worker thread and complete asynchronously, so waits really wait. Device
//! timestamps come from a modelled clock driven by the topology's
//! [`LinkModel`](crate::LinkModel) rather than from wall time, which keeps
//! device-time results deterministic.
//!
//! The runtime is strict where real platforms are strict: grants are checked
//! against the accessibility matrix, cross-agent copies need a grant, host
//! helpers only touch host-resident memory and a signal must be re-armed
//! before it can be waited on again.

use crate::error::{Result, RuntimeError};
use crate::runtime::{
    AgentId, BufferId, CopyRequest, CopyRuntime, CopyTimestamps, PoolId, SignalId, WaitMode,
};
use crate::topology::{AccessMode, Topology};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Counters for resource-balance checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub allocations: u64,
    pub frees: u64,
    pub signals_created: u64,
    pub signals_destroyed: u64,
    pub copies: u64,
    pub waits: u64,
    /// Every successful `allow_access` call, in order.
    pub grants: Vec<(AgentId, BufferId)>,
}

impl SimStats {
    /// Buffers allocated and not yet freed.
    pub fn live_buffers(&self) -> u64 {
        self.allocations - self.frees
    }

    /// Signals created and not yet destroyed.
    pub fn live_signals(&self) -> u64 {
        self.signals_created - self.signals_destroyed
    }
}

struct SimBuffer {
    pool: PoolId,
    data: Vec<u8>,
    granted: HashSet<AgentId>,
}

struct SimSignal {
    value: AtomicI64,
    armed: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
    completed: Mutex<Option<CopyTimestamps>>,
}

impl SimSignal {
    fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            armed: AtomicBool::new(initial >= 1),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            completed: Mutex::new(None),
        }
    }

    fn store(&self, value: i64) {
        let _guard = self.lock.lock().expect("signal lock poisoned");
        *self.completed.lock().expect("signal lock poisoned") = None;
        self.value.store(value, Ordering::Release);
        self.armed.store(value >= 1, Ordering::Release);
        self.cond.notify_all();
    }

    fn complete(&self, timestamps: Option<CopyTimestamps>) {
        let _guard = self.lock.lock().expect("signal lock poisoned");
        *self.completed.lock().expect("signal lock poisoned") = timestamps;
        self.value.fetch_sub(1, Ordering::AcqRel);
        self.cond.notify_all();
    }

    fn wait(&self, mode: WaitMode) -> i64 {
        match mode {
            WaitMode::Active => loop {
                let value = self.value.load(Ordering::Acquire);
                if value < 1 {
                    return value;
                }
                std::hint::spin_loop();
            },
            WaitMode::Blocked => {
                let mut guard = self.lock.lock().expect("signal lock poisoned");
                loop {
                    let value = self.value.load(Ordering::Acquire);
                    if value < 1 {
                        return value;
                    }
                    guard = self.cond.wait(guard).expect("signal lock poisoned");
                }
            }
        }
    }
}

struct InFlight {
    link: (AgentId, AgentId),
    end_ns: u64,
}

struct SimState {
    next_id: u64,
    buffers: HashMap<BufferId, SimBuffer>,
    signals: HashMap<SignalId, Arc<SimSignal>>,
    pool_used: Vec<usize>,
    profiling: bool,
    clock_ns: u64,
    in_flight: Vec<InFlight>,
    corrupt_pools: HashSet<PoolId>,
    stats: SimStats,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, id: BufferId) -> Result<&SimBuffer> {
        self.buffers.get(&id).ok_or(RuntimeError::InvalidBuffer(id))
    }

    fn signal(&self, id: SignalId) -> Result<Arc<SimSignal>> {
        self.signals.get(&id).cloned().ok_or(RuntimeError::InvalidSignal(id))
    }

    fn execute(&mut self, job: &CopyJob) {
        let req = &job.request;
        if req.src == req.dst {
            return;
        }
        let Some(mut dst) = self.buffers.get_mut(&req.dst).map(|b| std::mem::take(&mut b.data))
        else {
            warn!(buffer = ?req.dst, "copy destination freed while in flight");
            return;
        };
        match self.buffers.get(&req.src) {
            Some(src) => dst[..req.size].copy_from_slice(&src.data[..req.size]),
            None => warn!(buffer = ?req.src, "copy source freed while in flight"),
        }
        if job.corrupt && req.size > 0 {
            dst[0] ^= 0xFF;
        }
        if let Some(buffer) = self.buffers.get_mut(&req.dst) {
            buffer.data = dst;
        }
    }
}

struct CopyJob {
    request: CopyRequest,
    timestamps: Option<CopyTimestamps>,
    corrupt: bool,
    signal: Arc<SimSignal>,
}

/// A [`CopyRuntime`] that runs on host memory with a modelled device clock.
pub struct SimRuntime {
    topology: Topology,
    state: Arc<Mutex<SimState>>,
    jobs: Option<Sender<CopyJob>>,
    worker: Option<JoinHandle<()>>,
}

impl SimRuntime {
    /// Start a runtime for `topology`, spawning its DMA worker.
    pub fn new(topology: Topology) -> Result<Self> {
        let state = Arc::new(Mutex::new(SimState {
            next_id: 0,
            buffers: HashMap::new(),
            signals: HashMap::new(),
            pool_used: vec![0; topology.pools().len()],
            profiling: false,
            clock_ns: 0,
            in_flight: Vec::new(),
            corrupt_pools: HashSet::new(),
            stats: SimStats::default(),
        }));
        let (tx, rx) = mpsc::channel();
        let worker_state = Arc::clone(&state);
        let worker = std::thread::Builder::new()
            .name("sim-dma".into())
            .spawn(move || run_dma_worker(worker_state, rx))
            .map_err(|e| RuntimeError::EngineUnavailable(e.to_string()))?;
        debug!(
            agents = topology.agents().len(),
            pools = topology.pools().len(),
            "started simulated runtime"
        );
        Ok(Self { topology, state, jobs: Some(tx), worker: Some(worker) })
    }

    /// Flip the first byte of every later copy that lands in `pool`.
    pub fn corrupt_copies_into(&self, pool: PoolId) {
        self.lock().corrupt_pools.insert(pool);
    }

    /// Snapshot of the resource counters.
    pub fn stats(&self) -> SimStats {
        self.lock().stats.clone()
    }

    /// Pool a live buffer was allocated from.
    pub fn buffer_pool(&self, buffer: BufferId) -> Option<PoolId> {
        self.lock().buffers.get(&buffer).map(|b| b.pool)
    }

    pub fn profiling_enabled(&self) -> bool {
        self.lock().profiling
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock poisoned")
    }

    fn owner_of(&self, pool: PoolId) -> Result<AgentId> {
        self.topology.pool(pool).map(|p| p.owner).ok_or(RuntimeError::UnknownPool(pool))
    }

    fn check_agent(&self, agent: AgentId) -> Result<()> {
        self.topology.agent(agent).map(|_| ()).ok_or(RuntimeError::UnknownAgent(agent))
    }

    fn host_buffer<'a>(&self, state: &'a SimState, buffer: BufferId) -> Result<&'a SimBuffer> {
        let buf = state.buffer(buffer)?;
        let host = self.topology.pool_owner(buf.pool).is_some_and(|a| a.is_host());
        if !host {
            return Err(RuntimeError::NotHostAccessible(buffer));
        }
        Ok(buf)
    }

    /// A cross-agent copy needs at least one grant; an indirect pairing needs both.
    fn check_copy_access(&self, state: &SimState, req: &CopyRequest) -> Result<()> {
        let src = state.buffer(req.src)?;
        let dst = state.buffer(req.dst)?;
        let src_owner = self.owner_of(src.pool)?;
        let dst_owner = self.owner_of(dst.pool)?;
        if src_owner == dst_owner {
            return Ok(());
        }
        let dst_reaches_src = dst.granted.contains(&req.src_agent) || req.src_agent == dst_owner;
        let src_reaches_dst = src.granted.contains(&req.dst_agent) || req.dst_agent == src_owner;
        let indirect =
            self.topology.access().get(req.src_agent, req.dst_agent) == AccessMode::IndirectViaHost;
        let allowed =
            if indirect { dst_reaches_src && src_reaches_dst } else { dst_reaches_src || src_reaches_dst };
        if allowed {
            Ok(())
        } else if !src_reaches_dst {
            Err(RuntimeError::AccessDenied { agent: req.dst_agent, buffer: req.src })
        } else {
            Err(RuntimeError::AccessDenied { agent: req.src_agent, buffer: req.dst })
        }
    }
}

impl CopyRuntime for SimRuntime {
    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn allocate(&self, pool: PoolId, size: usize) -> Result<BufferId> {
        let capacity = self.topology.pool(pool).ok_or(RuntimeError::UnknownPool(pool))?.capacity;
        let mut state = self.lock();
        let used = state.pool_used[pool];
        let available = capacity.saturating_sub(used);
        if size > available {
            return Err(RuntimeError::OutOfMemory { pool, size, available });
        }
        let id = BufferId(state.next_id());
        state.pool_used[pool] += size;
        state.buffers.insert(id, SimBuffer { pool, data: vec![0; size], granted: HashSet::new() });
        state.stats.allocations += 1;
        trace!(pool, size, buffer = ?id, "allocated");
        Ok(id)
    }

    fn free(&self, buffer: BufferId) -> Result<()> {
        let mut state = self.lock();
        let buf = state.buffers.remove(&buffer).ok_or(RuntimeError::InvalidBuffer(buffer))?;
        state.pool_used[buf.pool] -= buf.data.len();
        state.stats.frees += 1;
        trace!(buffer = ?buffer, "freed");
        Ok(())
    }

    fn allow_access(&self, agent: AgentId, buffer: BufferId) -> Result<()> {
        self.check_agent(agent)?;
        let mut state = self.lock();
        let pool = state.buffer(buffer)?.pool;
        let owner = self.owner_of(pool)?;
        if agent != owner && self.topology.access().get(agent, owner) == AccessMode::None {
            return Err(RuntimeError::AccessDenied { agent, buffer });
        }
        if let Some(buf) = state.buffers.get_mut(&buffer) {
            buf.granted.insert(agent);
        }
        state.stats.grants.push((agent, buffer));
        Ok(())
    }

    fn create_signal(&self, initial: i64) -> Result<SignalId> {
        let mut state = self.lock();
        let id = SignalId(state.next_id());
        state.signals.insert(id, Arc::new(SimSignal::new(initial)));
        state.stats.signals_created += 1;
        Ok(id)
    }

    fn destroy_signal(&self, signal: SignalId) -> Result<()> {
        let mut state = self.lock();
        state.signals.remove(&signal).ok_or(RuntimeError::InvalidSignal(signal))?;
        state.stats.signals_destroyed += 1;
        Ok(())
    }

    fn store_signal(&self, signal: SignalId, value: i64) -> Result<()> {
        let sig = self.lock().signal(signal)?;
        sig.store(value);
        Ok(())
    }

    fn wait_signal(&self, signal: SignalId, mode: WaitMode) -> Result<i64> {
        let sig = self.lock().signal(signal)?;
        if !sig.armed.swap(false, Ordering::AcqRel) {
            return Err(RuntimeError::SignalNotArmed(signal));
        }
        let value = sig.wait(mode);
        let completed = *sig.completed.lock().expect("signal lock poisoned");
        let mut state = self.lock();
        state.stats.waits += 1;
        if let Some(ts) = completed {
            state.clock_ns = state.clock_ns.max(ts.end_ns);
        }
        let now = state.clock_ns;
        state.in_flight.retain(|f| f.end_ns > now);
        Ok(value)
    }

    fn async_copy(&self, request: CopyRequest) -> Result<()> {
        let src_agent =
            self.topology.agent(request.src_agent).ok_or(RuntimeError::UnknownAgent(request.src_agent))?;
        let dst_agent =
            self.topology.agent(request.dst_agent).ok_or(RuntimeError::UnknownAgent(request.dst_agent))?;
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| RuntimeError::EngineUnavailable("DMA worker stopped".into()))?;

        let mut state = self.lock();
        let signal = state.signal(request.signal)?;
        for id in [request.src, request.dst] {
            let capacity = state.buffer(id)?.data.len();
            if request.size > capacity {
                return Err(RuntimeError::CopyOutOfBounds { buffer: id, size: request.size, capacity });
            }
        }
        self.check_copy_access(&state, &request)?;

        let link = (request.src_agent.min(request.dst_agent), request.src_agent.max(request.dst_agent));
        let start_ns = state.clock_ns;
        let contended = state.in_flight.iter().any(|f| f.link == link && f.end_ns > start_ns);
        let duration = self.topology.link().copy_duration_ns(src_agent, dst_agent, request.size, contended);
        let end_ns = start_ns.saturating_add(duration);
        state.in_flight.push(InFlight { link, end_ns });

        let timestamps = state.profiling.then_some(CopyTimestamps { start_ns, end_ns });
        let dst_pool = state.buffer(request.dst)?.pool;
        let corrupt = state.corrupt_pools.contains(&dst_pool);
        state.stats.copies += 1;
        drop(state);

        trace!(size = request.size, contended, duration_ns = duration, "queued async copy");
        jobs.send(CopyJob { request, timestamps, corrupt, signal })
            .map_err(|_| RuntimeError::EngineUnavailable("DMA worker stopped".into()))
    }

    fn copy_time(&self, signal: SignalId) -> Result<CopyTimestamps> {
        let state = self.lock();
        if !state.profiling {
            return Err(RuntimeError::ProfilingDisabled);
        }
        let sig = state.signal(signal)?;
        drop(state);
        let completed = *sig.completed.lock().expect("signal lock poisoned");
        completed.ok_or(RuntimeError::CopyNotComplete(signal))
    }

    fn set_copy_profiling(&self, enabled: bool) -> Result<()> {
        self.lock().profiling = enabled;
        debug!(enabled, "async copy profiling");
        Ok(())
    }

    fn fill(&self, buffer: BufferId, byte: u8) -> Result<()> {
        let mut state = self.lock();
        self.host_buffer(&state, buffer)?;
        if let Some(buf) = state.buffers.get_mut(&buffer) {
            buf.data.fill(byte);
        }
        Ok(())
    }

    fn read(&self, buffer: BufferId, len: usize) -> Result<Vec<u8>> {
        let state = self.lock();
        let buf = self.host_buffer(&state, buffer)?;
        if len > buf.data.len() {
            return Err(RuntimeError::CopyOutOfBounds { buffer, size: len, capacity: buf.data.len() });
        }
        Ok(buf.data[..len].to_vec())
    }
}

impl Drop for SimRuntime {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("sim DMA worker panicked");
        }
    }
}

fn run_dma_worker(state: Arc<Mutex<SimState>>, jobs: Receiver<CopyJob>) {
    for job in jobs {
        match state.lock() {
            Ok(mut state) => state.execute(&job),
            Err(_) => warn!("sim state lock poisoned, dropping copy payload"),
        }
        job.signal.complete(job.timestamps);
    }
}
