//! The copy benchmark engine.
//!
//! One call to [`CopyEngine::run`] takes a transaction from provisioning to
//! teardown:
//!
//! 1. Allocate forward buffers sized to the largest sweep entry, reverse
//!    buffers for bidirectional kinds, and host seed/readback buffers when
//!    validating. The forward source is seeded from the host by a synchronous
//!    copy.
//! 2. For every size: re-arm, issue, wait. When validating, read the
//!    destination back into host memory and compare. Device timestamps are
//!    collected per iteration; the wall clock spans the whole loop.
//! 3. Release everything, on error paths too.

use crate::access::acquire_cross_access;
use crate::error::{BenchError, Result};
use crate::progress::{Progress, ProgressToken};
use crate::provision::{CopyBuffers, CopyEndpoints, HostBuffers, release_buffers};
use crate::timer::PerfTimer;
use crate::transaction::{Comparison, DeviceTiming, SizeResult, Transaction};
use bwtest_common::{BenchConfig, largest_size};
use bwtest_hsa::{AgentId, BufferId, CopyRequest, CopyRuntime, CopyTimestamps, SignalId, WaitMode};
use std::time::Duration;
use tracing::{error, info, warn};

/// Running min and total of per-iteration device durations.
#[derive(Debug, Default)]
struct DeviceAccumulator {
    total_ns: u128,
    min_ns: Option<u64>,
    samples: u32,
}

impl DeviceAccumulator {
    fn record(&mut self, span: CopyTimestamps) {
        let ns = span.duration_ns();
        self.total_ns += u128::from(ns);
        self.min_ns = Some(self.min_ns.map_or(ns, |m| m.min(ns)));
        self.samples += 1;
    }

    fn finish(&self) -> DeviceTiming {
        match self.min_ns {
            Some(min) if self.samples > 0 => {
                let mean = self.total_ns / u128::from(self.samples);
                DeviceTiming::Measured {
                    min: Duration::from_nanos(min),
                    mean: Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX)),
                }
            }
            _ => DeviceTiming::Unavailable,
        }
    }
}

/// How a transaction is swept.
#[derive(Debug, Clone, Copy)]
struct SweepPlan {
    bidirectional: bool,
    validate: bool,
}

impl SweepPlan {
    /// Validation runs a single iteration; every other sweep gets the
    /// inflated count.
    fn iterations(&self, config: &BenchConfig) -> u32 {
        if self.validate { 1 } else { config.timed_iteration_count() }
    }
}

/// Buffers live for the duration of one sweep.
struct Provisioned<'a, 'r, R: CopyRuntime + ?Sized> {
    forward: &'a CopyBuffers<'r, R>,
    reverse: Option<&'a CopyBuffers<'r, R>>,
    host: Option<&'a HostBuffers<'r, R>>,
}

/// Runs copy transactions against a [`CopyRuntime`].
pub struct CopyEngine<'r, R: CopyRuntime + ?Sized> {
    runtime: &'r R,
    config: BenchConfig,
    progress: Progress,
}

impl<'r, R: CopyRuntime + ?Sized> CopyEngine<'r, R> {
    /// `progress` is ignored when the configuration turns progress off.
    pub fn new(runtime: &'r R, config: BenchConfig, progress: Progress) -> Self {
        let progress = if config.progress { progress } else { Progress::disabled() };
        Self { runtime, config, progress }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn wait_mode(&self) -> WaitMode {
        if self.config.blocking_wait { WaitMode::Blocked } else { WaitMode::Active }
    }

    /// Run a copy transaction over the configured size sweep, appending one
    /// [`SizeResult`] per size.
    ///
    /// Any returned error is fatal for the run. A validation mismatch is not
    /// an error: it clears `trans.verify` and the sweep moves on.
    pub fn run(&mut self, trans: &mut Transaction) -> Result<()> {
        let plan = SweepPlan {
            bidirectional: trans.kind.is_bidirectional(),
            validate: self.config.validate,
        };
        self.execute(trans, plan)
    }

    /// Run a single-ended read or write transaction: a unidirectional sweep
    /// between the named pool and host memory, without validation.
    pub fn run_io(&mut self, trans: &mut Transaction) -> Result<()> {
        if trans.kind.is_copy() {
            return Err(BenchError::InternalConsistency(format!(
                "{} transaction routed to the I/O path",
                trans.kind
            )));
        }
        self.execute(trans, SweepPlan { bidirectional: false, validate: false })
    }

    fn execute(&mut self, trans: &mut Transaction, plan: SweepPlan) -> Result<()> {
        let runtime = self.runtime;
        let sizes = self.config.size_sweep().to_vec();
        let max_size = largest_size(&sizes)
            .ok_or_else(|| BenchError::InternalConsistency("size sweep is empty".into()))?;
        let ends = CopyEndpoints::resolve(runtime.topology(), trans.src_pool, trans.dst_pool)?;
        info!(
            kind = %trans.kind,
            src_pool = trans.src_pool,
            dst_pool = trans.dst_pool,
            max_size,
            "provisioning transaction"
        );

        let forward = CopyBuffers::allocate(runtime, max_size, ends)?;
        let reverse = if plan.bidirectional {
            Some(CopyBuffers::allocate(runtime, max_size, ends.reversed())?)
        } else {
            None
        };
        let host = if plan.validate {
            let host = HostBuffers::allocate(runtime, max_size, &forward)?;
            self.seed(&forward, &host, max_size)?;
            Some(host)
        } else {
            None
        };

        let bufs = Provisioned { forward: &forward, reverse: reverse.as_ref(), host: host.as_ref() };
        let swept = self.sweep(trans, plan, &sizes, max_size, &bufs);

        let released = release_buffers(forward, reverse)
            .and(host.map_or(Ok(()), HostBuffers::release));
        swept.and(released)
    }

    /// Copy the host seed into the forward source buffer.
    fn seed(&self, forward: &CopyBuffers<'r, R>, host: &HostBuffers<'r, R>, size: usize) -> Result<()> {
        let request = CopyRequest {
            dst: forward.src,
            dst_agent: forward.endpoints.src_agent,
            src: host.src,
            src_agent: host.host_agent,
            size,
            signal: host.signal,
        };
        self.copy_sync(request)
    }

    /// Issue a copy and wait for it.
    fn copy_sync(&self, request: CopyRequest) -> Result<()> {
        self.arm(request.signal)?;
        self.runtime
            .async_copy(request)
            .map_err(|source| BenchError::Copy { size: request.size, source })?;
        self.runtime.wait_signal(request.signal, self.wait_mode()).map_err(BenchError::Signal)?;
        Ok(())
    }

    fn arm(&self, signal: SignalId) -> Result<()> {
        self.runtime.store_signal(signal, 1).map_err(BenchError::Signal)
    }

    fn issue(&self, bufs: &CopyBuffers<'r, R>, size: usize) -> Result<()> {
        let request = CopyRequest {
            dst: bufs.dst,
            dst_agent: bufs.endpoints.dst_agent,
            src: bufs.src,
            src_agent: bufs.endpoints.src_agent,
            size,
            signal: bufs.signal,
        };
        self.runtime.async_copy(request).map_err(|source| BenchError::Copy { size, source })
    }

    fn wait(&mut self, signal: SignalId, spin: ProgressToken, block: ProgressToken) -> Result<()> {
        let mode = self.wait_mode();
        self.progress.token(if mode == WaitMode::Blocked { block } else { spin });
        self.runtime.wait_signal(signal, mode).map_err(BenchError::Signal)?;
        Ok(())
    }

    fn sweep(
        &mut self,
        trans: &mut Transaction,
        plan: SweepPlan,
        sizes: &[usize],
        max_size: usize,
        bufs: &Provisioned<'_, 'r, R>,
    ) -> Result<()> {
        let iterations = plan.iterations(&self.config);
        let capture = self.config.report_device_time && trans.uses_accelerator;
        for &size in sizes {
            if size > max_size {
                error!(size, max_size, "illegal DMA buffer size, ending sweep");
                break;
            }
            info!(size, iterations, "running buffer size");
            self.progress.line(&format!("RUNNING {iterations} ITERATIONS for buffer size {size}"));
            let result = self.measure_size(size, iterations, capture, bufs)?;
            if let Some(Comparison::Mismatch { offset }) = result.validation {
                error!(size, offset, "data corrupted during DMA");
                trans.verify = false;
            }
            trans.results.push(result);
        }
        self.progress.line("");
        Ok(())
    }

    fn measure_size(
        &mut self,
        size: usize,
        iterations: u32,
        capture: bool,
        bufs: &Provisioned<'_, 'r, R>,
    ) -> Result<SizeResult> {
        let mut device = DeviceAccumulator::default();
        let mut validation = None;
        let mut timer = PerfTimer::new();
        let index = timer.create_timer();

        timer.start_timer(index);
        for _ in 0..iterations {
            self.progress.token(ProgressToken::Iteration);

            self.arm(bufs.forward.signal)?;
            if let Some(rev) = bufs.reverse {
                self.arm(rev.signal)?;
            }

            self.issue(bufs.forward, size)?;
            if let Some(rev) = bufs.reverse {
                self.issue(rev, size)?;
            }

            self.wait(bufs.forward.signal, ProgressToken::ForwardSpin, ProgressToken::ForwardBlock)?;
            if let Some(rev) = bufs.reverse {
                self.wait(rev.signal, ProgressToken::ReverseSpin, ProgressToken::ReverseBlock)?;
            }

            if let Some(host) = bufs.host {
                self.progress.token(ProgressToken::Validate);
                let outcome = self.check(bufs.forward, host, size)?;
                validation = Some(outcome);
                if !outcome.is_match() {
                    break;
                }
            }

            if capture {
                device.record(self.device_span(bufs)?);
            }
        }
        timer.stop_timer(index);

        let wall_elapsed = timer.read_timer(index);
        let wall_mean = wall_elapsed / iterations;
        let device = match validation {
            _ if !capture => DeviceTiming::NotCaptured,
            Some(Comparison::Mismatch { .. }) => DeviceTiming::Unavailable,
            _ => device.finish(),
        };
        if device == DeviceTiming::Unavailable {
            warn!(size, "no valid device measurement for this size");
        }

        Ok(SizeResult {
            size,
            iterations,
            wall_elapsed,
            wall_min: wall_mean,
            wall_mean,
            device,
            validation,
            bandwidth: None,
        })
    }

    /// Forward copy span, widened to cover the reverse copy when present.
    fn device_span(&self, bufs: &Provisioned<'_, 'r, R>) -> Result<CopyTimestamps> {
        let fwd = self.runtime.copy_time(bufs.forward.signal).map_err(BenchError::Timing)?;
        match bufs.reverse {
            Some(rev) => {
                let rev = self.runtime.copy_time(rev.signal).map_err(BenchError::Timing)?;
                Ok(fwd.union(&rev))
            }
            None => Ok(fwd),
        }
    }

    /// Read the forward destination back into host memory and compare with
    /// the seed.
    fn check(&self, forward: &CopyBuffers<'r, R>, host: &HostBuffers<'r, R>, size: usize) -> Result<Comparison> {
        let dst_agent: AgentId = forward.endpoints.dst_agent;
        acquire_cross_access(self.runtime, dst_agent, forward.dst, host.host_agent, host.dst)?;
        self.copy_sync(CopyRequest {
            dst: host.dst,
            dst_agent: host.host_agent,
            src: forward.dst,
            src_agent: dst_agent,
            size,
            signal: host.signal,
        })?;
        let expected = self.read_host(host.src, size)?;
        let actual = self.read_host(host.dst, size)?;
        Ok(Comparison::of(&expected, &actual))
    }

    fn read_host(&self, buffer: BufferId, size: usize) -> Result<Vec<u8>> {
        self.runtime.read(buffer, size).map_err(BenchError::HostAccess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::RequestKind;
    use bwtest_hsa::{SimRuntime, Topology};

    fn config(sizes: Vec<usize>, validate: bool) -> BenchConfig {
        BenchConfig { sizes: Some(sizes), validate, iterations: 2, ..BenchConfig::default() }
    }

    fn profiled_runtime() -> SimRuntime {
        let rt = SimRuntime::new(Topology::single_gpu()).unwrap();
        rt.set_copy_profiling(true).unwrap();
        rt
    }

    #[test]
    fn accumulator_tracks_min_and_mean() {
        let mut acc = DeviceAccumulator::default();
        acc.record(CopyTimestamps { start_ns: 0, end_ns: 300 });
        acc.record(CopyTimestamps { start_ns: 300, end_ns: 400 });
        assert_eq!(
            acc.finish(),
            DeviceTiming::Measured { min: Duration::from_nanos(100), mean: Duration::from_nanos(200) }
        );
        assert_eq!(DeviceAccumulator::default().finish(), DeviceTiming::Unavailable);
    }

    #[test]
    fn unidirectional_sweep_records_each_size() {
        let rt = profiled_runtime();
        let mut engine = CopyEngine::new(&rt, config(vec![1024, 4096], false), Progress::disabled());
        let mut trans = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        engine.run(&mut trans).unwrap();

        assert!(trans.verify);
        assert_eq!(trans.results.len(), 2);
        for r in &trans.results {
            assert_eq!(r.iterations, 3);
            assert_eq!(r.wall_min, r.wall_mean);
            assert!(r.device.mean().is_some());
            assert_eq!(r.validation, None);
        }
        assert_eq!(rt.stats().copies, 6);
    }

    #[test]
    fn device_time_skipped_without_accelerator() {
        let rt = profiled_runtime();
        let mut engine = CopyEngine::new(&rt, config(vec![1024], false), Progress::disabled());
        let mut trans = Transaction::new(RequestKind::CopyUnidir, 0, 1, false);
        engine.run(&mut trans).unwrap();
        assert_eq!(trans.results[0].device, DeviceTiming::NotCaptured);
    }

    #[test]
    fn validation_seeds_then_checks_once() {
        let rt = profiled_runtime();
        let mut engine = CopyEngine::new(&rt, config(vec![512], true), Progress::disabled());
        let mut trans = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        engine.run(&mut trans).unwrap();

        let r = &trans.results[0];
        assert!(trans.verify);
        assert_eq!(r.iterations, 1);
        assert_eq!(r.validation, Some(Comparison::Match));
        // seed, forward, readback
        assert_eq!(rt.stats().copies, 3);
        assert_eq!(rt.stats().live_buffers(), 0);
    }

    #[test]
    fn mismatch_marks_size_unavailable_and_continues() {
        let rt = profiled_runtime();
        rt.corrupt_copies_into(2);
        let mut engine = CopyEngine::new(&rt, config(vec![256, 512], true), Progress::disabled());
        let mut trans = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        engine.run(&mut trans).unwrap();

        assert!(!trans.verify);
        assert_eq!(trans.results.len(), 2);
        for r in &trans.results {
            assert_eq!(r.device, DeviceTiming::Unavailable);
            assert_eq!(r.validation, Some(Comparison::Mismatch { offset: 0 }));
        }
        assert_eq!(rt.stats().live_signals(), 0);
    }

    #[test]
    fn blocking_wait_writes_lowercase_tokens() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Sink(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let rt = profiled_runtime();
        let sink = Sink(Arc::new(Mutex::new(Vec::new())));
        let cfg = BenchConfig { blocking_wait: true, iterations: 1, ..config(vec![64], false) };
        let mut engine = CopyEngine::new(&rt, cfg, Progress::to_writer(sink.clone()));
        let mut trans = Transaction::new(RequestKind::CopyBidir, 0, 2, true);
        engine.run(&mut trans).unwrap();

        let out = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains(".fr.fr"), "unexpected progress: {out:?}");
        assert!(!out.contains('F'));
    }

    #[test]
    fn io_path_rejects_copy_kinds() {
        let rt = profiled_runtime();
        let mut engine = CopyEngine::new(&rt, config(vec![64], false), Progress::disabled());
        let mut trans = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        assert!(matches!(engine.run_io(&mut trans), Err(BenchError::InternalConsistency(_))));
    }

    #[test]
    fn io_read_ignores_validation() {
        let rt = profiled_runtime();
        let mut engine = CopyEngine::new(&rt, config(vec![64, 128], true), Progress::disabled());
        let mut trans = Transaction::new(RequestKind::Read, 2, 0, true);
        engine.run_io(&mut trans).unwrap();
        assert!(trans.results.iter().all(|r| r.validation.is_none()));
        // Validation does not shrink the read sweep: 2 * 6 / 5 + 1 = 3 per size.
        assert!(trans.results.iter().all(|r| r.iterations == 3));
        assert_eq!(rt.stats().copies, 6);
    }
}
