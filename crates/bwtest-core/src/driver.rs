//! Sequencing of a whole transaction list.

use crate::aggregate::compute_copy_time;
use crate::engine::CopyEngine;
use crate::error::{BenchError, Result};
use crate::progress::Progress;
use crate::transaction::Transaction;
use bwtest_common::BenchConfig;
use bwtest_common::exit::{EXIT_SUCCESS, EXIT_VALIDATION_FAIL};
use bwtest_hsa::CopyRuntime;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    pub transactions: usize,
    /// Transactions with at least one size that failed validation.
    pub failed_validations: usize,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.failed_validations > 0 { EXIT_VALIDATION_FAIL } else { EXIT_SUCCESS }
    }
}

/// Runs every transaction of a list in order.
pub struct BenchmarkDriver<'r, R: CopyRuntime + ?Sized> {
    runtime: &'r R,
    engine: CopyEngine<'r, R>,
}

impl<'r, R: CopyRuntime + ?Sized> BenchmarkDriver<'r, R> {
    pub fn new(runtime: &'r R, config: BenchConfig, progress: Progress) -> Self {
        Self { runtime, engine: CopyEngine::new(runtime, config, progress) }
    }

    /// Run `transactions` in order. Copy kinds go through the copy engine and
    /// get their bandwidth computed; read and write kinds go through the I/O
    /// path.
    ///
    /// Device copy profiling is switched on for the whole list when device
    /// time is reported, and switched off again afterwards even if a
    /// transaction fails.
    pub fn run(&mut self, transactions: &mut [Transaction]) -> Result<RunSummary> {
        let profile = self.engine.config().report_device_time;
        if profile {
            self.runtime.set_copy_profiling(true).map_err(BenchError::Profiling)?;
        }

        let outcome = self.run_all(transactions);

        if profile && let Err(e) = self.runtime.set_copy_profiling(false) {
            if outcome.is_ok() {
                return Err(BenchError::Profiling(e));
            }
            warn!(error = %e, "could not disable copy profiling after a failed run");
        }
        outcome
    }

    fn run_all(&mut self, transactions: &mut [Transaction]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for trans in transactions.iter_mut() {
            if trans.kind.is_copy() {
                self.engine.run(trans)?;
            } else {
                self.engine.run_io(trans)?;
            }
            compute_copy_time(trans);
            summary.transactions += 1;
            if !trans.verify {
                summary.failed_validations += 1;
            }
            info!(
                kind = %trans.kind,
                src_pool = trans.src_pool,
                dst_pool = trans.dst_pool,
                verify = trans.verify,
                "transaction complete"
            );
        }
        Ok(summary)
    }
}
