//! Bandwidth derived from the per-size timings.

use crate::transaction::Transaction;
use serde::Serialize;
use std::time::Duration;

const BYTES_PER_GB: f64 = 1e9;

/// Achieved bandwidth for one sweep size, in decimal GB/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bandwidth {
    pub wall_gbps: f64,
    /// `None` when no device measurement exists for the size.
    pub device_gbps: Option<f64>,
}

/// `bytes × copies / elapsed` in GB/s.
///
/// The byte total is computed in `u128` so the largest sweep size times any
/// `u32` iteration count cannot overflow. A zero elapsed time yields `0.0`.
pub fn bandwidth_gbps(bytes: usize, copies: u32, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let total = (bytes as u128) * u128::from(copies);
    total as f64 / secs / BYTES_PER_GB
}

/// Fill in [`SizeResult::bandwidth`](crate::SizeResult) for every size of a
/// finished copy transaction.
///
/// A bidirectional iteration moves `size` bytes each way, so it is credited
/// with twice the bytes.
pub fn compute_copy_time(trans: &mut Transaction) {
    let directions = if trans.kind.is_bidirectional() { 2 } else { 1 };
    for result in &mut trans.results {
        let bytes = result.size.saturating_mul(directions);
        let wall_gbps = bandwidth_gbps(bytes, result.iterations, result.wall_elapsed);
        let device_gbps = result.device.mean().map(|mean| bandwidth_gbps(bytes, 1, mean));
        result.bandwidth = Some(Bandwidth { wall_gbps, device_gbps });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{DeviceTiming, RequestKind, SizeResult};
    use proptest::prelude::*;

    fn result(size: usize, iterations: u32, wall: Duration, device: DeviceTiming) -> SizeResult {
        SizeResult {
            size,
            iterations,
            wall_elapsed: wall,
            wall_min: wall / iterations,
            wall_mean: wall / iterations,
            device,
            validation: None,
            bandwidth: None,
        }
    }

    #[test]
    fn one_gigabyte_per_second() {
        let gbps = bandwidth_gbps(1_000_000, 1000, Duration::from_secs(1));
        assert!((gbps - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_is_zero_bandwidth() {
        assert_eq!(bandwidth_gbps(1024, 13, Duration::ZERO), 0.0);
    }

    #[test]
    fn bidirectional_counts_both_directions() {
        let device = DeviceTiming::Measured { min: Duration::from_micros(1), mean: Duration::from_micros(1) };
        let mut uni = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        uni.results.push(result(1000, 1, Duration::from_micros(1), device));
        let mut bi = Transaction::new(RequestKind::CopyBidir, 0, 2, true);
        bi.results.push(result(1000, 1, Duration::from_micros(1), device));

        compute_copy_time(&mut uni);
        compute_copy_time(&mut bi);
        let u = uni.results[0].bandwidth.unwrap();
        let b = bi.results[0].bandwidth.unwrap();
        assert!((b.wall_gbps - 2.0 * u.wall_gbps).abs() < 1e-9);
        assert!((u.device_gbps.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unavailable_device_time_has_no_device_bandwidth() {
        let mut t = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        t.results.push(result(4096, 1, Duration::from_millis(1), DeviceTiming::Unavailable));
        compute_copy_time(&mut t);
        let bw = t.results[0].bandwidth.unwrap();
        assert!(bw.wall_gbps > 0.0);
        assert_eq!(bw.device_gbps, None);
    }

    proptest! {
        #[test]
        fn bandwidth_is_finite_for_any_sweep(
            size in 1usize..=512 * 1024 * 1024,
            copies in 1u32..=u32::MAX,
            nanos in 1u64..=u64::MAX / 2,
        ) {
            let gbps = bandwidth_gbps(size, copies, Duration::from_nanos(nanos));
            prop_assert!(gbps.is_finite());
            prop_assert!(gbps > 0.0);
        }

        #[test]
        fn more_time_never_means_more_bandwidth(size in 1usize..1 << 30, copies in 1u32..10_000, nanos in 1u64..1 << 40) {
            let fast = bandwidth_gbps(size, copies, Duration::from_nanos(nanos));
            let slow = bandwidth_gbps(size, copies, Duration::from_nanos(nanos * 2));
            prop_assert!(slow <= fast);
        }
    }
}
