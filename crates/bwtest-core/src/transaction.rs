//! Transaction descriptors and their per-size results.

use crate::aggregate::Bandwidth;
use bwtest_hsa::PoolId;
use serde::Serialize;
use std::time::Duration;

/// What a transaction asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    CopyUnidir,
    CopyBidir,
    CopyAllUnidir,
    CopyAllBidir,
    /// Single-ended transfer from a pool into host memory.
    Read,
    /// Single-ended transfer from host memory into a pool.
    Write,
}

impl RequestKind {
    pub fn is_copy(self) -> bool {
        matches!(self, Self::CopyUnidir | Self::CopyBidir | Self::CopyAllUnidir | Self::CopyAllBidir)
    }

    pub fn is_bidirectional(self) -> bool {
        matches!(self, Self::CopyBidir | Self::CopyAllBidir)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CopyUnidir => "unidirectional copy",
            Self::CopyBidir => "bidirectional copy",
            Self::CopyAllUnidir => "all-pairs unidirectional copy",
            Self::CopyAllBidir => "all-pairs bidirectional copy",
            Self::Read => "read",
            Self::Write => "write",
        };
        f.write_str(s)
    }
}

/// Outcome of comparing copied data with the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum Comparison {
    Match,
    /// First differing byte.
    Mismatch { offset: usize },
}

impl Comparison {
    /// Compare `actual` against `expected` byte for byte.
    pub fn of(expected: &[u8], actual: &[u8]) -> Self {
        match expected.iter().zip(actual).position(|(e, a)| e != a) {
            Some(offset) => Self::Mismatch { offset },
            None if expected.len() != actual.len() => {
                Self::Mismatch { offset: expected.len().min(actual.len()) }
            }
            None => Self::Match,
        }
    }

    pub fn is_match(self) -> bool {
        self == Self::Match
    }
}

/// Device-reported timing for one buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum DeviceTiming {
    /// Device timestamps were not captured for this transaction.
    NotCaptured,
    /// Validation failed, so no valid measurement exists.
    Unavailable,
    Measured { min: Duration, mean: Duration },
}

impl DeviceTiming {
    pub fn mean(&self) -> Option<Duration> {
        match self {
            Self::Measured { mean, .. } => Some(*mean),
            _ => None,
        }
    }

    pub fn min(&self) -> Option<Duration> {
        match self {
            Self::Measured { min, .. } => Some(*min),
            _ => None,
        }
    }
}

/// Measurements for one entry of the size sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeResult {
    /// Bytes per copy.
    pub size: usize,
    pub iterations: u32,
    /// Wall-clock time across all iterations.
    pub wall_elapsed: Duration,
    /// Per-copy wall-clock time. Wall time is only sampled around the whole
    /// loop, so min and mean are the same value.
    pub wall_min: Duration,
    pub wall_mean: Duration,
    pub device: DeviceTiming,
    /// `None` when validation is off.
    pub validation: Option<Comparison>,
    /// Filled in by [`compute_copy_time`](crate::compute_copy_time).
    pub bandwidth: Option<Bandwidth>,
}

/// A single benchmark request and, once run, its results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub kind: RequestKind,
    pub src_pool: PoolId,
    pub dst_pool: PoolId,
    /// Either endpoint lives on an accelerator, so device timestamps mean something.
    pub uses_accelerator: bool,
    /// `false` once any size failed validation.
    pub verify: bool,
    pub results: Vec<SizeResult>,
}

impl Transaction {
    pub fn new(kind: RequestKind, src_pool: PoolId, dst_pool: PoolId, uses_accelerator: bool) -> Self {
        Self { kind, src_pool, dst_pool, uses_accelerator, verify: true, results: Vec::new() }
    }

    /// Sizes whose data did not survive the copy.
    pub fn mismatches(&self) -> impl Iterator<Item = &SizeResult> {
        self.results.iter().filter(|r| matches!(r.validation, Some(Comparison::Mismatch { .. })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_kinds_are_copies() {
        assert!(RequestKind::CopyUnidir.is_copy());
        assert!(RequestKind::CopyAllBidir.is_copy());
        assert!(!RequestKind::Read.is_copy());
        assert!(!RequestKind::Write.is_copy());
    }

    #[test]
    fn only_bidir_kinds_are_bidirectional() {
        assert!(RequestKind::CopyBidir.is_bidirectional());
        assert!(RequestKind::CopyAllBidir.is_bidirectional());
        assert!(!RequestKind::CopyUnidir.is_bidirectional());
        assert!(!RequestKind::Read.is_bidirectional());
    }

    #[test]
    fn comparison_finds_first_difference() {
        assert_eq!(Comparison::of(&[1, 2, 3], &[1, 2, 3]), Comparison::Match);
        assert_eq!(Comparison::of(&[1, 2, 3], &[1, 9, 9]), Comparison::Mismatch { offset: 1 });
        assert_eq!(Comparison::of(&[1, 2, 3], &[1, 2]), Comparison::Mismatch { offset: 2 });
    }

    #[test]
    fn device_timing_accessors() {
        let t = DeviceTiming::Measured { min: Duration::from_nanos(5), mean: Duration::from_nanos(7) };
        assert_eq!(t.min(), Some(Duration::from_nanos(5)));
        assert_eq!(t.mean(), Some(Duration::from_nanos(7)));
        assert_eq!(DeviceTiming::Unavailable.mean(), None);
        assert_eq!(DeviceTiming::NotCaptured.min(), None);
    }

    #[test]
    fn new_transaction_is_verified_and_empty() {
        let t = Transaction::new(RequestKind::CopyUnidir, 0, 2, true);
        assert!(t.verify);
        assert!(t.results.is_empty());
        assert_eq!(t.mismatches().count(), 0);
    }
}
