//! The buffer size sweep exercised by every copy transaction.

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Buffer sizes in bytes, ascending, doubling from 1 KiB to 512 MiB.
pub const SIZE_SWEEP: &[usize] = &[
    KIB,
    2 * KIB,
    4 * KIB,
    8 * KIB,
    16 * KIB,
    32 * KIB,
    64 * KIB,
    128 * KIB,
    256 * KIB,
    512 * KIB,
    MIB,
    2 * MIB,
    4 * MIB,
    8 * MIB,
    16 * MIB,
    32 * MIB,
    64 * MIB,
    128 * MIB,
    256 * MIB,
    512 * MIB,
];

/// Largest entry of a sweep, which is the size every buffer is allocated at.
///
/// Returns `None` for an empty sweep.
pub fn largest_size(sizes: &[usize]) -> Option<usize> {
    sizes.iter().copied().max()
}
