//! Prefix-sum helpers used to locate meshes inside merged buffers.

/// Exclusive prefix sums of `counts`.
///
/// Element `i` is the number of items that precede entry `i`, so
/// `[1, 5, 7]` yields `[0, 1, 6]`. An empty input yields an empty output.
#[must_use]
pub fn create_offsets_array(counts: &[u32]) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut running = 0u64;
    for &count in counts {
        offsets.push(running);
        running += u64::from(count);
    }
    offsets
}
