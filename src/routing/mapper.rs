//! Sequence-to-gap mapping
//!
//! Partitions observed data ids into one bucket per gap with a single forward
//! merge scan over both sorted inputs.

use super::gap::DataGap;

/// Map ascending `ids` onto ascending `gaps`.
///
/// `buckets[i]` holds the ids that fall inside `gaps[i]`; every gap gets a
/// bucket, possibly empty. Ids outside every gap are skipped. When gaps
/// overlap, an id lands in the first gap that contains it.
pub fn map_ids_to_gaps(ids: &[i64], gaps: &[DataGap]) -> Vec<Vec<i64>> {
    debug_assert!(ids.windows(2).all(|w| w[0] <= w[1]), "ids must be sorted");

    let mut buckets = Vec::with_capacity(gaps.len());
    let mut cursor = 0;

    for gap in gaps {
        while cursor < ids.len() && ids[cursor] < gap.start_id {
            cursor += 1;
        }
        let first = cursor;
        while cursor < ids.len() && ids[cursor] <= gap.end_id {
            cursor += 1;
        }
        buckets.push(ids[first..cursor].to_vec());
    }

    buckets
}
