//! Latency statistics for one group

use super::Group;
use crate::types::{Summary, Timings, HISTOGRAM_BUCKETS};

/// Reduce a group to count and latency distribution over `millis`.
///
/// The group's first record is carried as the summary's representative.
pub fn summarize_timings(group: Group) -> Summary {
    let millis: Vec<i64> = group.records().iter().map(|r| r.millis).collect();
    let count = millis.len();
    let times = Timings::from_millis(&millis).unwrap_or_else(Timings::zero);
    let record = group.into_records().swap_remove(0);

    Summary {
        record,
        count,
        times,
    }
}

impl Timings {
    /// Compute statistics over a set of latencies; `None` when empty.
    ///
    /// `total` saturates at the `i64` range; `avg` uses the exact sum.
    pub fn from_millis(millis: &[i64]) -> Option<Self> {
        if millis.is_empty() {
            return None;
        }

        let mut sorted = millis.to_vec();
        sorted.sort_unstable();

        let n = sorted.len() as f64;
        let wide_total: i128 = sorted.iter().map(|&m| i128::from(m)).sum();
        let total = i64::try_from(wide_total).unwrap_or(if wide_total < 0 {
            i64::MIN
        } else {
            i64::MAX
        });
        let avg = wide_total as f64 / n;
        let variance = sorted
            .iter()
            .map(|&m| {
                let d = m as f64 - avg;
                d * d
            })
            .sum::<f64>()
            / n;

        Some(Self {
            total,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg,
            median: sorted[sorted.len() / 2],
            stddev: variance.sqrt(),
            histogram: log_histogram(&sorted),
        })
    }

    fn zero() -> Self {
        Self {
            total: 0,
            min: 0,
            max: 0,
            avg: 0.0,
            median: 0,
            stddev: 0.0,
            histogram: [0; HISTOGRAM_BUCKETS],
        }
    }
}

/// Bucket index of a latency. Negative latencies fall in no bucket.
fn bucket_index(millis: i64) -> Option<usize> {
    match millis {
        m if m < 0 => None,
        0 => Some(0),
        m => {
            // floor(log2(m)) + 1, saturating at the open-ended last bucket
            let bits = (i64::BITS - m.leading_zeros()) as usize;
            Some(bits.min(HISTOGRAM_BUCKETS - 1))
        }
    }
}

/// Count latencies into base-2 logarithmic buckets.
///
/// Buckets are `[0,1)`, `[1,2)`, `[2,4)`, `[4,8)` and so on up to `[32,64)`;
/// the last bucket is `[64, ∞)`.
pub fn log_histogram(millis: &[i64]) -> [u64; HISTOGRAM_BUCKETS] {
    let mut histogram = [0; HISTOGRAM_BUCKETS];
    for index in millis.iter().filter_map(|&m| bucket_index(m)) {
        histogram[index] += 1;
    }
    histogram
}

/// Half-open `[low, high)` bounds of each histogram bucket.
/// `None` as the upper bound means unbounded.
pub fn bucket_bounds() -> [(i64, Option<i64>); HISTOGRAM_BUCKETS] {
    let mut bounds = [(0, None); HISTOGRAM_BUCKETS];
    for (i, bound) in bounds.iter_mut().enumerate() {
        let low = if i == 0 { 0 } else { 1i64 << (i - 1) };
        let high = if i == HISTOGRAM_BUCKETS - 1 {
            None
        } else {
            Some(1i64 << i)
        };
        *bound = (low, high);
    }
    bounds
}
