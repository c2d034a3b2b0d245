//! Latency summaries for harness runs.

use core::time::Duration;

/// Percentile summary of a set of call latencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LatencySummary {
   pub(crate) samples: usize,
   pub(crate) p50: Duration,
   pub(crate) p95: Duration,
   pub(crate) p99: Duration,
   pub(crate) max: Duration,
}

impl LatencySummary {
   /// Summarizes `samples`, sorting them in place.
   pub(crate) fn from_samples(samples: &mut [Duration]) -> Self {
      samples.sort_unstable();
      Self {
         samples: samples.len(),
         p50: percentile_sorted(samples, 0.50),
         p95: percentile_sorted(samples, 0.95),
         p99: percentile_sorted(samples, 0.99),
         max: samples.last().copied().unwrap_or_default(),
      }
   }
}

/// Percentile of an ascending slice at index `round((len - 1) * p)`.
/// `p` is in `0.0..=1.0`; 0.5 of 1..=100 is 51.
pub(crate) fn percentile_sorted(sorted: &[Duration], p: f64) -> Duration {
   debug_assert!((0.0..=1.0).contains(&p));
   if sorted.is_empty() {
      return Duration::ZERO;
   }
   let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
   sorted[idx.min(sorted.len() - 1)]
}

/// Calls per second over `elapsed`, clamped so a zero-length run does not divide by zero.
pub(crate) fn throughput(calls: usize, elapsed: Duration) -> f64 {
   let secs = elapsed.max(Duration::from_nanos(1)).as_secs_f64();
   calls as f64 / secs
}
