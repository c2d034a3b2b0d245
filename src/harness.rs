//! Contention harness for the singleton strategies.
//!
//! A run walks through four phases:
//!
//! 1. **Setup**: build a fresh provider for the chosen strategy and spawn
//!    `thread_count` caller threads that wait behind a start gate.
//! 2. **Run**: open the gate. Every caller asks for the singleton with a
//!    constructor that bumps a shared counter, sleeps to widen the race
//!    window, and returns a self-checking [`Token`]. Callers then keep
//!    reading the published value to measure the initialized fast path.
//! 3. **Verify**: exactly one construction, every caller holds the same
//!    `Arc`, and no caller ever saw a token whose checksum does not match.
//! 4. **Report**: p50/p95/p99 call latency and throughput.

use core::convert::Infallible;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::config::{Backoff, InitConfig, WaitMode};
use crate::error::ConstructionError;
use crate::strategy::{CasedFastPath, CoarseLock, DoubleCheckedLock, EagerPublish, Provider, StrategyKind};

mod stats;

use stats::{throughput, LatencySummary};

/// The value constructed during a harness run.
///
/// Its fields are derived from a serial number and sealed with a checksum,
/// so a reader that could observe a half-written token would notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
   serial: u64,
   fields: [u64; Token::FIELDS],
   checksum: u64,
}

impl Token {
   pub const FIELDS: usize = 8;

   pub fn new(serial: u64) -> Self {
      let mut fields = [0; Self::FIELDS];
      for (i, field) in fields.iter_mut().enumerate() {
         *field = splitmix64(serial ^ (i as u64).rotate_left(32));
      }
      let checksum = Self::seal(serial, &fields);
      Self {
         serial,
         fields,
         checksum,
      }
   }

   /// Distinct for every construction within a run.
   #[inline]
   pub fn serial(&self) -> u64 {
      self.serial
   }

   /// Whether the checksum matches the fields.
   #[inline]
   pub fn is_consistent(&self) -> bool {
      self.checksum == Self::seal(self.serial, &self.fields)
   }

   fn seal(serial: u64, fields: &[u64; Self::FIELDS]) -> u64 {
      // FNV-1a over the serial and the fields.
      fields
         .iter()
         .fold(0xcbf2_9ce4_8422_2325 ^ serial, |acc, field| {
            (acc ^ field).wrapping_mul(0x0000_0100_0000_01b3)
         })
   }
}

fn splitmix64(mut x: u64) -> u64 {
   x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
   x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
   x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
   x ^ (x >> 31)
}

/// Phases of a harness run, as they appear in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
   Setup,
   Run,
   Verify,
   Report,
}

/// Tunables for [`BenchmarkHarness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarnessConfig {
   /// How long the constructor sleeps before returning.
   pub construct_delay: Duration,
   /// Reads of the published value each caller performs after its first call.
   pub reads_per_caller: usize,
   /// Stack size of caller threads; small stacks allow tens of thousands of callers.
   pub stack_size: usize,
   /// Configuration of the provider under test.
   pub init: InitConfig,
   /// Spin budget for [`CasedFastPath`].
   pub backoff: Backoff,
}

impl HarnessConfig {
   #[must_use]
   pub const fn new() -> Self {
      Self {
         construct_delay: Duration::from_millis(2),
         reads_per_caller: 64,
         stack_size: 128 * 1024,
         init: InitConfig::new(),
         backoff: Backoff::DEFAULT,
      }
   }

   #[must_use]
   pub const fn with_construct_delay(mut self, delay: Duration) -> Self {
      self.construct_delay = delay;
      self
   }

   #[must_use]
   pub const fn with_reads_per_caller(mut self, reads: usize) -> Self {
      self.reads_per_caller = reads;
      self
   }

   #[must_use]
   pub const fn with_stack_size(mut self, bytes: usize) -> Self {
      self.stack_size = bytes;
      self
   }

   #[must_use]
   pub const fn with_init(mut self, init: InitConfig) -> Self {
      self.init = init;
      self
   }
}

impl Default for HarnessConfig {
   fn default() -> Self {
      Self::new()
   }
}

/// Outcome of one verified harness run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BenchmarkReport {
   pub strategy: StrategyKind,
   pub thread_count: usize,
   /// Always 1 for a report that passed verification.
   pub construction_count: usize,
   /// Total provider calls across all callers.
   pub calls: usize,
   pub p50: Duration,
   pub p95: Duration,
   pub p99: Duration,
   pub max: Duration,
   pub ops_per_sec: f64,
   /// Wall time from opening the start gate until the last caller finished.
   pub elapsed: Duration,
}

impl fmt::Display for BenchmarkReport {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "SINGLETON_BENCH strategy={} threads={} constructions={} calls={} p50_ns={} p95_ns={} p99_ns={} max_ns={} ops_per_sec={:.3} elapsed_ms={:.3}",
         self.strategy,
         self.thread_count,
         self.construction_count,
         self.calls,
         self.p50.as_nanos(),
         self.p95.as_nanos(),
         self.p99.as_nanos(),
         self.max.as_nanos(),
         self.ops_per_sec,
         self.elapsed.as_secs_f64() * 1e3,
      )
   }
}

/// Why a harness run failed.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
   #[error("a harness run needs at least one caller")]
   NoCallers,
   #[error("failed to spawn a caller thread: {0}")]
   Spawn(#[from] std::io::Error),
   #[error("a caller thread panicked")]
   CallerPanicked,
   #[error("a caller could not obtain the singleton: {0}")]
   Construction(String),
   #[error("constructor ran {count} times, expected exactly once")]
   ConstructionCount { count: usize },
   #[error("caller {caller} received a different instance than caller 0")]
   IdentityMismatch { caller: usize },
   #[error("caller {caller} observed an inconsistent token")]
   TornValue { caller: usize },
}

impl From<ConstructionError<Infallible>> for HarnessError {
   fn from(err: ConstructionError<Infallible>) -> Self {
      Self::Construction(err.to_string())
   }
}

/// Keeps caller threads parked until every caller exists.
///
/// Opening with `false` tells them to leave without calling anything, which
/// lets a run that failed to spawn all callers wind down instead of hanging.
struct StartGate {
   state: Mutex<Option<bool>>,
   opened: Condvar,
}

impl StartGate {
   fn new() -> Self {
      Self {
         state: Mutex::new(None),
         opened: Condvar::new(),
      }
   }

   fn open(&self, go: bool) {
      *self.state.lock() = Some(go);
      self.opened.notify_all();
   }

   /// Blocks until opened; returns whether to proceed.
   fn wait(&self) -> bool {
      let mut state = self.state.lock();
      loop {
         match *state {
            Some(go) => return go,
            None => self.opened.wait(&mut state),
         }
      }
   }
}

/// What one caller saw.
struct CallerOutcome {
   handle: Arc<Token>,
   latencies: Vec<Duration>,
   /// Every read returned the same `Arc` as the first.
   stable: bool,
   /// Every read returned a consistent token.
   consistent: bool,
}

/// Drives many concurrent callers against one strategy and checks the
/// exactly-once contract.
///
/// ```rust
/// use std::time::Duration;
/// use singleton_provider::{BenchmarkHarness, HarnessConfig, StrategyKind};
///
/// let harness = BenchmarkHarness::with_config(
///    HarnessConfig::new().with_construct_delay(Duration::from_millis(1)).with_reads_per_caller(4),
/// );
/// let report = harness.run(StrategyKind::DoubleCheckedLock, 8).unwrap();
/// assert_eq!(report.construction_count, 1);
/// assert_eq!(report.calls, 8 * 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BenchmarkHarness {
   config: HarnessConfig,
}

impl BenchmarkHarness {
   #[must_use]
   pub const fn new() -> Self {
      Self::with_config(HarnessConfig::new())
   }

   #[must_use]
   pub const fn with_config(config: HarnessConfig) -> Self {
      Self { config }
   }

   #[inline]
   pub fn config(&self) -> &HarnessConfig {
      &self.config
   }

   /// Runs `thread_count` concurrent callers against a fresh `strategy` provider.
   pub fn run(&self, strategy: StrategyKind, thread_count: usize) -> Result<BenchmarkReport, HarnessError> {
      info!(%strategy, thread_count, phase = ?Phase::Setup, "harness phase");
      if thread_count == 0 {
         return Err(HarnessError::NoCallers);
      }

      let constructions = AtomicUsize::new(0);
      let init = self.config.init;
      match strategy {
         StrategyKind::CoarseLock => {
            self.drive(strategy, &CoarseLock::with_config(init), &constructions, thread_count)
         }
         StrategyKind::DoubleCheckedLock => {
            self.drive(strategy, &DoubleCheckedLock::with_config(init), &constructions, thread_count)
         }
         StrategyKind::EagerPublish => {
            let delay = self.config.construct_delay;
            let provider = EagerPublish::new(|| construct_token(&constructions, delay));
            self.drive(strategy, &provider, &constructions, thread_count)
         }
         StrategyKind::CasedFastPath => {
            let provider = CasedFastPath::with_config(init.with_wait(WaitMode::Spin(self.config.backoff)));
            self.drive(strategy, &provider, &constructions, thread_count)
         }
      }
   }

   /// Runs every strategy at every concurrency level, in order.
   pub fn run_matrix(&self, strategies: &[StrategyKind], thread_counts: &[usize]) -> Result<Vec<BenchmarkReport>, HarnessError> {
      let mut reports = Vec::with_capacity(strategies.len() * thread_counts.len());
      for &strategy in strategies {
         for &thread_count in thread_counts {
            reports.push(self.run(strategy, thread_count)?);
         }
      }
      Ok(reports)
   }

   fn drive<P>(
      &self,
      strategy: StrategyKind,
      provider: &P,
      constructions: &AtomicUsize,
      thread_count: usize,
   ) -> Result<BenchmarkReport, HarnessError>
   where
      P: Provider<Token> + Sync,
   {
      let gate = StartGate::new();
      let delay = self.config.construct_delay;
      let reads = self.config.reads_per_caller;

      let (outcomes, elapsed) = thread::scope(|scope| {
         let mut callers = Vec::with_capacity(thread_count);
         for caller in 0..thread_count {
            let gate = &gate;
            let spawned = thread::Builder::new()
               .name(format!("singleton-caller-{caller}"))
               .stack_size(self.config.stack_size)
               .spawn_scoped(scope, move || {
                  gate.wait().then(|| call_repeatedly(provider, constructions, delay, reads))
               });
            match spawned {
               Ok(handle) => callers.push(handle),
               Err(err) => {
                  gate.open(false);
                  return Err(HarnessError::Spawn(err));
               }
            }
         }
         debug!(callers = callers.len(), "caller threads spawned");

         info!(%strategy, thread_count, phase = ?Phase::Run, "harness phase");
         let start = Instant::now();
         gate.open(true);
         let mut outcomes = Vec::with_capacity(thread_count);
         let mut panicked = false;
         for handle in callers {
            match handle.join() {
               Ok(Some(outcome)) => outcomes.push(outcome),
               Ok(None) | Err(_) => panicked = true,
            }
         }
         let elapsed = start.elapsed();
         if panicked {
            return Err(HarnessError::CallerPanicked);
         }
         Ok((outcomes, elapsed))
      })?;

      info!(%strategy, thread_count, phase = ?Phase::Verify, "harness phase");
      let outcomes = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
      let count = constructions.load(Ordering::SeqCst);
      if count != 1 {
         return Err(HarnessError::ConstructionCount { count });
      }
      let Some(first) = outcomes.first().map(|outcome| Arc::clone(&outcome.handle)) else {
         return Err(HarnessError::NoCallers);
      };
      for (caller, outcome) in outcomes.iter().enumerate() {
         if !outcome.consistent {
            return Err(HarnessError::TornValue { caller });
         }
         if !outcome.stable || !Arc::ptr_eq(&first, &outcome.handle) {
            return Err(HarnessError::IdentityMismatch { caller });
         }
      }

      info!(%strategy, thread_count, phase = ?Phase::Report, "harness phase");
      let mut latencies: Vec<Duration> = outcomes.into_iter().flat_map(|outcome| outcome.latencies).collect();
      let calls = latencies.len();
      let summary = LatencySummary::from_samples(&mut latencies);
      let report = BenchmarkReport {
         strategy,
         thread_count,
         construction_count: count,
         calls,
         p50: summary.p50,
         p95: summary.p95,
         p99: summary.p99,
         max: summary.max,
         ops_per_sec: throughput(calls, elapsed),
         elapsed,
      };
      info!(%report, "harness report");
      Ok(report)
   }
}

/// The harness constructor: count, widen the race window, build a token.
fn construct_token(constructions: &AtomicUsize, delay: Duration) -> Token {
   let serial = constructions.fetch_add(1, Ordering::SeqCst) as u64 + 1;
   if !delay.is_zero() {
      thread::sleep(delay);
   }
   Token::new(serial)
}

fn call_repeatedly<P>(
   provider: &P,
   constructions: &AtomicUsize,
   delay: Duration,
   reads: usize,
) -> Result<CallerOutcome, ConstructionError<Infallible>>
where
   P: Provider<Token>,
{
   let mut latencies = Vec::with_capacity(reads + 1);

   let start = Instant::now();
   let handle = provider.get_or_init(|| construct_token(constructions, delay))?;
   latencies.push(start.elapsed());

   let mut stable = true;
   let mut consistent = handle.is_consistent();
   for _ in 0..reads {
      let start = Instant::now();
      let again = provider.get_or_init(|| construct_token(constructions, delay))?;
      latencies.push(start.elapsed());
      stable &= Arc::ptr_eq(&handle, &again);
      consistent &= again.is_consistent();
   }

   Ok(CallerOutcome {
      handle,
      latencies,
      stable,
      consistent,
   })
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn tokens_are_self_checking() {
      let token = Token::new(42);
      assert!(token.is_consistent());
      assert_eq!(token.serial(), 42);

      let mut torn = token.clone();
      torn.fields[3] ^= 1;
      assert!(!torn.is_consistent());
      assert_ne!(Token::new(1), Token::new(2));
   }

   #[test]
   fn start_gate_can_abort() {
      let gate = StartGate::new();
      thread::scope(|scope| {
         let waiter = scope.spawn(|| gate.wait());
         gate.open(false);
         assert!(!waiter.join().unwrap());
      });
      assert!(!gate.wait());
   }

   #[test]
   fn report_line_is_greppable() {
      let report = BenchmarkReport {
         strategy: StrategyKind::CasedFastPath,
         thread_count: 4,
         construction_count: 1,
         calls: 20,
         p50: Duration::from_nanos(100),
         p95: Duration::from_nanos(200),
         p99: Duration::from_nanos(300),
         max: Duration::from_nanos(400),
         ops_per_sec: 1234.5,
         elapsed: Duration::from_millis(2),
      };
      assert_eq!(
         report.to_string(),
         "SINGLETON_BENCH strategy=cased_fast_path threads=4 constructions=1 calls=20 p50_ns=100 p95_ns=200 p99_ns=300 max_ns=400 ops_per_sec=1234.500 elapsed_ms=2.000"
      );
   }

   #[cfg(feature = "serde")]
   #[test]
   fn config_and_report_serialize() {
      use crate::config::PoisonPolicy;

      let config = InitConfig::default().with_policy(PoisonPolicy::Retry);
      let json = serde_json::to_string(&config).unwrap();
      let back: InitConfig = serde_json::from_str(&json).unwrap();
      assert_eq!(back, config);

      let report = BenchmarkReport {
         strategy: StrategyKind::EagerPublish,
         thread_count: 10,
         construction_count: 1,
         calls: 10,
         p50: Duration::from_nanos(50),
         p95: Duration::from_nanos(90),
         p99: Duration::from_nanos(99),
         max: Duration::from_nanos(120),
         ops_per_sec: 2.5e6,
         elapsed: Duration::from_micros(4),
      };
      let json = serde_json::to_value(&report).unwrap();
      assert_eq!(json["thread_count"], 10);
      let back: BenchmarkReport = serde_json::from_value(json).unwrap();
      assert_eq!(back, report);
   }
}
