#![allow(dead_code)]

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a `RUST_LOG`-filtered subscriber once per test binary.
pub fn setup_log() {
   let _ = SubscriberBuilder::default()
      .with_line_number(true)
      .with_file(true)
      .with_span_events(FmtSpan::NONE)
      .with_env_filter(EnvFilter::from_default_env())
      .with_test_writer()
      .finish()
      .try_init();
}

/// A value whose fields must agree with each other.
#[derive(Debug)]
pub struct Config {
   pub entries: Vec<u64>,
   pub checksum: u64,
}

impl Config {
   /// Writes the fields one at a time, yielding in between, so a reader that
   /// could see the value before publication would likely see a torn one.
   pub fn build(len: u64) -> Self {
      let mut entries = Vec::new();
      for i in 0..len {
         entries.push(i * 31 + 7);
         std::thread::yield_now();
      }
      let checksum = Self::sum(&entries);
      Self { entries, checksum }
   }

   pub fn sum(entries: &[u64]) -> u64 {
      entries.iter().fold(17, |acc, e| acc.wrapping_mul(31).wrapping_add(*e))
   }

   pub fn is_consistent(&self) -> bool {
      self.checksum == Self::sum(&self.entries)
   }
}
