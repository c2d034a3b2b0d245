use std::time::Duration;

use singleton_provider::{BenchmarkHarness, HarnessConfig, StrategyKind};
use tracing_subscriber::EnvFilter;

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env())
      .init();

   let harness = BenchmarkHarness::with_config(
      HarnessConfig::new()
         .with_construct_delay(Duration::from_millis(2))
         .with_reads_per_caller(256),
   );

   match harness.run_matrix(&StrategyKind::ALL, &[1, 10, 100, 1_000]) {
      Ok(reports) => {
         for report in reports {
            println!("{report}");
         }
      }
      Err(err) => {
         eprintln!("harness run failed: {err}");
         std::process::exit(1);
      }
   }
}
