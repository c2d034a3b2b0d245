use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use singleton_provider::InstanceRegistry;

static REGISTRY: LazyLock<InstanceRegistry> = LazyLock::new(InstanceRegistry::new);
static LOADS: AtomicUsize = AtomicUsize::new(0);

fn shared_config() -> Arc<BTreeMap<&'static str, String>> {
   REGISTRY
      .get_or_init("shared-config", || {
         LOADS.fetch_add(1, Ordering::SeqCst);
         println!("Loading configuration...");
         // Simulate reading a file.
         thread::sleep(Duration::from_millis(50));
         BTreeMap::from([
            ("environment", "production".to_string()),
            ("log_level", "info".to_string()),
         ])
      })
      .unwrap()
}

fn main() {
   let workers: Vec<_> = (0..100)
      .map(|id| thread::spawn(move || (id, shared_config())))
      .collect();

   let mut handles = Vec::with_capacity(workers.len());
   for worker in workers {
      let (id, config) = worker.join().unwrap();
      if id % 25 == 0 {
         println!("worker {id}: environment={}", config["environment"]);
      }
      handles.push(config);
   }

   assert_eq!(LOADS.load(Ordering::SeqCst), 1);
   assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
   println!("100 workers, {} load, one shared instance", LOADS.load(Ordering::SeqCst));
}
