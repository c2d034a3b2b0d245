use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use singleton_provider::InstanceRegistry;
use tokio::time::{sleep, Duration};

static FETCHES: AtomicUsize = AtomicUsize::new(0);
static FLAG_LOADS: AtomicUsize = AtomicUsize::new(0);
static LICENSE_CHECKS: AtomicUsize = AtomicUsize::new(0);
static SERVICES: LazyLock<InstanceRegistry> = LazyLock::new(InstanceRegistry::new);

async fn session_token() -> Arc<String> {
   SERVICES
      .get_async("session-token", || async {
         FETCHES.fetch_add(1, Ordering::Relaxed);
         sleep(Duration::from_millis(50)).await;
         Ok::<_, String>("token-8f2c".to_string())
      })
      .await
      .unwrap()
}

async fn feature_flags() -> Arc<Vec<&'static str>> {
   SERVICES
      .get_async("feature-flags", || async {
         FLAG_LOADS.fetch_add(1, Ordering::Relaxed);
         sleep(Duration::from_millis(30)).await;
         Ok::<_, String>(vec!["dark-mode", "beta-search"])
      })
      .await
      .unwrap()
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
   // Two keys, each built once while eight tasks ask for both.
   let tasks: Vec<_> = (0..8)
      .map(|id| {
         tokio::spawn(async move {
            let (token, flags) = tokio::join!(session_token(), feature_flags());
            println!("task {id}: token={token} flags={flags:?}");
            (token, flags)
         })
      })
      .collect();

   let mut seen = Vec::with_capacity(tasks.len());
   for task in tasks {
      seen.push(task.await.unwrap());
   }
   assert!(seen.iter().all(|(t, f)| Arc::ptr_eq(t, &seen[0].0) && Arc::ptr_eq(f, &seen[0].1)));
   assert_eq!(FETCHES.load(Ordering::Relaxed), 1);
   assert_eq!(FLAG_LOADS.load(Ordering::Relaxed), 1);

   // A failing key: one attempt, and every waiting task hears about it.
   let checks: Vec<_> = (0..4)
      .map(|id| {
         tokio::spawn(async move {
            let result = SERVICES
               .get_async::<String, String, _, _>("license", || async {
                  LICENSE_CHECKS.fetch_add(1, Ordering::Relaxed);
                  sleep(Duration::from_millis(20)).await;
                  Err("license server unreachable".to_string())
               })
               .await;
            match &result {
               Ok(_) => println!("task {id}: licensed"),
               Err(err) => println!("task {id}: {err}"),
            }
            result.is_err()
         })
      })
      .collect();

   for check in checks {
      assert!(check.await.unwrap());
   }
   assert_eq!(LICENSE_CHECKS.load(Ordering::Relaxed), 1);
   assert!(!SERVICES.is_initialized("license"));
   assert!(SERVICES.is_initialized("session-token"));

   println!(
      "session-token built {} time(s), feature-flags {} time(s), license attempted {} time(s)",
      FETCHES.load(Ordering::Relaxed),
      FLAG_LOADS.load(Ordering::Relaxed),
      LICENSE_CHECKS.load(Ordering::Relaxed)
   );
}
