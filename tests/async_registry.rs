#![cfg(feature = "async-tokio-mt")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use singleton_provider::{ConstructionError, InitializationGuard, InitConfig, InstanceRegistry};
use tokio::time::{sleep, timeout, Duration};

mod common;

use common::setup_log;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_async_constructs_once_across_tasks() {
   setup_log();
   static COUNTER: AtomicUsize = AtomicUsize::new(0);
   let registry = Arc::new(InstanceRegistry::new());

   let tasks: Vec<_> = (0..32)
      .map(|_| {
         let registry = Arc::clone(&registry);
         tokio::spawn(async move {
            registry
               .get_async("remote-config", || async {
                  COUNTER.fetch_add(1, Ordering::SeqCst);
                  sleep(Duration::from_millis(30)).await;
                  Ok::<_, String>(vec!["feature-a".to_string(), "feature-b".to_string()])
               })
               .await
               .unwrap()
         })
      })
      .collect();

   let mut handles = Vec::with_capacity(tasks.len());
   for task in tasks {
      handles.push(task.await.unwrap());
   }

   assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
   assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
   assert_eq!(handles[0].len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_async_error_reaches_every_task() {
   setup_log();
   let registry = Arc::new(InstanceRegistry::new());
   let attempts = Arc::new(AtomicUsize::new(0));

   let tasks: Vec<_> = (0..8)
      .map(|_| {
         let (registry, attempts) = (Arc::clone(&registry), Arc::clone(&attempts));
         tokio::spawn(async move {
            registry
               .get_async::<u64, String, _, _>("token-service", || async move {
                  attempts.fetch_add(1, Ordering::SeqCst);
                  sleep(Duration::from_millis(20)).await;
                  Err("401 unauthorized".to_string())
               })
               .await
         })
      })
      .collect();

   for task in tasks {
      let err = task.await.unwrap().unwrap_err();
      assert!(err.is_construction_failure(), "unexpected {err:?}");
   }
   assert_eq!(attempts.load(Ordering::SeqCst), 1);
   assert!(!registry.is_initialized("token-service"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_and_sync_callers_share_the_slot() {
   let registry = InstanceRegistry::new();
   let first = registry
      .get_async::<String, String, _, _>("name", || async { Ok("async".to_string()) })
      .await
      .unwrap();
   let second = registry.get::<String, String, _>("name", || Ok("sync".to_string())).unwrap();
   assert!(Arc::ptr_eq(&first, &second));
   assert_eq!(*second, "async");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_guard_async_timeout() {
   let guard: Arc<InitializationGuard<u32>> = Arc::new(InitializationGuard::new());
   let config = InitConfig::default().with_wait_timeout(Duration::from_millis(20));

   let slow = {
      let guard = Arc::clone(&guard);
      tokio::spawn(async move {
         guard
            .get_or_try_init_async(&config, || async {
               sleep(Duration::from_millis(300)).await;
               Ok(1)
            })
            .await
      })
   };

   while !matches!(guard.state().name(), "Initializing") {
      tokio::task::yield_now().await;
   }
   let impatient = guard.get_or_try_init_async(&config, || async { Ok(2) }).await;
   assert!(matches!(impatient, Err(ConstructionError::WaitTimedOut { .. })));
   assert_eq!(*slow.await.unwrap().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_constructor_reentering_its_key_is_rejected() {
   setup_log();
   let registry = Arc::new(InstanceRegistry::new());
   let inner = Arc::clone(&registry);

   let construction = registry.get_async::<u32, String, _, _>("session", || async move {
      let sync_again = inner.get::<u32, String, _>("session", || Ok(1));
      if !matches!(sync_again, Err(ConstructionError::ReentrantConstruction)) {
         return Err(format!("sync call returned {sync_again:?}"));
      }
      // The task may resume on another worker after this.
      sleep(Duration::from_millis(5)).await;
      let async_again = inner
         .get_async::<u32, String, _, _>("session", || async { Ok(2) })
         .await;
      if !matches!(async_again, Err(ConstructionError::ReentrantConstruction)) {
         return Err(format!("async call returned {async_again:?}"));
      }
      Ok(3)
   });

   let value = timeout(Duration::from_secs(5), construction)
      .await
      .expect("async constructor re-entering its key never returned");
   assert_eq!(*value.unwrap(), 3);

   // Other tasks are not mistaken for the constructor.
   let other = tokio::spawn(async move { registry.get::<u32, String, _>("session", || Ok(4)) });
   assert_eq!(*other.await.unwrap().unwrap(), 3);
}
