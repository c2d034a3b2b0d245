use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use singleton_provider::{ConstructionError, GuardState, InitConfig, InitializationGuard, PoisonPolicy, Role};

mod common;

use common::{setup_log, Config};

#[test]
fn test_new_is_uninitialized() {
   let guard: InitializationGuard<i32> = InitializationGuard::new();
   assert!(!guard.is_initialized());
   assert!(!guard.is_poisoned());
   assert_eq!(guard.get(), None);
   assert!(matches!(guard.state(), GuardState::Uninitialized));
}

#[test]
fn test_acquire_publish_roundtrip() {
   let guard: InitializationGuard<String> = InitializationGuard::new();
   let config = InitConfig::default();

   assert_eq!(guard.acquire_or_wait(&config).unwrap(), Role::Constructor);
   match guard.state() {
      GuardState::Initializing { owner } => assert!(owner.is_some()),
      other => panic!("unexpected state {}", other.name()),
   }

   let published = guard.publish("ready".to_string()).unwrap();
   assert_eq!(*published, "ready");
   assert!(Arc::ptr_eq(&published, &guard.get().unwrap()));

   // Already initialized: the next caller is a waiter that does not wait.
   assert_eq!(guard.acquire_or_wait(&config).unwrap(), Role::Waiter);
   assert_eq!(guard.state().name(), "Initialized");
}

#[test]
fn test_publish_without_claim_is_role_violation() {
   let guard: InitializationGuard<u8> = InitializationGuard::new();
   assert!(matches!(guard.publish(1), Err(ConstructionError::RoleViolation)));
   assert!(matches!(
      guard.poison(ConstructionError::PoisonedState),
      Err(ConstructionError::RoleViolation)
   ));
   assert!(matches!(guard.release(), Err(ConstructionError::RoleViolation)));
   assert!(!guard.is_initialized());
}

#[test]
fn test_publish_from_other_thread_is_role_violation() {
   let guard: InitializationGuard<u8> = InitializationGuard::new();
   assert_eq!(guard.acquire_or_wait(&InitConfig::default()).unwrap(), Role::Constructor);

   thread::scope(|s| {
      let intruder = s.spawn(|| guard.publish(9));
      assert!(matches!(intruder.join().unwrap(), Err(ConstructionError::RoleViolation)));
   });

   assert_eq!(*guard.publish(7).unwrap(), 7);
   assert_eq!(guard.get().as_deref(), Some(&7));
}

#[test]
fn test_get_or_try_init_runs_once() {
   let guard: InitializationGuard<i32, &str> = InitializationGuard::new();
   let config = InitConfig::default();
   let counter = AtomicUsize::new(0);

   let first = guard
      .get_or_try_init(&config, || {
         counter.fetch_add(1, Ordering::SeqCst);
         Ok(42)
      })
      .unwrap();
   let second = guard
      .get_or_try_init(&config, || {
         counter.fetch_add(1, Ordering::SeqCst);
         panic!("Should not be called")
      })
      .unwrap();

   assert!(Arc::ptr_eq(&first, &second));
   assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_constructor_poisons_permanently() {
   setup_log();
   let guard: InitializationGuard<i32, &str> = InitializationGuard::new();
   let config = InitConfig::default();

   let result = guard.get_or_try_init(&config, || Err("database unreachable"));
   match result {
      Err(ConstructionError::Failed(err)) => assert_eq!(*err, "database unreachable"),
      other => panic!("expected Failed, got {other:?}"),
   }
   assert!(guard.is_poisoned());
   assert!(matches!(guard.poison_reason(), Some(ConstructionError::Failed(_))));

   // A later caller is told about the poison and its constructor never runs.
   let later = guard.get_or_try_init(&config, || panic!("Should not be called"));
   assert!(matches!(later, Err(ConstructionError::PoisonedState)));
   assert_eq!(guard.get(), None);
}

#[test]
fn test_panicking_constructor_is_reported() {
   setup_log();
   let guard: InitializationGuard<i32> = InitializationGuard::new();
   let result = guard.get_or_try_init(&InitConfig::default(), || panic!("explicit init panic"));
   match result {
      Err(ConstructionError::ConstructionPanicked { message }) => {
         assert_eq!(&*message, "explicit init panic")
      }
      other => panic!("expected ConstructionPanicked, got {other:?}"),
   }
   assert!(guard.is_poisoned());
   assert_eq!(guard.state().name(), "Poisoned");
}

#[test]
fn test_poison_reaches_blocked_waiters() {
   setup_log();
   const WAITERS: usize = 8;
   let guard: InitializationGuard<i32, String> = InitializationGuard::new();
   let config = InitConfig::default();
   let barrier = Barrier::new(WAITERS + 1);
   let ran = AtomicUsize::new(0);

   thread::scope(|s| {
      let (guard, config, barrier, ran) = (&guard, &config, &barrier, &ran);
      let waiters: Vec<_> = (0..WAITERS)
         .map(|_| {
            s.spawn(move || {
               barrier.wait();
               guard.get_or_try_init(&config, || {
                  ran.fetch_add(1, Ordering::SeqCst);
                  Ok(0)
               })
            })
         })
         .collect();

      let own = guard.get_or_try_init(&config, || {
         ran.fetch_add(1, Ordering::SeqCst);
         barrier.wait();
         thread::sleep(Duration::from_millis(50));
         Err("config file missing".to_string())
      });
      assert!(matches!(own, Err(ConstructionError::Failed(_))));

      for waiter in waiters {
         let err = waiter.join().unwrap().unwrap_err();
         assert!(err.is_construction_failure(), "unexpected error {err:?}");
      }
   });

   assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retry_policy_allows_next_caller() {
   let guard: InitializationGuard<i32, &str> = InitializationGuard::new();
   let config = InitConfig::default().with_policy(PoisonPolicy::Retry);
   let counter = AtomicUsize::new(0);

   let first = guard.get_or_try_init(&config, || {
      counter.fetch_add(1, Ordering::SeqCst);
      Err("transient")
   });
   assert!(matches!(first, Err(ConstructionError::Failed(_))));
   assert!(!guard.is_poisoned());
   assert!(matches!(guard.state(), GuardState::Uninitialized));

   let second = guard.get_or_try_init(&config, || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(55)
   });
   assert_eq!(*second.unwrap(), 55);
   assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_retry_policy_hands_role_to_waiter() {
   let guard: InitializationGuard<i32, &str> = InitializationGuard::new();
   let config = InitConfig::default().with_policy(PoisonPolicy::Retry);
   let barrier = Barrier::new(2);

   thread::scope(|s| {
      let waiter = s.spawn(|| {
         barrier.wait();
         guard.get_or_try_init(&config, || Ok(7))
      });

      let own = guard.get_or_try_init(&config, || {
         barrier.wait();
         thread::sleep(Duration::from_millis(30));
         Err("first attempt fails")
      });
      assert!(matches!(own, Err(ConstructionError::Failed(_))));
      assert_eq!(*waiter.join().unwrap().unwrap(), 7);
   });

   assert_eq!(guard.get().as_deref(), Some(&7));
}

#[test]
fn test_reentrant_construction_is_detected() {
   let guard: InitializationGuard<i32> = InitializationGuard::new();
   let config = InitConfig::default();

   let value = guard
      .get_or_try_init(&config, || {
         let nested = guard.get_or_try_init(&config, || Ok(1));
         assert!(matches!(nested, Err(ConstructionError::ReentrantConstruction)));
         Ok(42)
      })
      .unwrap();
   assert_eq!(*value, 42);
}

#[test]
fn test_bounded_wait_times_out() {
   let guard: InitializationGuard<i32> = InitializationGuard::new();
   let config = InitConfig::default().with_wait_timeout(Duration::from_millis(20));
   assert_eq!(guard.acquire_or_wait(&config).unwrap(), Role::Constructor);

   thread::scope(|s| {
      let waiter = s.spawn(|| guard.get_or_try_init(&config, || Ok(0)));
      match waiter.join().unwrap() {
         Err(ConstructionError::WaitTimedOut { waited }) => assert_eq!(waited, Duration::from_millis(20)),
         other => panic!("expected WaitTimedOut, got {other:?}"),
      }
   });

   guard.publish(1).unwrap();
   assert_eq!(*guard.get_or_try_init(&config, || Ok(0)).unwrap(), 1);
}

#[test]
fn test_reset_allows_one_new_construction() {
   let mut guard: InitializationGuard<usize> = InitializationGuard::new();
   let config = InitConfig::default();
   let counter = AtomicUsize::new(0);
   let build = || Ok(counter.fetch_add(1, Ordering::SeqCst) + 1);

   let before = guard.get_or_try_init(&config, build).unwrap();
   guard.reset();
   assert_eq!(guard.get(), None);
   let after = guard.get_or_try_init(&config, build).unwrap();

   assert_eq!((*before, *after), (1, 2));
   assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_concurrent_readers_never_see_partial_value() {
   let guard: InitializationGuard<Config> = InitializationGuard::new();
   let config = InitConfig::default();
   let counter = AtomicUsize::new(0);
   let barrier = Barrier::new(32);

   let handles: Vec<Arc<Config>> = thread::scope(|s| {
      let (guard, config, counter, barrier) = (&guard, &config, &counter, &barrier);
      let workers: Vec<_> = (0..32)
         .map(|_| {
            s.spawn(move || {
               barrier.wait();
               let value = guard
                  .get_or_try_init(&config, || {
                     counter.fetch_add(1, Ordering::SeqCst);
                     Ok(Config::build(256))
                  })
                  .unwrap();
               assert!(value.is_consistent());
               value
            })
         })
         .collect();
      workers.into_iter().map(|w| w.join().unwrap()).collect()
   });

   assert_eq!(counter.load(Ordering::SeqCst), 1);
   assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
}
