//! Thread-safe, exactly-once lazy initialization of shared singletons.
//!
//! Give this crate a constructor for an expensive or side-effecting resource
//! (a configuration object, a connection pool handle, a logging sink) and it
//! guarantees that, however many threads race for it:
//!
//! - the constructor runs **at most once**,
//! - every caller receives the **same** `Arc<T>`,
//! - no caller ever observes a **partially constructed** value,
//! - a constructor that fails or panics is reported to every caller as a
//!   typed [`ConstructionError`], never as a missing or default value.
//!
//! The building blocks:
//!
//! - [`InitializationGuard`]: the per-slot atomic state machine
//!   (`Uninitialized → Initializing → Initialized | Poisoned`). Waiters park on
//!   the state word with `parking_lot_core`'s futex-style parking.
//! - Four [`Provider`] strategies with different fast-path costs:
//!   [`CoarseLock`], [`DoubleCheckedLock`], [`EagerPublish`], [`CasedFastPath`].
//! - [`InstanceRegistry`]: many independent singletons keyed by
//!   [`SingletonKey`], without a lock shared across unrelated keys.
//! - [`BenchmarkHarness`]: drives thousands of concurrent callers against a
//!   strategy, verifies the exactly-once contract and reports latency
//!   percentiles and throughput.
//!
//! # Examples
//!
//! ## Keyed registry
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use singleton_provider::InstanceRegistry;
//!
//! static BUILDS: AtomicUsize = AtomicUsize::new(0);
//!
//! let registry = InstanceRegistry::new();
//! let handles: Vec<Arc<String>> = std::thread::scope(|s| {
//!    let registry = &registry;
//!    let workers: Vec<_> = (0..8)
//!       .map(|_| {
//!          s.spawn(move || {
//!             registry
//!                .get_or_init("shared-config", || {
//!                   BUILDS.fetch_add(1, Ordering::SeqCst);
//!                   "production".to_string()
//!                })
//!                .unwrap()
//!          })
//!       })
//!       .collect();
//!    workers.into_iter().map(|w| w.join().unwrap()).collect()
//! });
//!
//! assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
//! assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
//! ```
//!
//! ## A single provider
//!
//! ```rust
//! use singleton_provider::{DoubleCheckedLock, Provider};
//!
//! static POOL: std::sync::LazyLock<DoubleCheckedLock<Vec<u16>>> =
//!    std::sync::LazyLock::new(DoubleCheckedLock::new);
//!
//! let pool = POOL.get_or_init(|| vec![5432, 5433]).unwrap();
//! assert_eq!(*pool, [5432, 5433]);
//! ```

/// Initialization behaviour: poison policy, waiting, timeouts.
mod config;

/// Errors surfaced to callers.
mod error;

/// The per-slot initialization guard.
mod guard;

/// Contention harness.
mod harness;

/// Singleton slot identities.
mod key;

/// Keyed table of singletons.
mod registry;

/// Packed atomic state word.
mod state;

/// The four provider strategies.
mod strategy;

pub use config::{Backoff, InitConfig, PoisonPolicy, WaitMode};
pub use error::ConstructionError;
pub use guard::{GuardState, InitializationGuard, OwnerToken, Role};
pub use harness::{BenchmarkHarness, BenchmarkReport, HarnessConfig, HarnessError, Phase, Token};
pub use key::SingletonKey;
pub use registry::InstanceRegistry;
pub use strategy::{CasedFastPath, CoarseLock, DoubleCheckedLock, EagerPublish, Provider, StrategyKind};
