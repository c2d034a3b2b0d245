//! Singleton providers built on [`InitializationGuard`](crate::InitializationGuard).
//!
//! All four strategies give the same guarantees (at most one construction,
//! one shared instance, no partially constructed value ever visible). They
//! differ in what an already-initialized read costs:
//!
//! | strategy              | initialized read                   | waiting                     |
//! |-----------------------|------------------------------------|-----------------------------|
//! | [`CoarseLock`]        | mutex lock + unlock                | blocks on the mutex         |
//! | [`DoubleCheckedLock`] | acquire load of a pointer          | blocks on the mutex         |
//! | [`EagerPublish`]      | acquire load (value built up front)| never waits                 |
//! | [`CasedFastPath`]     | acquire load of the state word     | spins with back-off, parks  |

use core::convert::Infallible;
use core::fmt;
use std::sync::Arc;

use crate::error::ConstructionError;

mod cased_fast_path;
mod coarse_lock;
mod double_checked;
mod eager_publish;

pub use cased_fast_path::CasedFastPath;
pub use coarse_lock::CoarseLock;
pub use double_checked::DoubleCheckedLock;
pub use eager_publish::EagerPublish;

/// A single lazily constructed, shared instance.
pub trait Provider<T, E = Infallible> {
   /// Which strategy this provider implements.
   fn kind(&self) -> StrategyKind;

   /// Returns the instance if it has been published. Never constructs.
   fn get(&self) -> Option<Arc<T>>;

   /// Returns the instance, running `f` if this caller is the one chosen to construct it.
   fn get_or_try_init<F>(&self, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>;

   /// Infallible shorthand for [`get_or_try_init`](Self::get_or_try_init).
   fn get_or_init<F>(&self, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> T,
   {
      self.get_or_try_init(|| Ok(f()))
   }

   #[inline]
   fn is_initialized(&self) -> bool {
      self.get().is_some()
   }
}

/// The available strategies, for harness runs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StrategyKind {
   CoarseLock,
   DoubleCheckedLock,
   EagerPublish,
   CasedFastPath,
}

impl StrategyKind {
   pub const ALL: [Self; 4] = [
      Self::CoarseLock,
      Self::DoubleCheckedLock,
      Self::EagerPublish,
      Self::CasedFastPath,
   ];

   pub const fn name(self) -> &'static str {
      match self {
         Self::CoarseLock => "coarse_lock",
         Self::DoubleCheckedLock => "double_checked_lock",
         Self::EagerPublish => "eager_publish",
         Self::CasedFastPath => "cased_fast_path",
      }
   }
}

impl fmt::Display for StrategyKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.name())
   }
}
