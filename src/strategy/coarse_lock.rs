//! One mutex around check-and-construct.

use core::convert::Infallible;
use core::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{Provider, StrategyKind};
use crate::config::InitConfig;
use crate::error::ConstructionError;
use crate::guard::InitializationGuard;

/// Every access, initialized or not, takes the same mutex.
///
/// The simplest strategy to reason about: the guard is only ever settled
/// under the lock, so it never has waiters of its own. The price is a lock
/// round trip on every read. A constructor that calls back into its own
/// provider is turned away before it can lock a second time.
pub struct CoarseLock<T, E = Infallible> {
   lock: Mutex<()>,
   guard: InitializationGuard<T, E>,
   config: InitConfig,
}

impl<T, E> CoarseLock<T, E> {
   #[must_use]
   pub fn new() -> Self {
      Self::with_config(InitConfig::new())
   }

   #[must_use]
   pub fn with_config(config: InitConfig) -> Self {
      Self {
         lock: Mutex::new(()),
         guard: InitializationGuard::new(),
         config,
      }
   }

   /// Drops the instance so the next access constructs again. Test support.
   pub fn reset(&mut self) {
      self.guard.reset();
   }

   fn lock(&self) -> Result<MutexGuard<'_, ()>, ConstructionError<E>> {
      match self.config.wait_timeout {
         None => Ok(self.lock.lock()),
         Some(timeout) => self
            .lock
            .try_lock_for(timeout)
            .ok_or(ConstructionError::WaitTimedOut { waited: timeout }),
      }
   }
}

impl<T, E> Provider<T, E> for CoarseLock<T, E> {
   fn kind(&self) -> StrategyKind {
      StrategyKind::CoarseLock
   }

   fn get(&self) -> Option<Arc<T>> {
      // The constructor holds the lock; its value does not exist yet.
      if self.guard.owned_by_caller() {
         return None;
      }
      let _held = self.lock.lock();
      self.guard.get()
   }

   fn get_or_try_init<F>(&self, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>,
   {
      self.guard.check_reentry()?;
      let _held = self.lock()?;
      self.guard.get_or_try_init(&self.config, f)
   }
}

impl<T, E> Default for CoarseLock<T, E> {
   fn default() -> Self {
      Self::new()
   }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for CoarseLock<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("CoarseLock").field("guard", &self.guard).finish()
   }
}
