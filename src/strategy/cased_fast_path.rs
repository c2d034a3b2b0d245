//! Compare-and-swap claim with spinning waiters.

use core::convert::Infallible;
use core::fmt;
use std::sync::Arc;

use super::{Provider, StrategyKind};
use crate::config::{Backoff, InitConfig, WaitMode};
use crate::error::ConstructionError;
use crate::guard::InitializationGuard;

/// Claims the constructor role with a CAS on the state word and never takes
/// a lock.
///
/// Losers spin on the state word with exponential back-off, then yield, and
/// finally park, so a descheduled constructor cannot make them burn a core
/// indefinitely. Suits short constructors under heavy contention.
pub struct CasedFastPath<T, E = Infallible> {
   guard: InitializationGuard<T, E>,
   config: InitConfig,
}

impl<T, E> CasedFastPath<T, E> {
   #[must_use]
   pub const fn new() -> Self {
      Self::with_backoff(Backoff::DEFAULT)
   }

   #[must_use]
   pub const fn with_backoff(backoff: Backoff) -> Self {
      Self::with_config(InitConfig::new().with_wait(WaitMode::Spin(backoff)))
   }

   /// Uses `config` as given. A `WaitMode::Park` config turns the spin phase off.
   #[must_use]
   pub const fn with_config(config: InitConfig) -> Self {
      Self {
         guard: InitializationGuard::new(),
         config,
      }
   }

   /// Drops the instance so the next access constructs again. Test support.
   pub fn reset(&mut self) {
      self.guard.reset();
   }
}

impl<T, E> Provider<T, E> for CasedFastPath<T, E> {
   fn kind(&self) -> StrategyKind {
      StrategyKind::CasedFastPath
   }

   #[inline]
   fn get(&self) -> Option<Arc<T>> {
      self.guard.get()
   }

   #[inline]
   fn get_or_try_init<F>(&self, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>,
   {
      self.guard.get_or_try_init(&self.config, f)
   }
}

impl<T, E> Default for CasedFastPath<T, E> {
   fn default() -> Self {
      Self::new()
   }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for CasedFastPath<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("CasedFastPath")
         .field("guard", &self.guard)
         .field("wait", &self.config.wait)
         .finish()
   }
}
