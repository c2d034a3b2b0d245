//! Construction up front, lock-free reads afterwards.

use core::convert::Infallible;
use core::fmt;
use std::sync::Arc;

use super::{Provider, StrategyKind};
use crate::config::InitConfig;
use crate::error::ConstructionError;
use crate::guard::InitializationGuard;

/// Builds its value synchronously in the constructor, before the provider
/// can be shared with other threads.
///
/// Every later read is an acquire load of the guard's state word. The cost
/// is paid even if the value is never read. A failed construction leaves
/// the provider poisoned; every read then reports the failure.
///
/// ```rust
/// use singleton_provider::{EagerPublish, Provider};
///
/// let logger = EagerPublish::new(|| String::from("stderr"));
/// assert_eq!(logger.get().as_deref().map(String::as_str), Some("stderr"));
/// ```
pub struct EagerPublish<T, E = Infallible> {
   guard: InitializationGuard<T, E>,
}

impl<T> EagerPublish<T, Infallible> {
   pub fn new<F>(f: F) -> Self
   where
      F: FnOnce() -> T,
   {
      Self::try_new(|| Ok(f()))
   }
}

impl<T, E> EagerPublish<T, E> {
   /// Runs `f` now. Errors and panics poison the provider.
   pub fn try_new<F>(f: F) -> Self
   where
      F: FnOnce() -> Result<T, E>,
   {
      let guard = InitializationGuard::new();
      // A fresh guard always hands out the constructor role, so the result
      // only matters to later readers, who see it through the guard.
      let _ = guard.get_or_try_init(&InitConfig::new(), f);
      Self { guard }
   }

   /// Wraps an already constructed value.
   pub fn with_value(value: T) -> Self {
      Self::try_new(|| Ok(value))
   }

   /// The published value, or the error that poisoned the provider.
   #[inline]
   pub fn value(&self) -> Result<Arc<T>, ConstructionError<E>> {
      match self.guard.get() {
         Some(value) => Ok(value),
         None => Err(self.guard.poison_reason().unwrap_or(ConstructionError::PoisonedState)),
      }
   }

   /// Rebuilds the value with `f`. Test support.
   pub fn reset<F>(&mut self, f: F)
   where
      F: FnOnce() -> Result<T, E>,
   {
      self.guard.reset();
      let _ = self.guard.get_or_try_init(&InitConfig::new(), f);
   }
}

impl<T, E> Provider<T, E> for EagerPublish<T, E> {
   fn kind(&self) -> StrategyKind {
      StrategyKind::EagerPublish
   }

   #[inline]
   fn get(&self) -> Option<Arc<T>> {
      self.guard.get()
   }

   /// Never runs `f`; the value was built when the provider was created.
   #[inline]
   fn get_or_try_init<F>(&self, _f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>,
   {
      self.value()
   }
}

impl<T, E> From<T> for EagerPublish<T, E> {
   fn from(value: T) -> Self {
      Self::with_value(value)
   }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for EagerPublish<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("EagerPublish").field("guard", &self.guard).finish()
   }
}
