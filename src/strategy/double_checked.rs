//! Double-checked locking with explicit acquire/release publication.

use core::convert::Infallible;
use core::fmt;
use core::{mem, ptr};
use core::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Provider, StrategyKind};
use crate::config::InitConfig;
use crate::error::ConstructionError;
use crate::guard::InitializationGuard;

/// Lock-free reads once initialized, a mutex around construction.
///
/// The fast path is a single acquire load of `published`. The slow path
/// takes the mutex and checks `published` again, since another thread may
/// have published between the first load and the lock. A value is
/// published with a release store only after the guard holds it, so a
/// reader that sees a non-null pointer also sees the fully written value.
pub struct DoubleCheckedLock<T, E = Infallible> {
   /// Extra strong reference (`Arc::into_raw`) to the published value, or null.
   published: AtomicPtr<T>,
   lock: Mutex<()>,
   guard: InitializationGuard<T, E>,
   config: InitConfig,
}

impl<T, E> DoubleCheckedLock<T, E> {
   #[must_use]
   pub fn new() -> Self {
      Self::with_config(InitConfig::new())
   }

   #[must_use]
   pub fn with_config(config: InitConfig) -> Self {
      Self {
         published: AtomicPtr::new(ptr::null_mut()),
         lock: Mutex::new(()),
         guard: InitializationGuard::new(),
         config,
      }
   }

   /// Drops the instance so the next access constructs again. Test support.
   pub fn reset(&mut self) {
      self.unpublish();
      self.guard.reset();
   }

   #[inline]
   fn load(&self) -> Option<Arc<T>> {
      let raw = self.published.load(Ordering::Acquire);
      if raw.is_null() {
         return None;
      }
      // SAFETY: `raw` came from `Arc::into_raw` in `publish_pointer`; that
      // strong reference lives until `unpublish`, which needs `&mut self`.
      unsafe {
         Arc::increment_strong_count(raw);
         Some(Arc::from_raw(raw))
      }
   }

   fn publish_pointer(&self, value: &Arc<T>) {
      let raw = Arc::into_raw(Arc::clone(value)).cast_mut();
      self.published.store(raw, Ordering::Release);
   }

   fn unpublish(&mut self) {
      let raw = mem::replace(self.published.get_mut(), ptr::null_mut());
      if !raw.is_null() {
         // SAFETY: Reclaims the reference leaked in `publish_pointer`.
         unsafe { drop(Arc::from_raw(raw)) };
      }
   }
}

impl<T, E> Provider<T, E> for DoubleCheckedLock<T, E> {
   fn kind(&self) -> StrategyKind {
      StrategyKind::DoubleCheckedLock
   }

   #[inline]
   fn get(&self) -> Option<Arc<T>> {
      self.load()
   }

   fn get_or_try_init<F>(&self, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>,
   {
      if let Some(value) = self.load() {
         return Ok(value);
      }
      self.guard.check_reentry()?;

      let _held = match self.config.wait_timeout {
         None => self.lock.lock(),
         Some(timeout) => self
            .lock
            .try_lock_for(timeout)
            .ok_or(ConstructionError::WaitTimedOut { waited: timeout })?,
      };
      if let Some(value) = self.load() {
         return Ok(value);
      }
      let value = self.guard.get_or_try_init(&self.config, f)?;
      self.publish_pointer(&value);
      Ok(value)
   }
}

impl<T, E> Drop for DoubleCheckedLock<T, E> {
   fn drop(&mut self) {
      self.unpublish();
   }
}

impl<T, E> Default for DoubleCheckedLock<T, E> {
   fn default() -> Self {
      Self::new()
   }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for DoubleCheckedLock<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("DoubleCheckedLock")
         .field("published", &!self.published.load(Ordering::Relaxed).is_null())
         .field("guard", &self.guard)
         .finish()
   }
}
