//! A keyed table of independent singleton slots.
//!
//! Each [`SingletonKey`] owns its own [`InitializationGuard`]. The table lock
//! is held only while a guard is looked up or inserted, never while a value
//! is being constructed, so a slow constructor behind one key never delays
//! callers of another key.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use singleton_provider::InstanceRegistry;
//!
//! let registry = InstanceRegistry::new();
//! let config = registry.get_or_init("shared-config", || vec!["debug".to_string()]).unwrap();
//! let again: Arc<Vec<String>> = registry.get_or_init("shared-config", || unreachable!()).unwrap();
//! assert!(Arc::ptr_eq(&config, &again));
//! ```

use core::any::{type_name, Any};
use core::convert::Infallible;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::InitConfig;
use crate::error::ConstructionError;
use crate::guard::InitializationGuard;
use crate::key::SingletonKey;

type ErasedValue = Arc<dyn Any + Send + Sync>;

/// One registered slot: a type-erased `Arc<InitializationGuard<T, E>>`, the
/// signature it was created with (for mismatch reports), and a reader that
/// knows the erased types.
struct Slot {
   guard: ErasedValue,
   signature: &'static str,
   peek: fn(&(dyn Any + Send + Sync)) -> Option<ErasedValue>,
}

impl Slot {
   fn new<T, E>() -> Self
   where
      T: Send + Sync + 'static,
      E: Send + Sync + 'static,
   {
      Self {
         guard: Arc::new(InitializationGuard::<T, E>::new()),
         signature: signature::<T, E>(),
         peek: peek_guard::<T, E>,
      }
   }

   fn peek(&self) -> Option<ErasedValue> {
      (self.peek)(&*self.guard)
   }
}

fn peek_guard<T, E>(guard: &(dyn Any + Send + Sync)) -> Option<ErasedValue>
where
   T: Send + Sync + 'static,
   E: Send + Sync + 'static,
{
   let value: Arc<T> = guard.downcast_ref::<InitializationGuard<T, E>>()?.get()?;
   Some(value)
}

#[inline]
fn signature<T, E>() -> &'static str {
   type_name::<fn() -> Result<T, E>>()
}

/// Owner of the canonical strong reference to every singleton it hands out.
///
/// Callers receive shared `Arc` handles. The registry is a plain value:
/// put it in a `static`, an application context, or a test fixture.
pub struct InstanceRegistry {
   slots: RwLock<HashMap<SingletonKey, Slot>>,
   config: InitConfig,
}

impl InstanceRegistry {
   /// A registry with the default [`InitConfig`] (poison on failure, park while waiting).
   #[must_use]
   pub fn new() -> Self {
      Self::with_config(InitConfig::new())
   }

   #[must_use]
   pub fn with_config(config: InitConfig) -> Self {
      Self {
         slots: RwLock::new(HashMap::new()),
         config,
      }
   }

   /// The configuration applied to every slot.
   #[inline]
   pub fn config(&self) -> &InitConfig {
      &self.config
   }

   /// Returns the singleton for `key`, constructing it with `ctor` if this
   /// caller is the first.
   ///
   /// Concurrent callers on the same key block until the constructor
   /// publishes or fails; `ctor` runs at most once per key unless the
   /// registry uses [`PoisonPolicy::Retry`](crate::PoisonPolicy::Retry).
   ///
   /// # Errors
   ///
   /// - `Failed` / `ConstructionPanicked`: this caller's constructor failed,
   ///   or it was blocked on a constructor that did.
   /// - `PoisonedState`: an earlier construction failed.
   /// - `KeyTypeMismatch`: `key` already holds a different `T` or `E`.
   /// - `ReentrantConstruction`, `WaitTimedOut`: see [`ConstructionError`].
   pub fn get<T, E, F>(&self, key: impl Into<SingletonKey>, ctor: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      T: Send + Sync + 'static,
      E: Send + Sync + 'static,
      F: FnOnce() -> Result<T, E>,
   {
      let guard = self.guard::<T, E>(key.into())?;
      guard.get_or_try_init(&self.config, ctor)
   }

   /// Infallible shorthand for [`get`](Self::get).
   pub fn get_or_init<T, F>(&self, key: impl Into<SingletonKey>, ctor: F) -> Result<Arc<T>, ConstructionError<Infallible>>
   where
      T: Send + Sync + 'static,
      F: FnOnce() -> T,
   {
      self.get(key, || Ok(ctor()))
   }

   /// [`get`](Self::get) keyed by the type `T` itself.
   pub fn get_typed<T, E, F>(&self, ctor: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      T: Send + Sync + 'static,
      E: Send + Sync + 'static,
      F: FnOnce() -> Result<T, E>,
   {
      self.get(SingletonKey::of::<T>(), ctor)
   }

   /// Async flavour of [`get`](Self::get) for constructors that await.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_async<T, E, F, Fut>(&self, key: impl Into<SingletonKey>, ctor: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      T: Send + Sync + 'static,
      E: Send + Sync + 'static,
      F: FnOnce() -> Fut,
      Fut: core::future::Future<Output = Result<T, E>>,
   {
      let guard = self.guard::<T, E>(key.into())?;
      guard.get_or_try_init_async(&self.config, ctor).await
   }

   /// Returns the singleton for `key` only if it is already initialized with type `T`.
   /// Never blocks on a construction.
   pub fn peek<T>(&self, key: impl Into<SingletonKey>) -> Option<Arc<T>>
   where
      T: Send + Sync + 'static,
   {
      let value = self.slots.read().get(&key.into())?.peek()?;
      value.downcast::<T>().ok()
   }

   /// Whether `key` holds a published value.
   pub fn is_initialized(&self, key: impl Into<SingletonKey>) -> bool {
      self
         .slots
         .read()
         .get(&key.into())
         .is_some_and(|slot| slot.peek().is_some())
   }

   /// Whether a slot exists for `key` (initialized, in flight, or poisoned).
   pub fn contains(&self, key: impl Into<SingletonKey>) -> bool {
      self.slots.read().contains_key(&key.into())
   }

   /// Number of slots, including in-flight and poisoned ones.
   pub fn len(&self) -> usize {
      self.slots.read().len()
   }

   pub fn is_empty(&self) -> bool {
      self.slots.read().is_empty()
   }

   /// Forgets the slot for `key`, so the next `get` constructs a new value.
   /// Returns whether a slot existed.
   ///
   /// Test support only. Handles already returned stay valid, but a call
   /// racing with an in-flight `get` on the same key may leave that caller
   /// with an instance the registry no longer knows about, and the key can
   /// then be constructed a second time. Do not call it while other threads
   /// may be using `key`.
   pub fn reset(&self, key: impl Into<SingletonKey>) -> bool {
      let key = key.into();
      let existed = self.slots.write().remove(&key).is_some();
      debug!(%key, existed, "reset singleton slot");
      existed
   }

   /// Forgets every slot. Same caveats as [`reset`](Self::reset).
   pub fn clear(&self) {
      let mut slots = self.slots.write();
      debug!(slots = slots.len(), "clearing singleton registry");
      slots.clear();
   }

   /// Looks up or lazily creates the guard for `key`.
   ///
   /// The read lock covers the common lookup; the write lock is taken only
   /// for a missing key and released before the caller constructs anything.
   fn guard<T, E>(&self, key: SingletonKey) -> Result<Arc<InitializationGuard<T, E>>, ConstructionError<E>>
   where
      T: Send + Sync + 'static,
      E: Send + Sync + 'static,
   {
      let existing = self
         .slots
         .read()
         .get(&key)
         .map(|slot| (Arc::clone(&slot.guard), slot.signature));

      let (guard, found) = match existing {
         Some(entry) => entry,
         None => {
            let mut slots = self.slots.write();
            let slot = slots.entry(key.clone()).or_insert_with(|| {
               debug!(%key, signature = signature::<T, E>(), "created singleton slot");
               Slot::new::<T, E>()
            });
            (Arc::clone(&slot.guard), slot.signature)
         }
      };

      guard
         .downcast::<InitializationGuard<T, E>>()
         .map_err(|_| ConstructionError::KeyTypeMismatch {
            key,
            expected: signature::<T, E>(),
            found,
         })
   }
}

impl Default for InstanceRegistry {
   fn default() -> Self {
      Self::new()
   }
}

impl fmt::Debug for InstanceRegistry {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let slots = self.slots.read();
      let mut map = f.debug_map();
      for (key, slot) in slots.iter() {
         map.entry(key, &slot.signature);
      }
      map.finish()
   }
}
