//! The per-slot initialization guard.
//!
//! [`InitializationGuard`] arbitrates which caller constructs a slot's value
//! and publishes the result to everybody else. Its phases are
//! `Uninitialized → Initializing → Initialized`, with `Poisoned` as the
//! terminal state of a failed construction. Only the thread that won the
//! `Uninitialized → Initializing` transition may move it further.
//!
//! The fast path (reading an initialized value) is one acquire load of the
//! state word plus an `Arc` clone. Waiters park on the state word or spin on
//! it, depending on the [`WaitMode`](crate::WaitMode) in effect.

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::fmt;
use core::mem;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{trace, warn};

use crate::config::{InitConfig, PoisonPolicy};
use crate::error::{panic_message, ConstructionError};
use crate::state::{Claim, Phase, StateWord, TimedOut};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

thread_local! {
   static CURRENT_OWNER: u64 = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
}

// Owner of the async construction a task is running. Takes precedence over
// the thread's token, since the task may move between worker threads.
#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
tokio::task_local! {
   static TASK_OWNER: u64;
}

/// Identity of the thread that owns an in-flight construction.
///
/// Tokens are handed out per thread, never reused, and fit in an atomic, so
/// the guard can record its owner without a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(NonZeroU64);

impl OwnerToken {
   /// The token of the calling thread.
   pub fn current() -> Self {
      Self::from_raw(current_owner()).unwrap_or(Self(NonZeroU64::MIN))
   }

   fn from_raw(raw: u64) -> Option<Self> {
      NonZeroU64::new(raw).map(Self)
   }
}

#[inline]
fn current_owner() -> u64 {
   task_owner().unwrap_or_else(|| CURRENT_OWNER.with(|token| *token))
}

#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
#[inline]
fn task_owner() -> Option<u64> {
   TASK_OWNER.try_with(|token| *token).ok()
}

#[cfg(not(any(feature = "async-tokio", feature = "async-tokio-mt")))]
#[inline]
fn task_owner() -> Option<u64> {
   None
}

/// What a caller must do after [`InitializationGuard::acquire_or_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
   /// The caller won the claim and must [`publish`](InitializationGuard::publish),
   /// [`poison`](InitializationGuard::poison) or [`release`](InitializationGuard::release).
   Constructor,
   /// Somebody else constructed the value; the guard is now `Initialized` or `Poisoned`.
   Waiter,
}

/// Snapshot of a guard's phase.
pub enum GuardState<T, E> {
   Uninitialized,
   /// `owner` is `None` for the instant between a claim and the owner being recorded.
   Initializing { owner: Option<OwnerToken> },
   Initialized { value: Arc<T> },
   Poisoned { reason: ConstructionError<E> },
}

impl<T, E> GuardState<T, E> {
   /// Name of the phase, for logs and assertions.
   pub fn name(&self) -> &'static str {
      match self {
         Self::Uninitialized => "Uninitialized",
         Self::Initializing { .. } => "Initializing",
         Self::Initialized { .. } => "Initialized",
         Self::Poisoned { .. } => "Poisoned",
      }
   }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for GuardState<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Uninitialized => f.write_str("Uninitialized"),
         Self::Initializing { owner } => f.debug_struct("Initializing").field("owner", owner).finish(),
         Self::Initialized { value } => f.debug_struct("Initialized").field("value", value).finish(),
         Self::Poisoned { reason } => f.debug_struct("Poisoned").field("reason", reason).finish(),
      }
   }
}

/// Internal acquisition result; unlike [`Role`] it remembers whether the
/// caller had to wait for somebody else's construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acquired {
   Constructor,
   Waiter { blocked: bool },
}

type Outcome<T, E> = Result<Arc<T>, ConstructionError<E>>;

/// Exactly-once construction arbiter for one singleton slot.
///
/// ```rust
/// use singleton_provider::{InitConfig, InitializationGuard};
///
/// let guard: InitializationGuard<String, std::io::Error> = InitializationGuard::new();
/// let first = guard.get_or_try_init(&InitConfig::default(), || Ok("ready".to_string())).unwrap();
/// let again = guard.get_or_try_init(&InitConfig::default(), || unreachable!()).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&first, &again));
/// ```
pub struct InitializationGuard<T, E = Infallible> {
   state: StateWord,
   owner: AtomicU64,
   slot: UnsafeCell<Option<Outcome<T, E>>>,
}

impl<T, E> InitializationGuard<T, E> {
   /// Creates an `Uninitialized` guard.
   #[inline]
   #[must_use]
   pub const fn new() -> Self {
      Self {
         state: StateWord::new(),
         owner: AtomicU64::new(0),
         slot: UnsafeCell::new(None),
      }
   }

   /// Whether a value has been published. Never blocks.
   #[inline]
   pub fn is_initialized(&self) -> bool {
      self.state.phase(Ordering::Acquire) == Phase::Initialized
   }

   /// Whether a failed construction poisoned the guard. Never blocks.
   #[inline]
   pub fn is_poisoned(&self) -> bool {
      self.state.phase(Ordering::Acquire) == Phase::Poisoned
   }

   /// Returns the published value, if any. Never blocks.
   #[inline]
   pub fn get(&self) -> Option<Arc<T>> {
      if self.is_initialized() {
         // SAFETY: The acquire load saw `Initialized`, so the owner's write of
         // the slot happens-before this read and nobody writes it again
         // without `&mut self`.
         match unsafe { &*self.slot.get() } {
            Some(Ok(value)) => Some(Arc::clone(value)),
            _ => None,
         }
      } else {
         None
      }
   }

   /// The error that poisoned the guard, if any. Never blocks.
   pub fn poison_reason(&self) -> Option<ConstructionError<E>> {
      if self.is_poisoned() {
         // SAFETY: As in `get`, the acquire load ordered the slot write before us.
         match unsafe { &*self.slot.get() } {
            Some(Err(reason)) => Some(reason.clone()),
            _ => None,
         }
      } else {
         None
      }
   }

   /// Snapshot of the current phase.
   pub fn state(&self) -> GuardState<T, E> {
      match self.state.phase(Ordering::Acquire) {
         Phase::Uninit => GuardState::Uninitialized,
         Phase::Initializing => GuardState::Initializing {
            owner: OwnerToken::from_raw(self.owner.load(Ordering::Relaxed)),
         },
         Phase::Initialized => match self.get() {
            Some(value) => GuardState::Initialized { value },
            None => GuardState::Uninitialized,
         },
         Phase::Poisoned => GuardState::Poisoned {
            reason: self.poison_reason().unwrap_or(ConstructionError::PoisonedState),
         },
      }
   }

   /// Claims the constructor role or waits until another caller settles the guard.
   ///
   /// Exactly one caller per `Uninitialized → Initializing` transition gets
   /// [`Role::Constructor`]; it must then call [`publish`](Self::publish),
   /// [`poison`](Self::poison) or [`release`](Self::release) from the same
   /// thread. Everyone else gets [`Role::Waiter`] once the guard is
   /// `Initialized` or `Poisoned`.
   ///
   /// Fails with `ReentrantConstruction` when the owning thread calls it again
   /// and with `WaitTimedOut` when `config.wait_timeout` expires.
   pub fn acquire_or_wait(&self, config: &InitConfig) -> Result<Role, ConstructionError<E>> {
      Ok(match self.acquire(config)? {
         Acquired::Constructor => Role::Constructor,
         Acquired::Waiter { .. } => Role::Waiter,
      })
   }

   /// Publishes the constructed value: `Initializing → Initialized`.
   ///
   /// Every thread that later observes `Initialized` also observes every write
   /// the constructor made before this call.
   pub fn publish(&self, value: T) -> Result<Arc<T>, ConstructionError<E>> {
      self.check_owner()?;
      Ok(self.commit(value))
   }

   /// Marks the construction as failed: `Initializing → Poisoned`.
   ///
   /// Every parked waiter wakes up with `reason`.
   pub fn poison(&self, reason: ConstructionError<E>) -> Result<(), ConstructionError<E>> {
      self.check_owner()?;
      self.settle_poisoned(reason);
      Ok(())
   }

   /// Gives up the constructor role without a result: `Initializing → Uninitialized`.
   ///
   /// One of the waiters becomes the next constructor.
   pub fn release(&self) -> Result<(), ConstructionError<E>> {
      self.check_owner()?;
      self.settle_released();
      Ok(())
   }

   /// Returns the published value, constructing it with `f` if this caller
   /// wins the claim.
   ///
   /// `f` runs at most once per call and, under [`PoisonPolicy::Poison`], at
   /// most once over the guard's lifetime. Errors and panics from `f` are
   /// delivered to this caller and to every waiter blocked on it.
   #[inline]
   pub fn get_or_try_init<F>(&self, config: &InitConfig, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>,
   {
      if let Some(value) = self.get() {
         return Ok(value);
      }
      self.initialize(config, f)
   }

   /// Async flavour of [`get_or_try_init`](Self::get_or_try_init).
   ///
   /// A constructor future that panics unwinds through this call; the slot
   /// is poisoned (or released under `Retry`) before the panic propagates.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_or_try_init_async<F, Fut>(&self, config: &InitConfig, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Fut,
      Fut: core::future::Future<Output = Result<T, E>>,
   {
      if let Some(value) = self.get() {
         return Ok(value);
      }
      self.initialize_async(config, f).await
   }

   /// Forces the guard back to `Uninitialized`, dropping its value.
   ///
   /// Test support. Exclusive access makes it impossible to race with an
   /// in-flight construction or read.
   pub fn reset(&mut self) {
      *self.slot.get_mut() = None;
      *self.owner.get_mut() = 0;
      self.state.reset();
   }

   /// Whether the caller (thread, or task inside an async construction) is
   /// the one constructing this guard's value right now.
   #[inline]
   pub(crate) fn owned_by_caller(&self) -> bool {
      self.state.phase(Ordering::Relaxed) == Phase::Initializing
         && self.owner.load(Ordering::Relaxed) == current_owner()
   }

   /// `ReentrantConstruction` if the caller is this guard's constructor.
   #[inline]
   pub(crate) fn check_reentry(&self) -> Result<(), ConstructionError<E>> {
      if self.owned_by_caller() {
         warn!("constructor re-entered its own slot");
         Err(ConstructionError::ReentrantConstruction)
      } else {
         Ok(())
      }
   }

   // --- Internal helpers ---

   fn acquire(&self, config: &InitConfig) -> Result<Acquired, ConstructionError<E>> {
      let claim = match self.state.try_claim() {
         Some(claim) => claim,
         None => {
            self.check_reentry()?;
            let deadline = config.wait_timeout.map(|t| Instant::now() + t);
            match self.state.claim(&config.wait, deadline) {
               Ok(Claim::Settled { phase, .. }) => Claim::Settled { phase, blocked: true },
               Ok(claim) => claim,
               Err(TimedOut) => return Err(timed_out(config)),
            }
         }
      };
      Ok(self.on_claim(claim))
   }

   fn on_claim(&self, claim: Claim) -> Acquired {
      match claim {
         Claim::Claimed => {
            self.owner.store(current_owner(), Ordering::Relaxed);
            trace!("claimed constructor role");
            Acquired::Constructor
         }
         Claim::Settled { blocked, .. } => Acquired::Waiter { blocked },
      }
   }

   fn check_owner(&self) -> Result<(), ConstructionError<E>> {
      if self.owned_by_caller() {
         Ok(())
      } else {
         warn!("publish/poison/release from a thread that does not own the construction");
         Err(ConstructionError::RoleViolation)
      }
   }

   /// The settled result as seen by a waiter. A caller that never blocked on
   /// the failed construction sees `PoisonedState` instead of the original error.
   fn settled(&self, blocked: bool) -> Option<Outcome<T, E>> {
      match self.state.phase(Ordering::Acquire) {
         Phase::Initialized => self.get().map(Ok),
         Phase::Poisoned if blocked => Some(Err(self.poison_reason().unwrap_or(ConstructionError::PoisonedState))),
         Phase::Poisoned => Some(Err(ConstructionError::PoisonedState)),
         Phase::Uninit | Phase::Initializing => None,
      }
   }

   fn commit(&self, value: T) -> Arc<T> {
      let value = Arc::new(value);
      // SAFETY: We own the construction (`Initializing`), so nobody else reads
      // or writes the slot until the release swap in `settle`.
      unsafe { *self.slot.get() = Some(Ok(Arc::clone(&value))) };
      self.owner.store(0, Ordering::Relaxed);
      self.state.settle(Phase::Initialized);
      trace!("published value");
      value
   }

   fn settle_poisoned(&self, reason: ConstructionError<E>) {
      // SAFETY: See `commit`.
      unsafe { *self.slot.get() = Some(Err(reason)) };
      self.owner.store(0, Ordering::Relaxed);
      self.state.settle(Phase::Poisoned);
      trace!("poisoned slot");
   }

   fn settle_released(&self) {
      self.owner.store(0, Ordering::Relaxed);
      self.state.settle(Phase::Uninit);
      trace!("released constructor role");
   }

   #[cold]
   fn initialize<F>(&self, config: &InitConfig, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Result<T, E>,
   {
      match self.acquire(config)? {
         Acquired::Constructor => {
            let ticket = ConstructorTicket::new(self, config.policy);
            match panic::catch_unwind(AssertUnwindSafe(f)) {
               Ok(Ok(value)) => Ok(ticket.publish(value)),
               Ok(Err(err)) => Err(ticket.fail(ConstructionError::Failed(Arc::new(err)))),
               Err(payload) => Err(ticket.fail(ConstructionError::ConstructionPanicked {
                  message: panic_message(payload.as_ref()),
               })),
            }
         }
         Acquired::Waiter { blocked } => self
            .settled(blocked)
            .unwrap_or(Err(ConstructionError::PoisonedState)),
      }
   }

   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[cold]
   async fn initialize_async<F, Fut>(&self, config: &InitConfig, f: F) -> Result<Arc<T>, ConstructionError<E>>
   where
      F: FnOnce() -> Fut,
      Fut: core::future::Future<Output = Result<T, E>>,
   {
      self.check_reentry()?;
      let deadline = config.wait_timeout.map(|t| Instant::now() + t);
      let claim = self
         .state
         .claim_async(&config.wait, deadline)
         .await
         .map_err(|TimedOut| timed_out(config))?;
      match self.on_claim(claim) {
         Acquired::Constructor => {
            // The owning task may resume on another worker thread, so it is
            // identified by a task-local token rather than the thread's, and
            // the ticket commits without the owner check.
            let ticket = ConstructorTicket::new(self, config.policy);
            let outcome = match task_owner() {
               // Nested inside another async construction: `on_claim` already
               // recorded that task's token.
               Some(_) => f().await,
               None => {
                  let token = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
                  self.owner.store(token, Ordering::Relaxed);
                  TASK_OWNER.scope(token, f()).await
               }
            };
            match outcome {
               Ok(value) => Ok(ticket.publish(value)),
               Err(err) => Err(ticket.fail(ConstructionError::Failed(Arc::new(err)))),
            }
         }
         Acquired::Waiter { blocked } => self
            .settled(blocked)
            .unwrap_or(Err(ConstructionError::PoisonedState)),
      }
   }
}

fn timed_out<E>(config: &InitConfig) -> ConstructionError<E> {
   ConstructionError::WaitTimedOut {
      waited: config.wait_timeout.unwrap_or_default(),
   }
}

/// Proof of ownership of an in-flight construction.
///
/// Must be consumed by `publish` or `fail`. Dropping it (a constructor that
/// unwound) settles the guard according to the poison policy.
struct ConstructorTicket<'a, T, E> {
   guard: &'a InitializationGuard<T, E>,
   policy: PoisonPolicy,
}

impl<'a, T, E> ConstructorTicket<'a, T, E> {
   #[inline(always)]
   const fn new(guard: &'a InitializationGuard<T, E>, policy: PoisonPolicy) -> Self {
      Self { guard, policy }
   }

   #[inline]
   fn publish(self, value: T) -> Arc<T> {
      let guard = self.guard;
      mem::forget(self);
      guard.commit(value)
   }

   fn fail(self, error: ConstructionError<E>) -> ConstructionError<E> {
      let (guard, policy) = (self.guard, self.policy);
      mem::forget(self);
      warn!(policy = ?policy, "singleton constructor failed");
      match policy {
         PoisonPolicy::Poison => guard.settle_poisoned(error.clone()),
         PoisonPolicy::Retry => guard.settle_released(),
      }
      error
   }
}

impl<T, E> Drop for ConstructorTicket<'_, T, E> {
   fn drop(&mut self) {
      let error = ConstructionError::ConstructionPanicked {
         message: Arc::from("constructor unwound before publishing"),
      };
      match self.policy {
         PoisonPolicy::Poison => self.guard.settle_poisoned(error),
         PoisonPolicy::Retry => self.guard.settle_released(),
      }
   }
}

// SAFETY: The slot is written only by the owner while `Initializing` and read
// only after an acquire load observed a settled phase. Published values are
// shared as `Arc<T>` across threads, hence `T: Send + Sync`; errors are
// shared the same way.
unsafe impl<T: Send + Sync, E: Send + Sync> Sync for InitializationGuard<T, E> {}
// SAFETY: Moving the guard moves the `Arc`s it holds.
unsafe impl<T: Send + Sync, E: Send + Sync> Send for InitializationGuard<T, E> {}

impl<T, E> Default for InitializationGuard<T, E> {
   #[inline]
   fn default() -> Self {
      Self::new()
   }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for InitializationGuard<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_tuple("InitializationGuard").field(&self.state()).finish()
   }
}
