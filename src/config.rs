//! Configuration shared by the guard, the strategies and the registry.
//!
//! Every knob has a conservative default: failures poison the slot
//! permanently, waiters park on the state word, and nobody times out.

use core::time::Duration;

/// What happens to a slot whose constructor fails or panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoisonPolicy {
   /// The slot becomes permanently `Poisoned`. Later callers get
   /// [`ConstructionError::PoisonedState`](crate::ConstructionError::PoisonedState).
   #[default]
   Poison,
   /// The slot returns to `Uninitialized` and the next caller constructs again.
   ///
   /// Side effects of the failed attempt stay visible to the retried
   /// constructor, and the constructor may run more than once over the
   /// lifetime of the slot.
   Retry,
}

/// Spin budget used before a waiter falls back to parking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Backoff {
   /// Rounds of exponential busy spinning (`2^round` pause hints per round).
   pub spin_rounds: u32,
   /// Rounds of `thread::yield_now` after spinning is exhausted.
   pub yield_rounds: u32,
}

impl Backoff {
   /// Default spin budget: 6 spin rounds then 4 yields.
   pub const DEFAULT: Self = Self {
      spin_rounds: 6,
      yield_rounds: 4,
   };

   /// Total number of rounds before parking.
   #[inline]
   pub const fn budget(&self) -> u32 {
      self.spin_rounds + self.yield_rounds
   }
}

impl Default for Backoff {
   fn default() -> Self {
      Self::DEFAULT
   }
}

/// How a waiter waits for the constructing thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitMode {
   /// Park on the state word immediately (futex style).
   #[default]
   Park,
   /// Spin on the state word with back-off, then park.
   Spin(Backoff),
}

/// Initialization behaviour for one guard, strategy or registry.
///
/// ```rust
/// use std::time::Duration;
/// use singleton_provider::{InitConfig, PoisonPolicy};
///
/// let config = InitConfig::default()
///    .with_policy(PoisonPolicy::Retry)
///    .with_wait_timeout(Duration::from_secs(5));
/// assert_eq!(config.policy, PoisonPolicy::Retry);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InitConfig {
   pub policy: PoisonPolicy,
   pub wait: WaitMode,
   /// Upper bound on how long a waiter blocks. `None` waits forever.
   pub wait_timeout: Option<Duration>,
}

impl InitConfig {
   #[must_use]
   pub const fn new() -> Self {
      Self {
         policy: PoisonPolicy::Poison,
         wait: WaitMode::Park,
         wait_timeout: None,
      }
   }

   #[must_use]
   pub const fn with_policy(mut self, policy: PoisonPolicy) -> Self {
      self.policy = policy;
      self
   }

   #[must_use]
   pub const fn with_wait(mut self, wait: WaitMode) -> Self {
      self.wait = wait;
      self
   }

   #[must_use]
   pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
      self.wait_timeout = Some(timeout);
      self
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn defaults_are_conservative() {
      let config = InitConfig::default();
      assert_eq!(config, InitConfig::new());
      assert_eq!(config.policy, PoisonPolicy::Poison);
      assert_eq!(config.wait, WaitMode::Park);
      assert_eq!(config.wait_timeout, None);
   }

   #[test]
   fn builder_overrides_fields() {
      let config = InitConfig::new()
         .with_policy(PoisonPolicy::Retry)
         .with_wait(WaitMode::Spin(Backoff::default()))
         .with_wait_timeout(Duration::from_millis(250));
      assert_eq!(config.policy, PoisonPolicy::Retry);
      assert_eq!(config.wait, WaitMode::Spin(Backoff::DEFAULT));
      assert_eq!(config.wait_timeout, Some(Duration::from_millis(250)));
      assert_eq!(Backoff::DEFAULT.budget(), 10);
   }
}
