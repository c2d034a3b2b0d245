//! Packed atomic state word behind every initialization guard.
//!
//! The state is a single `AtomicU8` with the following layout:
//! - Bits 0-1: PHASE - `UNINIT`, `INITIALIZING`, `INITIALIZED` or `POISONED`
//! - Bit 2: WAITING - At least one thread is parked on the word
//! - Bits 3-7: EPOCH - Generation counter bumped on every settle, so a parked
//!   thread never mistakes a later state for the one it went to sleep on
//!
//! Claiming the constructor role is a single compare-and-swap from `UNINIT`
//! to `INITIALIZING`. Settling the word is a release swap; every load that
//! may be followed by a read of the guarded value uses acquire ordering.

use core::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot_core::{ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

use crate::config::{Backoff, WaitMode};

/// Phase of a guard, decoded from the state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
   Uninit,
   Initializing,
   Initialized,
   Poisoned,
}

impl Phase {
   #[inline(always)]
   const fn from_bits(bits: u8) -> Self {
      match bits & StateWord::PHASE_MASK {
         StateWord::UNINIT => Self::Uninit,
         StateWord::INITIALIZING => Self::Initializing,
         StateWord::INITIALIZED => Self::Initialized,
         _ => Self::Poisoned,
      }
   }

   #[inline(always)]
   const fn bits(self) -> u8 {
      match self {
         Self::Uninit => StateWord::UNINIT,
         Self::Initializing => StateWord::INITIALIZING,
         Self::Initialized => StateWord::INITIALIZED,
         Self::Poisoned => StateWord::POISONED,
      }
   }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
   /// This thread moved the word from `UNINIT` to `INITIALIZING`.
   Claimed,
   /// The word is settled; `blocked` tells whether the caller had to wait
   /// for an in-flight construction before it settled.
   Settled { phase: Phase, blocked: bool },
}

/// A bounded wait expired while the word was still `INITIALIZING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimedOut;

#[repr(transparent)]
pub(crate) struct StateWord(AtomicU8);

impl StateWord {
   const PHASE_MASK: u8 = 0b11;
   const UNINIT: u8 = 0;
   const INITIALIZING: u8 = 1;
   const INITIALIZED: u8 = 2;
   const POISONED: u8 = 3;
   const WAITING: u8 = 4;
   const EPOCH_1: u8 = 8;
   const EPOCH_MASK: u8 = !(Self::PHASE_MASK | Self::WAITING);

   #[inline(always)]
   const fn next_epoch(current_state: u8) -> u8 {
      (current_state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(Self::UNINIT))
   }

   #[inline]
   pub(crate) fn phase(&self, ordering: Ordering) -> Phase {
      Phase::from_bits(self.0.load(ordering))
   }

   #[inline]
   fn key(&self) -> usize {
      self.0.as_ptr() as usize
   }

   #[inline]
   fn notify_all(&self) {
      // SAFETY: The key is the address of our atomic, the same one `wait` parks on.
      unsafe {
         parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks until the word differs from `expected_state` or `deadline` passes.
   /// Returns `Err(TimedOut)` only when the deadline expired.
   #[inline]
   fn wait(&self, expected_state: u8, deadline: Option<Instant>) -> Result<(), TimedOut> {
      // SAFETY: See `notify_all`. The validate closure re-checks the word
      // under the parking lot's bucket lock, so a settle racing with us is
      // either seen here or wakes us.
      let result = unsafe {
         parking_lot_core::park(
            self.key(),
            || self.0.load(Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            deadline,
         )
      };
      match result {
         ParkResult::TimedOut => Err(TimedOut),
         ParkResult::Unparked(_) | ParkResult::Invalid => Ok(()),
      }
   }

   /// Moves an `INITIALIZING` word to `phase`, bumps the epoch and wakes
   /// parked threads. Returns the phase it replaced.
   ///
   /// Only the owner of the construction (or `&mut` access) may call this.
   #[inline]
   pub(crate) fn settle(&self, phase: Phase) -> Phase {
      let current_state = self.0.load(Ordering::Relaxed);
      let new_state = phase.bits() | Self::next_epoch(current_state);

      // Release: the guarded value written by the owner happens-before any
      // acquire load that observes the new phase.
      let prev_state = self.0.swap(new_state, Ordering::Release);

      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
      Phase::from_bits(prev_state)
   }

   /// Forgets everything. Requires exclusive access.
   #[inline]
   pub(crate) fn reset(&mut self) {
      *self.0.get_mut() = Self::UNINIT;
   }

   /// One claim attempt.
   ///
   /// - `Ok(Some(phase))`: the word is settled, or was claimed (`Initializing`).
   /// - `Err(state)`: another thread is constructing; `state` is the value to
   ///   park on and includes `WAITING` unless `nowait` is set.
   #[inline]
   fn claim_step(&self, nowait: bool) -> Result<Phase, u8> {
      loop {
         let current_state = self.0.load(Ordering::Acquire);
         match Phase::from_bits(current_state) {
            phase @ (Phase::Initialized | Phase::Poisoned) => return Ok(phase),
            Phase::Uninit => {
               let new_state = (current_state & !Self::PHASE_MASK) | Self::INITIALIZING;
               match self.0.compare_exchange_weak(
                  current_state,
                  new_state,
                  Ordering::Acquire,
                  Ordering::Relaxed,
               ) {
                  Ok(_) => return Ok(Phase::Initializing),
                  Err(_) => {
                     core::hint::spin_loop();
                     continue;
                  }
               }
            }
            Phase::Initializing => {
               if !nowait && current_state & Self::WAITING == 0 {
                  let new_state = current_state | Self::WAITING;
                  match self.0.compare_exchange_weak(
                     current_state,
                     new_state,
                     Ordering::Relaxed,
                     Ordering::Relaxed,
                  ) {
                     Ok(_) => return Err(new_state),
                     Err(_) => {
                        core::hint::spin_loop();
                        continue;
                     }
                  }
               }
               return Err(current_state);
            }
         }
      }
   }

   #[inline]
   fn finish(phase: Phase, blocked: bool) -> Claim {
      if phase == Phase::Initializing {
         Claim::Claimed
      } else {
         Claim::Settled { phase, blocked }
      }
   }

   /// Claims the constructor role or waits until the word settles.
   ///
   /// A word released back to `UNINIT` while we wait is claimed again, so
   /// this only ever returns a claim or a settled phase.
   pub(crate) fn claim(&self, wait: &WaitMode, deadline: Option<Instant>) -> Result<Claim, TimedOut> {
      let mut blocked = false;
      if let WaitMode::Spin(backoff) = wait {
         match self.spin(backoff, deadline)? {
            (Ok(phase), spun) => return Ok(Self::finish(phase, spun)),
            (Err(_), _) => blocked = true,
         }
      }
      let mut state = match self.claim_step(false) {
         Ok(phase) => return Ok(Self::finish(phase, blocked)),
         Err(state) => state,
      };
      loop {
         blocked = true;
         let waited = self.wait(state, deadline);
         match self.claim_step(false) {
            Ok(phase) => return Ok(Self::finish(phase, blocked)),
            Err(_) if waited.is_err() => return Err(TimedOut),
            Err(new_state) => state = new_state,
         }
      }
   }

   /// Spins on the word without registering as a waiter. Returns the last
   /// claim result and whether any spinning happened.
   fn spin(&self, backoff: &Backoff, deadline: Option<Instant>) -> Result<(Result<Phase, u8>, bool), TimedOut> {
      let mut round = 0;
      loop {
         let step = self.claim_step(true);
         if step.is_ok() || round >= backoff.budget() {
            return Ok((step, round > 0));
         }
         if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TimedOut);
         }
         if round < backoff.spin_rounds {
            for _ in 0..(1u32 << round.min(16)) {
               core::hint::spin_loop();
            }
         } else {
            thread::yield_now();
         }
         round += 1;
      }
   }

   /// Claim attempt that never waits. `None` means another thread is constructing.
   #[inline]
   pub(crate) fn try_claim(&self) -> Option<Claim> {
      self.claim_step(true).ok().map(|phase| Self::finish(phase, false))
   }

   /// Claims the constructor role from async code.
   ///
   /// Yields to the tokio scheduler first, then falls back to a blocking
   /// wait inside `block_in_place`.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub(crate) async fn claim_async(&self, wait: &WaitMode, deadline: Option<Instant>) -> Result<Claim, TimedOut> {
      let mut blocked = false;
      #[allow(clippy::never_loop)]
      loop {
         for _ in 0..16 {
            match self.claim_step(false) {
               Ok(phase) => return Ok(Self::finish(phase, blocked)),
               Err(state) => {
                  blocked = true;
                  if deadline.is_some_and(|d| Instant::now() >= d) {
                     return Err(TimedOut);
                  }
                  for _ in 0..32 {
                     tokio::task::yield_now().await;
                     if self.0.load(Ordering::Relaxed) != state {
                        break;
                     }
                  }
               }
            }
         }

         #[cfg(feature = "async-tokio-mt")]
         {
            return match self.claim_step(false) {
               Ok(phase) => Ok(Self::finish(phase, blocked)),
               Err(_) => tokio::task::block_in_place(|| {
                  self.claim(wait, deadline).map(|claim| match claim {
                     Claim::Settled { phase, .. } => Claim::Settled { phase, blocked: true },
                     claimed => claimed,
                  })
               }),
            };
         }
         #[cfg(not(feature = "async-tokio-mt"))]
         let _ = wait;
      }
   }
}
