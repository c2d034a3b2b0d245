//! Errors surfaced by singleton providers.

use core::time::Duration;
use std::sync::Arc;

use crate::key::SingletonKey;

/// Why a caller did not receive a constructed value.
///
/// The error is cloneable for any `E`: one failure is delivered to the
/// constructing thread and to every waiter blocked on it, so the user's
/// error is shared behind an [`Arc`].
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError<E> {
   /// The constructor returned `Err`.
   #[error("constructor failed: {0}")]
   Failed(Arc<E>),

   /// The constructor panicked. The slot was poisoned (or released under
   /// [`PoisonPolicy::Retry`](crate::PoisonPolicy::Retry)).
   #[error("constructor panicked: {message}")]
   ConstructionPanicked { message: Arc<str> },

   /// The slot was already poisoned by an earlier failed construction.
   #[error("slot is poisoned by an earlier failed construction")]
   PoisonedState,

   /// `publish`/`poison`/`release` was called by a thread that does not own
   /// the in-flight construction.
   #[error("only the constructing thread may publish, poison or release a slot")]
   RoleViolation,

   /// The constructor asked for its own slot while building it.
   #[error("constructor re-entered the slot it is initializing")]
   ReentrantConstruction,

   /// A key was reused with a different value or error type.
   #[error("key `{key}` holds `{found}`, requested as `{expected}`")]
   KeyTypeMismatch {
      key: SingletonKey,
      expected: &'static str,
      found: &'static str,
   },

   /// A bounded wait expired while another thread was still constructing.
   #[error("gave up after {waited:?} waiting for another thread to construct")]
   WaitTimedOut { waited: Duration },
}

impl<E> ConstructionError<E> {
   /// Whether this error reports a failure of the constructor itself, as
   /// opposed to a usage or timing problem on the caller's side.
   pub fn is_construction_failure(&self) -> bool {
      matches!(
         self,
         Self::Failed(_) | Self::ConstructionPanicked { .. } | Self::PoisonedState
      )
   }

   /// The user error, if the constructor returned one.
   pub fn user_error(&self) -> Option<&E> {
      match self {
         Self::Failed(err) => Some(err),
         _ => None,
      }
   }
}

impl<E> Clone for ConstructionError<E> {
   fn clone(&self) -> Self {
      match self {
         Self::Failed(err) => Self::Failed(Arc::clone(err)),
         Self::ConstructionPanicked { message } => Self::ConstructionPanicked {
            message: Arc::clone(message),
         },
         Self::PoisonedState => Self::PoisonedState,
         Self::RoleViolation => Self::RoleViolation,
         Self::ReentrantConstruction => Self::ReentrantConstruction,
         Self::KeyTypeMismatch {
            key,
            expected,
            found,
         } => Self::KeyTypeMismatch {
            key: key.clone(),
            expected: *expected,
            found: *found,
         },
         Self::WaitTimedOut { waited } => Self::WaitTimedOut { waited: *waited },
      }
   }
}

/// Renders a panic payload the way the default panic hook does.
pub(crate) fn panic_message(payload: &(dyn core::any::Any + Send)) -> Arc<str> {
   if let Some(s) = payload.downcast_ref::<&'static str>() {
      Arc::from(*s)
   } else if let Some(s) = payload.downcast_ref::<String>() {
      Arc::from(s.as_str())
   } else {
      Arc::from("Box<dyn Any>")
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use core::convert::Infallible;

   #[test]
   fn display_messages() {
      let failed: ConstructionError<&str> = ConstructionError::Failed(Arc::new("no database"));
      assert_eq!(failed.to_string(), "constructor failed: no database");

      let panicked: ConstructionError<Infallible> = ConstructionError::ConstructionPanicked {
         message: Arc::from("boom"),
      };
      assert_eq!(panicked.to_string(), "constructor panicked: boom");

      let mismatch: ConstructionError<Infallible> = ConstructionError::KeyTypeMismatch {
         key: SingletonKey::from("cfg"),
         expected: "u32",
         found: "String",
      };
      assert_eq!(mismatch.to_string(), "key `cfg` holds `String`, requested as `u32`");
   }

   #[test]
   fn clone_shares_user_error() {
      let err: ConstructionError<String> = ConstructionError::Failed(Arc::new("bad".into()));
      let copy = err.clone();
      match (&err, &copy) {
         (ConstructionError::Failed(a), ConstructionError::Failed(b)) => assert!(Arc::ptr_eq(a, b)),
         _ => unreachable!(),
      }
      assert_eq!(copy.user_error().map(String::as_str), Some("bad"));
      assert!(copy.is_construction_failure());
      assert!(!ConstructionError::<String>::RoleViolation.is_construction_failure());
   }

   #[test]
   fn panic_payloads_are_rendered() {
      let result = std::panic::catch_unwind(|| panic!("formatted {}", 7));
      let payload = result.unwrap_err();
      assert_eq!(&*panic_message(payload.as_ref()), "formatted 7");

      let payload: Box<dyn core::any::Any + Send> = Box::new("static");
      assert_eq!(&*panic_message(payload.as_ref()), "static");

      let payload: Box<dyn core::any::Any + Send> = Box::new(17_u32);
      assert_eq!(&*panic_message(payload.as_ref()), "Box<dyn Any>");
   }
}
