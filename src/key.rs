//! Identities of singleton slots.

use core::any::TypeId;
use core::fmt;
use std::sync::Arc;

/// Identifies one singleton slot inside an [`InstanceRegistry`](crate::InstanceRegistry).
///
/// A key is either the identity of a Rust type or an explicit name. Keys are
/// cheap to clone and immutable once created.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum SingletonKey {
   /// Keyed by the type of the stored value.
   Type {
      id: TypeId,
      name: &'static str,
   },
   /// Keyed by an explicit name such as `"shared-config"`.
   Named(Arc<str>),
}

impl SingletonKey {
   /// Key for the slot holding a value of type `T`.
   #[inline]
   pub fn of<T: 'static>() -> Self {
      Self::Type {
         id: TypeId::of::<T>(),
         name: core::any::type_name::<T>(),
      }
   }

   /// Key for an explicitly named slot.
   #[inline]
   pub fn named(name: impl Into<Arc<str>>) -> Self {
      Self::Named(name.into())
   }
}

impl From<&str> for SingletonKey {
   fn from(name: &str) -> Self {
      Self::Named(Arc::from(name))
   }
}

impl From<String> for SingletonKey {
   fn from(name: String) -> Self {
      Self::Named(Arc::from(name))
   }
}

impl From<Arc<str>> for SingletonKey {
   fn from(name: Arc<str>) -> Self {
      Self::Named(name)
   }
}

impl From<&SingletonKey> for SingletonKey {
   fn from(key: &SingletonKey) -> Self {
      key.clone()
   }
}

impl fmt::Display for SingletonKey {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Type { name, .. } => write!(f, "type:{name}"),
         Self::Named(name) => f.write_str(name),
      }
   }
}

impl fmt::Debug for SingletonKey {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Type { name, .. } => f.debug_tuple("Type").field(name).finish(),
         Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
      }
   }
}
