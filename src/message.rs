//! # Tagged Messages
//!
//! Values travel between nodes as [`TaggedMessage`]s: a shared payload plus
//! the tag selecting which of the receiver's input types is being delivered.
//! The payload is reference-counted, so broadcasting to several receivers
//! clones a pointer, never the value itself. The consumer that dequeues the
//! last reference drops the value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::inputs::Payload;

/// Shared, type-erased payload carried on an edge.
pub type SharedPayload = Arc<dyn Any + Send + Sync>;

/// One queued delivery: a payload and the receiver-side tag it targets.
#[derive(Clone)]
pub struct TaggedMessage {
  /// Index of the receiving node's input type this payload belongs to.
  pub tag: usize,
  /// The shared payload.
  pub payload: SharedPayload,
}

impl TaggedMessage {
  /// Wraps a value into a message for the given tag.
  pub fn new<T: Payload>(tag: usize, value: T) -> Self {
    Self {
      tag,
      payload: Arc::new(value),
    }
  }

  /// Builds a message around an already-shared payload.
  pub fn from_shared<T: Payload>(tag: usize, value: Arc<T>) -> Self {
    Self {
      tag,
      payload: value,
    }
  }

  /// Recovers the concrete payload, consuming the message.
  pub fn downcast<T: Payload>(self) -> Option<Arc<T>> {
    self.payload.downcast::<T>().ok()
  }
}

impl fmt::Debug for TaggedMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaggedMessage")
      .field("tag", &self.tag)
      .finish_non_exhaustive()
  }
}
