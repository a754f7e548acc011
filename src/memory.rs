//! # Bounded Pool & Memory Manager
//!
//! A [`Pool`] is a bounded deque of recyclable buffers: [`Pool::acquire`]
//! blocks while the pool is empty, [`Pool::release`] returns a buffer and
//! wakes one waiter. The pool is the runtime's backpressure mechanism: a
//! producer that outruns its consumers blocks in `acquire` instead of
//! allocating without bound.
//!
//! A [`MemoryManager`] owns exactly one pool, pre-filled to capacity by a
//! user fill function, and is attached to exactly one task. Cluster copies
//! of that task share the manager; execution-pipeline duplicates each get a
//! fresh pool of the same capacity so backpressure stays per copy.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::inputs::Payload;

/// Bounded deque of shared buffers with a not-empty condition.
pub struct Pool<T> {
  capacity: usize,
  queue: Mutex<VecDeque<Arc<T>>>,
  available: Condvar,
}

impl<T> Pool<T> {
  /// Creates an empty pool. A capacity of 0 is promoted to 1.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      queue: Mutex::new(VecDeque::with_capacity(capacity)),
      available: Condvar::new(),
    }
  }

  /// Maximum number of buffers the pool may hold.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of buffers currently available.
  pub fn size(&self) -> usize {
    self.queue.lock().len()
  }

  /// Takes the front buffer, blocking while the pool is empty.
  pub fn acquire(&self) -> Arc<T> {
    let mut queue = self.queue.lock();
    loop {
      if let Some(buffer) = queue.pop_front() {
        return buffer;
      }
      self.available.wait(&mut queue);
    }
  }

  /// Returns a buffer and wakes one waiter.
  ///
  /// # Panics
  ///
  /// Panics when the pool is already full: the same buffer was released
  /// more often than it was acquired. A double release corrupts the
  /// capacity accounting, so it is treated as fatal.
  pub fn release(&self, buffer: Arc<T>) {
    let mut queue = self.queue.lock();
    if queue.len() >= self.capacity {
      panic!(
        "pool overflow: buffer released more times than acquired (capacity {})",
        self.capacity
      );
    }
    queue.push_back(buffer);
    drop(queue);
    self.available.notify_one();
  }
}

/// A capacity-bounded source of recyclable buffers for one task.
pub struct MemoryManager<T> {
  pool: Pool<T>,
  fill: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T: Payload> MemoryManager<T> {
  /// Creates a manager whose pool is pre-filled with `capacity` buffers
  /// produced by `fill`.
  pub fn new(capacity: usize, fill: impl Fn() -> T + Send + Sync + 'static) -> Arc<Self> {
    Self::with_fill(capacity, Arc::new(fill))
  }

  fn with_fill(capacity: usize, fill: Arc<dyn Fn() -> T + Send + Sync>) -> Arc<Self> {
    let manager = Self {
      pool: Pool::new(capacity),
      fill,
    };
    for _ in 0..manager.pool.capacity() {
      manager.pool.release(Arc::new((manager.fill)()));
    }
    Arc::new(manager)
  }

  /// Blocks until a buffer is available and hands it out.
  pub fn acquire(&self) -> Arc<T> {
    self.pool.acquire()
  }

  /// Recycles a buffer into the pool.
  ///
  /// # Panics
  ///
  /// Panics on double release, see [`Pool::release`].
  pub fn release(&self, buffer: Arc<T>) {
    self.pool.release(buffer);
  }

  /// The underlying pool.
  pub fn pool(&self) -> &Pool<T> {
    &self.pool
  }

  /// A new manager with a fresh, fully-filled pool of the same capacity and
  /// the same fill function. Used when an execution pipeline duplicates the
  /// owning task.
  pub fn duplicate(&self) -> Arc<Self> {
    Self::with_fill(self.pool.capacity(), self.fill.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::{Duration, Instant};

  #[test]
  fn test_manager_prefills_to_capacity() {
    let manager = MemoryManager::new(3, Vec::<u8>::new);
    assert_eq!(manager.pool().capacity(), 3);
    assert_eq!(manager.pool().size(), 3);
  }

  #[test]
  fn test_acquire_release_roundtrip() {
    let manager = MemoryManager::new(2, || 0u64);
    let first = manager.acquire();
    let second = manager.acquire();
    assert_eq!(manager.pool().size(), 0);
    manager.release(first);
    manager.release(second);
    assert_eq!(manager.pool().size(), 2);
  }

  #[test]
  #[should_panic(expected = "pool overflow")]
  fn test_double_release_is_fatal() {
    let manager = MemoryManager::new(1, || 0u64);
    let buffer = manager.acquire();
    manager.release(buffer.clone());
    manager.release(buffer);
  }

  #[test]
  fn test_acquire_blocks_until_release() {
    let manager = MemoryManager::new(1, || 0u64);
    let held = manager.acquire();
    let start = Instant::now();
    let waiter = {
      let manager = manager.clone();
      std::thread::spawn(move || {
        let buffer = manager.acquire();
        manager.release(buffer);
      })
    };
    std::thread::sleep(Duration::from_millis(50));
    manager.release(held);
    waiter.join().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
  }

  #[test]
  fn test_duplicate_gets_a_fresh_pool() {
    let manager = MemoryManager::new(2, || 1u32);
    let _held = manager.acquire();
    let duplicate = manager.duplicate();
    // The duplicate is fully filled regardless of the original's state.
    assert_eq!(duplicate.pool().size(), 2);
    assert_eq!(manager.pool().size(), 1);
  }
}
