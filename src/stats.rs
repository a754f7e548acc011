//! # Node Lifecycle State & Timing Counters
//!
//! Every logical node owns a [`NodeStats`] shared between its worker threads
//! and the graph that created it. Workers accumulate wait / execution /
//! memory-wait durations and the received-element count; the graph reads the
//! counters after the run, e.g. to color the dot export.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
  /// Built, not yet started.
  Constructed = 0,
  /// Worker threads are live.
  Running = 1,
  /// At least one upstream terminated; the node still consumes its queue.
  Draining = 2,
  /// All worker threads have finished.
  Terminated = 3,
}

impl NodeState {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => NodeState::Constructed,
      1 => NodeState::Running,
      2 => NodeState::Draining,
      _ => NodeState::Terminated,
    }
  }
}

/// Shared per-node counters.
#[derive(Debug, Default)]
pub struct NodeStats {
  state: AtomicU8,
  waited_ns: AtomicU64,
  executed_ns: AtomicU64,
  memory_wait_ns: AtomicU64,
  received: AtomicU64,
}

impl NodeStats {
  /// Creates zeroed counters in the `Constructed` state.
  pub fn new() -> Self {
    Self::default()
  }

  /// Current lifecycle state.
  pub fn state(&self) -> NodeState {
    NodeState::from_u8(self.state.load(Ordering::Acquire))
  }

  /// Unconditionally moves to the given state.
  pub(crate) fn set_state(&self, state: NodeState) {
    self.state.store(state as u8, Ordering::Release);
  }

  /// Moves `Running` to `Draining`; other states are left alone.
  pub(crate) fn begin_draining(&self) {
    let _ = self.state.compare_exchange(
      NodeState::Running as u8,
      NodeState::Draining as u8,
      Ordering::AcqRel,
      Ordering::Acquire,
    );
  }

  pub(crate) fn add_waited(&self, elapsed: Duration) {
    self
      .waited_ns
      .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
  }

  pub(crate) fn add_executed(&self, elapsed: Duration) {
    self
      .executed_ns
      .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
  }

  pub(crate) fn add_memory_wait(&self, elapsed: Duration) {
    self
      .memory_wait_ns
      .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
  }

  pub(crate) fn inc_received(&self) {
    self.received.fetch_add(1, Ordering::Relaxed);
  }

  /// Total time spent blocked on the input queue, across all workers.
  pub fn waited(&self) -> Duration {
    Duration::from_nanos(self.waited_ns.load(Ordering::Relaxed))
  }

  /// Total time spent inside user execution, across all workers.
  pub fn executed(&self) -> Duration {
    Duration::from_nanos(self.executed_ns.load(Ordering::Relaxed))
  }

  /// Total time spent blocked waiting for pooled memory.
  pub fn memory_waited(&self) -> Duration {
    Duration::from_nanos(self.memory_wait_ns.load(Ordering::Relaxed))
  }

  /// Number of elements dequeued and dispatched.
  pub fn received(&self) -> u64 {
    self.received.load(Ordering::Relaxed)
  }

  /// Mean execution time per dispatched element.
  pub fn average_execution(&self) -> Duration {
    let count = self.received();
    if count == 0 {
      Duration::ZERO
    } else {
      self.executed() / count as u32
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_state_transitions() {
    let stats = NodeStats::new();
    assert_eq!(stats.state(), NodeState::Constructed);
    stats.set_state(NodeState::Running);
    stats.begin_draining();
    assert_eq!(stats.state(), NodeState::Draining);
    stats.set_state(NodeState::Terminated);
    assert_eq!(stats.state(), NodeState::Terminated);
  }

  #[test]
  fn test_begin_draining_requires_running() {
    let stats = NodeStats::new();
    stats.begin_draining();
    assert_eq!(stats.state(), NodeState::Constructed);
    stats.set_state(NodeState::Terminated);
    stats.begin_draining();
    assert_eq!(stats.state(), NodeState::Terminated);
  }

  #[test]
  fn test_counters_accumulate() {
    let stats = NodeStats::new();
    stats.add_waited(Duration::from_millis(5));
    stats.add_waited(Duration::from_millis(7));
    stats.add_executed(Duration::from_millis(30));
    stats.inc_received();
    stats.inc_received();
    stats.inc_received();
    assert_eq!(stats.waited(), Duration::from_millis(12));
    assert_eq!(stats.received(), 3);
    assert_eq!(stats.average_execution(), Duration::from_millis(10));
  }

  #[test]
  fn test_average_execution_with_no_elements() {
    let stats = NodeStats::new();
    assert_eq!(stats.average_execution(), Duration::ZERO);
  }
}
