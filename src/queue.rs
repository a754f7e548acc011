//! # Typed Multi-Input Queue
//!
//! The receiver side of every consuming node is one [`InputQueue`]: a FIFO of
//! [`TaggedMessage`]s guarded by a mutex and a not-empty condition variable.
//! All of a cluster's worker threads drain the same queue; each sender locks
//! only the target queue while enqueuing, so a slow receiver cannot stall an
//! unrelated one.
//!
//! The queue also carries the termination bookkeeping: one live-sender count
//! per input tag. A sender registers before the graph starts and retires
//! exactly once, waking every waiter so the termination predicate is
//! re-evaluated. With the default predicate a worker leaves
//! [`dequeue_one`](InputQueue::dequeue_one) empty-handed only when every tag's
//! live-sender count is zero and the FIFO is drained.
//!
//! Ordering: per sender–receiver pair the FIFO is preserved; across distinct
//! senders the interleaving is arbitrary.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::message::{SharedPayload, TaggedMessage};
use crate::stats::NodeStats;

struct QueueShared {
  messages: std::collections::VecDeque<TaggedMessage>,
  /// Live upstream senders, one count per input tag.
  live: Vec<usize>,
  max_size: usize,
}

/// A node's input FIFO plus its wake-up condition.
pub struct InputQueue {
  label: String,
  shared: Mutex<QueueShared>,
  ready: Condvar,
  stats: Arc<NodeStats>,
}

impl InputQueue {
  pub(crate) fn new(label: impl Into<String>, input_types: usize, stats: Arc<NodeStats>) -> Arc<Self> {
    Arc::new(Self {
      label: label.into(),
      shared: Mutex::new(QueueShared {
        messages: std::collections::VecDeque::new(),
        live: vec![0; input_types],
        max_size: 0,
      }),
      ready: Condvar::new(),
      stats,
    })
  }

  /// Appends a message and wakes one waiting worker. Never blocks on
  /// capacity; backpressure comes from the memory manager, not the queue.
  pub fn enqueue(&self, message: TaggedMessage) {
    let mut shared = self.shared.lock();
    shared.messages.push_back(message);
    if shared.messages.len() > shared.max_size {
      shared.max_size = shared.messages.len();
    }
    trace!(queue = %self.label, size = shared.messages.len(), "enqueue");
    drop(shared);
    self.ready.notify_one();
  }

  /// Pops the head message, blocking until one arrives or the node may
  /// terminate.
  ///
  /// `can_terminate` is the node's user predicate: `None` selects the
  /// default rule (every tag's live-sender count is zero and the queue is
  /// empty), `Some(v)` overrides it entirely. The predicate is re-evaluated
  /// on every wake-up, i.e. after each arrival and each upstream
  /// termination.
  ///
  /// Returns `None` once the node may terminate.
  pub fn dequeue_one(&self, can_terminate: impl Fn() -> Option<bool>) -> Option<TaggedMessage> {
    let mut shared = self.shared.lock();
    loop {
      let stop = match can_terminate() {
        Some(verdict) => verdict,
        None => shared.messages.is_empty() && shared.live.iter().all(|count| *count == 0),
      };
      if stop {
        trace!(queue = %self.label, "termination observed");
        return None;
      }
      if let Some(message) = shared.messages.pop_front() {
        return Some(message);
      }
      self.ready.wait(&mut shared);
    }
  }

  /// True when no message is queued.
  pub fn is_empty(&self) -> bool {
    self.shared.lock().messages.is_empty()
  }

  /// Number of queued messages.
  pub fn size(&self) -> usize {
    self.shared.lock().messages.len()
  }

  /// Largest size the queue ever reached.
  pub fn max_size(&self) -> usize {
    self.shared.lock().max_size
  }

  /// Sum of live senders over all tags.
  pub fn live_senders(&self) -> usize {
    self.shared.lock().live.iter().sum()
  }

  fn add_sender(&self, tag: usize) {
    self.shared.lock().live[tag] += 1;
  }

  fn sender_terminated(&self, tag: usize) {
    let mut shared = self.shared.lock();
    debug_assert!(shared.live[tag] > 0, "sender retired more often than registered");
    shared.live[tag] = shared.live[tag].saturating_sub(1);
    trace!(queue = %self.label, tag, remaining = shared.live[tag], "sender terminated");
    drop(shared);
    self.stats.begin_draining();
    // Every cluster worker must wake to re-check the termination predicate.
    self.ready.notify_all();
  }
}

/// A handle to one input tag of one queue; the unit of edge wiring.
///
/// Senders keep a list of endpoints and fan out by enqueuing into each,
/// taking one queue lock at a time.
#[derive(Clone)]
pub struct Endpoint {
  queue: Arc<InputQueue>,
  tag: usize,
}

impl Endpoint {
  pub(crate) fn new(queue: Arc<InputQueue>, tag: usize) -> Self {
    Self { queue, tag }
  }

  pub(crate) fn enqueue_payload(&self, payload: SharedPayload) {
    self.queue.enqueue(TaggedMessage {
      tag: self.tag,
      payload,
    });
  }

  /// Registers one live sender for this endpoint's tag.
  pub(crate) fn add_sender(&self) {
    self.queue.add_sender(self.tag);
  }

  /// Retires one live sender and wakes the receiver.
  pub(crate) fn sender_terminated(&self) {
    self.queue.sender_terminated(self.tag);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stats::NodeState;
  use std::sync::Arc;

  fn queue(tags: usize) -> Arc<InputQueue> {
    InputQueue::new("test", tags, Arc::new(NodeStats::new()))
  }

  #[test]
  fn test_fifo_order() {
    let q = queue(1);
    for i in 0..5 {
      q.enqueue(TaggedMessage::new(0, i as i32));
    }
    let ep = Endpoint::new(q.clone(), 0);
    ep.add_sender();
    for i in 0..5 {
      let message = q.dequeue_one(|| None).unwrap();
      assert_eq!(*message.downcast::<i32>().unwrap(), i);
    }
  }

  #[test]
  fn test_max_size_watermark() {
    let q = queue(1);
    for i in 0..4 {
      q.enqueue(TaggedMessage::new(0, i));
    }
    assert_eq!(q.size(), 4);
    assert_eq!(q.max_size(), 4);
    q.enqueue(TaggedMessage::new(0, 4));
    assert_eq!(q.max_size(), 5);
  }

  #[test]
  fn test_default_termination_needs_all_tags_retired() {
    let q = queue(2);
    let first = Endpoint::new(q.clone(), 0);
    let second = Endpoint::new(q.clone(), 1);
    first.add_sender();
    second.add_sender();
    first.sender_terminated();
    // One tag still live: the queue must hand back queued data, not stop.
    q.enqueue(TaggedMessage::new(1, 7i32));
    assert!(q.dequeue_one(|| None).is_some());
    second.sender_terminated();
    assert!(q.dequeue_one(|| None).is_none());
  }

  #[test]
  fn test_user_override_beats_default_rule() {
    let q = queue(1);
    let ep = Endpoint::new(q.clone(), 0);
    ep.add_sender();
    // Upstream is still live, yet the override asks for termination.
    assert!(q.dequeue_one(|| Some(true)).is_none());
  }

  #[test]
  fn test_termination_wakes_blocked_worker() {
    let q = queue(1);
    let ep = Endpoint::new(q.clone(), 0);
    ep.add_sender();
    let waiter = {
      let q = q.clone();
      std::thread::spawn(move || q.dequeue_one(|| None))
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    ep.sender_terminated();
    assert!(waiter.join().unwrap().is_none());
  }

  #[test]
  fn test_retiring_sender_marks_draining() {
    let stats = Arc::new(NodeStats::new());
    let q = InputQueue::new("draining", 1, stats.clone());
    let ep = Endpoint::new(q, 0);
    ep.add_sender();
    stats.set_state(NodeState::Running);
    ep.sender_terminated();
    assert_eq!(stats.state(), NodeState::Draining);
  }
}
