//! # State Managers
//!
//! A state manager is a single-threaded task that serializes execution under
//! a shared user state. The mutex lives on the *state*, not the manager, so
//! several managers (even in different pipeline copies) may share one
//! [`SharedState`] and still exclude each other, without serializing
//! unrelated managers.
//!
//! On each message the manager locks the state, runs the user
//! [`StateExecute`] hook (which may push any number of ready values), then
//! drains and emits the ready list before unlocking.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dot::{DotAnchors, DotConfig, DotWriter};
use crate::error::GraphError;
use crate::inputs::{InputSet, Payload};
use crate::node::{CoreNode, HasInputs, HasOutput, NodeKind, Placement};
use crate::queue::Endpoint;
use crate::scheduler::Scheduler;
use crate::stats::NodeStats;
use crate::task::{DispatchSet, Execute, Task, TaskContext, TaskLogic};

/// Outputs produced by a state hook, drained by the manager while the state
/// lock is still held.
pub struct ReadyList<O> {
  items: VecDeque<Arc<O>>,
}

impl<O: Payload> ReadyList<O> {
  fn new() -> Self {
    Self {
      items: VecDeque::new(),
    }
  }

  /// Queues a value for emission.
  pub fn push(&mut self, value: O) {
    self.items.push_back(Arc::new(value));
  }

  /// Queues an already-shared value for emission.
  pub fn push_shared(&mut self, value: Arc<O>) {
    self.items.push_back(value);
  }

  /// Number of queued values.
  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// True when nothing is queued.
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  fn pop_front(&mut self) -> Option<Arc<O>> {
    self.items.pop_front()
  }
}

/// User state hosted behind a [`SharedState`].
pub trait StateLogic: Send + 'static {
  /// The type of the ready values this state produces.
  type Output: Payload;
}

/// One state-update hook per input type the managing node declares.
pub trait StateExecute<I: Payload>: StateLogic {
  /// Updates the state under its lock; ready results go into `ready`.
  fn execute(&mut self, input: Arc<I>, ready: &mut ReadyList<Self::Output>);
}

struct StateCell<S: StateLogic> {
  state: S,
  ready: ReadyList<S::Output>,
}

/// A user state plus its own mutex and ready list.
///
/// Clone the `Arc` to share one state between several managers.
pub struct SharedState<S: StateLogic> {
  cell: Mutex<StateCell<S>>,
}

impl<S: StateLogic> SharedState<S> {
  /// Wraps a state for sharing.
  pub fn new(state: S) -> Arc<Self> {
    Arc::new(Self {
      cell: Mutex::new(StateCell {
        state,
        ready: ReadyList::new(),
      }),
    })
  }

  /// Runs a closure over the state under its lock, e.g. to inspect it after
  /// the graph terminated.
  pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
    f(&self.cell.lock().state)
  }

  /// Mutable counterpart of [`SharedState::with`].
  pub fn with_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
    f(&mut self.cell.lock().state)
  }
}

/// Task logic adapter that funnels every message through the state lock.
pub struct StateAdapter<S: StateLogic> {
  shared: Arc<SharedState<S>>,
}

impl<S: StateLogic> Clone for StateAdapter<S> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<S: StateLogic> TaskLogic for StateAdapter<S> {
  type Output = S::Output;
}

impl<I: Payload, S: StateExecute<I>> Execute<I> for StateAdapter<S> {
  fn execute(&mut self, input: Arc<I>, ctx: &mut TaskContext<Self::Output>) {
    let mut cell = self.shared.cell.lock();
    let StateCell { state, ready } = &mut *cell;
    state.execute(input, ready);
    // Emit while still holding the state lock; queue locks nest strictly
    // below it, so ordering stays acyclic.
    while let Some(value) = ready.pop_front() {
      ctx.add_result_shared(value);
    }
  }
}

/// A node serializing execution under a shared user state.
pub struct StateManager<Ins: InputSet, S: StateLogic> {
  inner: Task<Ins, StateAdapter<S>>,
  shared: Arc<SharedState<S>>,
}

impl<Ins: InputSet, S: StateLogic> StateManager<Ins, S> {
  /// Creates a manager over the given shared state.
  pub fn new(name: impl Into<String>, shared: Arc<SharedState<S>>) -> Self {
    Self {
      inner: Task::with_kind(
        name,
        StateAdapter {
          shared: shared.clone(),
        },
        NodeKind::StateManager,
      ),
      shared,
    }
  }

  /// The managed state.
  pub fn state(&self) -> &Arc<SharedState<S>> {
    &self.shared
  }

  /// The manager name.
  pub fn name(&self) -> &str {
    self.inner.name()
  }
}

impl<Ins, S> CoreNode for StateManager<Ins, S>
where
  Ins: InputSet,
  S: StateLogic,
  StateAdapter<S>: DispatchSet<Ins>,
{
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn kind(&self) -> NodeKind {
    NodeKind::StateManager
  }

  fn worker_count(&self) -> usize {
    CoreNode::worker_count(&self.inner)
  }

  fn stats(&self) -> Arc<NodeStats> {
    CoreNode::stats(&self.inner)
  }

  fn input_type_ids(&self) -> Vec<std::any::TypeId> {
    CoreNode::input_type_ids(&self.inner)
  }

  fn input_type_names(&self) -> Vec<&'static str> {
    CoreNode::input_type_names(&self.inner)
  }

  fn input_endpoints(&self, type_id: std::any::TypeId) -> Vec<Endpoint> {
    CoreNode::input_endpoints(&self.inner, type_id)
  }

  fn subscribe_output(&mut self, endpoint: Endpoint) {
    CoreNode::subscribe_output(&mut self.inner, endpoint);
  }

  fn start(
    &mut self,
    scheduler: &mut dyn Scheduler,
    placement: Placement,
  ) -> Result<(), GraphError> {
    CoreNode::start(&mut self.inner, scheduler, placement)
  }

  fn join(&mut self) {
    CoreNode::join(&mut self.inner);
  }

  fn duplicate(&self) -> Result<Box<dyn CoreNode>, GraphError> {
    // Pipeline copies share the state; only the node shell is fresh.
    Ok(Box::new(StateManager::<Ins, S>::new(
      self.inner.name().to_string(),
      self.shared.clone(),
    )))
  }

  fn queue_depth(&self) -> Option<(usize, usize)> {
    CoreNode::queue_depth(&self.inner)
  }

  fn write_dot(&self, writer: &mut DotWriter, config: &DotConfig) -> DotAnchors {
    CoreNode::write_dot(&self.inner, writer, config)
  }
}

impl<Ins: InputSet, S: StateLogic> HasOutput for StateManager<Ins, S> {
  type Output = S::Output;
}

impl<Ins: InputSet, S: StateLogic> HasInputs for StateManager<Ins, S> {
  type Inputs = Ins;
}
