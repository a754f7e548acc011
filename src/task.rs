//! # Tasks
//!
//! A [`Task`] wraps a user [`TaskLogic`] that implements one
//! [`Execute`]`<T>` per declared input type `T`. The runtime gives every
//! task copy its own OS thread running the same loop: block on the input
//! queue, dispatch the message to the matching `execute`, repeat until the
//! termination predicate holds, then run the shutdown hook and retire from
//! every downstream queue.
//!
//! Declaring more than one worker turns the task into a *cluster*: the
//! logic is cloned per thread, all clones drain the same queue and share the
//! same downstream subscriptions and memory manager, and the cluster still
//! looks like a single vertex from the outside.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use graphweave::{Execute, Task, TaskContext, TaskLogic};
//!
//! #[derive(Clone)]
//! struct Double;
//!
//! impl TaskLogic for Double {
//!   type Output = i32;
//! }
//!
//! impl Execute<i32> for Double {
//!   fn execute(&mut self, input: Arc<i32>, ctx: &mut TaskContext<i32>) {
//!     ctx.add_result(*input * 2);
//!   }
//! }
//!
//! let task: Task<(i32,), Double> = Task::new("double", Double).with_threads(4);
//! assert_eq!(task.worker_count(), 4);
//! ```

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::dot::{DotAnchors, DotConfig, DotWriter, StructureOptions};
use crate::error::GraphError;
use crate::inputs::{InputSet, Payload};
use crate::memory::MemoryManager;
use crate::message::{SharedPayload, TaggedMessage};
use crate::node::{CoreNode, HasInputs, HasOutput, NodeKind, Placement};
use crate::queue::{Endpoint, InputQueue};
use crate::scheduler::Scheduler;
use crate::stats::{NodeState, NodeStats};

/// Identity of one worker thread: pipeline copy, device hint, thread index.
#[derive(Debug, Clone, Copy)]
pub struct WorkerInfo {
  /// Device hint of the enclosing graph copy; opaque to the runtime.
  pub device_id: i32,
  /// Index of the enclosing pipeline copy, 0 outside pipelines.
  pub graph_id: usize,
  /// Index of this worker within its cluster.
  pub thread_id: usize,
}

/// Per-worker handle for emitting results and acquiring pooled memory.
pub struct TaskContext<O: Payload> {
  outputs: Vec<Endpoint>,
  stats: Arc<NodeStats>,
  memory: Option<Arc<MemoryManager<O>>>,
  info: WorkerInfo,
}

impl<O: Payload> TaskContext<O> {
  /// Emits a result to every subscribed receiver.
  ///
  /// The value is shared, not copied: each receiver's queue gets a clone of
  /// one reference-counted pointer.
  pub fn add_result(&mut self, value: O) {
    self.add_result_shared(Arc::new(value));
  }

  /// Emits an already-shared result, e.g. a buffer from the memory pool.
  pub fn add_result_shared(&mut self, value: Arc<O>) {
    let payload: SharedPayload = value;
    for endpoint in &self.outputs {
      endpoint.enqueue_payload(payload.clone());
    }
  }

  /// Blocks until the attached memory manager hands out a buffer; the wait
  /// is recorded in the node's memory-wait counter.
  ///
  /// # Panics
  ///
  /// Panics when no memory manager was attached to the task.
  pub fn get_managed_memory(&self) -> Arc<O> {
    let manager = self
      .memory
      .as_ref()
      .expect("no memory manager attached to this task");
    let started = Instant::now();
    let buffer = manager.acquire();
    self.stats.add_memory_wait(started.elapsed());
    buffer
  }

  /// The memory manager attached to this task, if any.
  pub fn memory_manager(&self) -> Option<&Arc<MemoryManager<O>>> {
    self.memory.as_ref()
  }

  /// This worker's identity.
  pub fn info(&self) -> &WorkerInfo {
    &self.info
  }

  /// Device hint of the enclosing graph copy.
  pub fn device_id(&self) -> i32 {
    self.info.device_id
  }

  /// Index of the enclosing pipeline copy.
  pub fn graph_id(&self) -> usize {
    self.info.graph_id
  }
}

/// User logic hosted by a task: lifecycle hooks plus the output type.
///
/// `initialize` runs once per worker before any message is consumed (the
/// place to bind device resources via [`WorkerInfo::device_id`]);
/// `shutdown` runs after the main loop. `can_terminate` overrides the
/// default termination rule: return `Some(true)` to stop even though
/// upstream is still live, which is how cycles are broken.
pub trait TaskLogic: Send + 'static {
  /// The single output type this logic emits.
  type Output: Payload;

  /// Per-worker setup hook.
  fn initialize(&mut self, _info: &WorkerInfo) {}

  /// Runs once after `initialize` when the task was built with
  /// `auto_start`, letting the task emit before any input arrives.
  fn on_start(&mut self, _ctx: &mut TaskContext<Self::Output>) {}

  /// Per-worker teardown hook.
  fn shutdown(&mut self) {}

  /// Termination override, re-evaluated on every wake-up.
  ///
  /// `None` keeps the default rule: terminate once every upstream sender
  /// has retired and the queue is empty.
  fn can_terminate(&self) -> Option<bool> {
    None
  }
}

/// One `execute` per declared input type.
pub trait Execute<I: Payload>: TaskLogic {
  /// Consumes one input value; results go out through the context.
  fn execute(&mut self, input: Arc<I>, ctx: &mut TaskContext<Self::Output>);
}

/// Routes a tagged message to the matching [`Execute`] impl.
///
/// Implemented for every logic that covers all types of its input set; the
/// tag is trusted because wiring already proved type membership.
pub trait DispatchSet<Ins: InputSet>: TaskLogic {
  /// Dispatches one message by tag.
  fn dispatch(&mut self, message: TaggedMessage, ctx: &mut TaskContext<Self::Output>);
}

macro_rules! dispatch_arm {
  ($self:ident, $message:ident, $ctx:ident, $ty:ty) => {
    match $message.payload.downcast::<$ty>() {
      Ok(value) => Execute::<$ty>::execute($self, value, $ctx),
      Err(_) => unreachable!("payload does not match its tag"),
    }
  };
}

impl<L, A> DispatchSet<(A,)> for L
where
  A: Payload,
  L: Execute<A>,
{
  fn dispatch(&mut self, message: TaggedMessage, ctx: &mut TaskContext<Self::Output>) {
    match message.tag {
      0 => dispatch_arm!(self, message, ctx, A),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

impl<L, A, B> DispatchSet<(A, B)> for L
where
  A: Payload,
  B: Payload,
  L: Execute<A> + Execute<B>,
{
  fn dispatch(&mut self, message: TaggedMessage, ctx: &mut TaskContext<Self::Output>) {
    match message.tag {
      0 => dispatch_arm!(self, message, ctx, A),
      1 => dispatch_arm!(self, message, ctx, B),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

impl<L, A, B, C> DispatchSet<(A, B, C)> for L
where
  A: Payload,
  B: Payload,
  C: Payload,
  L: Execute<A> + Execute<B> + Execute<C>,
{
  fn dispatch(&mut self, message: TaggedMessage, ctx: &mut TaskContext<Self::Output>) {
    match message.tag {
      0 => dispatch_arm!(self, message, ctx, A),
      1 => dispatch_arm!(self, message, ctx, B),
      2 => dispatch_arm!(self, message, ctx, C),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

impl<L, A, B, C, D> DispatchSet<(A, B, C, D)> for L
where
  A: Payload,
  B: Payload,
  C: Payload,
  D: Payload,
  L: Execute<A> + Execute<B> + Execute<C> + Execute<D>,
{
  fn dispatch(&mut self, message: TaggedMessage, ctx: &mut TaskContext<Self::Output>) {
    match message.tag {
      0 => dispatch_arm!(self, message, ctx, A),
      1 => dispatch_arm!(self, message, ctx, B),
      2 => dispatch_arm!(self, message, ctx, C),
      3 => dispatch_arm!(self, message, ctx, D),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

/// A compute vertex: user logic, one shared input queue, N worker threads.
pub struct Task<Ins: InputSet, L: TaskLogic> {
  name: String,
  kind: NodeKind,
  threads: usize,
  auto_start: bool,
  logic: L,
  queue: Arc<InputQueue>,
  subscribers: Vec<Endpoint>,
  stats: Arc<NodeStats>,
  memory: Option<Arc<MemoryManager<L::Output>>>,
  _inputs: PhantomData<fn() -> Ins>,
}

impl<Ins: InputSet, L: TaskLogic> Task<Ins, L> {
  /// Creates a single-threaded task around the given logic.
  pub fn new(name: impl Into<String>, logic: L) -> Self {
    Self::with_kind(name, logic, NodeKind::Task)
  }

  pub(crate) fn with_kind(name: impl Into<String>, logic: L, kind: NodeKind) -> Self {
    let name = name.into();
    let stats = Arc::new(NodeStats::new());
    let queue = InputQueue::new(name.clone(), Ins::LEN, stats.clone());
    Self {
      name,
      kind,
      threads: 1,
      auto_start: false,
      logic,
      queue,
      subscribers: Vec::new(),
      stats,
      memory: None,
      _inputs: PhantomData,
    }
  }

  /// Declares the cluster size. A value of 0 is promoted to 1.
  #[must_use]
  pub fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  /// Lets the task run its `on_start` hook without waiting for input.
  #[must_use]
  pub fn with_auto_start(mut self, auto_start: bool) -> Self {
    self.auto_start = auto_start;
    self
  }

  /// Attaches a memory manager; all cluster copies share it.
  #[must_use]
  pub fn with_memory_manager(mut self, manager: Arc<MemoryManager<L::Output>>) -> Self {
    self.memory = Some(manager);
    self
  }

  /// The task name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Declared number of worker threads.
  pub fn worker_count(&self) -> usize {
    self.threads
  }

  /// True when the task starts without waiting for input.
  pub fn auto_start(&self) -> bool {
    self.auto_start
  }
}

/// Main loop shared by every worker of a task cluster.
fn worker_loop<Ins, L>(
  mut logic: L,
  queue: Arc<InputQueue>,
  mut ctx: TaskContext<L::Output>,
  active: Arc<AtomicUsize>,
  auto_start: bool,
) where
  Ins: InputSet,
  L: TaskLogic + DispatchSet<Ins>,
{
  let info = ctx.info;
  logic.initialize(&info);
  if auto_start {
    logic.on_start(&mut ctx);
  }
  loop {
    let wait_started = Instant::now();
    let message = queue.dequeue_one(|| logic.can_terminate());
    ctx.stats.add_waited(wait_started.elapsed());
    let Some(message) = message else { break };
    let exec_started = Instant::now();
    logic.dispatch(message, &mut ctx);
    ctx.stats.add_executed(exec_started.elapsed());
    ctx.stats.inc_received();
  }
  ctx.stats.begin_draining();
  logic.shutdown();
  // The last worker out retires the whole cluster from its downstreams.
  if active.fetch_sub(1, Ordering::AcqRel) == 1 {
    for endpoint in &ctx.outputs {
      endpoint.sender_terminated();
    }
    ctx.stats.set_state(NodeState::Terminated);
    debug!(worker = %ctx.info.thread_id, "cluster terminated");
  }
}

impl<Ins, L> CoreNode for Task<Ins, L>
where
  Ins: InputSet,
  L: TaskLogic + DispatchSet<Ins> + Clone,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> NodeKind {
    self.kind
  }

  fn worker_count(&self) -> usize {
    self.threads
  }

  fn stats(&self) -> Arc<NodeStats> {
    self.stats.clone()
  }

  fn input_type_ids(&self) -> Vec<TypeId> {
    Ins::type_ids()
  }

  fn input_type_names(&self) -> Vec<&'static str> {
    Ins::type_names()
  }

  fn input_endpoints(&self, type_id: TypeId) -> Vec<Endpoint> {
    match Ins::tag_of(type_id) {
      Some(tag) => vec![Endpoint::new(self.queue.clone(), tag)],
      None => Vec::new(),
    }
  }

  fn subscribe_output(&mut self, endpoint: Endpoint) {
    endpoint.add_sender();
    self.subscribers.push(endpoint);
  }

  fn start(
    &mut self,
    scheduler: &mut dyn Scheduler,
    placement: Placement,
  ) -> Result<(), GraphError> {
    let active = Arc::new(AtomicUsize::new(self.threads));
    self.stats.set_state(NodeState::Running);
    for thread_id in 0..self.threads {
      let logic = self.logic.clone();
      let queue = self.queue.clone();
      let active = active.clone();
      let auto_start = self.auto_start;
      let ctx = TaskContext {
        outputs: self.subscribers.clone(),
        stats: self.stats.clone(),
        memory: self.memory.clone(),
        info: WorkerInfo {
          device_id: placement.device_id,
          graph_id: placement.graph_id,
          thread_id,
        },
      };
      scheduler.spawn(
        format!("{}-{}", self.name, thread_id),
        Box::new(move || worker_loop::<Ins, L>(logic, queue, ctx, active, auto_start)),
      )?;
    }
    Ok(())
  }

  fn join(&mut self) {
    // Worker threads belong to the owning graph's scheduler.
  }

  fn duplicate(&self) -> Result<Box<dyn CoreNode>, GraphError> {
    let stats = Arc::new(NodeStats::new());
    Ok(Box::new(Task::<Ins, L> {
      name: self.name.clone(),
      kind: self.kind,
      threads: self.threads,
      auto_start: self.auto_start,
      logic: self.logic.clone(),
      queue: InputQueue::new(self.name.clone(), Ins::LEN, stats.clone()),
      subscribers: Vec::new(),
      stats,
      memory: self.memory.as_ref().map(|manager| manager.duplicate()),
      _inputs: PhantomData,
    }))
  }

  fn has_memory_manager(&self) -> bool {
    self.memory.is_some()
  }

  fn queue_depth(&self) -> Option<(usize, usize)> {
    Some((self.queue.size(), self.queue.max_size()))
  }

  fn write_dot(&self, writer: &mut DotWriter, config: &DotConfig) -> DotAnchors {
    let id = writer.next_id();
    let mut label = self.name.clone();
    if matches!(
      config.structure,
      StructureOptions::Queue | StructureOptions::All
    ) {
      label.push_str(&format!(
        "\\nqueue: {} (max {})",
        self.queue.size(),
        self.queue.max_size()
      ));
    }
    if matches!(
      config.structure,
      StructureOptions::AllThreading | StructureOptions::All
    ) && self.threads > 1
    {
      label.push_str(&format!("\\nthreads: {}", self.threads));
    }
    if config.debug_identities() {
      label.push_str(&format!("\\nid: {:p}", Arc::as_ptr(&self.stats)));
    }
    let shape = if self.threads > 1 {
      "egg"
    } else if self.kind == NodeKind::StateManager {
      "box"
    } else {
      "ellipse"
    };
    let fill = config.fill_for(&self.stats);
    writer.line(format!("{id} [label=\"{label}\", shape={shape}{fill}];"));
    DotAnchors {
      inputs: vec![id.clone()],
      outputs: vec![id],
    }
  }
}

impl<Ins: InputSet, L: TaskLogic> HasOutput for Task<Ins, L> {
  type Output = L::Output;
}

impl<Ins: InputSet, L: TaskLogic> HasInputs for Task<Ins, L> {
  type Inputs = Ins;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scheduler::DefaultScheduler;

  #[derive(Clone)]
  struct Echo;

  impl TaskLogic for Echo {
    type Output = i32;
  }

  impl Execute<i32> for Echo {
    fn execute(&mut self, input: Arc<i32>, ctx: &mut TaskContext<i32>) {
      ctx.add_result(*input);
    }
  }

  #[derive(Clone)]
  struct Join;

  impl TaskLogic for Join {
    type Output = f32;
  }

  impl Execute<i32> for Join {
    fn execute(&mut self, input: Arc<i32>, ctx: &mut TaskContext<f32>) {
      ctx.add_result(*input as f32);
    }
  }

  impl Execute<f64> for Join {
    fn execute(&mut self, input: Arc<f64>, ctx: &mut TaskContext<f32>) {
      ctx.add_result(*input as f32);
    }
  }

  #[test]
  fn test_builders() {
    let task: Task<(i32,), Echo> = Task::new("echo", Echo)
      .with_threads(3)
      .with_auto_start(true);
    assert_eq!(task.name(), "echo");
    assert_eq!(task.worker_count(), 3);
    assert!(task.auto_start());
  }

  #[test]
  fn test_zero_threads_promoted_to_one() {
    let task: Task<(i32,), Echo> = Task::new("echo", Echo).with_threads(0);
    assert_eq!(task.worker_count(), 1);
  }

  #[test]
  fn test_endpoints_resolve_by_type() {
    let task: Task<(i32, f64), Join> = Task::new("join", Join);
    assert_eq!(task.input_endpoints(TypeId::of::<i32>()).len(), 1);
    assert_eq!(task.input_endpoints(TypeId::of::<f64>()).len(), 1);
    assert!(task.input_endpoints(TypeId::of::<String>()).is_empty());
  }

  #[test]
  fn test_worker_drains_queue_and_retires_downstream() {
    let mut task: Task<(i32,), Echo> = Task::new("echo", Echo);

    let sink_stats = Arc::new(NodeStats::new());
    let sink = InputQueue::new("sink", 1, sink_stats);
    task.subscribe_output(Endpoint::new(sink.clone(), 0));

    // Act as the upstream: register, feed, retire.
    let feed = task.input_endpoints(TypeId::of::<i32>()).remove(0);
    feed.add_sender();
    for i in 0..10 {
      feed.enqueue_payload(Arc::new(i as i32));
    }
    feed.sender_terminated();

    let mut scheduler = DefaultScheduler::new();
    task.start(&mut scheduler, Placement::default()).unwrap();
    scheduler.join_all();

    let mut seen = Vec::new();
    while let Some(message) = sink.dequeue_one(|| None) {
      seen.push(*message.downcast::<i32>().unwrap());
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    assert_eq!(task.stats().received(), 10);
    assert_eq!(task.stats().state(), NodeState::Terminated);
  }

  #[test]
  fn test_cluster_shares_one_queue() {
    let mut task: Task<(i32,), Echo> = Task::new("echo", Echo).with_threads(4);

    let sink = InputQueue::new("sink", 1, Arc::new(NodeStats::new()));
    task.subscribe_output(Endpoint::new(sink.clone(), 0));

    let feed = task.input_endpoints(TypeId::of::<i32>()).remove(0);
    feed.add_sender();
    for i in 0..40 {
      feed.enqueue_payload(Arc::new(i as i32));
    }
    feed.sender_terminated();

    let mut scheduler = DefaultScheduler::new();
    task.start(&mut scheduler, Placement::default()).unwrap();
    scheduler.join_all();

    let mut seen = Vec::new();
    while let Some(message) = sink.dequeue_one(|| None) {
      seen.push(*message.downcast::<i32>().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..40).collect::<Vec<_>>());
  }
}
