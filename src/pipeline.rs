//! # Execution Pipeline & Switch
//!
//! An [`ExecutionPipeline`] duplicates an inner graph k ways, each copy
//! with fresh queues, fresh memory pools and its own device id, and puts a
//! *switch* in front of them. The switch is the pipeline's receiver: its
//! worker thread dequeues each arriving value and forwards it to the copies
//! the user [`SwitchRule`] selects, which may be none, one, or all of them.
//!
//! Outputs of every copy feed the pipeline's common downstream
//! subscriptions, so from the outside the pipeline looks like one node with
//! the inner graph's types.

use std::any::TypeId;
use std::sync::Arc;

use tracing::debug;

use crate::dot::{DotAnchors, DotConfig, DotWriter};
use crate::error::GraphError;
use crate::graph::Graph;
use crate::inputs::{InputSet, Payload};
use crate::message::TaggedMessage;
use crate::node::{CoreNode, HasInputs, HasOutput, NodeKind, Placement};
use crate::queue::{Endpoint, InputQueue};
use crate::scheduler::Scheduler;
use crate::stats::{NodeState, NodeStats};

/// Per-input-type routing decision of an execution pipeline.
///
/// For every arriving value the switch asks, per graph copy, whether the
/// value should be forwarded there. Rules may keep state.
pub trait SwitchRule<I: Payload> {
  /// True when `data` should be delivered to copy `graph_id`.
  fn send_to_graph(&mut self, data: &Arc<I>, graph_id: usize) -> bool;
}

/// Routes a tagged message through the matching [`SwitchRule`] impl.
///
/// Implemented for every rule that covers all types of the pipeline's input
/// set.
pub trait SwitchSet<Ins: InputSet> {
  /// Applies the rule for the message's carrier type.
  fn route(&mut self, message: &TaggedMessage, graph_id: usize) -> bool;
}

macro_rules! route_arm {
  ($self:ident, $message:ident, $graph_id:ident, $ty:ty) => {
    match $message.payload.clone().downcast::<$ty>() {
      Ok(value) => SwitchRule::<$ty>::send_to_graph($self, &value, $graph_id),
      Err(_) => unreachable!("payload does not match its tag"),
    }
  };
}

impl<R, A> SwitchSet<(A,)> for R
where
  A: Payload,
  R: SwitchRule<A>,
{
  fn route(&mut self, message: &TaggedMessage, graph_id: usize) -> bool {
    match message.tag {
      0 => route_arm!(self, message, graph_id, A),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

impl<R, A, B> SwitchSet<(A, B)> for R
where
  A: Payload,
  B: Payload,
  R: SwitchRule<A> + SwitchRule<B>,
{
  fn route(&mut self, message: &TaggedMessage, graph_id: usize) -> bool {
    match message.tag {
      0 => route_arm!(self, message, graph_id, A),
      1 => route_arm!(self, message, graph_id, B),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

impl<R, A, B, C> SwitchSet<(A, B, C)> for R
where
  A: Payload,
  B: Payload,
  C: Payload,
  R: SwitchRule<A> + SwitchRule<B> + SwitchRule<C>,
{
  fn route(&mut self, message: &TaggedMessage, graph_id: usize) -> bool {
    match message.tag {
      0 => route_arm!(self, message, graph_id, A),
      1 => route_arm!(self, message, graph_id, B),
      2 => route_arm!(self, message, graph_id, C),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

impl<R, A, B, C, D> SwitchSet<(A, B, C, D)> for R
where
  A: Payload,
  B: Payload,
  C: Payload,
  D: Payload,
  R: SwitchRule<A> + SwitchRule<B> + SwitchRule<C> + SwitchRule<D>,
{
  fn route(&mut self, message: &TaggedMessage, graph_id: usize) -> bool {
    match message.tag {
      0 => route_arm!(self, message, graph_id, A),
      1 => route_arm!(self, message, graph_id, B),
      2 => route_arm!(self, message, graph_id, C),
      3 => route_arm!(self, message, graph_id, D),
      other => unreachable!("input tag {other} out of range"),
    }
  }
}

/// k duplicates of an inner graph behind a routing switch.
pub struct ExecutionPipeline<O: Payload, Ins: InputSet, R> {
  name: String,
  copies: Vec<Graph<O, Ins>>,
  device_ids: Vec<i32>,
  rule: Option<R>,
  queue: Arc<InputQueue>,
  switch_stats: Arc<NodeStats>,
  stats: Arc<NodeStats>,
  /// Delivery endpoints of each copy, indexed `[copy][tag]`.
  copy_inputs: Vec<Vec<Vec<Endpoint>>>,
}

impl<O, Ins, R> ExecutionPipeline<O, Ins, R>
where
  O: Payload,
  Ins: InputSet,
  R: SwitchSet<Ins> + Clone + Send + 'static,
{
  /// Duplicates `graph` into `duplicates` copies tagged with the given
  /// device ids, routed by `rule`.
  pub fn new(
    name: impl Into<String>,
    graph: Graph<O, Ins>,
    duplicates: usize,
    device_ids: Vec<i32>,
    rule: R,
  ) -> Result<Self, GraphError> {
    if duplicates == 0 {
      return Err(GraphError::EmptyPipeline);
    }
    if device_ids.len() != duplicates {
      return Err(GraphError::DeviceIdCount {
        expected: duplicates,
        got: device_ids.len(),
      });
    }
    let name = name.into();
    let switch_stats = Arc::new(NodeStats::new());
    let queue = InputQueue::new(format!("{name}-switch"), Ins::LEN, switch_stats.clone());

    let mut copies = Vec::with_capacity(duplicates);
    copies.push(graph);
    for _ in 1..duplicates {
      copies.push(copies[0].duplicate_structure()?);
    }

    // The switch is the sole live sender on every copy's input queues.
    let mut copy_inputs = Vec::with_capacity(duplicates);
    for copy in &copies {
      let table = copy.input_endpoint_table();
      for endpoints in &table {
        for endpoint in endpoints {
          endpoint.add_sender();
        }
      }
      copy_inputs.push(table);
    }

    Ok(Self {
      name,
      copies,
      device_ids,
      rule: Some(rule),
      queue,
      switch_stats,
      stats: Arc::new(NodeStats::new()),
      copy_inputs,
    })
  }

  /// Like [`ExecutionPipeline::new`] with device ids `0..duplicates`.
  pub fn with_iota_devices(
    name: impl Into<String>,
    graph: Graph<O, Ins>,
    duplicates: usize,
    rule: R,
  ) -> Result<Self, GraphError> {
    let device_ids = (0..duplicates as i32).collect();
    Self::new(name, graph, duplicates, device_ids, rule)
  }

  /// The pipeline name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of graph copies.
  pub fn duplicates(&self) -> usize {
    self.copies.len()
  }

  /// Device ids, one per copy.
  pub fn device_ids(&self) -> &[i32] {
    &self.device_ids
  }
}

impl<O, Ins, R> CoreNode for ExecutionPipeline<O, Ins, R>
where
  O: Payload,
  Ins: InputSet,
  R: SwitchSet<Ins> + Clone + Send + 'static,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> NodeKind {
    NodeKind::ExecutionPipeline
  }

  fn worker_count(&self) -> usize {
    1
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
    for copy in &mut self.copies {
      CoreNode::subscribe_output(copy, endpoint.clone());
    }
  }

  fn start(
    &mut self,
    scheduler: &mut dyn Scheduler,
    _placement: Placement,
  ) -> Result<(), GraphError> {
    // Copies carry their own placement; the enclosing graph's is ignored.
    self.stats.set_state(NodeState::Running);
    for (graph_id, copy) in self.copies.iter_mut().enumerate() {
      let device_id = self.device_ids[graph_id];
      copy.set_placement(device_id, graph_id);
      CoreNode::start(
        copy,
        scheduler,
        Placement {
          device_id,
          graph_id,
        },
      )?;
    }

    let mut rule = self
      .rule
      .take()
      .expect("execution pipeline started more than once");
    let queue = self.queue.clone();
    let copy_inputs = self.copy_inputs.clone();
    let switch_stats = self.switch_stats.clone();
    scheduler.spawn(
      format!("{}-switch", self.name),
      Box::new(move || {
        switch_stats.set_state(NodeState::Running);
        while let Some(message) = queue.dequeue_one(|| None) {
          for (graph_id, tags) in copy_inputs.iter().enumerate() {
            if rule.route(&message, graph_id) {
              for endpoint in &tags[message.tag] {
                endpoint.enqueue_payload(message.payload.clone());
              }
            }
          }
          switch_stats.inc_received();
        }
        // Upstream is done; retire the switch from every copy.
        for tags in &copy_inputs {
          for endpoints in tags {
            for endpoint in endpoints {
              endpoint.sender_terminated();
            }
          }
        }
        switch_stats.set_state(NodeState::Terminated);
        debug!("switch terminated");
      }),
    )
  }

  fn join(&mut self) {
    for copy in &mut self.copies {
      CoreNode::join(copy);
    }
    self.stats.set_state(NodeState::Terminated);
  }

  fn duplicate(&self) -> Result<Box<dyn CoreNode>, GraphError> {
    let rule = self
      .rule
      .as_ref()
      .expect("cannot duplicate a started execution pipeline")
      .clone();
    let template = self.copies[0].duplicate_structure()?;
    Ok(Box::new(ExecutionPipeline::new(
      self.name.clone(),
      template,
      self.copies.len(),
      self.device_ids.clone(),
      rule,
    )?))
  }

  fn queue_depth(&self) -> Option<(usize, usize)> {
    Some((self.queue.size(), self.queue.max_size()))
  }

  fn stats_tree(&self, out: &mut Vec<Arc<NodeStats>>) {
    out.push(self.stats.clone());
    out.push(self.switch_stats.clone());
    for copy in &self.copies {
      copy.stats_tree(out);
    }
  }

  fn write_dot(&self, writer: &mut DotWriter, config: &DotConfig) -> DotAnchors {
    let cluster = writer.next_cluster();
    writer.line(format!("subgraph {cluster} {{"));
    writer.line(format!("label=\"{}\";", self.name));
    let switch = writer.next_id();
    let mut switch_label = "switch".to_string();
    if config.debug_identities() {
      switch_label.push_str(&format!("\\nid: {:p}", Arc::as_ptr(&self.switch_stats)));
    }
    writer.line(format!(
      "{switch} [label=\"{switch_label}\", shape=triangle];"
    ));
    let mut outputs = Vec::new();
    for (graph_id, copy) in self.copies.iter().enumerate() {
      let anchors = CoreNode::write_dot(copy, writer, config);
      for anchor in &anchors.inputs {
        writer.line(format!(
          "{switch} -> {anchor} [label=\"device {}\"];",
          self.device_ids[graph_id]
        ));
      }
      outputs.extend(anchors.outputs);
    }
    writer.line("}");
    DotAnchors {
      inputs: vec![switch],
      outputs,
    }
  }
}

impl<O: Payload, Ins: InputSet, R> HasOutput for ExecutionPipeline<O, Ins, R> {
  type Output = O;
}

impl<O: Payload, Ins: InputSet, R> HasInputs for ExecutionPipeline<O, Ins, R> {
  type Inputs = Ins;
}
