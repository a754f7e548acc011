//! # Graph
//!
//! A [`Graph`] owns its inside nodes in an arena, wires typed edges between
//! them, and drives the run: `execute_graph` spawns every worker thread,
//! `push_data` broadcasts external input to the designated input nodes,
//! `finish_pushing_data` retires the external source, `get_blocking_result`
//! drains the output collector, and `wait_for_termination` joins everything.
//!
//! Edges are not objects: adding an edge subscribes the receiver's queue
//! endpoint to the sender, with the carrier type checked at compile time
//! through the [`Accepts`] witness. Because the arena owns the nodes and the
//! wiring only holds queue handles, no reference cycles form even when the
//! dataflow itself is cyclic.
//!
//! A graph is itself a node: nested graphs expose their designated input
//! nodes' queues as their own endpoints and forward downstream
//! subscriptions to their output nodes, so composition adds no forwarding
//! hop.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use graphweave::{Execute, Graph, Task, TaskContext, TaskLogic};
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
//! let mut graph: Graph<i32, (i32,)> = Graph::new("double");
//! let double = graph.add_node(Task::<(i32,), _>::new("double", Double)).unwrap();
//! graph.input(double).unwrap();
//! graph.output(double);
//!
//! graph.execute_graph().unwrap();
//! for i in 0..10 {
//!   graph.push_data(i);
//! }
//! graph.finish_pushing_data();
//! while let Some(result) = graph.get_blocking_result() {
//!   println!("{result}");
//! }
//! graph.wait_for_termination();
//! ```

use std::any::{type_name, TypeId};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::dot::{
  short_type_name, ColorScheme, DebugOptions, DotAnchors, DotConfig, DotWriter, StructureOptions,
};
use crate::error::GraphError;
use crate::inputs::{Accepts, InputSet, Payload};
use crate::message::SharedPayload;
use crate::node::{CoreNode, HasInputs, HasOutput, NodeKind, Placement};
use crate::queue::{Endpoint, InputQueue};
use crate::scheduler::{DefaultScheduler, Scheduler};
use crate::stats::{NodeState, NodeStats};

/// Typed reference to a node inside one graph.
///
/// Handles are cheap copies; they stay valid for the lifetime of the graph
/// that issued them and must not be used with any other graph.
pub struct NodeHandle<N> {
  index: usize,
  _marker: PhantomData<fn() -> N>,
}

impl<N> Clone for NodeHandle<N> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<N> Copy for NodeHandle<N> {}

impl<N> std::fmt::Debug for NodeHandle<N> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("NodeHandle").field(&self.index).finish()
  }
}

/// Build-time record of one edge, kept for pipeline duplication and dot
/// export.
struct EdgeRecord {
  from: usize,
  to: usize,
  type_id: TypeId,
  type_name: &'static str,
}

/// A container node owning inside nodes, their wiring, and the run state.
pub struct Graph<O: Payload, Ins: InputSet> {
  name: String,
  nodes: Vec<Box<dyn CoreNode>>,
  edges: Vec<EdgeRecord>,
  input_nodes: Vec<usize>,
  output_nodes: Vec<usize>,
  /// Resolved delivery endpoints per graph input tag.
  graph_inputs: Vec<Vec<Endpoint>>,
  collector: Option<Arc<InputQueue>>,
  collector_stats: Arc<NodeStats>,
  scheduler: Box<dyn Scheduler>,
  stats: Arc<NodeStats>,
  device_id: i32,
  graph_id: usize,
  source_finished: bool,
  _types: PhantomData<fn() -> (O, Ins)>,
}

impl<O: Payload, Ins: InputSet> Graph<O, Ins> {
  /// Creates an empty graph with the default one-thread-per-worker
  /// scheduler.
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_scheduler(name, Box::new(DefaultScheduler::new()))
  }

  /// Creates an empty graph driven by a custom scheduler.
  pub fn with_scheduler(name: impl Into<String>, scheduler: Box<dyn Scheduler>) -> Self {
    Self {
      name: name.into(),
      nodes: Vec::new(),
      edges: Vec::new(),
      input_nodes: Vec::new(),
      output_nodes: Vec::new(),
      graph_inputs: (0..Ins::LEN).map(|_| Vec::new()).collect(),
      collector: None,
      collector_stats: Arc::new(NodeStats::new()),
      scheduler,
      stats: Arc::new(NodeStats::new()),
      device_id: 0,
      graph_id: 0,
      source_finished: false,
      _types: PhantomData,
    }
  }

  /// The graph name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Current lifecycle state of the graph itself.
  pub fn state(&self) -> NodeState {
    self.stats.state()
  }

  /// Device hint assigned to this graph (copy).
  pub fn device_id(&self) -> i32 {
    self.device_id
  }

  /// Takes ownership of a node and returns a typed handle to it.
  ///
  /// Fails when another node already carries the same name, or when the
  /// node declares a duplicated input type.
  pub fn add_node<N: CoreNode + 'static>(&mut self, node: N) -> Result<NodeHandle<N>, GraphError> {
    if self.nodes.iter().any(|existing| existing.name() == node.name()) {
      return Err(GraphError::DuplicateName(node.name().to_string()));
    }
    let ids = node.input_type_ids();
    for (position, id) in ids.iter().enumerate() {
      if ids[..position].contains(id) {
        return Err(GraphError::DuplicateInputType {
          node: node.name().to_string(),
          type_name: node.input_type_names()[position],
        });
      }
    }
    let index = self.nodes.len();
    self.nodes.push(Box::new(node));
    Ok(NodeHandle {
      index,
      _marker: PhantomData,
    })
  }

  /// Wires an edge from `from`'s output to `to`'s matching input queue.
  ///
  /// The carrier type is checked at compile time: this call only
  /// type-checks when `from`'s output type is one of `to`'s declared input
  /// types.
  pub fn add_edge<F, T, P>(&mut self, from: NodeHandle<F>, to: NodeHandle<T>)
  where
    F: CoreNode + HasOutput + 'static,
    T: CoreNode + HasInputs + 'static,
    T::Inputs: Accepts<F::Output, P>,
  {
    self.wire_edge(
      from.index,
      to.index,
      TypeId::of::<F::Output>(),
      type_name::<F::Output>(),
    );
  }

  /// Declares a node as an input of the graph, for every input type the
  /// node shares with the graph.
  pub fn input<N>(&mut self, node: NodeHandle<N>) -> Result<(), GraphError>
  where
    N: CoreNode + HasInputs + 'static,
  {
    self.wire_input(node.index)
  }

  /// Declares a node's output as an output of the graph. Only type-checks
  /// when the node's output type equals the graph's.
  pub fn output<N>(&mut self, node: NodeHandle<N>)
  where
    N: CoreNode + HasOutput<Output = O> + 'static,
  {
    self.output_nodes.push(node.index);
  }

  /// Starts every inside node's workers and attaches the output collector.
  pub fn execute_graph(&mut self) -> Result<(), GraphError> {
    if self.stats.state() != NodeState::Constructed {
      return Err(GraphError::AlreadyStarted(self.name.clone()));
    }
    debug!(graph = %self.name, "executing graph");
    let collector = InputQueue::new(
      format!("{}-sink", self.name),
      1,
      self.collector_stats.clone(),
    );
    for position in 0..self.output_nodes.len() {
      let index = self.output_nodes[position];
      self.nodes[index].subscribe_output(Endpoint::new(collector.clone(), 0));
    }
    self.collector = Some(collector);
    self.collector_stats.set_state(NodeState::Running);
    // The external source counts as one live sender on every input queue,
    // unless the caller already declared the input finished.
    if !self.source_finished {
      for endpoints in &self.graph_inputs {
        for endpoint in endpoints {
          endpoint.add_sender();
        }
      }
    }
    let placement = Placement {
      device_id: self.device_id,
      graph_id: self.graph_id,
    };
    self.spawn_workers(placement)
  }

  /// Broadcasts a value to every designated input node accepting its type.
  pub fn push_data<T, P>(&self, value: T)
  where
    T: Payload,
    Ins: Accepts<T, P>,
  {
    self.push_shared::<T, P>(Arc::new(value));
  }

  /// Broadcasts an already-shared value.
  pub fn push_shared<T, P>(&self, value: Arc<T>)
  where
    T: Payload,
    Ins: Accepts<T, P>,
  {
    let tag = <Ins as Accepts<T, P>>::TAG;
    let payload: SharedPayload = value;
    for endpoint in &self.graph_inputs[tag] {
      endpoint.enqueue_payload(payload.clone());
    }
  }

  /// Retires the external source from every input queue. Safe to call once;
  /// later calls are ignored.
  pub fn finish_pushing_data(&mut self) {
    if self.source_finished {
      return;
    }
    self.source_finished = true;
    debug!(graph = %self.name, "external source finished");
    if self.stats.state() == NodeState::Constructed {
      // Not started yet: the source was never registered, so there is
      // nothing to retire. execute_graph skips the registration instead.
      return;
    }
    for endpoints in &self.graph_inputs {
      for endpoint in endpoints {
        endpoint.sender_terminated();
      }
    }
  }

  /// Pops one result from the output collector, blocking while output nodes
  /// are still live. Returns `None` once every output node terminated and
  /// the collector is drained, or when the graph was never executed.
  pub fn get_blocking_result(&self) -> Option<Arc<O>> {
    let collector = self.collector.as_ref()?;
    let message = collector.dequeue_one(|| None)?;
    match message.downcast::<O>() {
      Some(value) => Some(value),
      None => unreachable!("output collector received a foreign payload"),
    }
  }

  /// Joins every worker thread in the graph, recursively.
  pub fn wait_for_termination(&mut self) {
    self.scheduler.join_all();
    for node in &mut self.nodes {
      node.join();
    }
    if self.collector.is_some() {
      self.collector_stats.set_state(NodeState::Terminated);
    }
    self.stats.set_state(NodeState::Terminated);
    debug!(graph = %self.name, "graph terminated");
  }

  /// Renders the graph topology as a Graphviz digraph.
  ///
  /// Failure to write leaves the graph running; only the export is lost.
  pub fn create_dot_file(
    &self,
    path: impl AsRef<Path>,
    color: ColorScheme,
    structure: StructureOptions,
    debug: DebugOptions,
  ) -> Result<(), GraphError> {
    let mut all_stats = Vec::new();
    for node in &self.nodes {
      node.stats_tree(&mut all_stats);
    }
    let config = DotConfig::new(color, structure, debug, &all_stats);
    let mut writer = DotWriter::new();
    writer.line(format!("digraph \"{}\" {{", self.name));
    let anchors = self.write_dot_body(&mut writer, &config);
    let source = writer.next_id();
    writer.line(format!("{source} [label=\"source\", shape=invhouse];"));
    for anchor in &anchors.inputs {
      writer.line(format!("{source} -> {anchor};"));
    }
    let sink = writer.next_id();
    let sink_label = match &self.collector {
      Some(collector) => format!("sink\\nqueue: {} (max {})", collector.size(), collector.max_size()),
      None => "sink".to_string(),
    };
    writer.line(format!("{sink} [label=\"{sink_label}\", shape=house];"));
    for anchor in &anchors.outputs {
      writer.line(format!("{anchor} -> {sink};"));
    }
    writer.line("}");
    std::fs::write(path, writer.into_string())?;
    Ok(())
  }

  /// Structural copy with fresh queues, wiring and pools; run state is not
  /// carried over. Used by execution pipelines.
  pub(crate) fn duplicate_structure(&self) -> Result<Self, GraphError> {
    let mut nodes = Vec::with_capacity(self.nodes.len());
    for node in &self.nodes {
      nodes.push(node.duplicate()?);
    }
    let mut copy = Self {
      name: self.name.clone(),
      nodes,
      edges: Vec::new(),
      input_nodes: Vec::new(),
      output_nodes: self.output_nodes.clone(),
      graph_inputs: (0..Ins::LEN).map(|_| Vec::new()).collect(),
      collector: None,
      collector_stats: Arc::new(NodeStats::new()),
      scheduler: self.scheduler.fresh(),
      stats: Arc::new(NodeStats::new()),
      device_id: self.device_id,
      graph_id: 0,
      source_finished: false,
      _types: PhantomData,
    };
    for edge in &self.edges {
      copy.wire_edge(edge.from, edge.to, edge.type_id, edge.type_name);
    }
    for position in 0..self.input_nodes.len() {
      copy.wire_input(self.input_nodes[position])?;
    }
    Ok(copy)
  }

  pub(crate) fn set_placement(&mut self, device_id: i32, graph_id: usize) {
    self.device_id = device_id;
    self.graph_id = graph_id;
  }

  /// Delivery endpoints per graph input tag; the switch of an execution
  /// pipeline registers itself as a sender on each.
  pub(crate) fn input_endpoint_table(&self) -> Vec<Vec<Endpoint>> {
    self.graph_inputs.clone()
  }

  fn wire_edge(&mut self, from: usize, to: usize, type_id: TypeId, type_name: &'static str) {
    let endpoints = self.nodes[to].input_endpoints(type_id);
    if endpoints.is_empty() {
      // Reachable only for a nested graph with no designated input node
      // for this carrier type; data sent on the edge would vanish.
      warn!(
        graph = %self.name,
        from = %self.nodes[from].name(),
        to = %self.nodes[to].name(),
        carrier = type_name,
        "edge has no receiving queue"
      );
    }
    for endpoint in endpoints {
      self.nodes[from].subscribe_output(endpoint);
    }
    self.edges.push(EdgeRecord {
      from,
      to,
      type_id,
      type_name,
    });
  }

  fn wire_input(&mut self, index: usize) -> Result<(), GraphError> {
    let node_ids = self.nodes[index].input_type_ids();
    let mut shared_any = false;
    for (tag, type_id) in Ins::type_ids().iter().enumerate() {
      if node_ids.contains(type_id) {
        let endpoints = self.nodes[index].input_endpoints(*type_id);
        self.graph_inputs[tag].extend(endpoints);
        shared_any = true;
      }
    }
    if !shared_any {
      return Err(GraphError::MissingInput {
        node: self.nodes[index].name().to_string(),
        graph: self.name.clone(),
      });
    }
    self.input_nodes.push(index);
    Ok(())
  }

  fn spawn_workers(&mut self, placement: Placement) -> Result<(), GraphError> {
    self.stats.set_state(NodeState::Running);
    let Self {
      scheduler, nodes, ..
    } = self;
    for node in nodes.iter_mut() {
      node.start(scheduler.as_mut(), placement)?;
    }
    Ok(())
  }

  pub(crate) fn write_dot_body(&self, writer: &mut DotWriter, config: &DotConfig) -> DotAnchors {
    let mut per_node = Vec::with_capacity(self.nodes.len());
    for node in &self.nodes {
      per_node.push(node.write_dot(writer, config));
    }
    for edge in &self.edges {
      let width = if self.nodes[edge.from].has_memory_manager() {
        ", penwidth=3"
      } else {
        ""
      };
      for from_anchor in &per_node[edge.from].outputs {
        for to_anchor in &per_node[edge.to].inputs {
          writer.line(format!(
            "{from_anchor} -> {to_anchor} [label=\"{}\"{width}];",
            short_type_name(edge.type_name)
          ));
        }
      }
    }
    DotAnchors {
      inputs: self
        .input_nodes
        .iter()
        .flat_map(|&index| per_node[index].inputs.clone())
        .collect(),
      outputs: self
        .output_nodes
        .iter()
        .flat_map(|&index| per_node[index].outputs.clone())
        .collect(),
    }
  }
}

impl<O: Payload, Ins: InputSet> CoreNode for Graph<O, Ins> {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Graph
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
      Some(tag) => self.graph_inputs[tag].clone(),
      None => Vec::new(),
    }
  }

  fn subscribe_output(&mut self, endpoint: Endpoint) {
    for position in 0..self.output_nodes.len() {
      let index = self.output_nodes[position];
      self.nodes[index].subscribe_output(endpoint.clone());
    }
  }

  fn start(
    &mut self,
    _scheduler: &mut dyn Scheduler,
    placement: Placement,
  ) -> Result<(), GraphError> {
    if self.stats.state() != NodeState::Constructed {
      return Err(GraphError::AlreadyStarted(self.name.clone()));
    }
    // A nested graph runs on its own scheduler and inherits its placement
    // from the enclosing graph or pipeline copy.
    self.device_id = placement.device_id;
    self.graph_id = placement.graph_id;
    self.spawn_workers(placement)
  }

  fn join(&mut self) {
    self.scheduler.join_all();
    for node in &mut self.nodes {
      node.join();
    }
    self.stats.set_state(NodeState::Terminated);
  }

  fn duplicate(&self) -> Result<Box<dyn CoreNode>, GraphError> {
    Ok(Box::new(self.duplicate_structure()?))
  }

  fn stats_tree(&self, out: &mut Vec<Arc<NodeStats>>) {
    out.push(self.stats.clone());
    for node in &self.nodes {
      node.stats_tree(out);
    }
  }

  fn write_dot(&self, writer: &mut DotWriter, config: &DotConfig) -> DotAnchors {
    let cluster = writer.next_cluster();
    writer.line(format!("subgraph {cluster} {{"));
    writer.line(format!("label=\"{}\";", self.name));
    let anchors = self.write_dot_body(writer, config);
    writer.line("}");
    anchors
  }
}

impl<O: Payload, Ins: InputSet> HasOutput for Graph<O, Ins> {
  type Output = O;
}

impl<O: Payload, Ins: InputSet> HasInputs for Graph<O, Ins> {
  type Inputs = Ins;
}
