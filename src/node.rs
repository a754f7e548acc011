//! # Node Abstraction
//!
//! [`CoreNode`] is the type-erased face of every vertex a graph can own:
//! tasks, state managers, nested graphs and execution pipelines. Graphs store
//! nodes behind this trait in an arena and wire edges through [`Endpoint`]
//! handles, so no reference cycles form between senders and receivers.
//!
//! The typed face of a node lives in [`HasOutput`] / [`HasInputs`], which the
//! build API uses to prove edge compatibility at compile time.

use std::any::TypeId;
use std::sync::Arc;

use crate::dot::{DotAnchors, DotConfig, DotWriter};
use crate::error::GraphError;
use crate::inputs::{InputSet, Payload};
use crate::queue::Endpoint;
use crate::scheduler::Scheduler;
use crate::stats::NodeStats;

/// What kind of vertex a node is; drives scheduling and dot rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
  /// External data entering the root graph.
  Source,
  /// The root graph's output collector.
  Sink,
  /// A compute task, possibly clustered over several threads.
  Task,
  /// A task serializing access to a shared state.
  StateManager,
  /// A nested graph.
  Graph,
  /// A duplicated graph behind a switch.
  ExecutionPipeline,
  /// The routing sub-node of an execution pipeline.
  Switch,
}

/// Placement handed to a node when it starts: which pipeline copy it lives
/// in and which device that copy was assigned. The runtime does not
/// interpret the device id; user hooks read it to bind accelerators.
#[derive(Debug, Clone, Copy, Default)]
pub struct Placement {
  /// Device hint of the enclosing graph copy.
  pub device_id: i32,
  /// Index of the enclosing pipeline copy, 0 outside pipelines.
  pub graph_id: usize,
}

/// Typed view of a node's output side.
pub trait HasOutput {
  /// The single output type this node emits.
  type Output: Payload;
}

/// Typed view of a node's input side.
pub trait HasInputs {
  /// The set of input types this node consumes.
  type Inputs: InputSet;
}

/// Type-erased node owned by a graph.
///
/// Wiring happens before any thread starts: `input_endpoints` exposes where
/// a given carrier type should be delivered, `subscribe_output` registers a
/// downstream endpoint (leaf senders also count themselves as a live sender
/// there). After wiring, `start` spawns the node's workers and `join` waits
/// for nested ones.
pub trait CoreNode: Send {
  /// Node name, unique within its graph.
  fn name(&self) -> &str;

  /// Node kind.
  fn kind(&self) -> NodeKind;

  /// Declared worker count (cluster size).
  fn worker_count(&self) -> usize;

  /// Shared lifecycle state and timing counters.
  fn stats(&self) -> Arc<NodeStats>;

  /// `TypeId`s of the declared input types, in tag order.
  fn input_type_ids(&self) -> Vec<TypeId>;

  /// Names of the declared input types, in tag order.
  fn input_type_names(&self) -> Vec<&'static str>;

  /// Queue endpoints that accept the given carrier type.
  ///
  /// A task returns its own queue; a nested graph returns the endpoints of
  /// its designated input nodes.
  fn input_endpoints(&self, type_id: TypeId) -> Vec<Endpoint>;

  /// Registers a downstream endpoint for this node's output type.
  fn subscribe_output(&mut self, endpoint: Endpoint);

  /// Spawns this node's workers. Non-graph nodes spawn onto `scheduler`;
  /// nested graphs use their own.
  fn start(&mut self, scheduler: &mut dyn Scheduler, placement: Placement)
    -> Result<(), GraphError>;

  /// Joins workers not owned by the caller's scheduler (nested graphs,
  /// pipeline copies). Called after the owning scheduler joined.
  fn join(&mut self);

  /// Structural copy with fresh queues and wiring, used when an execution
  /// pipeline duplicates its inner graph.
  fn duplicate(&self) -> Result<Box<dyn CoreNode>, GraphError>;

  /// True when a memory manager throttles this node's output.
  fn has_memory_manager(&self) -> bool {
    false
  }

  /// Current and maximum input-queue size, for nodes that own a queue.
  fn queue_depth(&self) -> Option<(usize, usize)> {
    None
  }

  /// Collects the stats of this node and everything nested inside it.
  fn stats_tree(&self, out: &mut Vec<Arc<NodeStats>>) {
    out.push(self.stats());
  }

  /// Renders this node into a dot document and reports its edge anchors.
  fn write_dot(&self, writer: &mut DotWriter, config: &DotConfig) -> DotAnchors;
}
