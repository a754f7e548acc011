//! Error types for graph construction and execution.
//!
//! Most misuse is rejected at compile time: an edge whose carrier type is not
//! one of the receiver's declared input types simply does not type-check, and
//! the same holds for declaring a graph output node whose output type differs
//! from the graph's. What remains is reported at construction time through
//! [`GraphError`].

use std::io;
use thiserror::Error;

/// Errors raised while building or driving a graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// Two nodes with the same name were added to one graph.
  #[error("a node named \"{0}\" already exists in this graph")]
  DuplicateName(String),

  /// A node declares the same input type more than once.
  #[error("node \"{node}\" declares input type {type_name} more than once")]
  DuplicateInputType {
    /// Name of the offending node.
    node: String,
    /// The repeated input type.
    type_name: &'static str,
  },

  /// `input` was called with a node that shares no input type with the graph.
  #[error("input node \"{node}\" shares no input type with graph \"{graph}\"")]
  MissingInput {
    /// Name of the offending node.
    node: String,
    /// Name of the graph.
    graph: String,
  },

  /// `execute_graph` was called twice on the same graph.
  #[error("graph \"{0}\" has already been started")]
  AlreadyStarted(String),

  /// An execution pipeline was asked for zero graph duplicates.
  #[error("an execution pipeline needs at least one graph duplicate")]
  EmptyPipeline,

  /// The device-id vector length does not match the duplicate count.
  #[error("expected {expected} device ids, got {got}")]
  DeviceIdCount {
    /// Number of graph duplicates requested.
    expected: usize,
    /// Number of device ids supplied.
    got: usize,
  },

  /// The OS refused to spawn a worker thread.
  #[error("failed to spawn worker thread: {0}")]
  Spawn(io::Error),

  /// Writing the dot file failed; the graph itself keeps running.
  #[error("failed to write dot file: {0}")]
  DotFile(#[from] io::Error),
}
