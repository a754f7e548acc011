//! # Dot Export
//!
//! `Graph::create_dot_file` renders the node/edge model as a Graphviz
//! digraph: one subgraph cluster per nested graph, an egg-shaped node per
//! task cluster, a triangle per execution-pipeline switch, queue-size labels
//! and timing-based fill colors on demand. Edges leaving a memory-managed
//! task are drawn thicker.
//!
//! Only the topology is normative; label and attribute strings are chosen
//! for readability.

use std::sync::Arc;

use crate::stats::NodeStats;

/// Node fill based on per-node timing counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorScheme {
  /// No fill.
  #[default]
  None,
  /// Fill nodes by their share of the heaviest execution time.
  Execution,
  /// Fill nodes by their share of the heaviest wait time.
  Wait,
}

/// How much queue/threading structure to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructureOptions {
  /// Topology only.
  #[default]
  None,
  /// Show queue sizes and watermarks.
  Queue,
  /// Show cluster thread counts.
  AllThreading,
  /// Show both.
  All,
}

/// Whether to render node identities for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugOptions {
  /// No debug metadata.
  #[default]
  None,
  /// Include identity addresses.
  All,
}

/// Resolved rendering options plus the timing baselines for color scaling.
pub struct DotConfig {
  pub(crate) color: ColorScheme,
  pub(crate) structure: StructureOptions,
  pub(crate) debug: DebugOptions,
  max_execution_ns: u128,
  max_wait_ns: u128,
}

impl DotConfig {
  pub(crate) fn new(
    color: ColorScheme,
    structure: StructureOptions,
    debug: DebugOptions,
    all_stats: &[Arc<NodeStats>],
  ) -> Self {
    let max_execution_ns = all_stats
      .iter()
      .map(|stats| stats.executed().as_nanos())
      .max()
      .unwrap_or(0);
    let max_wait_ns = all_stats
      .iter()
      .map(|stats| stats.waited().as_nanos())
      .max()
      .unwrap_or(0);
    Self {
      color,
      structure,
      debug,
      max_execution_ns,
      max_wait_ns,
    }
  }

  pub(crate) fn debug_identities(&self) -> bool {
    self.debug == DebugOptions::All
  }

  /// Fill attribute for a node, scaled against the hottest node seen.
  pub(crate) fn fill_for(&self, stats: &Arc<NodeStats>) -> String {
    let (value, max) = match self.color {
      ColorScheme::None => return String::new(),
      ColorScheme::Execution => (stats.executed().as_nanos(), self.max_execution_ns),
      ColorScheme::Wait => (stats.waited().as_nanos(), self.max_wait_ns),
    };
    if max == 0 {
      return String::new();
    }
    let ratio = (value as f64 / max as f64).clamp(0.0, 1.0);
    let cool = (220.0 - ratio * 180.0) as u8;
    format!(", style=filled, fillcolor=\"#ff{cool:02x}{cool:02x}\"")
  }
}

/// Accumulates dot source and hands out unique node/cluster identifiers.
pub struct DotWriter {
  buffer: String,
  next_node: usize,
  next_cluster: usize,
}

impl DotWriter {
  pub(crate) fn new() -> Self {
    Self {
      buffer: String::new(),
      next_node: 0,
      next_cluster: 0,
    }
  }

  /// A fresh node identifier.
  pub fn next_id(&mut self) -> String {
    let id = format!("n{}", self.next_node);
    self.next_node += 1;
    id
  }

  /// A fresh `cluster_*` identifier (Graphviz treats the prefix specially).
  pub fn next_cluster(&mut self) -> String {
    let id = format!("cluster_{}", self.next_cluster);
    self.next_cluster += 1;
    id
  }

  /// Appends one line of dot source.
  pub fn line(&mut self, text: impl AsRef<str>) {
    self.buffer.push_str(text.as_ref());
    self.buffer.push('\n');
  }

  pub(crate) fn into_string(self) -> String {
    self.buffer
  }
}

/// Edge anchors a node exposes to its enclosing graph: where arrows end
/// (`inputs`) and where they leave (`outputs`).
pub struct DotAnchors {
  /// Identifiers that incoming edges point at.
  pub inputs: Vec<String>,
  /// Identifiers that outgoing edges start from.
  pub outputs: Vec<String>,
}

/// Trims module paths off a type name for edge labels.
pub(crate) fn short_type_name(full: &str) -> String {
  // Generic arguments keep their own paths; good enough for labels.
  match full.split('<').next() {
    Some(head) => {
      let tail = head.rsplit("::").next().unwrap_or(head);
      let rest = &full[head.len()..];
      format!("{tail}{rest}")
    }
    None => full.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_short_type_name() {
    assert_eq!(short_type_name("i32"), "i32");
    assert_eq!(short_type_name("alloc::string::String"), "String");
    assert_eq!(
      short_type_name("alloc::vec::Vec<core::primitive::u8>"),
      "Vec<core::primitive::u8>"
    );
  }

  #[test]
  fn test_writer_hands_out_unique_ids() {
    let mut writer = DotWriter::new();
    assert_eq!(writer.next_id(), "n0");
    assert_eq!(writer.next_id(), "n1");
    assert_eq!(writer.next_cluster(), "cluster_0");
    assert_eq!(writer.next_cluster(), "cluster_1");
  }

  #[test]
  fn test_fill_is_empty_without_scheme() {
    let stats = Arc::new(NodeStats::new());
    let config = DotConfig::new(
      ColorScheme::None,
      StructureOptions::None,
      DebugOptions::None,
      &[stats.clone()],
    );
    assert_eq!(config.fill_for(&stats), "");
  }

  #[test]
  fn test_hottest_node_gets_the_strongest_fill() {
    let hot = Arc::new(NodeStats::new());
    let cold = Arc::new(NodeStats::new());
    hot.add_executed(Duration::from_millis(100));
    cold.add_executed(Duration::from_millis(1));
    let config = DotConfig::new(
      ColorScheme::Execution,
      StructureOptions::None,
      DebugOptions::None,
      &[hot.clone(), cold.clone()],
    );
    assert_eq!(config.fill_for(&hot), ", style=filled, fillcolor=\"#ff2828\"");
    assert!(config.fill_for(&cold).contains("fillcolor"));
  }
}
