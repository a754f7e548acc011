use std::sync::Arc;

use crate::dot::{ColorScheme, DebugOptions, StructureOptions};
use crate::error::GraphError;
use crate::graph::Graph;
use crate::stats::NodeState;
use crate::task::{Execute, Task, TaskContext, TaskLogic};

#[derive(Clone)]
struct Relay;

impl TaskLogic for Relay {
  type Output = i32;
}

impl Execute<i32> for Relay {
  fn execute(&mut self, input: Arc<i32>, ctx: &mut TaskContext<i32>) {
    ctx.add_result(*input);
  }
}

#[derive(Clone)]
struct AddOne;

impl TaskLogic for AddOne {
  type Output = i32;
}

impl Execute<i32> for AddOne {
  fn execute(&mut self, input: Arc<i32>, ctx: &mut TaskContext<i32>) {
    ctx.add_result(*input + 1);
  }
}

#[derive(Clone)]
struct Widen;

impl TaskLogic for Widen {
  type Output = i64;
}

impl Execute<i32> for Widen {
  fn execute(&mut self, input: Arc<i32>, ctx: &mut TaskContext<i64>) {
    ctx.add_result(i64::from(*input));
  }
}

impl Execute<f64> for Widen {
  fn execute(&mut self, input: Arc<f64>, ctx: &mut TaskContext<i64>) {
    ctx.add_result(*input as i64);
  }
}

fn drain(graph: &Graph<i32, (i32,)>) -> Vec<i32> {
  let mut seen = Vec::new();
  while let Some(value) = graph.get_blocking_result() {
    seen.push(*value);
  }
  seen
}

#[test]
fn test_duplicate_node_name_is_rejected() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("dup");
  graph.add_node(Task::<(i32,), _>::new("relay", Relay)).unwrap();
  let error = graph
    .add_node(Task::<(i32,), _>::new("relay", Relay))
    .unwrap_err();
  assert!(matches!(error, GraphError::DuplicateName(name) if name == "relay"));
}

#[test]
fn test_input_without_shared_type_is_rejected() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("mismatch");
  let widen = graph.add_node(Task::<(f64,), _>::new("widen", Widen)).unwrap();
  let error = graph.input(widen).unwrap_err();
  assert!(matches!(error, GraphError::MissingInput { .. }));
}

#[test]
fn test_execute_graph_twice_is_rejected() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("twice");
  let relay = graph.add_node(Task::<(i32,), _>::new("relay", Relay)).unwrap();
  graph.input(relay).unwrap();
  graph.output(relay);
  graph.execute_graph().unwrap();
  assert!(matches!(
    graph.execute_graph(),
    Err(GraphError::AlreadyStarted(_))
  ));
  graph.finish_pushing_data();
  graph.wait_for_termination();
}

#[test]
fn test_result_before_execute_is_none() {
  let graph: Graph<i32, (i32,)> = Graph::new("idle");
  assert!(graph.get_blocking_result().is_none());
}

#[test]
fn test_linear_graph_roundtrip() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("linear");
  let first = graph.add_node(Task::<(i32,), _>::new("first", AddOne)).unwrap();
  let second = graph.add_node(Task::<(i32,), _>::new("second", AddOne)).unwrap();
  graph.add_edge(first, second);
  graph.input(first).unwrap();
  graph.output(second);

  graph.execute_graph().unwrap();
  for i in 0..50 {
    graph.push_data(i);
  }
  graph.finish_pushing_data();
  let mut seen = drain(&graph);
  graph.wait_for_termination();

  seen.sort_unstable();
  assert_eq!(seen, (2..52).collect::<Vec<_>>());
  assert_eq!(graph.state(), NodeState::Terminated);
}

#[test]
fn test_fan_out_broadcasts_to_every_subscriber() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("fanout");
  let source = graph.add_node(Task::<(i32,), _>::new("source", Relay)).unwrap();
  let left = graph.add_node(Task::<(i32,), _>::new("left", Relay)).unwrap();
  let right = graph.add_node(Task::<(i32,), _>::new("right", Relay)).unwrap();
  graph.add_edge(source, left);
  graph.add_edge(source, right);
  graph.input(source).unwrap();
  graph.output(left);
  graph.output(right);

  graph.execute_graph().unwrap();
  for i in 0..20 {
    graph.push_data(i);
  }
  graph.finish_pushing_data();
  let mut seen = drain(&graph);
  graph.wait_for_termination();

  // Every value reaches both subscribers: intentional fan-out, no drops.
  seen.sort_unstable();
  let mut expected: Vec<i32> = (0..20).chain(0..20).collect();
  expected.sort_unstable();
  assert_eq!(seen, expected);
}

#[test]
fn test_per_pair_fifo_is_preserved() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("fifo");
  let first = graph.add_node(Task::<(i32,), _>::new("first", Relay)).unwrap();
  let second = graph.add_node(Task::<(i32,), _>::new("second", Relay)).unwrap();
  graph.add_edge(first, second);
  graph.input(first).unwrap();
  graph.output(second);

  graph.execute_graph().unwrap();
  for i in 0..200 {
    graph.push_data(i);
  }
  graph.finish_pushing_data();
  let seen = drain(&graph);
  graph.wait_for_termination();

  // Single-threaded chain: order must survive end to end.
  assert_eq!(seen, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_multi_input_terminates_per_type() {
  let mut graph: Graph<i64, (i32, f64)> = Graph::new("multi");
  let widen = graph.add_node(Task::<(i32, f64), _>::new("widen", Widen)).unwrap();
  graph.input(widen).unwrap();
  graph.output(widen);

  graph.execute_graph().unwrap();
  for i in 0..10 {
    graph.push_data(i as i32);
    graph.push_data(i as f64);
  }
  graph.finish_pushing_data();

  let mut seen = Vec::new();
  while let Some(value) = graph.get_blocking_result() {
    seen.push(*value);
  }
  graph.wait_for_termination();

  seen.sort_unstable();
  let mut expected: Vec<i64> = (0..10).chain(0..10).collect();
  expected.sort_unstable();
  assert_eq!(seen, expected);
}

#[test]
fn test_nested_graph_wires_through() {
  let mut inner: Graph<i32, (i32,)> = Graph::new("inner");
  let bump = inner.add_node(Task::<(i32,), _>::new("bump", AddOne)).unwrap();
  inner.input(bump).unwrap();
  inner.output(bump);

  let mut outer: Graph<i32, (i32,)> = Graph::new("outer");
  let pre = outer.add_node(Task::<(i32,), _>::new("pre", AddOne)).unwrap();
  let nested = outer.add_node(inner).unwrap();
  let post = outer.add_node(Task::<(i32,), _>::new("post", AddOne)).unwrap();
  outer.add_edge(pre, nested);
  outer.add_edge(nested, post);
  outer.input(pre).unwrap();
  outer.output(post);

  outer.execute_graph().unwrap();
  for i in 0..30 {
    outer.push_data(i);
  }
  outer.finish_pushing_data();
  let mut seen = drain(&outer);
  outer.wait_for_termination();

  seen.sort_unstable();
  assert_eq!(seen, (3..33).collect::<Vec<_>>());
}

#[test]
fn test_received_count_matches_pushed_inputs() {
  let mut graph: Graph<i32, (i32,)> = Graph::new("counted");
  let relay = graph.add_node(Task::<(i32,), _>::new("relay", Relay)).unwrap();
  graph.input(relay).unwrap();
  graph.output(relay);

  graph.execute_graph().unwrap();
  for i in 0..25 {
    graph.push_data(i);
  }
  graph.finish_pushing_data();
  let seen = drain(&graph);
  graph.wait_for_termination();

  assert_eq!(seen.len(), 25);
}

#[test]
fn test_dot_export_renders_topology() {
  let mut inner: Graph<i32, (i32,)> = Graph::new("stage");
  let bump = inner.add_node(Task::<(i32,), _>::new("bump", AddOne)).unwrap();
  inner.input(bump).unwrap();
  inner.output(bump);

  let mut graph: Graph<i32, (i32,)> = Graph::new("exported");
  let relay = graph
    .add_node(Task::<(i32,), _>::new("relay", Relay).with_threads(3))
    .unwrap();
  let nested = graph.add_node(inner).unwrap();
  graph.add_edge(relay, nested);
  graph.input(relay).unwrap();
  graph.output(nested);

  let path = std::env::temp_dir().join(format!("graphweave-dot-{}.dot", std::process::id()));
  graph
    .create_dot_file(
      &path,
      ColorScheme::None,
      StructureOptions::All,
      DebugOptions::None,
    )
    .unwrap();
  let rendered = std::fs::read_to_string(&path).unwrap();
  std::fs::remove_file(&path).ok();

  assert!(rendered.starts_with("digraph \"exported\""));
  assert!(rendered.contains("subgraph cluster_0"));
  assert!(rendered.contains("relay"));
  assert!(rendered.contains("shape=egg"));
  assert!(rendered.contains("->"));
  assert!(rendered.contains("threads: 3"));
}

#[test]
fn test_dot_export_to_missing_directory_fails_softly() {
  let graph: Graph<i32, (i32,)> = Graph::new("nowhere");
  let error = graph
    .create_dot_file(
      "/nonexistent-directory/graph.dot",
      ColorScheme::None,
      StructureOptions::None,
      DebugOptions::None,
    )
    .unwrap_err();
  assert!(matches!(error, GraphError::DotFile(_)));
}
