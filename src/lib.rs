#![doc = include_str!("../README.md")]

#[cfg(test)]
mod graph_test;

pub mod dot;
pub mod error;
pub mod graph;
pub mod inputs;
pub mod memory;
pub mod message;
pub mod node;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod task;

pub use dot::{ColorScheme, DebugOptions, StructureOptions};
pub use error::GraphError;
pub use graph::{Graph, NodeHandle};
pub use inputs::{Accepts, InputSet, Payload};
pub use memory::{MemoryManager, Pool};
pub use message::TaggedMessage;
pub use node::{CoreNode, HasInputs, HasOutput, NodeKind, Placement};
pub use pipeline::{ExecutionPipeline, SwitchRule, SwitchSet};
pub use queue::InputQueue;
pub use scheduler::{DefaultScheduler, Scheduler};
pub use state::{ReadyList, SharedState, StateAdapter, StateExecute, StateLogic, StateManager};
pub use stats::{NodeState, NodeStats};
pub use task::{DispatchSet, Execute, Task, TaskContext, TaskLogic, WorkerInfo};
