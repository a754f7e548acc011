//! # Thread Scheduler
//!
//! Each graph owns a [`Scheduler`] that turns node workers into OS threads
//! and joins them at shutdown. The default implementation is a plain
//! one-thread-per-worker spawner; a custom scheduler can be supplied per
//! graph (e.g. to pin threads), and nested graphs each get a fresh instance
//! from [`Scheduler::fresh`].

use std::thread::{Builder, JoinHandle};

use tracing::{debug, error};

use crate::error::GraphError;

/// Spawns and joins a graph's worker threads.
pub trait Scheduler: Send {
  /// Spawns one worker thread.
  fn spawn(
    &mut self,
    name: String,
    worker: Box<dyn FnOnce() + Send + 'static>,
  ) -> Result<(), GraphError>;

  /// Joins every thread spawned so far.
  fn join_all(&mut self);

  /// A new, empty scheduler of the same flavor, for nested graphs and
  /// pipeline duplicates.
  fn fresh(&self) -> Box<dyn Scheduler>;
}

/// One OS thread per worker; no pooling, no work stealing.
#[derive(Default)]
pub struct DefaultScheduler {
  handles: Vec<JoinHandle<()>>,
}

impl DefaultScheduler {
  /// Creates an empty scheduler.
  pub fn new() -> Self {
    Self::default()
  }
}

impl Scheduler for DefaultScheduler {
  fn spawn(
    &mut self,
    name: String,
    worker: Box<dyn FnOnce() + Send + 'static>,
  ) -> Result<(), GraphError> {
    debug!(thread = %name, "spawning worker");
    let handle = Builder::new()
      .name(name)
      .spawn(worker)
      .map_err(GraphError::Spawn)?;
    self.handles.push(handle);
    Ok(())
  }

  fn join_all(&mut self) {
    for handle in self.handles.drain(..) {
      let name = handle.thread().name().unwrap_or("worker").to_string();
      if handle.join().is_err() {
        // A panicking execute kills its worker; downstream nodes that were
        // waiting on it will hang. Surface it loudly.
        error!(thread = %name, "worker thread panicked");
      }
    }
  }

  fn fresh(&self) -> Box<dyn Scheduler> {
    Box::new(DefaultScheduler::new())
  }
}
