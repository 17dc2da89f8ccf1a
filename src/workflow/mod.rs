//! Workflow execution engine for depositflow
//!
//! This module handles:
//! - Positions into nested task chains
//! - Chain navigation (resolve, next, previous, last leaf)
//! - The run loop: checkpoint after every unit, halt, jump, finish, fail
//! - Resuming stopped instances from a chosen start point
//!
//! # Example
//!
//! ```ignore
//! use depositflow::store::StateStore;
//! use depositflow::workflow::{ChainRegistry, StartPoint, WorkflowEngine};
//! use std::sync::Arc;
//!
//! let store = Arc::new(StateStore::open(path)?);
//! let chains = Arc::new(ChainRegistry::from_config(&config.chains)?);
//! let engine = WorkflowEngine::new(store, chains);
//!
//! let outcome = engine.start("article", "42", vec![], None)?;
//! // ... depositor submits the form ...
//! engine.resume(outcome.id, StartPoint::Same)?;
//! ```

mod chain;
mod engine;
mod position;

pub use chain::{ChainRegistry, Task, TaskChain, TaskUnit};
pub use engine::{EngineHandle, EngineServices, RunOutcome, StartPoint, WorkflowEngine};
pub use position::Position;
