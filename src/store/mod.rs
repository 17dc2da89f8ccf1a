//! Workflow state store - persistent instances, objects and job queue

mod model;
mod retry;
mod schema;
mod store;

pub use model::{WorkflowInstance, WorkflowObject, WorkflowStatus};
pub use retry::{RetryPolicy, with_retry};
pub use store::{InstanceFilter, StateStore};
