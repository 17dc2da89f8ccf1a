//! Configuration types and loading for depositflow

mod chain;
mod form;
mod loader;

pub use chain::{ChainConfig, TaskConfig, TaskType};
pub use form::{ExporterConfig, FieldConfig, FormConfig};
pub use loader::{DepositConfig, Defaults, load_chain_dir};
