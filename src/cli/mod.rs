//! CLI module for depositflow
//!
//! This module provides:
//! - Command implementations (start, resume, submit, sweep, etc.)
//! - Output handlers (console, JSON, quiet)
//!
//! # Example
//!
//! ```ignore
//! use depositflow::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::resume(&deposits, id, StartPoint::Same, &*handler)?;
//! ```

pub mod commands;
pub mod output;

pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
