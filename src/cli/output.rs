//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::workflow::RunOutcome;
use serde::Serialize;
use serde_json::Value;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Pick the mode from the global flags; `--json` wins over `--quiet`
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Events emitted by commands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    Run {
        #[serde(flatten)]
        outcome: RunOutcome,
    },
    Instance {
        id: String,
        name: String,
        owner_id: String,
        status: String,
        position: String,
        message: Option<String>,
        modified_at: String,
    },
    Draft {
        workflow_id: String,
        position: String,
        kind: String,
        status: String,
        values: Value,
    },
    DraftCount {
        name: String,
        count: usize,
    },
    Job {
        id: i64,
        workflow_id: String,
        name: String,
        status: String,
    },
    SweepProgress {
        completed: usize,
        total: usize,
        failed: usize,
    },
    Error {
        error: String,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write final result
    fn result(&self, success: bool, output: Option<&str>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn status_mark(status: &str) -> &'static str {
        match status {
            "finished" => "✓",
            "error" => "✗",
            "halted" => "⏸",
            _ => "•",
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::Run { outcome } => {
                let status = outcome.status.as_str();
                eprintln!(
                    "{} {} '{}' {} at {} ({} steps)",
                    Self::status_mark(status),
                    outcome.id,
                    outcome.name,
                    status,
                    outcome.position,
                    outcome.steps_executed
                );
                if let Some(message) = outcome.message {
                    eprintln!("  {}", message);
                }
            }
            OutputEvent::Instance {
                id,
                name,
                owner_id,
                status,
                position,
                message,
                modified_at,
            } => {
                println!(
                    "{} {} {} owner={} {} at {} ({})",
                    Self::status_mark(&status),
                    id,
                    name,
                    owner_id,
                    status,
                    position,
                    modified_at
                );
                if let Some(message) = message {
                    println!("  {}", message);
                }
            }
            OutputEvent::Draft {
                workflow_id,
                position,
                kind,
                status,
                values,
            } => {
                println!("{} [{}] {} ({})", workflow_id, position, kind, status);
                if let Value::Object(values) = values {
                    for (field, value) in values {
                        println!("  {} = {}", field, value);
                    }
                }
            }
            OutputEvent::DraftCount { name, count } => {
                println!("{}: {} unfinished", name, count);
            }
            OutputEvent::Job {
                id,
                workflow_id,
                name,
                status,
            } => {
                println!("#{} {} {} ({})", id, name, workflow_id, status);
            }
            OutputEvent::SweepProgress {
                completed,
                total,
                failed,
            } => {
                eprintln!("[{}/{}] resumed ({} failed)", completed, total, failed);
            }
            OutputEvent::Error { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, _success: bool, output: Option<&str>) {
        if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// JSON output handler, one document per event
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, success: bool, output: Option<&str>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            success: bool,
            output: Option<&'a str>,
        }

        self.print_json(&FinalResult { success, output });
    }
}

/// Quiet handler that emits nothing
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}
    fn result(&self, _success: bool, output: Option<&str>) {
        // Only print final output, nothing else
        if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
