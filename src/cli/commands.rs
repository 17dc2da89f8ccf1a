//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use crate::config::DepositConfig;
use crate::deposit::Deposits;
use crate::error::WorkflowError;
use crate::store::{InstanceFilter, WorkflowInstance, WorkflowStatus};
use crate::workflow::{RunOutcome, StartPoint};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Exit code for a run: halted and finished runs succeed
fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome.status {
        WorkflowStatus::Error => 1,
        _ => 0,
    }
}

fn emit_run(handler: &dyn OutputHandler, outcome: RunOutcome) -> i32 {
    let code = exit_code(&outcome);
    handler.emit(OutputEvent::Run { outcome });
    code
}

/// Task failures are reported, not propagated; the instance keeps the error
fn report_run(handler: &dyn OutputHandler, result: crate::error::Result<RunOutcome>) -> Result<i32> {
    match result {
        Ok(outcome) => Ok(emit_run(handler, outcome)),
        Err(e @ WorkflowError::Task { .. }) => {
            handler.emit(OutputEvent::Error {
                error: e.to_string(),
            });
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

fn instance_event(instance: &WorkflowInstance) -> OutputEvent {
    OutputEvent::Instance {
        id: instance.id.to_string(),
        name: instance.name.clone(),
        owner_id: instance.owner_id.clone(),
        status: instance.status.to_string(),
        position: instance.position.to_key(),
        message: instance.message.clone(),
        modified_at: instance.modified_at.clone(),
    }
}

/// JSON when it parses, a plain string otherwise
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse `field=value` arguments into a value map
pub fn parse_assignments(args: &[String]) -> Result<Map<String, Value>> {
    let mut values = Map::new();
    for arg in args {
        let (field, raw) = arg
            .split_once('=')
            .with_context(|| format!("expected field=value, got '{}'", arg))?;
        values.insert(field.trim().to_string(), parse_value(raw));
    }
    Ok(values)
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid workflow id '{}'", raw))
}

/// Start a new instance, or continue `id` when it already exists
pub fn start(
    deposits: &Deposits,
    chain: &str,
    owner_id: &str,
    objects: &[String],
    id: Option<Uuid>,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let initial = objects
        .iter()
        .map(|raw| serde_json::from_str(raw).with_context(|| format!("object is not JSON: {}", raw)))
        .collect::<Result<Vec<Value>>>()?;

    let result = match id {
        Some(id) => deposits.engine().start(chain, owner_id, initial, Some(id)),
        None => deposits.start(chain, owner_id, initial),
    };
    report_run(handler, result)
}

pub fn resume(
    deposits: &Deposits,
    id: Uuid,
    start: StartPoint,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    report_run(handler, deposits.resume(id, start))
}

/// Show one instance, or list instances matching the filter
pub fn status(
    deposits: &Deposits,
    id: Option<Uuid>,
    filter: &InstanceFilter,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let instances = match id {
        Some(id) => vec![deposits.status(id)?],
        None => deposits.list(filter)?,
    };

    if instances.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no workflows)".into(),
        });
    }
    for instance in &instances {
        handler.emit(instance_event(instance));
    }
    Ok(0)
}

/// Print extra data, a key of it, or the merged record
pub fn show(
    deposits: &Deposits,
    id: Uuid,
    key: Option<&str>,
    record: bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let value = if record {
        Some(Value::Object(deposits.record(id)?))
    } else {
        match key {
            Some(key) => deposits.data(id, key)?,
            None => deposits.extra_data(id, None)?,
        }
    };

    match value {
        Some(value) => {
            let out = serde_json::to_string_pretty(&value)?;
            handler.result(true, Some(&out));
            Ok(0)
        }
        None => {
            handler.emit(OutputEvent::Error {
                error: format!("no value for '{}'", key.unwrap_or_default()),
            });
            Ok(1)
        }
    }
}

/// Submit the latest draft, then resume unless told not to
pub fn submit(
    deposits: &Deposits,
    id: Uuid,
    values: &Map<String, Value>,
    resume: bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    match deposits.submit(id, values) {
        Ok(position) => {
            handler.emit(OutputEvent::Info {
                message: format!("✓ Submitted draft at {}", position.to_key()),
            });
        }
        Err(WorkflowError::Validation { errors }) => {
            handler.emit(OutputEvent::Error {
                error: format!("submission rejected ({} problem(s))", errors.len()),
            });
            for error in errors {
                handler.emit(OutputEvent::Info {
                    message: format!("  - {}", error),
                });
            }
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    }

    if resume {
        report_run(handler, deposits.resume(id, StartPoint::Same))
    } else {
        Ok(0)
    }
}

pub fn set_field(
    deposits: &Deposits,
    id: Uuid,
    field: &str,
    raw: &str,
    append: bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let value = parse_value(raw);
    if append {
        deposits.append_field(id, field, value)?;
    } else {
        deposits.set_field(id, field, value)?;
    }
    handler.emit(OutputEvent::Debug {
        message: format!("updated '{}' on {}", field, id),
    });
    Ok(0)
}

/// Latest drafts of an owner's unfinished instances of `chain`, or the
/// number of unfinished instances per chain when no chain is given
pub fn drafts(
    deposits: &Deposits,
    owner_id: &str,
    chain: Option<&str>,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let Some(chain) = chain else {
        let counts = deposits.draft_counts(owner_id)?;
        if counts.is_empty() {
            handler.emit(OutputEvent::Info {
                message: format!("(no unfinished workflows owned by {})", owner_id),
            });
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        for (name, count) in counts {
            handler.emit(OutputEvent::DraftCount { name, count });
        }
        return Ok(0);
    };

    let drafts = deposits.drafts(owner_id, chain)?;
    if drafts.is_empty() {
        handler.emit(OutputEvent::Info {
            message: format!("(no drafts for '{}' owned by {})", chain, owner_id),
        });
    }
    for (id, position, draft) in drafts {
        handler.emit(OutputEvent::Draft {
            workflow_id: id.to_string(),
            position: position.to_key(),
            kind: draft.kind,
            status: draft.status.to_string(),
            values: Value::Object(draft.values),
        });
    }
    Ok(0)
}

pub fn delete(deposits: &Deposits, id: Uuid, handler: &dyn OutputHandler) -> Result<i32> {
    deposits.delete(id)?;
    handler.emit(OutputEvent::Info {
        message: format!("✓ Deleted workflow {}", id),
    });
    Ok(0)
}

/// List configured chains
pub fn list_chains(config: &DepositConfig, handler: &dyn OutputHandler) -> i32 {
    let mut names: Vec<_> = config.chains.keys().collect();
    names.sort();

    if names.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no chains configured)".into(),
        });
    }
    for name in names {
        let chain = &config.chains[name];
        let mut line = format!("{} ({} tasks)", name, chain.tasks().len());
        if !chain.description.is_empty() {
            line.push_str(&format!(" - {}", chain.description));
        }
        handler.emit(OutputEvent::Info { message: line });
    }
    0
}

/// Validate the loaded configuration
pub fn validate(config: &DepositConfig, handler: &dyn OutputHandler) -> i32 {
    match config.validate() {
        Ok(()) => {
            handler.emit(OutputEvent::Info {
                message: format!(
                    "✓ Configuration is valid ({} chains, {} forms, {} exporters)",
                    config.chains.len(),
                    config.forms.len(),
                    config.exporters.len()
                ),
            });
            0
        }
        Err(errors) => {
            handler.emit(OutputEvent::Info {
                message: format!("✗ Configuration has {} error(s):", errors.len()),
            });
            for err in &errors {
                handler.emit(OutputEvent::Info {
                    message: format!("  - {}", err),
                });
            }
            1
        }
    }
}

pub fn jobs(deposits: &Deposits, id: Option<Uuid>, handler: &dyn OutputHandler) -> Result<i32> {
    for job in deposits.store().jobs(id)? {
        handler.emit(OutputEvent::Job {
            id: job.id,
            workflow_id: job.workflow_id.to_string(),
            name: job.name,
            status: job.status,
        });
    }
    Ok(0)
}

/// Resume every halted instance matching `filter`, at most `max_concurrent`
/// at a time on the blocking pool
pub async fn sweep(
    deposits: Arc<Deposits>,
    filter: InstanceFilter,
    start: StartPoint,
    max_concurrent: usize,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let filter = InstanceFilter {
        status: Some(WorkflowStatus::Halted),
        ..filter
    };
    let instances = deposits.list(&filter)?;
    let total = instances.len();
    if total == 0 {
        handler.emit(OutputEvent::Info {
            message: "(no halted workflows)".into(),
        });
        return Ok(0);
    }

    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = Vec::with_capacity(total);
    for instance in instances {
        let permit = semaphore.clone().acquire_owned().await?;
        let deposits = deposits.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            (instance.id, deposits.resume(instance.id, start))
        }));
    }

    let mut failed = 0;
    for (completed, task) in tasks.into_iter().enumerate() {
        let (id, result) = task.await?;
        match result {
            Ok(outcome) => {
                if outcome.status == WorkflowStatus::Error {
                    failed += 1;
                }
                handler.emit(OutputEvent::Run { outcome });
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(workflow = %id, error = %e, "Resume failed during sweep");
                handler.emit(OutputEvent::Error {
                    error: format!("{}: {}", id, e),
                });
            }
        }
        handler.emit(OutputEvent::SweepProgress {
            completed: completed + 1,
            total,
            failed,
        });
    }

    Ok(if failed == 0 { 0 } else { 1 })
}
