//! Built-in task units
//!
//! Each task is configured once from a [`TaskConfig`] and then runs against
//! whatever object and instance the engine hands it.

mod authorize;
mod export;
mod form;
mod job;

pub use authorize::Authorize;
pub use export::Export;
pub use form::{RenderForm, WaitForSubmission};
pub use job::SubmitJob;

use crate::config::{TaskConfig, TaskType};
use crate::error::{Result, WorkflowError};
use crate::store::WorkflowObject;
use crate::workflow::{EngineHandle, TaskUnit};
use serde_json::{Map, Value};

/// Build the unit for one configured step, recursing into branches
pub fn build_unit(config: &TaskConfig) -> TaskUnit {
    let name = config.display_name().to_string();
    match config.task_type {
        TaskType::Branch => TaskUnit::Branch(config.steps.iter().map(build_unit).collect()),
        TaskType::Authorize => TaskUnit::leaf(Authorize::new(config.user_id.clone()).with_name(name)),
        TaskType::RenderForm => {
            let form = config.form.clone().unwrap_or_default();
            TaskUnit::leaf(RenderForm::new(form).with_name(name))
        }
        TaskType::WaitForSubmission => TaskUnit::leaf(WaitForSubmission::new().with_name(name)),
        TaskType::Export => {
            let format = config.format.clone().unwrap_or_else(|| "json".to_string());
            TaskUnit::leaf(Export::new(format).with_name(name))
        }
        TaskType::SubmitJob => {
            let job = config.job.clone().unwrap_or_default();
            TaskUnit::leaf(
                SubmitJob::new(job)
                    .attach_export(config.attach_export)
                    .with_name(name),
            )
        }
    }
}

/// Owner recorded on the object by `authorize`, else the instance owner
fn owner_of(obj: &WorkflowObject, eng: &EngineHandle<'_>) -> String {
    obj.get_str("user_id")
        .unwrap_or_else(|| eng.owner_id())
        .to_string()
}

fn extra_object(data: &mut Value) -> Result<&mut Map<String, Value>> {
    data.as_object_mut()
        .ok_or_else(|| WorkflowError::validation("extra data must be a JSON object"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_unit_names_and_branches() {
        let config: TaskConfig = toml::from_str(
            r#"
            type = "branch"
            steps = [
                { type = "render_form", form = "files", name = "upload form" },
                { type = "wait_for_submission" },
                { type = "branch", steps = [{ type = "export" }] },
            ]
            "#,
        )
        .unwrap();

        let TaskUnit::Branch(units) = build_unit(&config) else {
            panic!("expected branch");
        };
        assert_eq!(units.len(), 3);
        match &units[0] {
            TaskUnit::Leaf(task) => assert_eq!(task.name(), "upload form"),
            other => panic!("unexpected unit {other:?}"),
        }
        match &units[1] {
            TaskUnit::Leaf(task) => assert_eq!(task.name(), "wait_for_submission"),
            other => panic!("unexpected unit {other:?}"),
        }
        assert!(matches!(&units[2], TaskUnit::Branch(inner) if inner.len() == 1));
    }
}
