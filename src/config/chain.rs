//! Chain and task configuration

use serde::{Deserialize, Serialize};

/// Task type - explicit, not inferred
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Record the owning user on the working object
    Authorize,
    /// Stage an unfinished draft for a form
    RenderForm,
    /// Halt until the latest draft is submitted
    WaitForSubmission,
    /// Build the record from all drafts and export it
    Export,
    /// Queue a background job
    SubmitJob,
    /// Nested sequence of tasks
    Branch,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::RenderForm => "render_form",
            Self::WaitForSubmission => "wait_for_submission",
            Self::Export => "export",
            Self::SubmitJob => "submit_job",
            Self::Branch => "branch",
        }
    }
}

/// Configuration for one task unit
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Task type
    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Display name (defaults to the task type)
    pub name: Option<String>,

    /// Fixed owner to record (for authorize tasks)
    pub user_id: Option<String>,

    /// Form to render (for render_form tasks)
    pub form: Option<String>,

    /// Export format: `json` or a configured exporter (for export tasks)
    pub format: Option<String>,

    /// Job name to queue (for submit_job tasks)
    pub job: Option<String>,

    /// Include the exported artifact in the job payload (for submit_job tasks)
    #[serde(default)]
    pub attach_export: bool,

    /// Nested tasks (for branch tasks)
    #[serde(default)]
    pub steps: Vec<TaskConfig>,
}

impl TaskConfig {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            name: None,
            user_id: None,
            form: None,
            format: None,
            job: None,
            attach_export: false,
            steps: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.task_type.as_str())
    }

    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        match self.task_type {
            TaskType::RenderForm => {
                if self.form.is_none() {
                    errors.push(format!("render_form task at {} missing 'form' field", path));
                }
            }
            TaskType::SubmitJob => {
                if self.job.is_none() {
                    errors.push(format!("submit_job task at {} missing 'job' field", path));
                }
            }
            TaskType::Branch => {
                if self.steps.is_empty() {
                    errors.push(format!("branch at {} has no steps", path));
                }
            }
            TaskType::Authorize | TaskType::WaitForSubmission | TaskType::Export => {}
        }

        if self.task_type != TaskType::Branch && !self.steps.is_empty() {
            errors.push(format!(
                "{} task at {} cannot have nested steps",
                self.task_type.as_str(),
                path
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            step.validate_into(&format!("{}.{}", path, i), errors);
        }
    }

    /// Visit this task and every nested task
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TaskConfig)) {
        visit(self);
        for step in &self.steps {
            step.walk(visit);
        }
    }
}

/// Full chain configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Collection exported records are filed under (defaults to the chain name)
    pub collection: Option<String>,

    /// Tasks in this chain
    #[serde(default)]
    pub steps: Vec<TaskConfig>,
}

impl ChainConfig {
    /// Validate the chain configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("chain has no steps".to_string());
        }

        for (i, step) in self.steps.iter().enumerate() {
            step.validate_into(&i.to_string(), &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Every task in the chain, depth first
    pub fn tasks(&self) -> Vec<&TaskConfig> {
        let mut tasks = Vec::new();
        for step in &self.steps {
            step.walk(&mut |task| tasks.push(task));
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_config_render_form() {
        let toml = r#"
            type = "render_form"
            form = "article"
        "#;
        let task: TaskConfig = toml::from_str(toml).unwrap();
        assert_eq!(task.task_type, TaskType::RenderForm);
        assert_eq!(task.form, Some("article".into()));
        assert_eq!(task.display_name(), "render_form");
    }

    #[test]
    fn test_chain_config_with_branch() {
        let toml = r#"
            description = "Deposit an article"
            collection = "ARTICLES"

            [[steps]]
            type = "authorize"

            [[steps]]
            type = "render_form"
            form = "article"

            [[steps]]
            type = "wait_for_submission"

            [[steps]]
            type = "branch"
            name = "files"
            steps = [
                { type = "render_form", form = "files" },
                { type = "wait_for_submission" },
            ]

            [[steps]]
            type = "export"
            format = "marcxml"

            [[steps]]
            type = "submit_job"
            job = "upload"
            attach_export = true
        "#;
        let chain: ChainConfig = toml::from_str(toml).unwrap();
        assert_eq!(chain.steps.len(), 6);
        assert_eq!(chain.steps[3].steps.len(), 2);
        assert_eq!(chain.collection, Some("ARTICLES".into()));
        assert!(chain.steps[5].attach_export);
        assert_eq!(chain.tasks().len(), 8);
        assert!(chain.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = r#"
            type = "export"
            template = "oops"
        "#;
        assert!(toml::from_str::<TaskConfig>(toml).is_err());
    }

    #[test]
    fn test_chain_validation() {
        let mut nested_leaf = TaskConfig::new(TaskType::Authorize);
        nested_leaf.steps.push(TaskConfig::new(TaskType::Export));

        let chain = ChainConfig {
            description: String::new(),
            collection: None,
            steps: vec![
                TaskConfig::new(TaskType::RenderForm),
                TaskConfig::new(TaskType::SubmitJob),
                TaskConfig::new(TaskType::Branch),
                nested_leaf,
            ],
        };

        let errors = chain.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("'form'")));
        assert!(errors.iter().any(|e| e.contains("'job'")));
        assert!(errors.iter().any(|e| e.contains("branch at 2 has no steps")));
        assert!(errors.iter().any(|e| e.contains("cannot have nested steps")));

        assert!(ChainConfig::default().validate().is_err());
    }
}
