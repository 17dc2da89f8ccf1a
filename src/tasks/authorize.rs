use crate::error::Result;
use crate::store::WorkflowObject;
use crate::workflow::{EngineHandle, Task};

/// Records who owns the deposit on the working object
#[derive(Debug, Clone)]
pub struct Authorize {
    name: String,
    user_id: Option<String>,
}

impl Authorize {
    /// `user_id` overrides the instance owner
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            name: "authorize".to_string(),
            user_id,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Task for Authorize {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, obj: &mut WorkflowObject, eng: &mut EngineHandle<'_>) -> Result<()> {
        let user_id = self
            .user_id
            .clone()
            .unwrap_or_else(|| eng.owner_id().to_string());
        tracing::debug!(workflow = %eng.id(), user = %user_id, "Authorized depositor");
        obj.set("user_id", user_id);
        Ok(())
    }
}
