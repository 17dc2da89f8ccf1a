//! Form rendering and the submission wait

use super::owner_of;
use crate::draft::{Draft, transforms};
use crate::error::Result;
use crate::store::WorkflowObject;
use crate::workflow::{EngineHandle, Task};
use serde_json::{Map, Value};

pub const WAITING_MESSAGE: &str = "Waiting for form submission.";

/// Stages an unfinished draft of a form.
///
/// The draft is keyed by the position of the following unit, where the
/// submission is awaited. Initial values come from the owner's prefill
/// cache when present (consuming it), otherwise from the form's defaults
/// overlaid with any preingested values for the form's fields.
#[derive(Debug, Clone)]
pub struct RenderForm {
    name: String,
    form: String,
}

impl RenderForm {
    pub fn new(form: impl Into<String>) -> Self {
        Self {
            name: "render_form".to_string(),
            form: form.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn initial_values(&self, eng: &EngineHandle<'_>) -> Result<Map<String, Value>> {
        let definition = eng.services().forms.get(&self.form);
        let mut values = definition
            .map(|form| form.initial_values())
            .unwrap_or_default();

        let staged = eng.extra_data(|data| Ok(transforms::preingested(data, None)))?;
        if let Some(Value::Object(staged)) = staged {
            for (field, value) in staged {
                let known = definition.map_or(true, |form| form.field(&field).is_some());
                if known {
                    values.insert(field, value);
                }
            }
        }

        Ok(values)
    }
}

impl Task for RenderForm {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, obj: &mut WorkflowObject, eng: &mut EngineHandle<'_>) -> Result<()> {
        let key = eng.position().shifted(1);

        let existing = eng.extra_data(|data| transforms::draft_at(data, &key))?;
        if existing.is_some() {
            tracing::debug!(workflow = %eng.id(), position = %key, "Draft already staged");
            return Ok(());
        }

        let owner = owner_of(obj, eng);
        let values = match eng.store().take_prefill(&owner)? {
            Some(cached) => cached,
            None => self.initial_values(eng)?,
        };

        let draft = Draft::new(self.form.clone(), values);
        let inserted = eng.set_extra_data(|data| transforms::add_draft(data, &key, &draft))?;
        if inserted {
            tracing::info!(workflow = %eng.id(), form = %self.form, position = %key, "Rendered form");
        }
        Ok(())
    }
}

/// Halts while its draft is unfinished, otherwise moves on.
///
/// Its draft is the one keyed at its own position; the latest draft stands in
/// when nothing was staged there.
#[derive(Debug, Clone)]
pub struct WaitForSubmission {
    name: String,
}

impl WaitForSubmission {
    pub fn new() -> Self {
        Self {
            name: "wait_for_submission".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for WaitForSubmission {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for WaitForSubmission {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _obj: &mut WorkflowObject, eng: &mut EngineHandle<'_>) -> Result<()> {
        let position = eng.position().clone();
        let draft = eng.extra_data(|data| match transforms::draft_at(data, &position)? {
            Some(draft) => Ok(Some(draft)),
            None => Ok(transforms::latest_draft(data)?.map(|(_, draft)| draft)),
        })?;

        match draft {
            Some(draft) if !draft.is_finished() => {
                eng.halt(WAITING_MESSAGE);
                Ok(())
            }
            _ => eng.jump_forward(1),
        }
    }
}
