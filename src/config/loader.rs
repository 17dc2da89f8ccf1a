//! Configuration loading with multi-layer merge

use super::{ChainConfig, ExporterConfig, FormConfig, TaskType};
use crate::store::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level depositflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DepositConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Task chains by name
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,

    /// Deposit forms by name
    #[serde(default)]
    pub forms: HashMap<String, FormConfig>,

    /// Template exporters by format name
    #[serde(default)]
    pub exporters: HashMap<String, ExporterConfig>,
}

/// Global default settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Database file; `~` is expanded
    pub database: Option<String>,

    /// How long a writer waits for a locked database, in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: u64,

    /// Task units one run may execute before it is failed
    #[serde(default = "default_max_steps")]
    pub max_steps_per_run: usize,

    /// Max instances resumed at once by `sweep`
    pub max_concurrent: Option<u32>,

    /// Retries for conflicting writes
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_max_steps() -> usize {
    10_000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    50
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            database: None,
            busy_timeout: default_busy_timeout(),
            max_steps_per_run: default_max_steps(),
            max_concurrent: None,
            retries: default_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl DepositConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/depositflow/config.toml, then ~/.config/depositflow/chains/*.toml
    /// 3. .depositflow/config.toml, then .depositflow/chains/*.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_dir) = Self::user_config_dir() {
            config.merge_dir(&user_dir)?;
        }

        let project_dir = project_dir
            .map(|p| p.join(".depositflow"))
            .unwrap_or_else(|| PathBuf::from(".depositflow"));
        config.merge_dir(&project_dir)?;

        Ok(config)
    }

    fn merge_dir(&mut self, dir: &Path) -> Result<()> {
        let config_path = dir.join("config.toml");
        if config_path.exists() {
            let layer = Self::load_file(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            self.merge(layer);
        }

        for (name, chain) in load_chain_dir(&dir.join("chains"))? {
            self.chains.insert(name, chain);
        }

        Ok(())
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config directory (~/.config/depositflow)
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("depositflow"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.defaults.database.is_some() {
            self.defaults.database = other.defaults.database;
        }
        if other.defaults.busy_timeout != default_busy_timeout() {
            self.defaults.busy_timeout = other.defaults.busy_timeout;
        }
        if other.defaults.max_steps_per_run != default_max_steps() {
            self.defaults.max_steps_per_run = other.defaults.max_steps_per_run;
        }
        if other.defaults.max_concurrent.is_some() {
            self.defaults.max_concurrent = other.defaults.max_concurrent;
        }
        if other.defaults.retries != default_retries() {
            self.defaults.retries = other.defaults.retries;
        }
        if other.defaults.retry_delay != default_retry_delay() {
            self.defaults.retry_delay = other.defaults.retry_delay;
        }

        self.chains.extend(other.chains);
        self.forms.extend(other.forms);
        self.exporters.extend(other.exporters);
    }

    /// Resolved database path, defaulting to the user data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match self.defaults.database {
            Some(ref raw) => {
                let expanded = shellexpand::full(raw)
                    .with_context(|| format!("expanding database path '{}'", raw))?;
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => {
                let data_dir = dirs::data_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
                Ok(data_dir.join("depositflow").join("workflows.db"))
            }
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.defaults.busy_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.defaults.retries,
            initial_delay: Duration::from_millis(self.defaults.retry_delay),
            ..Default::default()
        }
    }

    /// Check chains, forms and exporters against each other
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.defaults.max_steps_per_run == 0 {
            errors.push("defaults.max_steps_per_run must be positive".to_string());
        }
        if self.defaults.max_concurrent == Some(0) {
            errors.push("defaults.max_concurrent must be positive".to_string());
        }

        let mut chain_names: Vec<_> = self.chains.keys().collect();
        chain_names.sort();
        for name in chain_names {
            let chain = &self.chains[name];
            if let Err(chain_errors) = chain.validate() {
                errors.extend(chain_errors.into_iter().map(|e| format!("chain '{}': {}", name, e)));
            }

            for task in chain.tasks() {
                match task.task_type {
                    TaskType::RenderForm => {
                        if let Some(ref form) = task.form {
                            if !self.forms.contains_key(form) {
                                errors.push(format!("chain '{}': unknown form '{}'", name, form));
                            }
                        }
                    }
                    TaskType::Export => {
                        if let Some(ref format) = task.format {
                            if format != "json" && !self.exporters.contains_key(format) {
                                errors.push(format!(
                                    "chain '{}': unknown export format '{}'",
                                    name, format
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut form_names: Vec<_> = self.forms.keys().collect();
        form_names.sort();
        for name in form_names {
            if let Err(form_errors) = self.forms[name].validate() {
                errors.extend(form_errors.into_iter().map(|e| format!("form '{}': {}", name, e)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load every `{name}.toml` chain file in a directory
pub fn load_chain_dir(dir: &Path) -> Result<Vec<(String, ChainConfig)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut chains = Vec::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        chains.push((name.to_string(), load_chain_file(&path)?));
    }
    chains.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(chains)
}

fn load_chain_file(path: &Path) -> Result<ChainConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let chain: ChainConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;

    chain.validate().map_err(|errors| {
        anyhow::anyhow!(
            "chain validation failed for {}:\n  {}",
            path.display(),
            errors.join("\n  ")
        )
    })?;

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;
    use std::io::Write;
    use tempfile::TempDir;

    const ARTICLE_CONFIG: &str = r#"
        [defaults]
        database = "/tmp/depositflow-test.db"
        max_steps_per_run = 50

        [chains.article]
        description = "Deposit an article"

        [[chains.article.steps]]
        type = "render_form"
        form = "article"

        [[chains.article.steps]]
        type = "wait_for_submission"

        [[chains.article.steps]]
        type = "export"
        format = "marc"

        [forms.article]
        title = "Article"
        fields = [{ name = "title", required = true }]

        [exporters.marc]
        template = "<record>{{ record.title }}</record>"
    "#;

    #[test]
    fn test_default_config() {
        let config = DepositConfig::default();
        assert!(config.chains.is_empty());
        assert_eq!(config.defaults.busy_timeout, 5000);
        assert_eq!(config.defaults.max_steps_per_run, 10_000);
        assert_eq!(config.retry_policy().max_retries, 3);
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", ARTICLE_CONFIG).unwrap();

        let config = DepositConfig::load_file(&config_path).unwrap();
        assert_eq!(config.defaults.max_steps_per_run, 50);
        assert_eq!(config.chains["article"].steps.len(), 3);
        assert!(config.forms["article"].fields[0].required);
        assert!(config.exporters.contains_key("marc"));
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/depositflow-test.db")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_project_layer_and_chain_dir() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join(".depositflow");
        std::fs::create_dir_all(project.join("chains")).unwrap();
        std::fs::write(project.join("config.toml"), ARTICLE_CONFIG).unwrap();
        std::fs::write(
            project.join("chains/thesis.toml"),
            r#"
            [[steps]]
            type = "authorize"
            "#,
        )
        .unwrap();
        std::fs::write(project.join("chains/notes.txt"), "ignored").unwrap();

        let config = DepositConfig::load(Some(dir.path())).unwrap();
        assert!(config.chains.contains_key("article"));
        assert_eq!(config.chains["thesis"].steps[0].task_type, TaskType::Authorize);
    }

    #[test]
    fn test_invalid_chain_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.toml"), "[[steps]]\ntype = \"branch\"\n").unwrap();

        let err = load_chain_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("chain validation failed"));
    }

    #[test]
    fn test_config_merge() {
        let mut base = DepositConfig::default();
        base.defaults.retries = 5;
        base.chains.insert(
            "article".into(),
            ChainConfig {
                steps: vec![TaskConfig::new(TaskType::Authorize)],
                ..Default::default()
            },
        );

        let mut layer = DepositConfig::default();
        layer.defaults.max_concurrent = Some(4);
        layer.chains.insert(
            "article".into(),
            ChainConfig {
                steps: vec![TaskConfig::new(TaskType::Export), TaskConfig::new(TaskType::Export)],
                ..Default::default()
            },
        );

        base.merge(layer);

        // Defaults left at their built-in value do not reset earlier layers
        assert_eq!(base.defaults.retries, 5);
        assert_eq!(base.defaults.max_concurrent, Some(4));
        assert_eq!(base.chains["article"].steps.len(), 2);
    }

    #[test]
    fn test_cross_reference_validation() {
        let mut config = DepositConfig::default();
        let mut render = TaskConfig::new(TaskType::RenderForm);
        render.form = Some("missing".into());
        let mut export = TaskConfig::new(TaskType::Export);
        export.format = Some("dublin_core".into());
        config.chains.insert(
            "article".into(),
            ChainConfig {
                steps: vec![render, export],
                ..Default::default()
            },
        );
        config.defaults.max_concurrent = Some(0);

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown form 'missing'")));
        assert!(errors.iter().any(|e| e.contains("unknown export format 'dublin_core'")));
        assert!(errors.iter().any(|e| e.contains("max_concurrent")));
    }

    #[test]
    fn test_database_path_expands_home() {
        let mut config = DepositConfig::default();
        config.defaults.database = Some("~/deposits/workflows.db".into());
        let path = config.database_path().unwrap();
        assert!(path.ends_with("deposits/workflows.db"));

        config.defaults.database = None;
        assert!(config.database_path().unwrap().ends_with("depositflow/workflows.db"));
    }
}
