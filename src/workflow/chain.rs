//! Task chains and their navigation

use super::engine::EngineHandle;
use super::position::Position;
use crate::config::ChainConfig;
use crate::error::{Result, WorkflowError};
use crate::store::WorkflowObject;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One executable step of a chain.
///
/// Tasks are value objects: configuration is captured at construction and
/// everything that varies per run arrives through the object and the
/// engine handle. A task that halts is re-executed on resume, so halting
/// tasks must be safe to run twice.
pub trait Task: Send + Sync {
    /// Name used in logs and error reports
    fn name(&self) -> &str;

    fn run(&self, obj: &mut WorkflowObject, eng: &mut EngineHandle<'_>) -> Result<()>;
}

/// Leaf task or nested sequence
#[derive(Clone)]
pub enum TaskUnit {
    Leaf(Arc<dyn Task>),
    Branch(Vec<TaskUnit>),
}

impl TaskUnit {
    pub fn leaf(task: impl Task + 'static) -> Self {
        Self::Leaf(Arc::new(task))
    }
}

impl fmt::Debug for TaskUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(task) => write!(f, "Leaf({})", task.name()),
            Self::Branch(units) => f.debug_tuple("Branch").field(units).finish(),
        }
    }
}

/// First leaf at or after `indices` within `units`, skipping exhausted and
/// empty branches
fn resolve_in<'a>(
    units: &'a [TaskUnit],
    indices: &[usize],
    prefix: &mut Vec<usize>,
) -> Option<&'a Arc<dyn Task>> {
    let first = indices.first().copied().unwrap_or(0);

    for (i, unit) in units.iter().enumerate().skip(first) {
        let rest = if i == first && !indices.is_empty() {
            &indices[1..]
        } else {
            &[][..]
        };

        prefix.push(i);
        match unit {
            // A position nested under a leaf sorts after it
            TaskUnit::Leaf(task) if rest.is_empty() => return Some(task),
            TaskUnit::Leaf(_) => {}
            TaskUnit::Branch(children) => {
                if let Some(task) = resolve_in(children, rest, prefix) {
                    return Some(task);
                }
            }
        }
        prefix.pop();
    }

    None
}

fn collect_leaves(units: &[TaskUnit], prefix: &mut Vec<usize>, out: &mut Vec<Position>) {
    for (i, unit) in units.iter().enumerate() {
        prefix.push(i);
        match unit {
            TaskUnit::Leaf(_) => out.push(Position::new(prefix.clone())),
            TaskUnit::Branch(children) => collect_leaves(children, prefix, out),
        }
        prefix.pop();
    }
}

/// A named, ordered and possibly nested sequence of task units
#[derive(Debug, Clone)]
pub struct TaskChain {
    name: String,
    collection: Option<String>,
    units: Vec<TaskUnit>,
}

impl TaskChain {
    pub fn new(name: impl Into<String>, units: Vec<TaskUnit>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            units,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Build from configuration, constructing one task per leaf
    pub fn from_config(name: &str, config: &ChainConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| WorkflowError::Validation {
                errors: errors
                    .into_iter()
                    .map(|e| format!("chain '{}': {}", name, e))
                    .collect(),
            })?;

        let units = config.steps.iter().map(crate::tasks::build_unit).collect();
        let mut chain = Self::new(name, units);
        chain.collection = config.collection.clone();
        Ok(chain)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection records of this chain are filed under
    pub fn collection(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    pub fn units(&self) -> &[TaskUnit] {
        &self.units
    }

    /// Normalize `position` to the next executable leaf at or after it.
    ///
    /// Positions past the end of a branch pop out to the parent's next
    /// sibling. `None` means the chain is exhausted.
    pub fn resolve(&self, position: &Position) -> Option<Position> {
        let mut prefix = Vec::new();
        resolve_in(&self.units, position.indices(), &mut prefix).map(|_| Position::new(prefix))
    }

    /// Like [`resolve`](Self::resolve), together with the leaf found there
    pub fn resolve_task(&self, position: &Position) -> Option<(Position, Arc<dyn Task>)> {
        let mut prefix = Vec::new();
        let task = resolve_in(&self.units, position.indices(), &mut prefix)?;
        Some((Position::new(prefix), task.clone()))
    }

    pub fn first_leaf(&self) -> Option<Position> {
        self.resolve(&Position::start())
    }

    /// Leaf executed after the one at `position`
    pub fn next_leaf(&self, position: &Position) -> Option<Position> {
        self.resolve(&position.shifted(1))
    }

    /// Last leaf strictly before `position`
    pub fn prev_leaf(&self, position: &Position) -> Option<Position> {
        self.leaves().into_iter().take_while(|p| p < position).last()
    }

    /// Last leaf, descending into trailing branches
    pub fn last_leaf(&self) -> Option<Position> {
        self.leaves().pop()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// Every leaf position in execution order
    pub fn leaves(&self) -> Vec<Position> {
        let mut out = Vec::new();
        collect_leaves(&self.units, &mut Vec::new(), &mut out);
        out
    }

    /// Task at an exact leaf position
    pub fn task_at(&self, position: &Position) -> Option<&Arc<dyn Task>> {
        let (last, parents) = position.indices().split_last()?;
        let mut units = &self.units;
        for &i in parents {
            match units.get(i)? {
                TaskUnit::Branch(children) => units = children,
                TaskUnit::Leaf(_) => return None,
            }
        }
        match units.get(*last)? {
            TaskUnit::Leaf(task) => Some(task),
            TaskUnit::Branch(_) => None,
        }
    }
}

/// Chains by name, built once at startup
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<String, Arc<TaskChain>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(chains: &HashMap<String, ChainConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in chains {
            registry.register(TaskChain::from_config(name, config)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, chain: TaskChain) {
        tracing::debug!(chain = chain.name(), leaves = chain.leaf_count(), "Registered chain");
        self.chains.insert(chain.name.clone(), Arc::new(chain));
    }

    pub fn get(&self, name: &str) -> Result<Arc<TaskChain>> {
        self.chains
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownChain {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.chains.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl Task for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, _obj: &mut WorkflowObject, _eng: &mut EngineHandle<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn leaf(name: &'static str) -> TaskUnit {
        TaskUnit::leaf(Noop(name))
    }

    fn pos(indices: &[usize]) -> Position {
        Position::new(indices.to_vec())
    }

    /// a, [b, [c], []], [], d
    fn nested() -> TaskChain {
        TaskChain::new(
            "nested",
            vec![
                leaf("a"),
                TaskUnit::Branch(vec![
                    leaf("b"),
                    TaskUnit::Branch(vec![leaf("c")]),
                    TaskUnit::Branch(vec![]),
                ]),
                TaskUnit::Branch(vec![]),
                leaf("d"),
            ],
        )
    }

    #[test]
    fn test_leaves_in_order() {
        let chain = nested();
        assert_eq!(
            chain.leaves(),
            vec![pos(&[0]), pos(&[1, 0]), pos(&[1, 1, 0]), pos(&[3])]
        );
        assert_eq!(chain.leaf_count(), 4);
        assert_eq!(chain.first_leaf(), Some(pos(&[0])));
        assert_eq!(chain.last_leaf(), Some(pos(&[3])));
    }

    #[test]
    fn test_resolve_descends_and_pops() {
        let chain = nested();
        assert_eq!(chain.resolve(&pos(&[1])), Some(pos(&[1, 0])));
        assert_eq!(chain.resolve(&pos(&[1, 1])), Some(pos(&[1, 1, 0])));
        assert_eq!(chain.resolve(&pos(&[1, 1, 1])), Some(pos(&[3])));
        assert_eq!(chain.resolve(&pos(&[1, 2])), Some(pos(&[3])));
        assert_eq!(chain.resolve(&pos(&[2])), Some(pos(&[3])));
        assert_eq!(chain.resolve(&pos(&[4])), None);
        // Position nested under a leaf sorts after that leaf
        assert_eq!(chain.resolve(&pos(&[0, 5])), Some(pos(&[1, 0])));
    }

    #[test]
    fn test_next_and_prev() {
        let chain = nested();
        assert_eq!(chain.next_leaf(&pos(&[0])), Some(pos(&[1, 0])));
        assert_eq!(chain.next_leaf(&pos(&[1, 1, 0])), Some(pos(&[3])));
        assert_eq!(chain.next_leaf(&pos(&[3])), None);

        assert_eq!(chain.prev_leaf(&pos(&[3])), Some(pos(&[1, 1, 0])));
        assert_eq!(chain.prev_leaf(&pos(&[1, 0])), Some(pos(&[0])));
        assert_eq!(chain.prev_leaf(&pos(&[0])), None);
    }

    #[test]
    fn test_last_leaf_descends_into_trailing_branch() {
        let chain = TaskChain::new(
            "tail",
            vec![leaf("a"), TaskUnit::Branch(vec![leaf("b"), TaskUnit::Branch(vec![leaf("c")])])],
        );
        assert_eq!(chain.last_leaf(), Some(pos(&[1, 1, 0])));
    }

    #[test]
    fn test_resolve_task_pairs_position_with_leaf() {
        let chain = nested();
        let (position, task) = chain.resolve_task(&pos(&[1, 2])).unwrap();
        assert_eq!(position, pos(&[3]));
        assert_eq!(task.name(), "d");

        let (position, task) = chain.resolve_task(&pos(&[1, 1])).unwrap();
        assert_eq!(position, pos(&[1, 1, 0]));
        assert_eq!(task.name(), "c");

        assert!(chain.resolve_task(&pos(&[4])).is_none());
    }

    #[test]
    fn test_task_at() {
        let chain = nested();
        assert_eq!(chain.task_at(&pos(&[1, 1, 0])).unwrap().name(), "c");
        assert!(chain.task_at(&pos(&[1])).is_none());
        assert!(chain.task_at(&pos(&[9])).is_none());
        assert!(chain.task_at(&Position::new(vec![])).is_none());
    }

    #[test]
    fn test_empty_chain() {
        let chain = TaskChain::new("empty", vec![]);
        assert_eq!(chain.first_leaf(), None);
        assert_eq!(chain.last_leaf(), None);
        assert_eq!(chain.collection(), "empty");
    }

    #[test]
    fn test_registry() {
        let mut registry = ChainRegistry::new();
        registry.register(TaskChain::new("article", vec![leaf("a")]).with_collection("ARTICLES"));

        assert_eq!(registry.get("article").unwrap().collection(), "ARTICLES");
        assert!(matches!(
            registry.get("thesis"),
            Err(WorkflowError::UnknownChain { .. })
        ));
        assert_eq!(registry.names(), vec!["article"]);
    }

    #[test]
    fn test_registry_from_config() {
        let config: ChainConfig = toml::from_str(
            r#"
            [[steps]]
            type = "authorize"

            [[steps]]
            type = "branch"
            steps = [{ type = "render_form", form = "files" }, { type = "wait_for_submission" }]
            "#,
        )
        .unwrap();
        let mut chains = HashMap::new();
        chains.insert("article".to_string(), config);

        let registry = ChainRegistry::from_config(&chains).unwrap();
        let chain = registry.get("article").unwrap();
        assert_eq!(chain.leaf_count(), 3);
        assert_eq!(chain.task_at(&pos(&[1, 0])).unwrap().name(), "render_form");

        chains.insert("broken".to_string(), ChainConfig::default());
        assert!(ChainRegistry::from_config(&chains).is_err());
    }
}
