//! Named-tree registry.
//!
//! The manager owns every loaded tree's executor behind one mutex, so all
//! public methods are safe to call from any thread. Action and condition
//! registrations go into a registry shared by all executors, including
//! trees loaded afterwards.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use reflex_core::Context;

use crate::error::Result;
use crate::executor::{ExecStats, Executor};
use crate::node::{BtActionFn, BtConditionFn, Registry, Status};
use crate::parser;

/// Thread-safe collection of named behavior trees.
#[derive(Default)]
pub struct BtManager {
    trees: Mutex<HashMap<String, Executor>>,
    registry: Arc<RwLock<Registry>>,
}

impl BtManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and install a tree under `name`, replacing any previous tree
    /// with that name. A tree that fails to parse is rejected and the
    /// previous tree (if any) is kept.
    pub fn load_tree(&self, name: &str, json: &serde_json::Value) -> Result<()> {
        let root = parser::parse_tree(json)?;
        let executor = Executor::new(root, self.registry.clone());
        self.trees.lock().unwrap().insert(name.to_string(), executor);
        info!(tree = name, "loaded behavior tree");
        Ok(())
    }

    /// Load a tree document from a file.
    pub fn load_tree_file(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let root = parser::parse_tree_file(path)?;
        let executor = Executor::new(root, self.registry.clone());
        self.trees.lock().unwrap().insert(name.to_string(), executor);
        info!(tree = name, "loaded behavior tree");
        Ok(())
    }

    /// Tick the named tree. An unknown name is reported as `Failure`.
    pub fn execute(&self, name: &str, ctx: &mut Context) -> Status {
        let mut trees = self.trees.lock().unwrap();
        match trees.get_mut(name) {
            Some(executor) => executor.execute(ctx),
            None => {
                warn!(tree = name, "behavior tree not found");
                Status::Failure
            }
        }
    }

    pub fn register_action(&self, name: impl Into<String>, f: BtActionFn) {
        self.registry.write().unwrap().register_action(name, f);
    }

    pub fn register_condition(&self, name: impl Into<String>, f: BtConditionFn) {
        self.registry.write().unwrap().register_condition(name, f);
    }

    pub fn pause(&self, name: &str) {
        self.with_tree(name, Executor::pause);
    }

    pub fn resume(&self, name: &str) {
        self.with_tree(name, Executor::resume);
    }

    pub fn reset(&self, name: &str) {
        self.with_tree(name, Executor::reset);
    }

    pub fn stop(&self, name: &str) {
        self.with_tree(name, Executor::stop);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.trees.lock().unwrap().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.trees.lock().unwrap().clear();
    }

    pub fn has_tree(&self, name: &str) -> bool {
        self.trees.lock().unwrap().contains_key(name)
    }

    pub fn tree_names(&self) -> Vec<String> {
        self.trees.lock().unwrap().keys().cloned().collect()
    }

    /// Last status of the named tree; `Failure` for unknown names.
    pub fn status(&self, name: &str) -> Status {
        self.trees
            .lock()
            .unwrap()
            .get(name)
            .map(Executor::status)
            .unwrap_or(Status::Failure)
    }

    pub fn stats(&self, name: &str) -> Option<ExecStats> {
        self.trees.lock().unwrap().get(name).map(Executor::stats)
    }

    pub fn all_stats(&self) -> HashMap<String, ExecStats> {
        self.trees
            .lock()
            .unwrap()
            .iter()
            .map(|(name, executor)| (name.clone(), executor.stats()))
            .collect()
    }

    /// Serialized form of the named tree, for inspection and persistence.
    pub fn tree_json(&self, name: &str) -> Option<serde_json::Value> {
        self.trees
            .lock()
            .unwrap()
            .get(name)
            .map(|executor| parser::tree_to_json(executor.root()))
    }

    fn with_tree(&self, name: &str, f: impl FnOnce(&mut Executor)) {
        if let Some(executor) = self.trees.lock().unwrap().get_mut(name) {
            f(executor);
        }
    }
}
