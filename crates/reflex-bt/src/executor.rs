//! Tick driver for a single behavior tree.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use reflex_core::Context;

use crate::node::{BtNode, Registry, Status};

/// Per-tree execution counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub running_count: u64,
}

impl ExecStats {
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.execution_count as f64
        }
    }
}

/// Drives one tree: ticks the root, tracks statistics and exposes
/// pause/resume control. The callback registry is shared with the owning
/// manager so late registrations reach already-loaded trees.
pub struct Executor {
    root: BtNode,
    registry: Arc<RwLock<Registry>>,
    status: Status,
    running: bool,
    paused: bool,
    stats: ExecStats,
}

impl Executor {
    pub fn new(root: BtNode, registry: Arc<RwLock<Registry>>) -> Self {
        Self {
            root,
            registry,
            status: Status::Failure,
            running: false,
            paused: false,
            stats: ExecStats::default(),
        }
    }

    /// Tick the tree once. While paused the cached status is returned and
    /// neither the tree nor the statistics are touched.
    pub fn execute(&mut self, ctx: &mut Context) -> Status {
        if self.paused {
            return self.status;
        }
        let status = {
            let registry = self.registry.read().unwrap();
            self.root.execute(ctx, &registry)
        };
        self.status = status;
        self.running = status == Status::Running;
        self.stats.execution_count += 1;
        match status {
            Status::Success => self.stats.success_count += 1,
            Status::Failure => self.stats.failure_count += 1,
            Status::Running => self.stats.running_count += 1,
        }
        status
    }

    pub fn reset(&mut self) {
        self.root.reset();
        self.status = Status::Failure;
        self.running = false;
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.status = Status::Failure;
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn stats(&self) -> ExecStats {
        self.stats
    }

    pub fn root(&self) -> &BtNode {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::Value;

    fn executor_with(root: BtNode) -> (Executor, Arc<RwLock<Registry>>) {
        let registry = Arc::new(RwLock::new(Registry::default()));
        (Executor::new(root, registry.clone()), registry)
    }

    fn action_leaf(name: &str) -> BtNode {
        BtNode::Action {
            name: name.to_string(),
            action: name.to_string(),
            params: Value::Object(Default::default()),
        }
    }

    #[test]
    fn stats_accumulate_by_status() {
        let (mut exec, registry) = executor_with(action_leaf("ok"));
        registry
            .write()
            .unwrap()
            .register_action("ok", Arc::new(|_| Status::Success));

        exec.execute(&mut Context::new());
        exec.execute(&mut Context::new());
        let stats = exec.stats();
        assert_eq!(stats.execution_count, 2);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[test]
    fn paused_executor_returns_cached_status() {
        let (mut exec, registry) = executor_with(action_leaf("ok"));
        registry
            .write()
            .unwrap()
            .register_action("ok", Arc::new(|_| Status::Success));

        assert_eq!(exec.execute(&mut Context::new()), Status::Success);
        exec.pause();
        assert_eq!(exec.execute(&mut Context::new()), Status::Success);
        // No new execution was counted.
        assert_eq!(exec.stats().execution_count, 1);
        exec.resume();
        exec.execute(&mut Context::new());
        assert_eq!(exec.stats().execution_count, 2);
    }

    #[test]
    fn registration_after_load_is_visible() {
        let (mut exec, registry) = executor_with(action_leaf("late"));
        assert_eq!(exec.execute(&mut Context::new()), Status::Failure);
        registry
            .write()
            .unwrap()
            .register_action("late", Arc::new(|_| Status::Success));
        assert_eq!(exec.execute(&mut Context::new()), Status::Success);
    }
}
