//! Behavior-tree node types and tick semantics.
//!
//! Nodes form an owned tree: composites hold child vectors, decorators hold
//! exactly one boxed child, leaves hold the *name* of a registered action or
//! condition. Name resolution happens at tick time against the executor's
//! registry, so trees can be parsed before their callbacks are registered.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use reflex_core::{Context, Value};

/// Per-tick iteration bound for `UntilFail`/`UntilSuccess`. Reaching it
/// yields `Running` so a stuck child cannot livelock the tick thread.
pub const UNTIL_ITERATION_CAP: usize = 1024;

/// Tri-state node result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
    Running,
}

/// Callback types for leaf nodes.
pub type BtActionFn = Arc<dyn Fn(&mut Context) -> Status + Send + Sync>;
pub type BtConditionFn = Arc<dyn Fn(&mut Context) -> bool + Send + Sync>;

/// Name → callback tables shared by every executor of a manager.
#[derive(Default)]
pub struct Registry {
    pub(crate) actions: HashMap<String, BtActionFn>,
    pub(crate) conditions: HashMap<String, BtConditionFn>,
}

impl Registry {
    pub fn register_action(&mut self, name: impl Into<String>, f: BtActionFn) {
        self.actions.insert(name.into(), f);
    }

    pub fn register_condition(&mut self, name: impl Into<String>, f: BtConditionFn) {
        self.conditions.insert(name.into(), f);
    }
}

/// Completion policy for `Parallel` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    SucceedOnOne,
    SucceedOnAll,
    FailOnOne,
    FailOnAll,
}

/// One behavior-tree node.
#[derive(Clone, Serialize, Deserialize)]
pub enum BtNode {
    Action {
        name: String,
        action: String,
        params: Value,
    },
    Condition {
        name: String,
        condition: String,
        params: Value,
    },
    Sequence {
        name: String,
        children: Vec<BtNode>,
    },
    Selector {
        name: String,
        children: Vec<BtNode>,
    },
    Parallel {
        name: String,
        policy: ParallelPolicy,
        children: Vec<BtNode>,
    },
    Inverter {
        name: String,
        child: Box<BtNode>,
    },
    Repeater {
        name: String,
        /// Successes required; -1 repeats forever.
        repeat_count: i64,
        /// Successes so far this run; cleared by `reset`.
        current_count: u64,
        child: Box<BtNode>,
    },
    UntilFail {
        name: String,
        child: Box<BtNode>,
    },
    UntilSuccess {
        name: String,
        child: Box<BtNode>,
    },
}

impl std::fmt::Debug for BtNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

impl BtNode {
    pub fn kind(&self) -> &'static str {
        match self {
            BtNode::Action { .. } => "action",
            BtNode::Condition { .. } => "condition",
            BtNode::Sequence { .. } => "sequence",
            BtNode::Selector { .. } => "selector",
            BtNode::Parallel { .. } => "parallel",
            BtNode::Inverter { .. } => "inverter",
            BtNode::Repeater { .. } => "repeater",
            BtNode::UntilFail { .. } => "until_fail",
            BtNode::UntilSuccess { .. } => "until_success",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BtNode::Action { name, .. }
            | BtNode::Condition { name, .. }
            | BtNode::Sequence { name, .. }
            | BtNode::Selector { name, .. }
            | BtNode::Parallel { name, .. }
            | BtNode::Inverter { name, .. }
            | BtNode::Repeater { name, .. }
            | BtNode::UntilFail { name, .. }
            | BtNode::UntilSuccess { name, .. } => name,
        }
    }

    /// Tick this node once.
    pub fn execute(&mut self, ctx: &mut Context, registry: &Registry) -> Status {
        match self {
            BtNode::Action {
                name,
                action,
                params: _,
            } => match registry.actions.get(action) {
                Some(f) => {
                    let f = f.clone();
                    match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
                        Ok(status) => status,
                        Err(_) => {
                            error!(node = %name, action = %action, "action panicked");
                            Status::Failure
                        }
                    }
                }
                None => {
                    warn!(node = %name, action = %action, "unknown action");
                    Status::Failure
                }
            },
            BtNode::Condition {
                name,
                condition,
                params: _,
            } => match registry.conditions.get(condition) {
                Some(f) => {
                    let f = f.clone();
                    match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
                        Ok(true) => Status::Success,
                        Ok(false) => Status::Failure,
                        Err(_) => {
                            error!(node = %name, condition = %condition, "condition panicked");
                            Status::Failure
                        }
                    }
                }
                None => {
                    warn!(node = %name, condition = %condition, "unknown condition");
                    Status::Failure
                }
            },
            BtNode::Sequence { children, .. } => {
                for child in children {
                    match child.execute(ctx, registry) {
                        Status::Failure => return Status::Failure,
                        Status::Running => return Status::Running,
                        Status::Success => {}
                    }
                }
                Status::Success
            }
            BtNode::Selector { children, .. } => {
                for child in children {
                    match child.execute(ctx, registry) {
                        Status::Success => return Status::Success,
                        Status::Running => return Status::Running,
                        Status::Failure => {}
                    }
                }
                Status::Failure
            }
            BtNode::Parallel {
                policy, children, ..
            } => {
                if children.is_empty() {
                    return Status::Success;
                }
                let mut success = 0usize;
                let mut failure = 0usize;
                let mut running = 0usize;
                for child in children {
                    match child.execute(ctx, registry) {
                        Status::Success => success += 1,
                        Status::Failure => failure += 1,
                        Status::Running => running += 1,
                    }
                }
                match policy {
                    ParallelPolicy::SucceedOnOne | ParallelPolicy::FailOnAll => {
                        if success > 0 {
                            Status::Success
                        } else if running > 0 {
                            Status::Running
                        } else {
                            Status::Failure
                        }
                    }
                    ParallelPolicy::SucceedOnAll | ParallelPolicy::FailOnOne => {
                        if failure > 0 {
                            Status::Failure
                        } else if running > 0 {
                            Status::Running
                        } else {
                            Status::Success
                        }
                    }
                }
            }
            BtNode::Inverter { child, .. } => match child.execute(ctx, registry) {
                Status::Success => Status::Failure,
                Status::Failure => Status::Success,
                Status::Running => Status::Running,
            },
            BtNode::Repeater {
                repeat_count,
                current_count,
                child,
                ..
            } => {
                if *repeat_count < 0 {
                    // Infinite repeat never completes; reset the child after
                    // each success so the next tick starts it over.
                    if child.execute(ctx, registry) == Status::Success {
                        child.reset();
                    }
                    return Status::Running;
                }
                while (*current_count as i64) < *repeat_count {
                    match child.execute(ctx, registry) {
                        Status::Success => {
                            *current_count += 1;
                            child.reset();
                        }
                        Status::Failure => return Status::Failure,
                        Status::Running => return Status::Running,
                    }
                }
                Status::Success
            }
            BtNode::UntilFail { child, .. } => {
                for _ in 0..UNTIL_ITERATION_CAP {
                    match child.execute(ctx, registry) {
                        Status::Failure => return Status::Success,
                        Status::Running => return Status::Running,
                        Status::Success => child.reset(),
                    }
                }
                Status::Running
            }
            BtNode::UntilSuccess { child, .. } => {
                for _ in 0..UNTIL_ITERATION_CAP {
                    match child.execute(ctx, registry) {
                        Status::Success => return Status::Success,
                        Status::Running => return Status::Running,
                        Status::Failure => child.reset(),
                    }
                }
                Status::Running
            }
        }
    }

    /// Recursively clear node state; repeaters forget their success count.
    pub fn reset(&mut self) {
        match self {
            BtNode::Action { .. } | BtNode::Condition { .. } => {}
            BtNode::Sequence { children, .. }
            | BtNode::Selector { children, .. }
            | BtNode::Parallel { children, .. } => {
                for child in children {
                    child.reset();
                }
            }
            BtNode::Inverter { child, .. }
            | BtNode::UntilFail { child, .. }
            | BtNode::UntilSuccess { child, .. } => child.reset(),
            BtNode::Repeater {
                current_count,
                child,
                ..
            } => {
                *current_count = 0;
                child.reset();
            }
        }
    }

    /// Total node count, for tree diagnostics.
    pub fn size(&self) -> usize {
        1 + match self {
            BtNode::Action { .. } | BtNode::Condition { .. } => 0,
            BtNode::Sequence { children, .. }
            | BtNode::Selector { children, .. }
            | BtNode::Parallel { children, .. } => children.iter().map(BtNode::size).sum(),
            BtNode::Inverter { child, .. }
            | BtNode::Repeater { child, .. }
            | BtNode::UntilFail { child, .. }
            | BtNode::UntilSuccess { child, .. } => child.size(),
        }
    }
}
