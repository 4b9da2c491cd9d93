//! Rule records and firing bookkeeping.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::value::Value;

/// Inclusive priority bounds; smaller numbers run first.
pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 1000;
pub const PRIORITY_DEFAULT: i32 = 500;

/// Clamp a configured priority into the valid range.
pub fn clamp_priority(priority: i64) -> i32 {
    priority.clamp(PRIORITY_MIN as i64, PRIORITY_MAX as i64) as i32
}

/// Whether a rule keeps firing or disables itself after the first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Once,
    Repeat,
}

/// One named action invocation with its parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub name: String,
    pub params: Value,
}

/// A declarative rule: when the condition holds, run the actions in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub condition: Condition,
    pub actions: Vec<ActionStep>,
    pub mode: RuleMode,
    /// Minimum gap between two fires, in monotonic milliseconds.
    pub throttle_ms: u64,
    /// Monotonic stamp of the last fire; 0 means never fired.
    pub last_fire_ms: u64,
    pub disabled: bool,
    pub priority: i32,
    /// Group tag for bulk enable/disable; empty means ungrouped.
    pub group: String,
}

impl Rule {
    /// Throttle and disable gate. Group state is the engine's concern.
    pub fn ready_at(&self, now_ms: u64) -> bool {
        if self.disabled {
            return false;
        }
        self.last_fire_ms == 0 || now_ms.saturating_sub(self.last_fire_ms) >= self.throttle_ms
    }

    /// Record a successful fire. `last_fire_ms` never moves backwards.
    pub fn mark_fired(&mut self, now_ms: u64) {
        self.last_fire_ms = self.last_fire_ms.max(now_ms);
        if self.mode == RuleMode::Once {
            self.disabled = true;
        }
    }

    /// Sort key: priority first, id lexicographically on ties.
    pub fn sort_key(&self) -> (i32, &str) {
        (self.priority, self.id.as_str())
    }
}
