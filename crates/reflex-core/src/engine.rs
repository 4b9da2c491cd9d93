//! The rule engine: action registry, config loading and the tick loop.
//!
//! The engine is single-writer: the tick thread owns it. Hosts that mutate
//! rules from other threads must wrap the engine in a mutex held for the
//! duration of each `tick`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::condition::Condition;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::history::HistoryProvider;
use crate::rule::{clamp_priority, ActionStep, Rule, RuleMode, PRIORITY_DEFAULT};
use crate::value::Value;

/// Host-supplied side-effect action. Receives the action's parameter object
/// and the mutable tick context.
pub type ActionFn = Box<dyn Fn(&Value, &mut Context) + Send>;

/// Declarative rule engine over a per-tick sensor context.
pub struct Engine {
    rules: Vec<Rule>,
    actions: HashMap<String, ActionFn>,
    /// Explicit group states; absent groups are enabled.
    groups: HashMap<String, bool>,
    history: Option<Arc<dyn HistoryProvider>>,
    epoch: Instant,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            actions: HashMap::new(),
            groups: HashMap::new(),
            history: None,
            epoch: Instant::now(),
        }
    }

    /// Wire a history provider for the aggregate expression functions.
    pub fn set_history(&mut self, history: Arc<dyn HistoryProvider>) {
        self.history = Some(history);
    }

    /// Register a named action. Re-registering a name replaces the previous
    /// function.
    pub fn register_action(&mut self, name: impl Into<String>, action: ActionFn) {
        self.actions.insert(name.into(), action);
    }

    /// Milliseconds since engine construction, from the monotonic clock.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Replace the rule set from a parsed config document.
    ///
    /// The incoming rules are parsed into a fresh list first; on any parse
    /// error the running rule set and group states are left untouched.
    pub fn load(&mut self, config: &serde_json::Value) -> Result<()> {
        let rules_json = config
            .get("rules")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EngineError::Parse("config is missing a 'rules' array".to_string()))?;

        let mut rules = Vec::with_capacity(rules_json.len());
        for rule_json in rules_json {
            rules.push(parse_rule(rule_json)?);
        }

        let mut seen = std::collections::HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate rule id: {}",
                    rule.id
                )));
            }
        }

        rules.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        info!(rule_count = rules.len(), "loaded rule set");
        self.rules = rules;
        self.groups.clear();
        Ok(())
    }

    /// Evaluate all rules against `ctx` at the current monotonic time.
    pub fn tick(&mut self, ctx: &mut Context) {
        let now_ms = self.now_ms();
        self.tick_at(ctx, now_ms);
    }

    /// Evaluation pass at an explicit monotonic timestamp. Rules fire in
    /// priority order (ties by id); each action invocation is isolated, so
    /// a panicking action does not stop later actions or rules.
    pub fn tick_at(&mut self, ctx: &mut Context, now_ms: u64) {
        let history = self.history.clone();
        for i in 0..self.rules.len() {
            if !self.rules[i].ready_at(now_ms) {
                continue;
            }
            if !self.group_enabled(&self.rules[i].group) {
                continue;
            }
            if !self.rules[i]
                .condition
                .eval_with(ctx, history.as_deref())
            {
                continue;
            }

            debug!(rule = %self.rules[i].id, "rule fired");
            let rule_id = self.rules[i].id.clone();
            let steps = self.rules[i].actions.clone();
            for step in &steps {
                self.run_action(&rule_id, step, ctx);
            }
            self.rules[i].mark_fired(now_ms);
        }
    }

    fn run_action(&self, rule_id: &str, step: &ActionStep, ctx: &mut Context) {
        let Some(action) = self.actions.get(&step.name) else {
            warn!(rule = rule_id, action = %step.name, "unknown action, skipping");
            return;
        };
        let result = catch_unwind(AssertUnwindSafe(|| action(&step.params, ctx)));
        if result.is_err() {
            error!(rule = rule_id, action = %step.name, "action panicked");
        }
    }

    fn group_enabled(&self, group: &str) -> bool {
        group.is_empty() || *self.groups.get(group).unwrap_or(&true)
    }

    pub fn enable_rule(&mut self, rule_id: &str) -> bool {
        self.with_rule(rule_id, |r| r.disabled = false)
    }

    /// Disable a rule. The throttle stamp is preserved, so re-enabling does
    /// not reopen a throttle window that was still closing.
    pub fn disable_rule(&mut self, rule_id: &str) -> bool {
        self.with_rule(rule_id, |r| r.disabled = true)
    }

    pub fn enable_rule_group(&mut self, group: &str) {
        self.groups.insert(group.to_string(), true);
    }

    pub fn disable_rule_group(&mut self, group: &str) {
        self.groups.insert(group.to_string(), false);
    }

    pub fn is_group_enabled(&self, group: &str) -> bool {
        self.group_enabled(group)
    }

    /// Re-prioritize a rule (clamped to the valid range) and re-sort.
    pub fn set_rule_priority(&mut self, rule_id: &str, priority: i64) -> bool {
        let found = self.with_rule(rule_id, |r| r.priority = clamp_priority(priority));
        if found {
            self.rules.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        }
        found
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rules_in_group(&self, group: &str) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.group == group).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
        self.groups.clear();
    }

    fn with_rule(&mut self, rule_id: &str, f: impl FnOnce(&mut Rule)) -> bool {
        match self.rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                f(rule);
                true
            }
            None => false,
        }
    }
}

fn parse_rule(json: &serde_json::Value) -> Result<Rule> {
    let obj = json
        .as_object()
        .ok_or_else(|| EngineError::Parse(format!("rule must be an object, got {json}")))?;

    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::Parse("rule is missing an 'id'".to_string()))?
        .to_string();

    let when = obj
        .get("when")
        .ok_or_else(|| EngineError::Parse(format!("rule {id} is missing 'when'")))?;
    let condition = Condition::from_json(when)
        .map_err(|e| EngineError::Parse(format!("rule {id}: {e}")))?;

    let mut actions = Vec::new();
    if let Some(steps) = obj.get("do").and_then(|v| v.as_array()) {
        for step in steps {
            let name = step
                .get("action")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    EngineError::Parse(format!("rule {id}: action step is missing 'action'"))
                })?;
            let params = step
                .get("params")
                .map(Value::from)
                .unwrap_or_else(|| Value::Object(Default::default()));
            actions.push(ActionStep {
                name: name.to_string(),
                params,
            });
        }
    }

    let mode = match obj.get("mode").and_then(|v| v.as_str()) {
        Some("once") => RuleMode::Once,
        _ => RuleMode::Repeat,
    };

    let throttle_ms = obj
        .get("throttle_ms")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let priority = obj
        .get("priority")
        .and_then(|v| v.as_i64())
        .map(clamp_priority)
        .unwrap_or(PRIORITY_DEFAULT);

    let group = obj
        .get("group")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(Rule {
        id,
        condition,
        actions,
        mode,
        throttle_ms,
        last_fire_ms: 0,
        disabled: false,
        priority,
        group,
    })
}
