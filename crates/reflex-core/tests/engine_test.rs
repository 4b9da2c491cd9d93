//! End-to-end rule engine scenarios.
//!
//! Exercises firing, throttling, priority ordering and group gating through
//! the public API with an injected monotonic clock.

use std::sync::{Arc, Mutex};

use reflex_core::{Context, Engine, Value};

/// Shared log of `(action, params)` invocations, for asserting order.
type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

fn recording_engine(log: CallLog, actions: &[&str]) -> Engine {
    let mut engine = Engine::new();
    for name in actions {
        let log = log.clone();
        let name = name.to_string();
        engine.register_action(
            name.clone(),
            Box::new(move |params, _ctx| {
                log.lock().unwrap().push((name.clone(), params.clone()));
            }),
        );
    }
    engine
}

#[test]
fn simple_condition_fires_with_params() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["fan_on"]);
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "r1",
            "when": {"left": "t", "op": ">", "right": 40},
            "do": [{"action": "fan_on", "params": {"level": 2}}],
            "mode": "repeat",
            "throttle_ms": 0,
            "priority": 500,
        }]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("t", 45);
    engine.tick_at(&mut ctx, 100);

    let calls = log.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "fan_on");
    assert_eq!(calls[0].1.get("level"), Value::Int(2));
}

#[test]
fn unsatisfied_condition_does_not_fire() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["fan_on"]);
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "r1",
            "when": {"left": "t", "op": ">", "right": 40},
            "do": [{"action": "fan_on"}],
        }]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("t", 35);
    engine.tick_at(&mut ctx, 100);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn throttle_suppresses_second_fire_within_window() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["act"]);
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "r1",
            "when": {"left": "t", "op": ">", "right": 40},
            "do": [{"action": "act"}],
            "throttle_ms": 1000,
        }]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("t", 45);
    engine.tick_at(&mut ctx, 100);
    engine.tick_at(&mut ctx, 800);
    assert_eq!(log.lock().unwrap().len(), 1);

    // Once the window elapses the rule fires again.
    engine.tick_at(&mut ctx, 1100);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn rules_fire_in_priority_order() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["a", "b", "c"]);
    engine
        .load(&serde_json::json!({"rules": [
            {"id": "r_a", "priority": 300, "when": {"left": "go", "op": "==", "right": true},
             "do": [{"action": "a"}]},
            {"id": "r_b", "priority": 100, "when": {"left": "go", "op": "==", "right": true},
             "do": [{"action": "b"}]},
            {"id": "r_c", "priority": 200, "when": {"left": "go", "op": "==", "right": true},
             "do": [{"action": "c"}]},
        ]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("go", true);
    engine.tick_at(&mut ctx, 10);

    let order: Vec<String> = log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(order, vec!["b", "c", "a"]);
}

#[test]
fn priority_ties_break_by_id() {
    let mut engine = Engine::new();
    engine
        .load(&serde_json::json!({"rules": [
            {"id": "zeta", "priority": 100, "when": {"left": "x", "op": ">", "right": 0}},
            {"id": "alpha", "priority": 100, "when": {"left": "x", "op": ">", "right": 0}},
            {"id": "mid", "priority": 50, "when": {"left": "x", "op": ">", "right": 0}},
        ]}))
        .unwrap();

    let ids: Vec<&str> = engine.rules().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["mid", "alpha", "zeta"]);
}

#[test]
fn group_disable_suppresses_and_enable_restores() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["stop_a", "stop_b"]);
    engine
        .load(&serde_json::json!({"rules": [
            {"id": "g1", "group": "safety", "when": {"left": "alarm", "op": "==", "right": true},
             "do": [{"action": "stop_a"}]},
            {"id": "g2", "group": "safety", "when": {"left": "alarm", "op": "==", "right": true},
             "do": [{"action": "stop_b"}]},
        ]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("alarm", true);

    engine.disable_rule_group("safety");
    engine.tick_at(&mut ctx, 10);
    assert!(log.lock().unwrap().is_empty());

    engine.enable_rule_group("safety");
    engine.tick_at(&mut ctx, 20);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn unknown_group_is_enabled() {
    let mut engine = Engine::new();
    assert!(engine.is_group_enabled("never-mentioned"));
}

#[test]
fn once_rule_fires_a_single_time() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["act"]);
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "r1",
            "mode": "once",
            "when": {"left": "t", "op": ">", "right": 0},
            "do": [{"action": "act"}],
        }]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("t", 1);
    engine.tick_at(&mut ctx, 10);
    engine.tick_at(&mut ctx, 20);
    assert_eq!(log.lock().unwrap().len(), 1);
    assert!(engine.rule("r1").unwrap().disabled);
}

#[test]
fn reenabled_rule_keeps_throttle_stamp() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["act"]);
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "r1",
            "when": {"left": "t", "op": ">", "right": 0},
            "do": [{"action": "act"}],
            "throttle_ms": 1000,
        }]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("t", 1);
    engine.tick_at(&mut ctx, 100);
    engine.disable_rule("r1");
    engine.enable_rule("r1");
    // Still inside the throttle window opened at t=100.
    engine.tick_at(&mut ctx, 500);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn reload_resets_ordering_and_fire_stamps() {
    let cfg = serde_json::json!({"rules": [
        {"id": "b", "priority": 200, "when": {"left": "x", "op": ">", "right": 0}},
        {"id": "a", "priority": 100, "when": {"left": "x", "op": ">", "right": 0}},
    ]});

    let mut engine = Engine::new();
    engine.load(&cfg).unwrap();
    let mut ctx = Context::new();
    ctx.set("x", 1);
    engine.tick_at(&mut ctx, 50);
    assert!(engine.rules().iter().all(|r| r.last_fire_ms == 50));

    engine.load(&cfg).unwrap();
    let ids: Vec<&str> = engine.rules().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(engine.rules().iter().all(|r| r.last_fire_ms == 0));
}

#[test]
fn set_priority_resorts() {
    let mut engine = Engine::new();
    engine
        .load(&serde_json::json!({"rules": [
            {"id": "a", "priority": 100, "when": {"left": "x", "op": ">", "right": 0}},
            {"id": "b", "priority": 200, "when": {"left": "x", "op": ">", "right": 0}},
        ]}))
        .unwrap();

    assert!(engine.set_rule_priority("b", 10));
    let ids: Vec<&str> = engine.rules().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);

    // Out-of-range priorities clamp.
    assert!(engine.set_rule_priority("a", 99_999));
    assert_eq!(engine.rule("a").unwrap().priority, 1000);
    assert!(!engine.set_rule_priority("missing", 1));
}

#[test]
fn expression_condition_with_history() {
    use reflex_core::RingHistoryProvider;

    let history = Arc::new(RingHistoryProvider::new(16));
    for v in [40.0, 44.0, 48.0] {
        history.record("t", v);
    }

    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut engine = recording_engine(log.clone(), &["alert"]);
    engine.set_history(history);
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "rising",
            "when": {"expression": {"op": "&&",
                "left": {"op": ">", "left": {"func": "avg_last_n", "args": ["t", 3]}, "right": 40},
                "right": {"op": "==", "left": {"func": "trend", "args": ["t", 3]}, "right": 1},
            }},
            "do": [{"action": "alert"}],
        }]}))
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("t", 48);
    engine.tick_at(&mut ctx, 10);
    assert_eq!(log.lock().unwrap().len(), 1);
}
