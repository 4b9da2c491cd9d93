//! Behavior-tree integration scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reflex_bt::{BtManager, Status};
use reflex_core::Context;

#[test]
fn repeater_over_sequence_runs_actions_in_pairs() {
    let a_calls = Arc::new(AtomicUsize::new(0));
    let b_calls = Arc::new(AtomicUsize::new(0));

    let manager = BtManager::new();
    let a = a_calls.clone();
    manager.register_action(
        "action_a",
        Arc::new(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Status::Success
        }),
    );
    let b = b_calls.clone();
    manager.register_action(
        "action_b",
        Arc::new(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            Status::Success
        }),
    );

    manager
        .load_tree(
            "patrol",
            &serde_json::json!({"root": {
                "type": "repeater",
                "repeat_count": 3,
                "child": {"type": "sequence", "children": [
                    {"type": "action", "action": "action_a"},
                    {"type": "action", "action": "action_b"},
                ]},
            }}),
        )
        .unwrap();

    let mut ctx = Context::new();
    // Deterministic children complete all three repeats inside one tick.
    assert_eq!(manager.execute("patrol", &mut ctx), Status::Success);
    assert_eq!(a_calls.load(Ordering::SeqCst), 3);
    assert_eq!(b_calls.load(Ordering::SeqCst), 3);

    // A completed repeater stays Success without re-running its child.
    assert_eq!(manager.execute("patrol", &mut ctx), Status::Success);
    assert_eq!(a_calls.load(Ordering::SeqCst), 3);

    manager.reset("patrol");
    assert_eq!(manager.execute("patrol", &mut ctx), Status::Success);
    assert_eq!(a_calls.load(Ordering::SeqCst), 6);
    assert_eq!(b_calls.load(Ordering::SeqCst), 6);
}

#[test]
fn selector_falls_back_when_guard_fails() {
    let manager = BtManager::new();
    manager.register_condition("docked", Arc::new(|ctx| ctx.get("docked").truthy()));
    manager.register_action("charge", Arc::new(|_| Status::Success));
    manager.register_action(
        "seek_dock",
        Arc::new(|ctx| {
            ctx.set("seeking", true);
            Status::Success
        }),
    );

    manager
        .load_tree(
            "power",
            &serde_json::json!({"root": {"type": "selector", "children": [
                {"type": "sequence", "children": [
                    {"type": "condition", "condition": "docked"},
                    {"type": "action", "action": "charge"},
                ]},
                {"type": "action", "action": "seek_dock"},
            ]}}),
        )
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("docked", false);
    assert_eq!(manager.execute("power", &mut ctx), Status::Success);
    assert!(ctx.get("seeking").truthy());

    let mut docked_ctx = Context::new();
    docked_ctx.set("docked", true);
    assert_eq!(manager.execute("power", &mut docked_ctx), Status::Success);
    assert!(!docked_ctx.has("seeking"));
}

#[test]
fn running_leaf_keeps_tree_running_across_ticks() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let manager = BtManager::new();
    let ticks_clone = ticks.clone();
    // Returns Running twice, then Success.
    manager.register_action(
        "slow_move",
        Arc::new(move |_| {
            if ticks_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                Status::Running
            } else {
                Status::Success
            }
        }),
    );

    manager
        .load_tree(
            "mover",
            &serde_json::json!({"root": {"type": "sequence", "children": [
                {"type": "action", "action": "slow_move"},
            ]}}),
        )
        .unwrap();

    let mut ctx = Context::new();
    assert_eq!(manager.execute("mover", &mut ctx), Status::Running);
    assert_eq!(manager.status("mover"), Status::Running);
    assert_eq!(manager.execute("mover", &mut ctx), Status::Running);
    assert_eq!(manager.execute("mover", &mut ctx), Status::Success);

    let stats = manager.stats("mover").unwrap();
    assert_eq!(stats.execution_count, 3);
    assert_eq!(stats.running_count, 2);
    assert_eq!(stats.success_count, 1);
}

#[test]
fn tree_json_round_trips_through_the_manager() {
    let manager = BtManager::new();
    let json = serde_json::json!({"root": {
        "type": "inverter",
        "child": {"type": "condition", "condition": "obstacle"},
    }});
    manager.load_tree("t", &json).unwrap();
    assert_eq!(manager.tree_json("t").unwrap(), json);
}
