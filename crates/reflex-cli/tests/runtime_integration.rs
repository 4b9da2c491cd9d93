//! Whole-runtime integration: scheduler-driven rule ticks and behavior
//! trees sharing one engine, the way a host process wires them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reflex_bt::{BtManager, Status};
use reflex_core::{Context, Engine};
use reflex_scheduler::{Scheduler, TaskStatus, TaskType};

fn wait_until(deadline_ms: u64, pred: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(deadline_ms) {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    pred()
}

#[test]
fn scheduler_drives_engine_ticks() {
    let fired = Arc::new(AtomicUsize::new(0));

    let mut engine = Engine::new();
    let fired_clone = fired.clone();
    engine.register_action(
        "vent",
        Box::new(move |_params, _ctx| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "overheat",
            "when": {"left": "t", "op": ">", "right": 40},
            "do": [{"action": "vent"}],
        }]}))
        .unwrap();

    let engine = Arc::new(Mutex::new(engine));
    let ctx = Arc::new(Mutex::new({
        let mut ctx = Context::new();
        ctx.set("t", 45);
        ctx
    }));

    let scheduler = Scheduler::new();
    let engine_for_task = engine.clone();
    let ctx_for_task = ctx.clone();
    scheduler.register_callback(
        TaskType::RuleExecution,
        Arc::new(move |_task_id, _target_id| {
            let mut engine = engine_for_task.lock().unwrap();
            let mut ctx = ctx_for_task.lock().unwrap();
            engine.tick(&mut ctx);
            true
        }),
    );
    scheduler.start();
    assert!(scheduler.create_repeat_task(
        "tick-task",
        "overheat",
        Duration::from_millis(20),
        Some(3),
        TaskType::RuleExecution,
    ));

    assert!(wait_until(3000, || fired.load(Ordering::SeqCst) == 3));
    assert!(wait_until(2000, || {
        scheduler
            .task_info("tick-task")
            .map(|i| i.status == TaskStatus::Completed)
            .unwrap_or(false)
    }));
    scheduler.stop();

    let info = scheduler.task_info("tick-task").unwrap();
    assert_eq!(info.execution_count, 3);
    assert_eq!(info.success_count, 3);
}

#[test]
fn scheduler_drives_behavior_trees() {
    let manager = Arc::new(BtManager::new());
    manager.register_action(
        "sample",
        Arc::new(|ctx| {
            let n = ctx.get("samples").as_i64().unwrap_or(0);
            ctx.set("samples", n + 1);
            Status::Success
        }),
    );
    manager
        .load_tree(
            "sampler",
            &serde_json::json!({"root": {"type": "action", "action": "sample"}}),
        )
        .unwrap();

    let ctx = Arc::new(Mutex::new(Context::new()));
    let scheduler = Scheduler::new();
    let manager_for_task = manager.clone();
    let ctx_for_task = ctx.clone();
    scheduler.register_callback(
        TaskType::BehaviorTree,
        Arc::new(move |_task_id, target_id| {
            let mut ctx = ctx_for_task.lock().unwrap();
            manager_for_task.execute(target_id, &mut ctx) != Status::Failure
        }),
    );
    scheduler.start();
    assert!(scheduler.create_repeat_task(
        "bt-task",
        "sampler",
        Duration::from_millis(20),
        Some(2),
        TaskType::BehaviorTree,
    ));

    assert!(wait_until(3000, || {
        ctx.lock().unwrap().get("samples").as_i64() == Some(2)
    }));
    scheduler.stop();

    let stats = manager.stats("sampler").unwrap();
    assert_eq!(stats.execution_count, 2);
    assert_eq!(stats.success_count, 2);
}

#[test]
fn engine_actions_feed_behavior_tree_conditions() {
    // A rule raises an alarm flag; a tree reacts to it on the next tick.
    let mut engine = Engine::new();
    engine.register_action(
        "raise_alarm",
        Box::new(|_params, ctx| {
            ctx.set("alarm", true);
        }),
    );
    engine
        .load(&serde_json::json!({"rules": [{
            "id": "smoke",
            "when": {"left": "smoke_level", "op": ">=", "right": 3},
            "do": [{"action": "raise_alarm"}],
        }]}))
        .unwrap();

    let manager = BtManager::new();
    manager.register_condition("alarm_raised", Arc::new(|ctx| ctx.get("alarm").truthy()));
    manager.register_action(
        "sound_siren",
        Arc::new(|ctx| {
            ctx.set("siren", true);
            Status::Success
        }),
    );
    manager
        .load_tree(
            "respond",
            &serde_json::json!({"root": {"type": "sequence", "children": [
                {"type": "condition", "condition": "alarm_raised"},
                {"type": "action", "action": "sound_siren"},
            ]}}),
        )
        .unwrap();

    let mut ctx = Context::new();
    ctx.set("smoke_level", 5);

    assert_eq!(manager.execute("respond", &mut ctx), Status::Failure);
    engine.tick(&mut ctx);
    assert_eq!(manager.execute("respond", &mut ctx), Status::Success);
    assert!(ctx.get("siren").truthy());
}
