//! Timer management: one-shot, repeating and cron-driven callbacks.
//!
//! A single worker thread drives all timers. It wakes every 100 ms (or
//! immediately on creation/shutdown via the condvar), snapshots the due
//! tasks under the lock, and runs their callbacks outside it so a slow
//! callback never blocks timer bookkeeping. Completed and cancelled tasks
//! are swept after every pass.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::cron::CronExpr;

/// Callback invoked when a timer fires.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    Once,
    Repeat,
    Cron,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Errored,
}

struct TimerTask {
    id: String,
    kind: TimerKind,
    status: TimerStatus,
    interval: Duration,
    cron: Option<CronExpr>,
    callback: TimerCallback,
    /// Maximum number of executions for repeat timers; `None` is uncapped.
    repeat_cap: Option<u64>,
    executed: u64,
    next_due: DateTime<Local>,
    created_at: DateTime<Local>,
    last_executed: Option<DateTime<Local>>,
}

/// Callback-free snapshot of a timer's state.
#[derive(Debug, Clone, Serialize)]
pub struct TimerInfo {
    pub id: String,
    pub kind: TimerKind,
    pub status: TimerStatus,
    pub executed: u64,
    pub next_due: DateTime<Local>,
    pub created_at: DateTime<Local>,
    pub last_executed: Option<DateTime<Local>>,
}

impl TimerTask {
    fn info(&self) -> TimerInfo {
        TimerInfo {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            executed: self.executed,
            next_due: self.next_due,
            created_at: self.created_at,
            last_executed: self.last_executed,
        }
    }
}

/// Aggregate counters over the live timer table.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimerStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub errored: usize,
    pub total_executions: u64,
}

struct Shared {
    tasks: Mutex<Vec<TimerTask>>,
    wakeup: Condvar,
    running: AtomicBool,
}

/// Owner of the timer table and its worker thread.
pub struct TimerManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(Vec::new()),
                wakeup: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("reflex-timer".to_string())
            .spawn(move || worker_loop(&shared))
            .expect("failed to spawn timer worker");
        *self.worker.lock().unwrap() = Some(handle);
        info!("timer worker started");
    }

    /// Stop and join the worker thread. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("timer worker stopped");
    }

    /// One-shot timer firing `delay` from now. Duplicate ids are rejected.
    pub fn create_once(&self, id: &str, delay: Duration, callback: TimerCallback) -> bool {
        self.insert_task(TimerTask {
            id: id.to_string(),
            kind: TimerKind::Once,
            status: TimerStatus::Pending,
            interval: delay,
            cron: None,
            callback,
            repeat_cap: Some(1),
            executed: 0,
            next_due: Local::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            created_at: Local::now(),
            last_executed: None,
        })
    }

    /// Repeating timer with `interval` between fires; `repeat_cap` bounds
    /// the number of executions, `None` repeats forever.
    pub fn create_repeat(
        &self,
        id: &str,
        interval: Duration,
        callback: TimerCallback,
        repeat_cap: Option<u64>,
    ) -> bool {
        self.insert_task(TimerTask {
            id: id.to_string(),
            kind: TimerKind::Repeat,
            status: TimerStatus::Pending,
            interval,
            cron: None,
            callback,
            repeat_cap,
            executed: 0,
            next_due: Local::now() + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero()),
            created_at: Local::now(),
            last_executed: None,
        })
    }

    /// Cron-scheduled timer. Rejects invalid expressions and duplicate ids.
    pub fn create_cron(&self, id: &str, expression: &str, callback: TimerCallback) -> bool {
        let cron = match CronExpr::parse(expression) {
            Ok(cron) => cron,
            Err(e) => {
                error!(timer = id, %e, "rejecting cron timer");
                return false;
            }
        };
        let next_due = cron.next_match(Local::now());
        self.insert_task(TimerTask {
            id: id.to_string(),
            kind: TimerKind::Cron,
            status: TimerStatus::Pending,
            interval: Duration::ZERO,
            cron: Some(cron),
            callback,
            repeat_cap: None,
            executed: 0,
            next_due,
            created_at: Local::now(),
            last_executed: None,
        })
    }

    /// Mark a timer cancelled; the worker skips and sweeps it on its next
    /// pass. In-flight callbacks are not interrupted.
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.shared.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.status = TimerStatus::Cancelled;
                true
            }
            None => false,
        }
    }

    pub fn timer_info(&self, id: &str) -> Option<TimerInfo> {
        let tasks = self.shared.tasks.lock().unwrap();
        tasks.iter().find(|t| t.id == id).map(TimerTask::info)
    }

    pub fn timers(&self) -> Vec<TimerInfo> {
        let tasks = self.shared.tasks.lock().unwrap();
        tasks.iter().map(TimerTask::info).collect()
    }

    pub fn has_timer(&self, id: &str) -> bool {
        let tasks = self.shared.tasks.lock().unwrap();
        tasks.iter().any(|t| t.id == id)
    }

    pub fn clear(&self) {
        self.shared.tasks.lock().unwrap().clear();
    }

    pub fn stats(&self) -> TimerStats {
        let tasks = self.shared.tasks.lock().unwrap();
        let mut stats = TimerStats {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks.iter() {
            match task.status {
                TimerStatus::Pending | TimerStatus::Running => stats.active += 1,
                TimerStatus::Completed => stats.completed += 1,
                TimerStatus::Cancelled => stats.cancelled += 1,
                TimerStatus::Errored => stats.errored += 1,
            }
            stats.total_executions += task.executed;
        }
        stats
    }

    fn insert_task(&self, task: TimerTask) -> bool {
        let mut tasks = self.shared.tasks.lock().unwrap();
        if tasks.iter().any(|t| t.id == task.id) {
            return false;
        }
        debug!(timer = %task.id, kind = ?task.kind, "timer created");
        tasks.push(task);
        drop(tasks);
        self.shared.wakeup.notify_all();
        true
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    while shared.running.load(Ordering::SeqCst) {
        // Snapshot due tasks under the lock, ordered by due time then id.
        let mut batch: Vec<(String, TimerCallback)> = Vec::new();
        {
            let mut tasks = shared.tasks.lock().unwrap();
            let now = Local::now();
            let mut due: Vec<&mut TimerTask> = tasks
                .iter_mut()
                .filter(|t| t.status == TimerStatus::Pending && t.next_due <= now)
                .collect();
            due.sort_by(|a, b| a.next_due.cmp(&b.next_due).then_with(|| a.id.cmp(&b.id)));
            for task in due {
                task.status = TimerStatus::Running;
                task.last_executed = Some(now);
                batch.push((task.id.clone(), task.callback.clone()));
            }
        }

        for (id, callback) in batch {
            let panicked = catch_unwind(AssertUnwindSafe(|| callback())).is_err();
            let mut tasks = shared.tasks.lock().unwrap();
            let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                continue;
            };
            if panicked {
                error!(timer = %id, "timer callback panicked");
                task.status = TimerStatus::Errored;
                continue;
            }
            task.executed += 1;
            let now = Local::now();
            match task.kind {
                TimerKind::Once => task.status = TimerStatus::Completed,
                TimerKind::Repeat => {
                    if task.repeat_cap.map_or(true, |cap| task.executed < cap) {
                        task.next_due =
                            now + chrono::Duration::from_std(task.interval).unwrap_or_else(|_| chrono::Duration::zero());
                        task.status = TimerStatus::Pending;
                    } else {
                        task.status = TimerStatus::Completed;
                    }
                }
                TimerKind::Cron => match &task.cron {
                    Some(cron) => {
                        task.next_due = next_cron_due(cron, now);
                        task.status = TimerStatus::Pending;
                    }
                    None => task.status = TimerStatus::Errored,
                },
            }
        }

        {
            let mut tasks = shared.tasks.lock().unwrap();
            tasks.retain(|t| {
                !matches!(t.status, TimerStatus::Completed | TimerStatus::Cancelled)
            });

            let _unused = shared
                .wakeup
                .wait_timeout(tasks, Duration::from_millis(100))
                .unwrap();
        }
    }
}

/// Reschedule stamp for a cron timer that fired at `fired_at`: the first
/// matching minute strictly after the one that fired. `next_match` includes
/// its starting minute, so scanning from `fired_at` itself would re-arm the
/// minute that just ran and re-fire on every worker pass until it ended.
fn next_cron_due(cron: &CronExpr, fired_at: DateTime<Local>) -> DateTime<Local> {
    cron.next_match(fired_at + chrono::Duration::minutes(1))
}
