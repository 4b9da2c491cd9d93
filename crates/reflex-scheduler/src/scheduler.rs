//! Task scheduler façade.
//!
//! Binds the timer manager, frequency limiter and resource monitor into one
//! task lifecycle: each task owns a timer (interval or cron), a rate-limit
//! entry and a resource-usage entry, and fires through a per-task-type
//! callback registered by the host.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::limiter::{FrequencyLimiter, LimitConfig, LimiterStats};
use crate::monitor::{GlobalUsageStats, Limits, ResourceMonitor};
use crate::timer::{TimerCallback, TimerManager, TimerStats};

/// What a task drives when its timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RuleExecution,
    BehaviorTree,
    CustomAction,
}

/// Host callback for a task type: `(task_id, target_id) -> success`.
pub type TaskCallback = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Scheduling configuration for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    pub task_type: TaskType,
    /// Rule id, behavior-tree name or custom-action key the callback
    /// should drive.
    pub target_id: String,
    /// Cron schedule; takes precedence over `interval` when present.
    pub cron: Option<String>,
    pub interval: Duration,
    /// Executions before the task completes; `None` repeats forever.
    pub repeat_cap: Option<u64>,
    pub enabled: bool,
    pub limit: LimitConfig,
    pub resources: Limits,
}

impl TaskConfig {
    pub fn new(id: impl Into<String>, task_type: TaskType, target_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type,
            target_id: target_id.into(),
            cron: None,
            interval: Duration::ZERO,
            repeat_cap: None,
            enabled: true,
            limit: LimitConfig::default(),
            resources: Limits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Disabled,
}

/// Live task record.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub config: TaskConfig,
    pub status: TaskStatus,
    pub last_execution: Option<DateTime<Local>>,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: String,
}

impl TaskInfo {
    fn new(config: TaskConfig) -> Self {
        let status = if config.enabled {
            TaskStatus::Pending
        } else {
            TaskStatus::Disabled
        };
        Self {
            config,
            status,
            last_execution: None,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            last_error: String::new(),
        }
    }
}

/// Aggregate scheduler statistics, including the embedded subsystems.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub disabled_tasks: usize,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub success_rate: f64,
    pub resources: GlobalUsageStats,
    pub frequency: LimiterStats,
    pub timers: TimerStats,
}

struct SchedulerInner {
    timers: TimerManager,
    limiter: FrequencyLimiter,
    monitor: ResourceMonitor,
    callbacks: Mutex<HashMap<TaskType, TaskCallback>>,
    tasks: Mutex<HashMap<String, TaskInfo>>,
}

/// The scheduler façade. All methods are thread-safe.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                timers: TimerManager::new(),
                limiter: FrequencyLimiter::new(),
                monitor: ResourceMonitor::new(),
                callbacks: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start the underlying timer worker.
    pub fn start(&self) {
        self.inner.timers.start();
    }

    /// Stop the timer worker; queued tasks stay registered.
    pub fn stop(&self) {
        self.inner.timers.stop();
    }

    /// Install the callback used for every task of `task_type`.
    pub fn register_callback(&self, task_type: TaskType, callback: TaskCallback) {
        self.inner.callbacks.lock().unwrap().insert(task_type, callback);
    }

    /// Create a task from a full configuration. Rejects empty ids/targets,
    /// duplicate ids, invalid cron expressions and configurations with
    /// neither a cron schedule nor a positive interval.
    pub fn create_task(&self, config: TaskConfig) -> bool {
        if config.id.is_empty() || config.target_id.is_empty() {
            warn!("rejecting task with empty id or target");
            return false;
        }
        if self.inner.tasks.lock().unwrap().contains_key(&config.id) {
            warn!(task = %config.id, "rejecting duplicate task id");
            return false;
        }

        self.inner.limiter.set_limit(&config.id, config.limit);
        self.inner.monitor.start_monitoring(&config.id, config.resources);

        let wrapper = self.task_wrapper(config.id.clone());
        let timer_created = if let Some(cron) = &config.cron {
            self.inner.timers.create_cron(&config.id, cron, wrapper)
        } else if !config.interval.is_zero() {
            self.inner
                .timers
                .create_repeat(&config.id, config.interval, wrapper, config.repeat_cap)
        } else {
            warn!(task = %config.id, "task has neither cron nor interval");
            false
        };

        if !timer_created {
            self.inner.limiter.remove_limit(&config.id);
            self.inner.monitor.stop_monitoring(&config.id);
            return false;
        }

        let id = config.id.clone();
        self.inner
            .tasks
            .lock()
            .unwrap()
            .insert(id, TaskInfo::new(config));
        true
    }

    /// Convenience constructor for a cron-scheduled task.
    pub fn create_cron_task(
        &self,
        id: &str,
        target_id: &str,
        cron: &str,
        task_type: TaskType,
    ) -> bool {
        let mut config = TaskConfig::new(id, task_type, target_id);
        config.cron = Some(cron.to_string());
        self.create_task(config)
    }

    /// Convenience constructor for an interval task.
    pub fn create_repeat_task(
        &self,
        id: &str,
        target_id: &str,
        interval: Duration,
        repeat_cap: Option<u64>,
        task_type: TaskType,
    ) -> bool {
        let mut config = TaskConfig::new(id, task_type, target_id);
        config.interval = interval;
        config.repeat_cap = repeat_cap;
        self.create_task(config)
    }

    /// Cancel the task's timer and mark it cancelled. An in-flight
    /// execution is not interrupted.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        if !self.inner.timers.cancel(task_id) {
            return false;
        }
        if let Some(info) = self.inner.tasks.lock().unwrap().get_mut(task_id) {
            info.status = TaskStatus::Cancelled;
        }
        true
    }

    pub fn set_task_enabled(&self, task_id: &str, enabled: bool) -> bool {
        match self.inner.tasks.lock().unwrap().get_mut(task_id) {
            Some(info) => {
                info.config.enabled = enabled;
                info.status = if enabled {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Disabled
                };
                true
            }
            None => false,
        }
    }

    pub fn task_info(&self, task_id: &str) -> Option<TaskInfo> {
        self.inner.tasks.lock().unwrap().get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.inner.tasks.lock().unwrap().values().cloned().collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        {
            let tasks = self.inner.tasks.lock().unwrap();
            stats.total_tasks = tasks.len();
            for info in tasks.values() {
                match info.status {
                    TaskStatus::Pending | TaskStatus::Running => stats.active_tasks += 1,
                    TaskStatus::Completed => stats.completed_tasks += 1,
                    TaskStatus::Failed => stats.failed_tasks += 1,
                    TaskStatus::Cancelled => stats.cancelled_tasks += 1,
                    TaskStatus::Disabled => stats.disabled_tasks += 1,
                }
                stats.total_executions += info.execution_count;
                stats.successful_executions += info.success_count;
                stats.failed_executions += info.failure_count;
            }
        }
        if stats.total_executions > 0 {
            stats.success_rate = stats.successful_executions as f64 / stats.total_executions as f64;
        }
        stats.resources = self.inner.monitor.global_stats();
        stats.frequency = self.inner.limiter.stats();
        stats.timers = self.inner.timers.stats();
        stats
    }

    /// Expire stale monitoring data and aged-out rate-limit history.
    pub fn cleanup(&self, max_age_hours: i64) {
        self.inner.monitor.cleanup_expired(max_age_hours);
        self.inner.limiter.cleanup(None);
    }

    fn task_wrapper(&self, task_id: String) -> TimerCallback {
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.execute_task(&task_id);
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerInner {
    fn execute_task(&self, task_id: &str) {
        let (task_type, target_id, repeat_cap, enabled) = {
            let tasks = self.tasks.lock().unwrap();
            let Some(info) = tasks.get(task_id) else {
                return;
            };
            (
                info.config.task_type,
                info.config.target_id.clone(),
                info.config.repeat_cap,
                info.config.enabled,
            )
        };
        if !enabled {
            return;
        }

        // Rate-limited fires are deferred, not failed; the task stays
        // Pending and the timer will come around again.
        if !self.limiter.try_acquire(task_id) {
            debug!(task = task_id, "execution deferred by frequency limit");
            return;
        }

        if !self.monitor.check_limits(task_id) {
            self.set_status(task_id, TaskStatus::Failed);
            self.record_execution(task_id, false, 0, "Resource limit exceeded");
            return;
        }

        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(info) = tasks.get_mut(task_id) {
                info.status = TaskStatus::Running;
                info.last_execution = Some(Local::now());
            }
        }

        let callback = self.callbacks.lock().unwrap().get(&task_type).cloned();
        let started = Instant::now();
        let (success, error) = match callback {
            Some(cb) => match catch_unwind(AssertUnwindSafe(|| cb(task_id, &target_id))) {
                Ok(result) => (result, String::new()),
                Err(_) => {
                    error!(task = task_id, "task callback panicked");
                    (false, "task callback panicked".to_string())
                }
            },
            None => (false, "no callback registered for task type".to_string()),
        };
        let exec_ms = started.elapsed().as_millis() as u64;

        self.record_execution(task_id, success, exec_ms, &error);

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(info) = tasks.get_mut(task_id) {
            info.status = if success {
                match repeat_cap {
                    Some(cap) if info.execution_count >= cap => TaskStatus::Completed,
                    _ => TaskStatus::Pending,
                }
            } else {
                TaskStatus::Failed
            };
        }
    }

    fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(info) = self.tasks.lock().unwrap().get_mut(task_id) {
            info.status = status;
        }
    }

    fn record_execution(&self, task_id: &str, success: bool, exec_ms: u64, error: &str) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(info) = tasks.get_mut(task_id) {
                info.execution_count += 1;
                if success {
                    info.success_count += 1;
                } else {
                    info.failure_count += 1;
                    info.last_error = error.to_string();
                }
            }
        }
        self.monitor.record_usage(task_id, 0, exec_ms, success);
    }
}
