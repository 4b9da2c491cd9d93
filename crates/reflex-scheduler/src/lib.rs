//! Reflex scheduling subsystem.
//!
//! Timer management (one-shot, interval and cron timers on a single worker
//! thread), per-identifier frequency limiting (fixed window, sliding window,
//! token bucket), per-identifier resource accounting, and a scheduler façade
//! that binds the three into a unified task lifecycle.

pub mod cron;
pub mod error;
pub mod limiter;
pub mod monitor;
pub mod scheduler;
pub mod timer;

pub use cron::CronExpr;
pub use error::{Result, SchedulerError};
pub use limiter::{FrequencyLimiter, LimitConfig, LimitDecision, LimiterStats, Strategy};
pub use monitor::{GlobalUsageStats, Limits, ResourceMonitor, ResourceStatus, UsageSnapshot};
pub use scheduler::{
    Scheduler, SchedulerStats, TaskCallback, TaskConfig, TaskInfo, TaskStatus, TaskType,
};
pub use timer::{TimerCallback, TimerInfo, TimerKind, TimerManager, TimerStats, TimerStatus};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
