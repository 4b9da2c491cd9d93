//! Per-identifier resource accounting and limit checks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Atomic usage counters for one identifier.
#[derive(Debug, Default)]
pub struct Usage {
    pub memory_bytes: AtomicU64,
    pub cpu_ms: AtomicU64,
    pub executions: AtomicU64,
    pub errors: AtomicU64,
    pub total_exec_ms: AtomicU64,
}

/// Plain-data copy of the counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub memory_bytes: u64,
    pub cpu_ms: u64,
    pub executions: u64,
    pub errors: u64,
    pub total_exec_ms: u64,
}

impl Usage {
    fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
            cpu_ms: self.cpu_ms.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_exec_ms: self.total_exec_ms.load(Ordering::Relaxed),
        }
    }
}

/// Limit configuration; a zero (or 0.0) entry means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub max_memory_bytes: u64,
    pub max_cpu_ms: u64,
    pub max_executions: u64,
    /// Bound on the *average* execution time.
    pub max_avg_exec_ms: u64,
    pub max_error_rate: f64,
}

/// Status report for one identifier.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub within_limits: bool,
    /// Human-readable reason; empty while within limits.
    pub violation: String,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub error_rate: f64,
    pub avg_exec_ms: u64,
    pub usage: UsageSnapshot,
    pub limits: Limits,
}

/// Roll-up across every monitored identifier.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GlobalUsageStats {
    pub total_memory_bytes: u64,
    pub total_cpu_ms: u64,
    pub total_executions: u64,
    pub total_errors: u64,
    pub average_error_rate: f64,
    pub monitored_count: usize,
}

struct MonitoringData {
    usage: Usage,
    limits: Limits,
    /// Unix-millisecond stamp of the last `record_usage`, for expiry.
    last_update_ms: AtomicI64,
}

/// Tracks resource usage against configured limits, keyed by identifier.
#[derive(Default)]
pub struct ResourceMonitor {
    data: Mutex<HashMap<String, MonitoringData>>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or reconfigure) monitoring for an identifier; counters start
    /// from zero.
    pub fn start_monitoring(&self, identifier: &str, limits: Limits) {
        self.data.lock().unwrap().insert(
            identifier.to_string(),
            MonitoringData {
                usage: Usage::default(),
                limits,
                last_update_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            },
        );
    }

    pub fn stop_monitoring(&self, identifier: &str) {
        self.data.lock().unwrap().remove(identifier);
    }

    /// Record one execution: memory delta, elapsed time and outcome.
    /// Unmonitored identifiers are ignored.
    pub fn record_usage(&self, identifier: &str, memory_delta: u64, exec_ms: u64, success: bool) {
        let data = self.data.lock().unwrap();
        let Some(entry) = data.get(identifier) else {
            return;
        };
        entry.usage.memory_bytes.fetch_add(memory_delta, Ordering::Relaxed);
        entry.usage.cpu_ms.fetch_add(exec_ms, Ordering::Relaxed);
        entry.usage.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            entry.usage.errors.fetch_add(1, Ordering::Relaxed);
        }
        entry.usage.total_exec_ms.fetch_add(exec_ms, Ordering::Relaxed);
        entry
            .last_update_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// True while every configured non-zero limit is respected. Unmonitored
    /// identifiers check as false.
    pub fn check_limits(&self, identifier: &str) -> bool {
        let data = self.data.lock().unwrap();
        match data.get(identifier) {
            Some(entry) => violation(&entry.usage.snapshot(), &entry.limits).is_none(),
            None => false,
        }
    }

    pub fn set_limits(&self, identifier: &str, limits: Limits) {
        let mut data = self.data.lock().unwrap();
        if let Some(entry) = data.get_mut(identifier) {
            entry.limits = limits;
        }
    }

    /// Full status report; unmonitored identifiers report out-of-limits.
    pub fn status(&self, identifier: &str) -> ResourceStatus {
        let data = self.data.lock().unwrap();
        let Some(entry) = data.get(identifier) else {
            warn!(identifier, "status requested for unmonitored identifier");
            return ResourceStatus {
                within_limits: false,
                violation: "Not monitored".to_string(),
                memory_percent: 0.0,
                cpu_percent: 0.0,
                error_rate: 0.0,
                avg_exec_ms: 0,
                usage: UsageSnapshot::default(),
                limits: Limits::default(),
            };
        };

        let usage = entry.usage.snapshot();
        let limits = entry.limits;
        let violation = violation(&usage, &limits);
        ResourceStatus {
            within_limits: violation.is_none(),
            violation: violation.unwrap_or_default(),
            memory_percent: usage_percent(usage.memory_bytes, limits.max_memory_bytes),
            cpu_percent: usage_percent(usage.cpu_ms, limits.max_cpu_ms),
            error_rate: error_rate(&usage),
            avg_exec_ms: avg_exec_ms(&usage),
            usage,
            limits,
        }
    }

    /// Zero the counters; `None` drops every identifier.
    pub fn reset(&self, identifier: Option<&str>) {
        let mut data = self.data.lock().unwrap();
        match identifier {
            Some(id) => {
                if let Some(entry) = data.get_mut(id) {
                    entry.usage = Usage::default();
                }
            }
            None => data.clear(),
        }
    }

    pub fn monitored_ids(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    pub fn global_stats(&self) -> GlobalUsageStats {
        let data = self.data.lock().unwrap();
        let mut stats = GlobalUsageStats {
            monitored_count: data.len(),
            ..Default::default()
        };
        for entry in data.values() {
            let usage = entry.usage.snapshot();
            stats.total_memory_bytes += usage.memory_bytes;
            stats.total_cpu_ms += usage.cpu_ms;
            stats.total_executions += usage.executions;
            stats.total_errors += usage.errors;
        }
        if stats.total_executions > 0 {
            stats.average_error_rate = stats.total_errors as f64 / stats.total_executions as f64;
        }
        stats
    }

    /// Drop identifiers whose last update is older than `max_age_hours`.
    pub fn cleanup_expired(&self, max_age_hours: i64) {
        let cutoff_ms = (Utc::now() - chrono::Duration::hours(max_age_hours)).timestamp_millis();
        let mut data = self.data.lock().unwrap();
        data.retain(|_, entry| entry.last_update_ms.load(Ordering::Relaxed) >= cutoff_ms);
    }

    /// Backdate an identifier's last-update stamp. Test hook for expiry.
    #[doc(hidden)]
    pub fn backdate(&self, identifier: &str, stamp: DateTime<Utc>) {
        let data = self.data.lock().unwrap();
        if let Some(entry) = data.get(identifier) {
            entry
                .last_update_ms
                .store(stamp.timestamp_millis(), Ordering::Relaxed);
        }
    }
}

fn violation(usage: &UsageSnapshot, limits: &Limits) -> Option<String> {
    if limits.max_memory_bytes > 0 && usage.memory_bytes > limits.max_memory_bytes {
        return Some("Memory usage exceeds limit".to_string());
    }
    if limits.max_cpu_ms > 0 && usage.cpu_ms > limits.max_cpu_ms {
        return Some("CPU time exceeds limit".to_string());
    }
    if limits.max_executions > 0 && usage.executions > limits.max_executions {
        return Some("Execution count exceeds limit".to_string());
    }
    if limits.max_error_rate > 0.0 && usage.executions > 0 && error_rate(usage) > limits.max_error_rate
    {
        return Some("Error rate exceeds limit".to_string());
    }
    if limits.max_avg_exec_ms > 0
        && usage.executions > 0
        && avg_exec_ms(usage) > limits.max_avg_exec_ms
    {
        return Some("Average execution time exceeds limit".to_string());
    }
    None
}

fn error_rate(usage: &UsageSnapshot) -> f64 {
    if usage.executions == 0 {
        0.0
    } else {
        usage.errors as f64 / usage.executions as f64
    }
}

fn avg_exec_ms(usage: &UsageSnapshot) -> u64 {
    if usage.executions == 0 {
        0
    } else {
        usage.total_exec_ms / usage.executions
    }
}

fn usage_percent(current: u64, limit: u64) -> f64 {
    if limit == 0 {
        0.0
    } else {
        (current as f64 / limit as f64 * 100.0).min(100.0)
    }
}
