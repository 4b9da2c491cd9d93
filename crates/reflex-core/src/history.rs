//! Historical aggregation over sensor readings.
//!
//! The expression functions `avg_last_n`, `max_last_n` and `trend` need past
//! samples, which the per-tick context does not retain. A `HistoryProvider`
//! supplies them; without one the evaluator falls back to the current value.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::context::Context;
use crate::value::Value;

/// Source of historical sensor samples for the aggregate functions.
pub trait HistoryProvider: Send + Sync {
    /// Average of the last `n` samples of `var`; current value when no
    /// samples exist.
    fn avg_last_n(&self, ctx: &Context, var: &str, n: usize) -> Value;

    /// Maximum of the last `n` samples of `var`; current value when no
    /// samples exist.
    fn max_last_n(&self, ctx: &Context, var: &str, n: usize) -> Value;

    /// Direction over the last `n` samples: `1` rising, `-1` falling,
    /// `0` flat or unknown.
    fn trend(&self, ctx: &Context, var: &str, n: usize) -> Value;
}

/// Bounded in-memory history: a per-key ring buffer of numeric samples.
///
/// The host feeds it by calling [`RingHistoryProvider::record`] for the keys
/// it cares about, typically once per tick.
pub struct RingHistoryProvider {
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
    capacity: usize,
}

impl RingHistoryProvider {
    /// `capacity` is the number of samples retained per key.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, key: &str, value: f64) {
        let mut samples = self.samples.lock().unwrap();
        let buf = samples.entry(key.to_string()).or_default();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(value);
    }

    /// Record every numeric key of the context in one pass.
    pub fn record_context(&self, ctx: &Context) {
        for (key, value) in ctx.iter() {
            if value.is_number() {
                if let Some(v) = value.as_f64() {
                    self.record(key, v);
                }
            }
        }
    }

    fn last_n(&self, var: &str, n: usize) -> Vec<f64> {
        let samples = self.samples.lock().unwrap();
        match samples.get(var) {
            Some(buf) => buf.iter().rev().take(n.max(1)).rev().copied().collect(),
            None => Vec::new(),
        }
    }
}

impl HistoryProvider for RingHistoryProvider {
    fn avg_last_n(&self, ctx: &Context, var: &str, n: usize) -> Value {
        let window = self.last_n(var, n);
        if window.is_empty() {
            return ctx.get(var);
        }
        Value::Float(window.iter().sum::<f64>() / window.len() as f64)
    }

    fn max_last_n(&self, ctx: &Context, var: &str, n: usize) -> Value {
        let window = self.last_n(var, n);
        if window.is_empty() {
            return ctx.get(var);
        }
        Value::Float(window.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    fn trend(&self, _ctx: &Context, var: &str, n: usize) -> Value {
        let window = self.last_n(var, n);
        if window.len() < 2 {
            return Value::Int(0);
        }
        let first = window[0];
        let last = window[window.len() - 1];
        Value::Int(if last > first {
            1
        } else if last < first {
            -1
        } else {
            0
        })
    }
}
