//! Reflex persistence layer.
//!
//! The record-store contract the engine core persists through (with memory
//! and file back-ends), rule/sensor history recording on top of it, and the
//! config hot-reload watcher.

pub mod error;
pub mod file;
pub mod history;
pub mod memory;
pub mod store;
pub mod watcher;

pub use error::{Result, StorageError};
pub use file::FileStore;
pub use history::{HistoryRecorder, KIND_RULE_EXECUTION, KIND_SENSOR_DATA};
pub use memory::MemoryStore;
pub use store::{QueryFilter, QueryOp, QueryPage, Record, Store};
pub use watcher::{CallbackToken, ChangeCallback, ConfigWatcher, ErrorCallback};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
