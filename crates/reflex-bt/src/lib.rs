//! Reflex behavior-tree runtime.
//!
//! Tri-state behavior trees over the Reflex sensor context: composites
//! (sequence, selector, parallel), decorators (inverter, repeater,
//! until-fail, until-success) and named leaves bound to host callbacks at
//! tick time. Trees are defined in JSON and driven by a thread-safe manager
//! keyed by tree name.

pub mod error;
pub mod executor;
pub mod manager;
pub mod node;
pub mod parser;

pub use error::{BtError, Result};
pub use executor::{ExecStats, Executor};
pub use manager::BtManager;
pub use node::{
    BtActionFn, BtConditionFn, BtNode, ParallelPolicy, Registry, Status, UNTIL_ITERATION_CAP,
};
pub use parser::{parse_tree, parse_tree_file, tree_to_json};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
