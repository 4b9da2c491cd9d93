//! Reflex rule engine core.
//!
//! The evaluation half of the Reflex automation runtime: a typed value
//! model, a per-tick context, pre-parsed expression trees, composable
//! conditions and a priority-ordered rule engine with throttling, one-shot
//! rules and rule groups.
//!
//! ## Example
//!
//! ```rust
//! use reflex_core::{Context, Engine};
//!
//! let mut engine = Engine::new();
//! engine.register_action("fan_on", Box::new(|params, _ctx| {
//!     println!("fan on at level {}", params.get("level"));
//! }));
//!
//! engine.load(&serde_json::json!({"rules": [{
//!     "id": "overheat",
//!     "when": {"left": "temperature", "op": ">", "right": 40},
//!     "do": [{"action": "fan_on", "params": {"level": 2}}],
//! }]})).unwrap();
//!
//! let mut ctx = Context::new();
//! ctx.set("temperature", 45);
//! engine.tick(&mut ctx);
//! ```

pub mod condition;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod history;
pub mod rule;
pub mod value;

pub use condition::{CmpOp, Condition};
pub use context::Context;
pub use engine::{ActionFn, Engine};
pub use error::{EngineError, Result};
pub use expr::{BinOp, Expr, FuncKind};
pub use history::{HistoryProvider, RingHistoryProvider};
pub use rule::{clamp_priority, ActionStep, Rule, RuleMode};
pub use value::Value;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
