//! Rule trigger conditions.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::expr::Expr;
use crate::history::HistoryProvider;
use crate::value::Value;

/// Comparison operators for simple conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CmpOp {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    /// Apply against two values using the JSON-like value ordering; ordered
    /// comparisons across incomparable types are false.
    pub fn evaluate(&self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Gt => left.compare(right) == Some(std::cmp::Ordering::Greater),
            Self::Lt => left.compare(right) == Some(std::cmp::Ordering::Less),
            Self::Ge => matches!(
                left.compare(right),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            Self::Le => matches!(
                left.compare(right),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
        }
    }
}

/// A rule trigger: a single comparison, an `all`/`any` tree of
/// sub-conditions, or a full expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `ctx[left] <op> right`.
    Simple {
        left: String,
        op: CmpOp,
        right: Value,
    },
    /// Every sub-condition must hold. An empty list evaluates to false,
    /// matching the long-standing evaluator behavior.
    All(Vec<Condition>),
    /// Any sub-condition may hold. Empty list evaluates to false.
    Any(Vec<Condition>),
    /// Arbitrary expression, truthy-coerced.
    Expr(Expr),
}

impl Condition {
    /// Parse the `when` grammar: `expression` wins over `all` over `any`
    /// over the simple `left`/`op`/`right` form.
    pub fn from_json(json: &serde_json::Value) -> Result<Condition> {
        let obj = json
            .as_object()
            .ok_or_else(|| EngineError::Parse(format!("condition must be an object, got {json}")))?;

        if let Some(expr) = obj.get("expression") {
            return Ok(Condition::Expr(Expr::from_json(expr)?));
        }
        if let Some(all) = obj.get("all") {
            let items = all.as_array().ok_or_else(|| {
                EngineError::Parse("condition 'all' must be an array".to_string())
            })?;
            return Ok(Condition::All(
                items.iter().map(Condition::from_json).collect::<Result<_>>()?,
            ));
        }
        if let Some(any) = obj.get("any") {
            let items = any.as_array().ok_or_else(|| {
                EngineError::Parse("condition 'any' must be an array".to_string())
            })?;
            return Ok(Condition::Any(
                items.iter().map(Condition::from_json).collect::<Result<_>>()?,
            ));
        }

        let left = obj
            .get("left")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Parse(format!("condition is missing 'left': {json}")))?;
        let op_name = obj
            .get("op")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Parse(format!("condition is missing 'op': {json}")))?;
        let op = CmpOp::parse(op_name)
            .ok_or_else(|| EngineError::Parse(format!("unknown comparison operator: {op_name}")))?;
        let right = obj
            .get("right")
            .map(Value::from)
            .ok_or_else(|| EngineError::Parse(format!("condition is missing 'right': {json}")))?;

        Ok(Condition::Simple {
            left: left.to_string(),
            op,
            right,
        })
    }

    pub fn eval(&self, ctx: &Context) -> bool {
        self.eval_with(ctx, None)
    }

    /// Evaluate with short-circuiting; `All` stops at the first false,
    /// `Any` at the first true.
    pub fn eval_with(&self, ctx: &Context, history: Option<&dyn HistoryProvider>) -> bool {
        match self {
            Condition::Simple { left, op, right } => op.evaluate(&ctx.get(left), right),
            Condition::All(items) => {
                !items.is_empty() && items.iter().all(|c| c.eval_with(ctx, history))
            }
            Condition::Any(items) => items.iter().any(|c| c.eval_with(ctx, history)),
            Condition::Expr(expr) => expr.eval_with(ctx, history).truthy(),
        }
    }
}
