//! Expression trees and their evaluator.
//!
//! Expressions arrive pre-parsed as JSON trees (no precedence parsing); they
//! are converted once into an [`Expr`] at load time and evaluated against
//! the context on every tick. Evaluation is pure and total: a type mismatch
//! resolves to `Value::Null` instead of an error, so a misconfigured
//! expression can never abort a tick.

use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::history::HistoryProvider;
use crate::value::Value;

/// Binary operators over two evaluated sub-expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

impl BinOp {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "&&" => Self::And,
            "||" => Self::Or,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Built-in expression functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuncKind {
    Contains,
    StartsWith,
    EndsWith,
    TimeBetween,
    DayOfWeek,
    AvgLastN,
    MaxLastN,
    Trend,
}

impl FuncKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "contains" => Self::Contains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "time_between" => Self::TimeBetween,
            "day_of_week" => Self::DayOfWeek,
            "avg_last_n" => Self::AvgLastN,
            "max_last_n" => Self::MaxLastN,
            "trend" => Self::Trend,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::TimeBetween => "time_between",
            Self::DayOfWeek => "day_of_week",
            Self::AvgLastN => "avg_last_n",
            Self::MaxLastN => "max_last_n",
            Self::Trend => "trend",
        }
    }

    /// Exact argument count each function requires.
    pub fn arity(&self) -> usize {
        match self {
            Self::Contains | Self::StartsWith | Self::EndsWith => 2,
            Self::TimeBetween => 3,
            Self::DayOfWeek => 1,
            Self::AvgLastN | Self::MaxLastN | Self::Trend => 2,
        }
    }
}

/// A parsed expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),
    Var(String),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Func {
        func: FuncKind,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Parse the JSON expression grammar: a bare string is a variable
    /// reference, a number or boolean a literal, an object with `op` a
    /// binary operation and an object with `func` a function call.
    pub fn from_json(json: &serde_json::Value) -> Result<Expr> {
        match json {
            serde_json::Value::String(name) => Ok(Expr::Var(name.clone())),
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) => {
                Ok(Expr::Literal(Value::from(json)))
            }
            serde_json::Value::Object(map) => {
                if let Some(op_name) = map.get("op").and_then(|v| v.as_str()) {
                    let op = BinOp::parse(op_name).ok_or_else(|| {
                        EngineError::Parse(format!("unknown operator: {op_name}"))
                    })?;
                    let left = map.get("left").ok_or_else(|| {
                        EngineError::Parse(format!("operator {op_name} is missing left operand"))
                    })?;
                    let right = map.get("right").ok_or_else(|| {
                        EngineError::Parse(format!("operator {op_name} is missing right operand"))
                    })?;
                    Ok(Expr::BinOp {
                        op,
                        left: Box::new(Expr::from_json(left)?),
                        right: Box::new(Expr::from_json(right)?),
                    })
                } else if let Some(func_name) = map.get("func").and_then(|v| v.as_str()) {
                    let func = FuncKind::parse(func_name).ok_or_else(|| {
                        EngineError::Parse(format!("unknown function: {func_name}"))
                    })?;
                    let args = match map.get("args") {
                        Some(serde_json::Value::Array(items)) => items
                            .iter()
                            .map(Expr::from_json)
                            .collect::<Result<Vec<_>>>()?,
                        Some(other) => {
                            return Err(EngineError::Parse(format!(
                                "function {func_name} args must be an array, got {other}"
                            )))
                        }
                        None => Vec::new(),
                    };
                    Ok(Expr::Func { func, args })
                } else {
                    Ok(Expr::Literal(Value::from(json)))
                }
            }
            _ => Ok(Expr::Literal(Value::from(json))),
        }
    }

    /// Evaluate without history; aggregate functions fall back to the
    /// current context value.
    pub fn eval(&self, ctx: &Context) -> Value {
        self.eval_with(ctx, None)
    }

    /// Evaluate against `ctx`, consulting `history` for the aggregate
    /// functions when present.
    pub fn eval_with(&self, ctx: &Context, history: Option<&dyn HistoryProvider>) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Var(name) => ctx.get(name),
            Expr::BinOp { op, left, right } => {
                // && and || short-circuit on the left operand's truthiness.
                match op {
                    BinOp::And => {
                        if !left.eval_with(ctx, history).truthy() {
                            return Value::Bool(false);
                        }
                        Value::Bool(right.eval_with(ctx, history).truthy())
                    }
                    BinOp::Or => {
                        if left.eval_with(ctx, history).truthy() {
                            return Value::Bool(true);
                        }
                        Value::Bool(right.eval_with(ctx, history).truthy())
                    }
                    _ => {
                        let l = left.eval_with(ctx, history);
                        let r = right.eval_with(ctx, history);
                        apply_bin_op(*op, &l, &r)
                    }
                }
            }
            Expr::Func { func, args } => self.eval_func(*func, args, ctx, history),
        }
    }

    fn eval_func(
        &self,
        func: FuncKind,
        args: &[Expr],
        ctx: &Context,
        history: Option<&dyn HistoryProvider>,
    ) -> Value {
        if args.len() != func.arity() {
            return Value::Null;
        }
        match func {
            FuncKind::Contains | FuncKind::StartsWith | FuncKind::EndsWith => {
                let a = args[0].eval_with(ctx, history);
                let b = args[1].eval_with(ctx, history);
                let result = match (a.as_str(), b.as_str()) {
                    (Some(s), Some(needle)) => match func {
                        FuncKind::Contains => s.contains(needle),
                        FuncKind::StartsWith => s.starts_with(needle),
                        _ => s.ends_with(needle),
                    },
                    _ => false,
                };
                Value::Bool(result)
            }
            // Input time format is still unspecified, so this stays a stub
            // that never matches.
            FuncKind::TimeBetween => Value::Bool(false),
            FuncKind::DayOfWeek => {
                // Requires a string-typed argument but reports the current
                // local weekday regardless of its value (0 = Sunday).
                match args[0].eval_with(ctx, history) {
                    Value::Str(_) => {
                        Value::Int(Local::now().weekday().num_days_from_sunday() as i64)
                    }
                    _ => Value::Int(-1),
                }
            }
            FuncKind::AvgLastN | FuncKind::MaxLastN | FuncKind::Trend => {
                let var = match aggregate_var_name(&args[0], ctx, history) {
                    Some(v) => v,
                    None => return Value::Null,
                };
                let n = match args[1].eval_with(ctx, history).as_i64() {
                    Some(n) if n > 0 => n as usize,
                    _ => return Value::Null,
                };
                match history {
                    Some(h) => match func {
                        FuncKind::AvgLastN => h.avg_last_n(ctx, &var, n),
                        FuncKind::MaxLastN => h.max_last_n(ctx, &var, n),
                        _ => h.trend(ctx, &var, n),
                    },
                    // Documented fallback: no history provider configured.
                    None => match func {
                        FuncKind::Trend => Value::Int(0),
                        _ => ctx.get(&var),
                    },
                }
            }
        }
    }

    /// Serialize back into the JSON expression grammar.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Expr::Literal(v) => serde_json::Value::from(v),
            Expr::Var(name) => serde_json::Value::String(name.clone()),
            Expr::BinOp { op, left, right } => serde_json::json!({
                "op": op.as_str(),
                "left": left.to_json(),
                "right": right.to_json(),
            }),
            Expr::Func { func, args } => serde_json::json!({
                "func": func.as_str(),
                "args": args.iter().map(Expr::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

/// The aggregate functions name their variable, so a `Var` argument is read
/// as the name itself rather than dereferenced through the context.
fn aggregate_var_name(
    arg: &Expr,
    ctx: &Context,
    history: Option<&dyn HistoryProvider>,
) -> Option<String> {
    match arg {
        Expr::Var(name) => Some(name.clone()),
        other => other.eval_with(ctx, history).as_str().map(str::to_string),
    }
}

fn apply_bin_op(op: BinOp, l: &Value, r: &Value) -> Value {
    match op {
        // Arithmetic promotes both operands to float; integer inputs do not
        // get an integer-preserving path.
        BinOp::Add => match (l, r) {
            (Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
            _ => numeric_op(l, r, |a, b| a + b),
        },
        BinOp::Sub => numeric_op(l, r, |a, b| a - b),
        BinOp::Mul => numeric_op(l, r, |a, b| a * b),
        BinOp::Div => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) if b != 0.0 => Value::Float(a / b),
            _ => Value::Null,
        },
        BinOp::Mod => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) if b != 0.0 => Value::Float(a % b),
            _ => Value::Null,
        },
        BinOp::Eq => Value::Bool(l == r),
        BinOp::Ne => Value::Bool(l != r),
        BinOp::Gt => ordered(l, r, |o| o == std::cmp::Ordering::Greater),
        BinOp::Lt => ordered(l, r, |o| o == std::cmp::Ordering::Less),
        BinOp::Ge => ordered(l, r, |o| o != std::cmp::Ordering::Less),
        BinOp::Le => ordered(l, r, |o| o != std::cmp::Ordering::Greater),
        // Short-circuit forms handled in eval_with; kept total for direct use.
        BinOp::And => Value::Bool(l.truthy() && r.truthy()),
        BinOp::Or => Value::Bool(l.truthy() || r.truthy()),
    }
}

fn numeric_op(l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    if !(l.is_number() && r.is_number()) {
        return Value::Null;
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Value::Float(f(a, b)),
        _ => Value::Null,
    }
}

fn ordered(l: &Value, r: &Value, f: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    Value::Bool(l.compare(r).map(f).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Expr {
        Expr::from_json(&json).unwrap()
    }

    #[test]
    fn literal_and_var() {
        let mut ctx = Context::new();
        ctx.set("t", 42);
        assert_eq!(parse(serde_json::json!(5)).eval(&ctx), Value::Int(5));
        assert_eq!(parse(serde_json::json!("t")).eval(&ctx), Value::Int(42));
        assert_eq!(parse(serde_json::json!("missing")).eval(&ctx), Value::Null);
    }

    #[test]
    fn arithmetic_promotes_to_float() {
        let ctx = Context::new();
        // Integer operands come back as floats, like every other op.
        let sum = parse(serde_json::json!({"op": "+", "left": 2, "right": 3}));
        assert!(matches!(sum.eval(&ctx), Value::Float(f) if f == 5.0));
        let product = parse(serde_json::json!({"op": "*", "left": 4, "right": 4}));
        assert!(matches!(product.eval(&ctx), Value::Float(f) if f == 16.0));
        let div = parse(serde_json::json!({"op": "/", "left": 7, "right": 2}));
        assert_eq!(div.eval(&ctx), Value::Float(3.5));
        let rem = parse(serde_json::json!({"op": "%", "left": 7, "right": 2}));
        assert!(matches!(rem.eval(&ctx), Value::Float(f) if f == 1.0));
    }

    #[test]
    fn large_integer_arithmetic_does_not_wrap() {
        let mut ctx = Context::new();
        ctx.set("big", i64::MAX);
        let sum = parse(serde_json::json!({"op": "+", "left": "big", "right": 1}));
        // Float promotion loses integer precision at this magnitude but
        // never wraps negative.
        match sum.eval(&ctx) {
            Value::Float(f) => assert!(f >= i64::MAX as f64),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn string_concatenation() {
        let mut ctx = Context::new();
        ctx.set("room", "kitchen");
        let concat = parse(serde_json::json!({"op": "+", "left": "room", "right": {"op": "+", "left": "room", "right": "room"}}));
        // room + (room + room) concatenates three copies of the string.
        assert_eq!(concat.eval(&ctx), Value::Str("kitchenkitchenkitchen".into()));
    }

    #[test]
    fn division_by_zero_is_null() {
        let ctx = Context::new();
        let div = parse(serde_json::json!({"op": "/", "left": 1, "right": 0}));
        assert_eq!(div.eval(&ctx), Value::Null);
        let rem = parse(serde_json::json!({"op": "%", "left": 1, "right": 0}));
        assert_eq!(rem.eval(&ctx), Value::Null);
    }

    #[test]
    fn type_mismatch_is_null() {
        let mut ctx = Context::new();
        ctx.set("name", "sensor-a");
        let sub = parse(serde_json::json!({"op": "-", "left": "name", "right": 1}));
        assert_eq!(sub.eval(&ctx), Value::Null);
    }

    #[test]
    fn comparisons_and_logic() {
        let mut ctx = Context::new();
        ctx.set("t", 45);
        ctx.set("h", 80);
        let expr = parse(serde_json::json!({
            "op": "&&",
            "left": {"op": ">", "left": "t", "right": 40},
            "right": {"op": ">=", "left": "h", "right": 80},
        }));
        assert_eq!(expr.eval(&ctx), Value::Bool(true));
    }

    #[test]
    fn logical_ops_coerce_truthiness() {
        let mut ctx = Context::new();
        ctx.set("count", 0);
        let expr = parse(serde_json::json!({"op": "||", "left": "count", "right": "missing"}));
        assert_eq!(expr.eval(&ctx), Value::Bool(false));
    }

    #[test]
    fn string_predicates() {
        let mut ctx = Context::new();
        ctx.set("name", "living-room-lamp");
        ctx.set("prefix", "living");
        ctx.set("suffix", "lamp");

        let starts = parse(serde_json::json!({"func": "starts_with", "args": ["name", "prefix"]}));
        assert_eq!(starts.eval(&ctx), Value::Bool(true));
        let ends = parse(serde_json::json!({"func": "ends_with", "args": ["name", "suffix"]}));
        assert_eq!(ends.eval(&ctx), Value::Bool(true));

        // Bare strings in args are var refs; an unset one reads null and
        // the predicate is false rather than an error.
        let contains = parse(serde_json::json!({"func": "contains", "args": ["name", "room"]}));
        assert_eq!(contains.eval(&ctx), Value::Bool(false));
        ctx.set("room", "room");
        assert_eq!(contains.eval(&ctx), Value::Bool(true));
    }

    #[test]
    fn wrong_arity_is_null() {
        let ctx = Context::new();
        let expr = parse(serde_json::json!({"func": "contains", "args": ["a"]}));
        assert_eq!(expr.eval(&ctx), Value::Null);
    }

    #[test]
    fn time_between_stub_is_false() {
        let mut ctx = Context::new();
        ctx.set("now", "08:30");
        ctx.set("start", "08:00");
        ctx.set("end", "17:00");
        let expr =
            parse(serde_json::json!({"func": "time_between", "args": ["now", "start", "end"]}));
        assert_eq!(expr.eval(&ctx), Value::Bool(false));
    }

    #[test]
    fn day_of_week_bounds() {
        let mut ctx = Context::new();
        ctx.set("now", "whatever");
        let expr = parse(serde_json::json!({"func": "day_of_week", "args": ["now"]}));
        match expr.eval(&ctx) {
            Value::Int(d) => assert!((0..=6).contains(&d)),
            other => panic!("expected int weekday, got {other:?}"),
        }
        let mut num_ctx = Context::new();
        num_ctx.set("now", 3);
        assert_eq!(expr.eval(&num_ctx), Value::Int(-1));
    }

    #[test]
    fn aggregates_without_history_fall_back() {
        let mut ctx = Context::new();
        ctx.set("t", 25);
        let avg = parse(serde_json::json!({"func": "avg_last_n", "args": ["t", 5]}));
        assert_eq!(avg.eval(&ctx), Value::Int(25));
        let trend = parse(serde_json::json!({"func": "trend", "args": ["t", 5]}));
        assert_eq!(trend.eval(&ctx), Value::Int(0));
    }

    #[test]
    fn aggregates_with_history() {
        use crate::history::RingHistoryProvider;
        let history = RingHistoryProvider::new(8);
        history.record("t", 10.0);
        history.record("t", 30.0);
        let mut ctx = Context::new();
        ctx.set("t", 30);
        let avg = parse(serde_json::json!({"func": "avg_last_n", "args": ["t", 2]}));
        assert_eq!(avg.eval_with(&ctx, Some(&history)), Value::Float(20.0));
    }

    #[test]
    fn unknown_operator_rejected_at_parse() {
        let err = Expr::from_json(&serde_json::json!({"op": "^", "left": 1, "right": 2}));
        assert!(err.is_err());
        let err = Expr::from_json(&serde_json::json!({"func": "median", "args": []}));
        assert!(err.is_err());
    }

    #[test]
    fn to_json_round_trip() {
        let json = serde_json::json!({
            "op": ">",
            "left": {"func": "avg_last_n", "args": ["t", 3]},
            "right": 40,
        });
        let expr = Expr::from_json(&json).unwrap();
        assert_eq!(expr.to_json(), json);
    }
}
