use regex::Regex;
use serde_json::Value;
use vigil_common::ProbeContext;

use crate::parser::{Condition, Op, Operand, Parsed, PathSeg};

/// A resolved operand: either a concrete JSON value or "no value".
/// Missing context keys and failed extractions both resolve to `Undefined`;
/// any comparison touching `Undefined` or null is false.
enum Resolved {
    Value(Value),
    Undefined,
}

impl Condition {
    /// Evaluates the condition against a probe context. Total: every fault
    /// (bad parse, missing key, type mismatch, bad regex) yields `false`.
    pub fn evaluate(&self, context: &ProbeContext) -> bool {
        match &self.parsed {
            Parsed::Invalid => false,
            Parsed::Bare(operand) => {
                matches!(resolve(operand, context), Resolved::Value(Value::Bool(true)))
            }
            Parsed::Compare {
                lhs,
                op,
                rhs,
                regex,
            } => {
                let left = resolve(lhs, context);
                let right = resolve(rhs, context);
                let (Resolved::Value(left), Resolved::Value(right)) = (left, right) else {
                    return false;
                };
                if left.is_null() || right.is_null() {
                    return false;
                }
                apply(*op, &left, &right, regex.as_ref())
            }
        }
    }
}

fn resolve(operand: &Operand, context: &ProbeContext) -> Resolved {
    match operand {
        Operand::Invalid | Operand::Undefined => Resolved::Undefined,
        Operand::Literal(value) => Resolved::Value(value.clone()),
        Operand::Placeholder { key, path } => {
            let Some(mut current) = context.get(key) else {
                return Resolved::Undefined;
            };
            for segment in path {
                let next = match segment {
                    PathSeg::Key(name) => current.get(name),
                    PathSeg::Index(index) => current.get(index),
                };
                match next {
                    Some(value) => current = value,
                    None => return Resolved::Undefined,
                }
            }
            Resolved::Value(current.clone())
        }
    }
}

fn apply(op: Op, left: &Value, right: &Value, compiled: Option<&Regex>) -> bool {
    match op {
        Op::Eq => loose_eq(left, right),
        Op::Ne => !loose_eq(left, right),
        Op::Gt | Op::Ge | Op::Lt | Op::Le => ordered(op, left, right),
        Op::Contains => stringify(left).contains(&stringify(right)),
        Op::Matches => {
            let pattern;
            let regex = match compiled {
                Some(regex) => regex,
                None => {
                    pattern = match Regex::new(&stringify(right)) {
                        Ok(regex) => regex,
                        Err(_) => return false,
                    };
                    &pattern
                }
            };
            regex.is_match(&stringify(left))
        }
    }
}

/// Loose equality: numbers compare numerically, a number and a numeric string
/// coerce, booleans coerce to 0/1 against numbers, everything else compares
/// structurally.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_), Value::String(s)) | (Value::String(s), Value::Number(_)) => {
            let number = if left.is_number() { left } else { right };
            match (as_f64(number), s.trim().parse::<f64>()) {
                (Some(a), Ok(b)) => a == b,
                _ => false,
            }
        }
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Bool(b), Value::Number(_)) | (Value::Number(_), Value::Bool(b)) => {
            let number = if left.is_number() { left } else { right };
            as_f64(number) == Some(if *b { 1.0 } else { 0.0 })
        }
        _ => left == right,
    }
}

/// Ordered comparison: numeric on numbers, lexicographic on strings, false on
/// mixed types.
fn ordered(op: Op, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(_), Value::Number(_)) => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        Op::Gt => ordering.is_gt(),
        Op::Ge => ordering.is_ge(),
        Op::Lt => ordering.is_lt(),
        Op::Le => ordering.is_le(),
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|i| i as f64))
}

/// String form used by `contains` and `matches`: strings stay raw, scalars
/// use their display form, containers serialize as JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
