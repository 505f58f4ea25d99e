/// Tree-walking evaluation of a parsed trigger expression against `$input`.

use super::parser::{CompareOp, Expr, PathSegment};
use serde_json::Value;

/// Runtime value during evaluation; `Undefined` is what a missing path yields
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Composite(Value),
}

impl Operand {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Operand::Null,
            Value::Bool(b) => Operand::Bool(*b),
            Value::Number(n) => Operand::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Operand::Str(s.clone()),
            other => Operand::Composite(other.clone()),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::Undefined | Operand::Null => false,
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0 && !n.is_nan(),
            Operand::Str(s) => !s.is_empty(),
            Operand::Composite(_) => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Operand::Undefined | Operand::Composite(_) => f64::NAN,
            Operand::Null => 0.0,
            Operand::Bool(b) => f64::from(u8::from(*b)),
            Operand::Number(n) => *n,
            Operand::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    fn strict_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Number(a), Operand::Number(b)) => a == b,
            (Operand::Composite(a), Operand::Composite(b)) => a == b,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b) && a == b,
        }
    }
}

/// Evaluate and coerce to boolean
pub fn evaluate(expr: &Expr, input: &Value) -> bool {
    eval(expr, input).truthy()
}

fn eval(expr: &Expr, input: &Value) -> Operand {
    match expr {
        Expr::Literal(value) => Operand::from_json(value),
        Expr::Path(segments) => resolve(input, segments)
            .map(Operand::from_json)
            .unwrap_or(Operand::Undefined),
        Expr::Not(operand) => Operand::Bool(!eval(operand, input).truthy()),
        Expr::Negate(operand) => Operand::Number(-eval(operand, input).to_number()),
        Expr::And(left, right) => {
            let left = eval(left, input);
            if left.truthy() {
                eval(right, input)
            } else {
                left
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, input);
            if left.truthy() {
                left
            } else {
                eval(right, input)
            }
        }
        Expr::Compare { op, left, right } => {
            let left = eval(left, input);
            let right = eval(right, input);
            Operand::Bool(compare(*op, &left, &right))
        }
    }
}

fn compare(op: CompareOp, left: &Operand, right: &Operand) -> bool {
    let ordering = || match (left, right) {
        (Operand::Str(a), Operand::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };

    // NaN on either side compares false
    match op {
        CompareOp::StrictEq => left.strict_eq(right),
        CompareOp::StrictNe => !left.strict_eq(right),
        CompareOp::Gt => ordering().is_some_and(|o| o.is_gt()),
        CompareOp::Lt => ordering().is_some_and(|o| o.is_lt()),
        CompareOp::Ge => ordering().is_some_and(|o| o.is_ge()),
        CompareOp::Le => ordering().is_some_and(|o| o.is_le()),
    }
}

fn resolve<'v>(root: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Key(key) => current.as_object()?.get(key),
        PathSegment::Index(index) => current.as_array()?.get(*index),
    })
}
