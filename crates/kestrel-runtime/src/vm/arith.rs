//! Operator semantics shared by the dispatch loop and constant folding
//!
//! - Integer arithmetic wraps on overflow
//! - Mixed integer/float operands promote to float
//! - `+` on two strings concatenates
//! - Ordering is defined for numbers and for strings (lexicographic)
//! - Equality never fails: mismatched types compare unequal

use crate::bytecode::Opcode;
use crate::span::Span;
use crate::value::{RuntimeError, Value};

/// Binary operator with a VM opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    /// Map operator text to an operator, plus whether the operands swap
    ///
    /// `<` and `<=` have no opcode of their own: `a < b` is `b > a`.
    pub fn from_operator(text: &str) -> Option<(BinaryOp, bool)> {
        let op = match text {
            "+" => (BinaryOp::Add, false),
            "-" => (BinaryOp::Sub, false),
            "*" => (BinaryOp::Mul, false),
            "/" => (BinaryOp::Div, false),
            "%" => (BinaryOp::Mod, false),
            "==" => (BinaryOp::Equal, false),
            "!=" => (BinaryOp::NotEqual, false),
            ">" => (BinaryOp::Greater, false),
            ">=" => (BinaryOp::GreaterEqual, false),
            "<" => (BinaryOp::Greater, true),
            "<=" => (BinaryOp::GreaterEqual, true),
            _ => return None,
        };
        Some(op)
    }

    pub fn opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Equal => Opcode::Equal,
            BinaryOp::NotEqual => Opcode::NotEqual,
            BinaryOp::Greater => Opcode::Greater,
            BinaryOp::GreaterEqual => Opcode::GreaterEqual,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
        }
    }
}

/// Apply a binary operator
#[inline]
pub fn binary(op: BinaryOp, a: &Value, b: &Value, span: Span) -> Result<Value, RuntimeError> {
    // Integer fast path
    if let (Value::Integer(x), Value::Integer(y)) = (a, b) {
        let (x, y) = (*x, *y);
        return Ok(match op {
            BinaryOp::Add => Value::Integer(x.wrapping_add(y)),
            BinaryOp::Sub => Value::Integer(x.wrapping_sub(y)),
            BinaryOp::Mul => Value::Integer(x.wrapping_mul(y)),
            BinaryOp::Div => {
                if y == 0 {
                    return Err(RuntimeError::DivideByZero { span });
                }
                Value::Integer(x.wrapping_div(y))
            }
            BinaryOp::Mod => {
                if y == 0 {
                    return Err(RuntimeError::DivideByZero { span });
                }
                Value::Integer(x.wrapping_rem(y))
            }
            BinaryOp::Equal => Value::Boolean(x == y),
            BinaryOp::NotEqual => Value::Boolean(x != y),
            BinaryOp::Greater => Value::Boolean(x > y),
            BinaryOp::GreaterEqual => Value::Boolean(x >= y),
        });
    }

    match op {
        BinaryOp::Equal => return Ok(Value::Boolean(a == b)),
        BinaryOp::NotEqual => return Ok(Value::Boolean(a != b)),
        _ => {}
    }

    if let (Some(x), Some(y)) = (as_float(a), as_float(b)) {
        return float_op(op, x, y, span);
    }

    match (op, a, b) {
        (BinaryOp::Add, Value::String(x), Value::String(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::from(s))
        }
        (BinaryOp::Greater, Value::String(x), Value::String(y)) => Ok(Value::Boolean(x > y)),
        (BinaryOp::GreaterEqual, Value::String(x), Value::String(y)) => {
            Ok(Value::Boolean(x >= y))
        }
        _ => Err(RuntimeError::TypeError {
            msg: format!(
                "Invalid operands for {}: {} and {}",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ),
            span,
        }),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn float_op(op: BinaryOp, x: f64, y: f64, span: Span) -> Result<Value, RuntimeError> {
    Ok(match op {
        BinaryOp::Add => Value::Float(x + y),
        BinaryOp::Sub => Value::Float(x - y),
        BinaryOp::Mul => Value::Float(x * y),
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(RuntimeError::DivideByZero { span });
            }
            Value::Float(x / y)
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(RuntimeError::DivideByZero { span });
            }
            Value::Float(x % y)
        }
        BinaryOp::Equal => Value::Boolean(x == y),
        BinaryOp::NotEqual => Value::Boolean(x != y),
        BinaryOp::Greater => Value::Boolean(x > y),
        BinaryOp::GreaterEqual => Value::Boolean(x >= y),
    })
}

/// Unary minus
#[inline]
pub fn negate(value: &Value, span: Span) -> Result<Value, RuntimeError> {
    match value {
        Value::Integer(i) => Ok(Value::Integer(i.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(RuntimeError::TypeError {
            msg: format!("Cannot negate {}", other.type_name()),
            span,
        }),
    }
}

/// Logical not, by truthiness
#[inline]
pub fn not(value: &Value) -> Value {
    Value::Boolean(!value.is_truthy())
}
