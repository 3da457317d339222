// Operator semantics, per source language

use std::cmp::Ordering;
use std::rc::Rc;

use super::format;
use super::ir::{BinOp, UnaryOp};
use super::value::{range_len, Value};
use crate::grammar::Language;

#[derive(Debug, Clone, PartialEq)]
pub enum OpError {
    ZeroDivision { modulo: bool },
    Overflow,
    Type(String),
}

impl OpError {
    /// Exception kind and message raised for this error in `language`.
    /// `None` kind means the error aborts the program outright.
    pub fn describe(&self, language: Language) -> (Option<&'static str>, String) {
        match (self, language) {
            (OpError::ZeroDivision { modulo }, Language::Python) => (
                Some("ZeroDivisionError"),
                (if *modulo { "integer division or modulo by zero" } else { "division by zero" }).to_string(),
            ),
            (OpError::ZeroDivision { .. }, Language::Java) => (Some("ArithmeticException"), "/ by zero".to_string()),
            (OpError::ZeroDivision { modulo }, Language::Rust) => (
                None,
                (if *modulo {
                    "attempt to calculate the remainder with a divisor of zero"
                } else {
                    "attempt to divide by zero"
                })
                .to_string(),
            ),
            (OpError::ZeroDivision { .. }, _) => (None, "Floating point exception: division by zero".to_string()),
            (OpError::Overflow, Language::Python) => (Some("OverflowError"), "integer overflow".to_string()),
            (OpError::Overflow, Language::Java) => (Some("ArithmeticException"), "integer overflow".to_string()),
            (OpError::Overflow, Language::Rust) => (None, "attempt to compute with overflow".to_string()),
            (OpError::Overflow, _) => (None, "signed integer overflow".to_string()),
            (OpError::Type(message), Language::Python) => (Some("TypeError"), message.clone()),
            (OpError::Type(message), Language::Java) => (Some("IllegalArgumentException"), message.clone()),
            (OpError::Type(message), _) => (None, message.clone()),
        }
    }
}

enum Num {
    Int(i64, i64),
    Float(f64, f64),
}

fn is_int_like(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_) | Value::Char(_))
}

fn numeric(left: &Value, right: &Value) -> Option<Num> {
    if is_int_like(left) && is_int_like(right) {
        Some(Num::Int(left.as_int()?, right.as_int()?))
    } else if left.is_number() && right.is_number() {
        Some(Num::Float(left.as_f64()?, right.as_f64()?))
    } else {
        None
    }
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::In => "in",
        BinOp::NotIn => "not in",
        BinOp::Is => "is",
        BinOp::IsNot => "is not",
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> OpError {
    match op {
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => OpError::Type(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol(op),
            left.type_name(),
            right.type_name()
        )),
        _ => OpError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol(op),
            left.type_name(),
            right.type_name()
        )),
    }
}

fn checked(result: Option<i64>) -> Result<Value, OpError> {
    result.map(Value::Int).ok_or(OpError::Overflow)
}

/// Whether `needle` occurs in `haystack` (`in`, `contains`).
pub fn contains(haystack: &Value, needle: &Value) -> Result<bool, OpError> {
    Ok(match haystack.deref() {
        Value::List(items) => items.borrow().iter().any(|v| v.equals(needle)),
        Value::Tuple(items) => items.iter().any(|v| v.equals(needle)),
        Value::Dict(entries) => entries.borrow().iter().any(|(k, _)| k.equals(needle)),
        wrapped @ Value::Object(_) if wrapped.payload().is_some() => {
            return contains(&wrapped.payload().unwrap_or(Value::None), needle)
        }
        Value::Str(s) => match needle.deref() {
            Value::Str(n) => s.contains(n.as_str()),
            Value::Char(c) => s.contains(c),
            other => {
                return Err(OpError::Type(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )))
            }
        },
        Value::Range { start, end, step } => match needle.as_int() {
            Some(n) => {
                let offset = n - start;
                let inside = if step > 0 { n >= start && n < end } else { n <= start && n > end };
                step != 0 && inside && offset % step == 0 && range_len(start, end, step) > 0
            }
            None => false,
        },
        other => {
            return Err(OpError::Type(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )))
        }
    })
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::None, Value::None) => true,
        (a, b) => a.equals(b),
    }
}

/// Callers bound `items.len() * count` first.
fn repeat(items: &[Value], count: i64) -> Vec<Value> {
    let count = count.max(0) as usize;
    if items.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(items.len().saturating_mul(count));
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

pub fn binary(op: BinOp, left: &Value, right: &Value, language: Language) -> Result<Value, OpError> {
    let (left, right) = (left.deref(), right.deref());
    let python = language == Language::Python;

    match op {
        BinOp::Eq => return Ok(Value::Bool(left.equals(&right))),
        BinOp::Ne => return Ok(Value::Bool(!left.equals(&right))),
        BinOp::Is => return Ok(Value::Bool(identical(&left, &right))),
        BinOp::IsNot => return Ok(Value::Bool(!identical(&left, &right))),
        BinOp::In => return contains(&right, &left).map(Value::Bool),
        BinOp::NotIn => return contains(&right, &left).map(|b| Value::Bool(!b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = left.compare(&right).ok_or_else(|| unsupported(op, &left, &right))?;
            let result = match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    // Non-numeric operands first: strings, sequences, formatting.
    match (op, &left, &right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::Str(a), Value::Char(b)) if language != Language::Python => {
            return Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::Str(a), other) if language == Language::Java => {
            return Ok(Value::Str(format!("{}{}", a, other.display(language))))
        }
        (BinOp::Add, other, Value::Str(b)) if language == Language::Java => {
            return Ok(Value::Str(format!("{}{}", other.display(language), b)))
        }
        (BinOp::Add, Value::Char(a), Value::Str(b)) if language == Language::Cpp => {
            return Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) if python => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            return Ok(Value::list(items));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = (**a).clone();
            items.extend(b.iter().cloned());
            return Ok(Value::tuple(items));
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) if python => {
            return Ok(Value::Str(s.repeat((*n).max(0) as usize)))
        }
        (BinOp::Mul, Value::List(items), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::List(items)) if python => {
            return Ok(Value::list(repeat(&items.borrow(), *n)))
        }
        (BinOp::Mul, Value::Tuple(items), Value::Int(n)) if python => return Ok(Value::tuple(repeat(items, *n))),
        (BinOp::Mod, Value::Str(template), args) if python => {
            let args = match args {
                Value::Tuple(items) => (**items).clone(),
                other => vec![other.clone()],
            };
            return format::printf(template, &args, language).map(Value::Str).map_err(OpError::Type);
        }
        (BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => {
            return Ok(Value::Bool(match op {
                BinOp::BitAnd => *a & *b,
                BinOp::BitOr => *a | *b,
                _ => *a ^ *b,
            }))
        }
        _ => {}
    }

    let Some(num) = numeric(&left, &right) else {
        return Err(unsupported(op, &left, &right));
    };

    match (op, num) {
        (BinOp::Add, Num::Int(a, b)) => checked(a.checked_add(b)),
        (BinOp::Sub, Num::Int(a, b)) => checked(a.checked_sub(b)),
        (BinOp::Mul, Num::Int(a, b)) => checked(a.checked_mul(b)),
        (BinOp::Add, Num::Float(a, b)) => Ok(Value::Float(a + b)),
        (BinOp::Sub, Num::Float(a, b)) => Ok(Value::Float(a - b)),
        (BinOp::Mul, Num::Float(a, b)) => Ok(Value::Float(a * b)),

        (BinOp::Div, Num::Int(a, b)) if python => {
            if b == 0 {
                Err(OpError::ZeroDivision { modulo: false })
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        (BinOp::Div, Num::Int(a, b)) => {
            if b == 0 {
                Err(OpError::ZeroDivision { modulo: false })
            } else {
                checked(a.checked_div(b))
            }
        }
        (BinOp::Div, Num::Float(a, b)) => {
            if b == 0.0 && python {
                Err(OpError::ZeroDivision { modulo: false })
            } else {
                Ok(Value::Float(a / b))
            }
        }
        (BinOp::FloorDiv, Num::Int(a, b)) => {
            if b == 0 {
                Err(OpError::ZeroDivision { modulo: true })
            } else {
                let q = a.checked_div(b).ok_or(OpError::Overflow)?;
                Ok(Value::Int(if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q }))
            }
        }
        (BinOp::FloorDiv, Num::Float(a, b)) => {
            if b == 0.0 {
                Err(OpError::ZeroDivision { modulo: true })
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        (BinOp::Mod, Num::Int(a, b)) => {
            if b == 0 {
                return Err(OpError::ZeroDivision { modulo: true });
            }
            let r = a.checked_rem(b).ok_or(OpError::Overflow)?;
            if python && r != 0 && ((r < 0) != (b < 0)) {
                Ok(Value::Int(r + b))
            } else {
                Ok(Value::Int(r))
            }
        }
        (BinOp::Mod, Num::Float(a, b)) => {
            if b == 0.0 && python {
                return Err(OpError::ZeroDivision { modulo: true });
            }
            let r = a % b;
            if python && r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                Ok(Value::Float(r + b))
            } else {
                Ok(Value::Float(r))
            }
        }
        (BinOp::Pow, Num::Int(a, b)) => {
            if b < 0 {
                Ok(Value::Float((a as f64).powf(b as f64)))
            } else {
                let exp = u32::try_from(b).map_err(|_| OpError::Overflow)?;
                checked(a.checked_pow(exp))
            }
        }
        (BinOp::Pow, Num::Float(a, b)) => Ok(Value::Float(a.powf(b))),

        (BinOp::BitAnd, Num::Int(a, b)) => Ok(Value::Int(a & b)),
        (BinOp::BitOr, Num::Int(a, b)) => Ok(Value::Int(a | b)),
        (BinOp::BitXor, Num::Int(a, b)) => Ok(Value::Int(a ^ b)),
        (BinOp::Shl, Num::Int(a, b)) => {
            let shift = u32::try_from(b).map_err(|_| OpError::Type("negative shift count".into()))?;
            checked(a.checked_shl(shift).filter(|r| r >> shift == a))
        }
        (BinOp::Shr, Num::Int(a, b)) => {
            let shift = u32::try_from(b).map_err(|_| OpError::Type("negative shift count".into()))?;
            Ok(Value::Int(if shift >= 64 { if a < 0 { -1 } else { 0 } } else { a >> shift }))
        }
        _ => Err(unsupported(op, &left, &right)),
    }
}

pub fn unary(op: UnaryOp, operand: &Value, language: Language) -> Result<Value, OpError> {
    let operand = operand.deref();
    match (op, &operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Plus, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if is_int_like(v) => checked(v.as_int().and_then(i64::checked_neg)),
        (UnaryOp::Plus, v) if is_int_like(v) => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::BitNot, Value::Bool(b)) if language == Language::Rust => Ok(Value::Bool(!b)),
        (UnaryOp::BitNot, v) if is_int_like(v) => Ok(Value::Int(!v.as_int().unwrap_or(0))),
        (_, v) => Err(OpError::Type(format!("bad operand type for unary operator: '{}'", v.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: Value) -> i64 {
        v.as_int().unwrap()
    }

    #[test]
    fn test_division_per_language() {
        let (a, b) = (Value::Int(-7), Value::Int(2));
        assert!(matches!(binary(BinOp::Div, &a, &b, Language::Python).unwrap(), Value::Float(f) if f == -3.5));
        assert_eq!(int(binary(BinOp::Div, &a, &b, Language::C).unwrap()), -3);
        assert_eq!(int(binary(BinOp::FloorDiv, &a, &b, Language::Python).unwrap()), -4);
        assert_eq!(int(binary(BinOp::Mod, &a, &b, Language::Python).unwrap()), 1);
        assert_eq!(int(binary(BinOp::Mod, &a, &b, Language::Java).unwrap()), -1);
    }

    #[test]
    fn test_zero_division_mapping() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), Language::Python).unwrap_err();
        assert_eq!(err.describe(Language::Python), (Some("ZeroDivisionError"), "division by zero".to_string()));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), Language::Java).unwrap_err();
        assert_eq!(err.describe(Language::Java).0, Some("ArithmeticException"));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), Language::Rust).unwrap_err();
        assert_eq!(err.describe(Language::Rust).0, None);
        assert!(matches!(
            binary(BinOp::Div, &Value::Float(1.0), &Value::Float(0.0), Language::C),
            Ok(Value::Float(f)) if f.is_infinite()
        ));
    }

    #[test]
    fn test_string_operators() {
        let out = binary(BinOp::Add, &Value::str("n="), &Value::Int(3), Language::Java).unwrap();
        assert_eq!(out.display(Language::Java), "n=3");
        assert!(binary(BinOp::Add, &Value::str("n="), &Value::Int(3), Language::Python).is_err());
        let out = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(2), Language::Python).unwrap();
        assert_eq!(out.display(Language::Python), "abab");
        let out = binary(BinOp::Mod, &Value::str("%d items"), &Value::Int(4), Language::Python).unwrap();
        assert_eq!(out.display(Language::Python), "4 items");
    }

    #[test]
    fn test_overflow_is_reported() {
        let err = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2), Language::Rust).unwrap_err();
        assert_eq!(err, OpError::Overflow);
    }

    #[test]
    fn test_membership() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(binary(BinOp::In, &Value::Int(2), &list, Language::Python), Ok(Value::Bool(true))));
        let range = Value::Range { start: 0, end: 10, step: 3 };
        assert!(contains(&range, &Value::Int(9)).unwrap());
        assert!(!contains(&range, &Value::Int(4)).unwrap());
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
    }

    #[test]
    fn test_unary() {
        assert_eq!(int(unary(UnaryOp::Neg, &Value::Int(5), Language::C).unwrap()), -5);
        assert!(matches!(unary(UnaryOp::Not, &Value::Int(0), Language::Python), Ok(Value::Bool(true))));
        assert_eq!(int(unary(UnaryOp::BitNot, &Value::Int(0), Language::C).unwrap()), -1);
    }
}
