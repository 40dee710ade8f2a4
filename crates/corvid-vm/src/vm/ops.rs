// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Operand helpers for arithmetic, comparison and conversion instructions.
//!
//! Each helper takes its operands in source order (`lhs` was pushed first)
//! and dispatches on their runtime variants. Integer arithmetic wraps.

use crate::compiler::bytecode::OpCode;
use crate::error::RuntimeErrorKind;
use crate::runtime::value::Value;

fn not_null(op: OpCode, lhs: &Value, rhs: &Value) -> Result<(), RuntimeErrorKind> {
    if lhs.is_null() || rhs.is_null() {
        Err(RuntimeErrorKind::NullOperand(op))
    } else {
        Ok(())
    }
}

fn mismatch(op: OpCode, lhs: &Value, rhs: &Value) -> RuntimeErrorKind {
    // Report the operand that breaks the pairing
    let found = match lhs {
        Value::Int(_) | Value::Double(_) | Value::Str(_) => rhs.type_name(),
        _ => lhs.type_name(),
    };
    RuntimeErrorKind::TypeMismatch { op, found }
}

/// `ADD`: numeric addition or string concatenation.
pub fn add(lhs: Value, rhs: Value) -> Result<Value, RuntimeErrorKind> {
    not_null(OpCode::Add, &lhs, &rhs)?;
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Ok(Value::Str(a))
        }
        (lhs, rhs) => Err(mismatch(OpCode::Add, &lhs, &rhs)),
    }
}

/// `SUB`
pub fn sub(lhs: Value, rhs: Value) -> Result<Value, RuntimeErrorKind> {
    numeric(OpCode::Sub, lhs, rhs, i64::wrapping_sub, |a, b| a - b)
}

/// `MUL`
pub fn mul(lhs: Value, rhs: Value) -> Result<Value, RuntimeErrorKind> {
    numeric(OpCode::Mul, lhs, rhs, i64::wrapping_mul, |a, b| a * b)
}

/// `DIV`: truncating for integers. A zero divisor is an error for both
/// integers and doubles.
pub fn div(lhs: Value, rhs: Value) -> Result<Value, RuntimeErrorKind> {
    not_null(OpCode::Div, &lhs, &rhs)?;
    match (lhs, rhs) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeErrorKind::DivisionByZero),
        (Value::Double(_), Value::Double(b)) if b == 0.0 => Err(RuntimeErrorKind::DivisionByZero),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_div(b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        (lhs, rhs) => Err(mismatch(OpCode::Div, &lhs, &rhs)),
    }
}

fn numeric(
    op: OpCode,
    lhs: Value,
    rhs: Value,
    int_op: fn(i64, i64) -> i64,
    double_op: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeErrorKind> {
    not_null(op, &lhs, &rhs)?;
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(a, b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(double_op(a, b))),
        (lhs, rhs) => Err(mismatch(op, &lhs, &rhs)),
    }
}

/// `CMPLT`
pub fn less(lhs: &Value, rhs: &Value) -> Result<bool, RuntimeErrorKind> {
    order(OpCode::CmpLt, lhs, rhs, |ord| ord.is_lt())
}

/// `CMPLE`
pub fn less_eq(lhs: &Value, rhs: &Value) -> Result<bool, RuntimeErrorKind> {
    order(OpCode::CmpLe, lhs, rhs, |ord| ord.is_le())
}

fn order(
    op: OpCode,
    lhs: &Value,
    rhs: &Value,
    test: fn(std::cmp::Ordering) -> bool,
) -> Result<bool, RuntimeErrorKind> {
    not_null(op, lhs, rhs)?;
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(test(a.cmp(b))),
        // NaN compares false against everything
        (Value::Double(a), Value::Double(b)) => Ok(a.partial_cmp(b).is_some_and(test)),
        (Value::Str(a), Value::Str(b)) => Ok(test(a.cmp(b))),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

/// `AND` and `OR`.
pub fn logical(op: OpCode, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeErrorKind> {
    match (lhs.as_bool(), rhs.as_bool()) {
        (Some(a), Some(b)) if op == OpCode::And => Ok(a && b),
        (Some(a), Some(b)) => Ok(a || b),
        _ => Err(RuntimeErrorKind::NonBoolean(op)),
    }
}

/// `GETC`: the one-character string at `index`.
pub fn char_at(s: &Value, index: &Value) -> Result<Value, RuntimeErrorKind> {
    let (s, index) = match (s, index) {
        (Value::Null, _) | (_, Value::Null) => {
            return Err(RuntimeErrorKind::NullOperand(OpCode::GetC));
        }
        (Value::Str(s), Value::Int(index)) => (s, *index),
        (s, index) => return Err(mismatch(OpCode::GetC, s, index)),
    };
    usize::try_from(index)
        .ok()
        .and_then(|i| s.chars().nth(i))
        .map(|c| Value::Str(c.to_string()))
        .ok_or_else(|| RuntimeErrorKind::IndexOutOfBounds {
            index,
            len: s.chars().count(),
        })
}

/// `TOINT`: parses a string or truncates a double.
pub fn to_int(value: Value) -> Result<Value, RuntimeErrorKind> {
    match value {
        Value::Null => Err(RuntimeErrorKind::NullOperand(OpCode::ToInt)),
        Value::Str(s) => s
            .parse()
            .map(Value::Int)
            .map_err(|_| RuntimeErrorKind::InvalidConversion {
                target: "int",
                input: s,
            }),
        Value::Double(n) => Ok(Value::Int(n.trunc() as i64)),
        other => Err(RuntimeErrorKind::TypeMismatch {
            op: OpCode::ToInt,
            found: other.type_name(),
        }),
    }
}

/// `TODBL`: parses a string or widens an integer.
pub fn to_dbl(value: Value) -> Result<Value, RuntimeErrorKind> {
    match value {
        Value::Null => Err(RuntimeErrorKind::NullOperand(OpCode::ToDbl)),
        Value::Str(s) => s
            .parse()
            .map(Value::Double)
            .map_err(|_| RuntimeErrorKind::InvalidConversion {
                target: "double",
                input: s,
            }),
        Value::Int(n) => Ok(Value::Double(n as f64)),
        other => Err(RuntimeErrorKind::TypeMismatch {
            op: OpCode::ToDbl,
            found: other.type_name(),
        }),
    }
}

/// `TOSTR`: formats a number.
pub fn to_str(value: Value) -> Result<Value, RuntimeErrorKind> {
    match value {
        Value::Null => Err(RuntimeErrorKind::NullOperand(OpCode::ToStr)),
        Value::Int(_) | Value::Double(_) => Ok(Value::Str(value.to_string())),
        other => Err(RuntimeErrorKind::TypeMismatch {
            op: OpCode::ToStr,
            found: other.type_name(),
        }),
    }
}
