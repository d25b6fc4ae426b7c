// SPDX-License-Identifier: MIT

//! Condition evaluation against the run context

use super::ast::{CompareOp, Expression, Literal};
use crate::cadence::workflow::state::Context;
use serde_json::Value;

/// Evaluate an expression. Missing paths behave like `null`.
pub fn evaluate(expr: &Expression, context: &Context) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::Truthy(path) => context.get_path(path).map(truthy).unwrap_or(false),
        Expression::Compare { path, op, value } => compare(context.get_path(path), *op, value),
        Expression::And(l, r) => evaluate(l, context) && evaluate(r, context),
        Expression::Or(l, r) => evaluate(l, context) || evaluate(r, context),
        Expression::Not(inner) => !evaluate(inner, context),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn compare(left: Option<&Value>, op: CompareOp, right: &Literal) -> bool {
    match op {
        CompareOp::Eq => equals(left, right),
        CompareOp::NotEq => !equals(left, right),
        CompareOp::Gt => ordered(left, right, |a, b| a > b),
        CompareOp::Gte => ordered(left, right, |a, b| a >= b),
        CompareOp::Lt => ordered(left, right, |a, b| a < b),
        CompareOp::Lte => ordered(left, right, |a, b| a <= b),
        CompareOp::Contains => contains(left, right),
    }
}

fn matches_literal(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::Null, Literal::Null) => true,
        (Value::String(s), Literal::String(l)) => s == l,
        (Value::Bool(b), Literal::Boolean(l)) => b == l,
        (Value::Number(n), Literal::Number(l)) => n
            .as_f64()
            .map(|f| (f - l).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => false,
    }
}

fn equals(left: Option<&Value>, right: &Literal) -> bool {
    match left {
        None => *right == Literal::Null,
        Some(value) => matches_literal(value, right),
    }
}

fn ordered(left: Option<&Value>, right: &Literal, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (left.and_then(Value::as_f64), right) {
        (Some(l), Literal::Number(r)) => cmp(l, *r),
        _ => false,
    }
}

fn contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(needle)) => s.contains(needle.as_str()),
        (Some(Value::Array(items)), literal) => {
            items.iter().any(|item| matches_literal(item, literal))
        }
        (Some(Value::Object(map)), Literal::String(key)) => map.contains_key(key),
        _ => false,
    }
}
