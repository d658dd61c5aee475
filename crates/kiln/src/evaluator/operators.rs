use std::cmp::Ordering;

use crate::parser::{BinaryOperator, UnaryOperator};
use crate::value::Value;

pub(super) fn unary(operator: UnaryOperator, value: Value) -> Value {
    match operator {
        UnaryOperator::Not => Value::Bool(!value.is_truthy()),
        UnaryOperator::Negate => Value::Number(-value.to_number()),
        UnaryOperator::Plus => Value::Number(value.to_number()),
        UnaryOperator::Typeof => Value::from(value.type_of()),
        UnaryOperator::Await => value,
    }
}

pub(super) fn binary(operator: BinaryOperator, a: &Value, b: &Value) -> Value {
    match operator {
        BinaryOperator::Add => add(a, b),
        BinaryOperator::Subtract => Value::Number(a.to_number() - b.to_number()),
        BinaryOperator::Multiply => Value::Number(a.to_number() * b.to_number()),
        BinaryOperator::Divide => Value::Number(a.to_number() / b.to_number()),
        BinaryOperator::Remainder => Value::Number(a.to_number() % b.to_number()),
        BinaryOperator::Equal => Value::Bool(a.loose_equals(b)),
        BinaryOperator::NotEqual => Value::Bool(!a.loose_equals(b)),
        BinaryOperator::StrictEqual => Value::Bool(a.strict_equals(b)),
        BinaryOperator::StrictNotEqual => Value::Bool(!a.strict_equals(b)),
        BinaryOperator::Less => Value::Bool(compare(a, b) == Some(Ordering::Less)),
        BinaryOperator::LessOrEqual => Value::Bool(matches!(
            compare(a, b),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOperator::Greater => Value::Bool(compare(a, b) == Some(Ordering::Greater)),
        BinaryOperator::GreaterOrEqual => Value::Bool(matches!(
            compare(a, b),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

fn add(a: &Value, b: &Value) -> Value {
    if let (Value::Number(a), Value::Number(b)) = (a, b) {
        return Value::Number(a + b);
    }
    if is_textual(a) || is_textual(b) {
        return Value::from(format!("{}{}", a.to_text(), b.to_text()));
    }
    Value::Number(a.to_number() + b.to_number())
}

// Operands that `+` turns into text.
fn is_textual(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_)
    )
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}
