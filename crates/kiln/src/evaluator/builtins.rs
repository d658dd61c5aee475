//! Globals, property access and methods of the primitive types.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{EvaluationFault, RenderError};
use crate::value::{Function, Object, Value};

// Arrays grown by assignment past their end stop here.
const MAX_ARRAY_GROWTH: usize = 1 << 20;

// Longest string `repeat` may build, in bytes.
const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

pub(super) fn global(name: &str) -> Option<Value> {
    let value = match name {
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        "String" => Function::from_fn("String", |arguments| {
            let text = arguments
                .first()
                .map(|value| value.to_text().into_owned())
                .unwrap_or_default();
            Ok(Value::from(text))
        })
        .into(),
        "Number" => Function::from_fn("Number", |arguments| {
            Ok(Value::Number(arguments.first().map_or(0., Value::to_number)))
        })
        .into(),
        "JSON" => namespace_object([("stringify", Function::from_fn("stringify", stringify))]),
        "Object" => namespace_object([("keys", Function::from_fn("keys", object_keys))]),
        _ => return None,
    };
    Some(value)
}

fn namespace_object<const N: usize>(functions: [(&str, Function); N]) -> Value {
    functions
        .into_iter()
        .map(|(name, function)| (Arc::from(name), Value::from(function)))
        .collect::<Object>()
        .into()
}

fn stringify(arguments: Vec<Value>) -> Result<Value, RenderError> {
    let value = arguments.first().cloned().unwrap_or_default();
    if matches!(value, Value::Undefined | Value::Function(_)) {
        return Ok(Value::Undefined);
    }
    let indent = match arguments.get(2) {
        Some(Value::Number(width)) if *width >= 1. => " ".repeat(width.min(10.) as usize),
        Some(Value::String(indent)) => indent.chars().take(10).collect(),
        _ => String::new(),
    };
    let json = if indent.is_empty() {
        serde_json::to_string(&value)
    } else {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        value
            .serialize(&mut serializer)
            .map(|()| String::from_utf8_lossy(&buffer).into_owned())
    };
    json.map(Value::from)
        .map_err(|error| EvaluationFault::type_error(error.to_string()).into())
}

fn object_keys(arguments: Vec<Value>) -> Result<Value, RenderError> {
    match arguments.first() {
        None | Some(Value::Undefined | Value::Null) => Err(EvaluationFault::type_error(
            "Cannot convert undefined or null to object",
        )
        .into()),
        Some(value) => Ok(Value::from(keys(value))),
    }
}

/// Keys visited by `for (key in value)`.
pub(super) fn keys(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(entries) => entries.keys().cloned().map(Value::String).collect(),
        Value::Array(items) => (0..items.len()).map(|index| index.to_string().into()).collect(),
        Value::String(text) => (0..text.chars().count())
            .map(|index| index.to_string().into())
            .collect(),
        _ => Vec::new(),
    }
}

pub(super) fn get_property(target: &Value, property: &str) -> Result<Value, RenderError> {
    let value = match target {
        Value::Undefined | Value::Null => {
            return Err(EvaluationFault::type_error(format!(
                "Cannot read properties of {} (reading '{property}')",
                target.to_text()
            ))
            .into());
        }
        Value::Object(entries) => entries.get(property).cloned().unwrap_or_default(),
        Value::Array(items) => match property {
            "length" => Value::from(items.len()),
            property => array_index(property)
                .and_then(|index| items.get(index).cloned())
                .unwrap_or_default(),
        },
        Value::String(text) => match property {
            "length" => Value::from(text.chars().count()),
            property => array_index(property)
                .and_then(|index| text.chars().nth(index))
                .map(|character| Value::from(character.to_string()))
                .unwrap_or_default(),
        },
        Value::Function(function) if property == "name" => Value::from(function.name()),
        _ => Value::Undefined,
    };
    Ok(value)
}

pub(super) fn get_index(target: &Value, key: &Value) -> Result<Value, RenderError> {
    match (target, key) {
        (Value::Array(items), Value::Number(number)) => Ok(number_index(*number)
            .and_then(|index| items.get(index).cloned())
            .unwrap_or_default()),
        (Value::String(text), Value::Number(number)) => Ok(number_index(*number)
            .and_then(|index| text.chars().nth(index))
            .map(|character| Value::from(character.to_string()))
            .unwrap_or_default()),
        (target, key) => get_property(target, &key.to_text()),
    }
}

/// Writes `value` at `keys` below `target`, copying shared containers.
pub(super) fn set_path(target: &mut Value, keys: &[Value], value: Value) -> Result<(), RenderError> {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return Ok(());
    };
    match target {
        Value::Object(entries) => {
            let entries = Arc::make_mut(entries);
            let name = key.to_text();
            if rest.is_empty() {
                entries.insert(Arc::from(&*name), value);
                return Ok(());
            }
            match entries.get_mut(&*name) {
                Some(slot) => set_path(slot, rest, value),
                None => cannot_set("undefined", &rest[0]),
            }
        }
        Value::Array(items) => {
            let index = match key {
                Value::Number(number) => number_index(*number),
                key => array_index(&key.to_text()),
            };
            // Named properties of arrays are not kept.
            let Some(index) = index else {
                return Ok(());
            };
            let items = Arc::make_mut(items);
            if index >= items.len() {
                if index - items.len() > MAX_ARRAY_GROWTH {
                    return Err(EvaluationFault::range_error("Invalid array length").into());
                }
                items.resize(index + 1, Value::Undefined);
            }
            set_path(&mut items[index], rest, value)
        }
        Value::Undefined => cannot_set("undefined", key),
        Value::Null => cannot_set("null", key),
        _ => Ok(()),
    }
}

fn cannot_set(target: &str, key: &Value) -> Result<(), RenderError> {
    Err(EvaluationFault::type_error(format!(
        "Cannot set properties of {target} (setting '{}')",
        key.to_text()
    ))
    .into())
}

/// Built-in method `name` of `receiver`, or `None` if it has none.
pub(super) fn call_method(
    receiver: &Value,
    name: &str,
    arguments: &[Value],
) -> Option<Result<Value, RenderError>> {
    if name == "toString" {
        return Some(Ok(Value::from(receiver.to_text().into_owned())));
    }
    match receiver {
        Value::String(text) => string_method(text, name, arguments),
        Value::Array(items) => array_method(items, name, arguments),
        _ => None,
    }
}

fn string_method(text: &str, name: &str, arguments: &[Value]) -> Option<Result<Value, RenderError>> {
    let value = match name {
        "toUpperCase" => Value::from(text.to_uppercase()),
        "toLowerCase" => Value::from(text.to_lowercase()),
        "trim" => Value::from(text.trim()),
        "includes" => Value::Bool(text.contains(text_argument(arguments, 0).as_str())),
        "startsWith" => Value::Bool(text.starts_with(text_argument(arguments, 0).as_str())),
        "endsWith" => Value::Bool(text.ends_with(text_argument(arguments, 0).as_str())),
        "split" => match arguments.first() {
            None | Some(Value::Undefined) => Value::from(vec![Value::from(text)]),
            Some(separator) => {
                let separator = separator.to_text();
                let parts: Vec<Value> = if separator.is_empty() {
                    text.chars().map(|character| character.to_string().into()).collect()
                } else {
                    text.split(&*separator).map(Value::from).collect()
                };
                Value::from(parts)
            }
        },
        "repeat" => {
            let count = arguments.first().map_or(0., Value::to_number);
            let count = if count.is_nan() { 0. } else { count };
            if count < 0. || count.is_infinite() {
                return Some(Err(EvaluationFault::range_error(format!(
                    "Invalid count value: {}",
                    crate::value::format_number(count)
                ))
                .into()));
            }
            let count = count as usize;
            match text.len().checked_mul(count) {
                Some(length) if length <= MAX_STRING_LENGTH => Value::from(text.repeat(count)),
                _ => {
                    return Some(Err(
                        EvaluationFault::range_error("Invalid string length").into()
                    ));
                }
            }
        }
        "replace" => {
            let pattern = text_argument(arguments, 0);
            let replacement = text_argument(arguments, 1);
            Value::from(text.replacen(pattern.as_str(), &replacement, 1))
        }
        _ => return None,
    };
    Some(Ok(value))
}

fn array_method(items: &[Value], name: &str, arguments: &[Value]) -> Option<Result<Value, RenderError>> {
    let search = arguments.first().cloned().unwrap_or_default();
    let value = match name {
        "join" => {
            let separator = match arguments.first() {
                None | Some(Value::Undefined) => ",".to_owned(),
                Some(separator) => separator.to_text().into_owned(),
            };
            let parts: Vec<_> = items
                .iter()
                .map(|item| if item.is_nullish() { "".into() } else { item.to_text() })
                .collect();
            Value::from(parts.join(separator.as_str()))
        }
        "includes" => Value::Bool(items.iter().any(|item| {
            item.strict_equals(&search) || both_nan(item, &search)
        })),
        "indexOf" => Value::Number(
            items
                .iter()
                .position(|item| item.strict_equals(&search))
                .map_or(-1., |index| index as f64),
        ),
        _ => return None,
    };
    Some(Ok(value))
}

fn text_argument(arguments: &[Value], index: usize) -> String {
    arguments
        .get(index)
        .cloned()
        .unwrap_or_default()
        .to_text()
        .into_owned()
}

fn both_nan(a: &Value, b: &Value) -> bool {
    matches!((a, b), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
}

/// Canonical array index: digits only, no leading zero.
fn array_index(property: &str) -> Option<usize> {
    let index = property.parse::<usize>().ok()?;
    (index.to_string() == property).then_some(index)
}

fn number_index(number: f64) -> Option<usize> {
    (number >= 0. && number.fract() == 0. && number < usize::MAX as f64).then_some(number as usize)
}
