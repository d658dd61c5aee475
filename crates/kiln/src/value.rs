//! Runtime values of embedded code and the namespace a template renders
//! against.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::RenderError;

pub type Object = IndexMap<Arc<str>, Value>;

/// A value in the template.
///
/// Arrays and objects are shared behind an [`Arc`]. Writing through a
/// binding (`items[0] = 1`, `user.name = 'x'`) copies the container first
/// if anyone else still holds it.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<Object>),
    Function(Function),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(bool) => *bool,
            Self::Number(number) => *number != 0. && !number.is_nan(),
            Self::String(text) => !text.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Null | Self::Array(_) | Self::Object(_) => "object",
        }
    }

    /// Text form, as written by `<%= %>` and produced by `String(value)`.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(bool) => if *bool { "true" } else { "false" }.into(),
            Self::Number(number) => format_number(*number).into(),
            Self::String(text) => Cow::Borrowed(text.as_ref()),
            Self::Array(items) => items
                .iter()
                .map(|item| match item {
                    Self::Undefined | Self::Null => Cow::Borrowed(""),
                    item => item.to_text(),
                })
                .collect::<Vec<_>>()
                .join(",")
                .into(),
            Self::Object(_) => "[object Object]".into(),
            Self::Function(function) => {
                format!("function {}() {{ [native code] }}", function.name()).into()
            }
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined | Self::Object(_) | Self::Function(_) => f64::NAN,
            Self::Null => 0.,
            Self::Bool(bool) => f64::from(u8::from(*bool)),
            Self::Number(number) => *number,
            Self::String(text) => parse_number(text),
            Self::Array(items) => match items.as_slice() {
                [] => 0.,
                [item] => parse_number(&item.to_text()),
                _ => f64::NAN,
            },
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Self::Number(_), Self::String(_) | Self::Bool(_))
            | (Self::String(_) | Self::Bool(_), Self::Number(_))
            | (Self::Bool(_), Self::String(_))
            | (Self::String(_), Self::Bool(_)) => self.to_number() == other.to_number(),
            (Self::Array(_) | Self::Object(_), Self::String(_) | Self::Number(_) | Self::Bool(_))
            | (Self::String(_) | Self::Number(_) | Self::Bool(_), Self::Array(_) | Self::Object(_)) => {
                Self::from(self.to_text().into_owned())
                    .loose_equals(&Self::from(other.to_text().into_owned()))
            }
            _ => self.strict_equals(other),
        }
    }
}

/// Formats a number the way `String(number)` does.
pub fn format_number(number: f64) -> String {
    if number.is_nan() {
        return "NaN".to_owned();
    }
    if number.is_infinite() {
        return if number > 0. { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if number == 0. {
        return "0".to_owned();
    }
    let magnitude = number.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        // `1e21` becomes `1e+21`
        let text = format!("{number:e}");
        return match text.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => text,
        };
    }
    // Shortest round-trip digits, never an exponent
    number.to_string()
}

fn parse_number(text: &str) -> f64 {
    let text = text.trim();
    match text {
        "" => 0.,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust also accepts `inf` and `nan`
        text if text
            .chars()
            .any(|character| character.is_ascii_alphabetic() && !matches!(character, 'e' | 'E')) =>
        {
            f64::NAN
        }
        text => text.parse().unwrap_or(f64::NAN),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined | Self::Null | Self::Function(_) => serializer.serialize_unit(),
            Self::Bool(bool) => serializer.serialize_bool(*bool),
            Self::Number(number) if number.fract() == 0. && number.abs() < 9_007_199_254_740_992. => {
                serializer.serialize_i64(*number as i64)
            }
            Self::Number(number) if number.is_finite() => serializer.serialize_f64(*number),
            Self::Number(_) => serializer.serialize_unit(),
            Self::String(text) => serializer.serialize_str(text),
            Self::Array(items) => {
                let mut sequence = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    sequence.serialize_element(item)?;
                }
                sequence.end()
            }
            Self::Object(entries) => {
                let entries = entries
                    .iter()
                    .filter(|(_, value)| !matches!(value, Self::Undefined | Self::Function(_)));
                let mut map = serializer.serialize_map(None)?;
                for (key, value) in entries {
                    map.serialize_entry(key.as_ref(), value)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(bool) => Self::Bool(bool),
            serde_json::Value::Number(number) => Self::Number(number.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(text) => Self::String(text.into()),
            serde_json::Value::Array(items) => {
                Self::Array(Arc::new(items.into_iter().map(Self::from).collect()))
            }
            serde_json::Value::Object(entries) => Self::Object(Arc::new(
                entries
                    .into_iter()
                    .map(|(key, value)| (Arc::from(key), Self::from(value)))
                    .collect(),
            )),
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Undefined
    }
}

impl From<bool> for Value {
    fn from(bool: bool) -> Self {
        Self::Bool(bool)
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl From<i32> for Value {
    fn from(number: i32) -> Self {
        Self::Number(number.into())
    }
}

impl From<u32> for Value {
    fn from(number: u32) -> Self {
        Self::Number(number.into())
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Self::Number(number as f64)
    }
}

impl From<usize> for Value {
    fn from(number: usize) -> Self {
        Self::Number(number as f64)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::String(text.into())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::String(text.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(text: Arc<str>) -> Self {
        Self::String(text)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(Arc::new(items))
    }
}

impl From<Object> for Value {
    fn from(entries: Object) -> Self {
        Self::Object(Arc::new(entries))
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Self::Function(function)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Native code callable from templates.
pub trait Callable: Send + Sync {
    fn call(&self, arguments: Vec<Value>) -> BoxFuture<'_, Result<Value, RenderError>>;
}

/// A named, shareable [`Callable`].
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    callable: Arc<dyn Callable>,
}

impl Function {
    pub fn new(name: impl Into<Arc<str>>, callable: impl Callable + 'static) -> Self {
        Self {
            name: name.into(),
            callable: Arc::new(callable),
        }
    }

    /// Wraps a synchronous closure.
    ///
    /// ```
    /// use kiln::{Function, Value};
    ///
    /// let shout = Function::from_fn("shout", |arguments| {
    ///     let text = arguments.first().cloned().unwrap_or_default();
    ///     Ok(Value::from(text.to_text().to_uppercase()))
    /// });
    /// assert_eq!(shout.name(), "shout");
    /// ```
    pub fn from_fn<F>(name: impl Into<Arc<str>>, function: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, RenderError> + Send + Sync + 'static,
    {
        Self::new(name, SyncCallable(function))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, arguments: Vec<Value>) -> BoxFuture<'_, Result<Value, RenderError>> {
        self.callable.call(arguments)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callable, &other.callable)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

struct SyncCallable<F>(F);

impl<F> Callable for SyncCallable<F>
where
    F: Fn(Vec<Value>) -> Result<Value, RenderError> + Send + Sync,
{
    fn call(&self, arguments: Vec<Value>) -> BoxFuture<'_, Result<Value, RenderError>> {
        let result = (self.0)(arguments);
        futures_util::future::ready(result).boxed()
    }
}

/// Names visible to the code of a template as free variables.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: Object,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Option<Value> {
        self.bindings.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.bindings.iter()
    }
}

impl From<Object> for Namespace {
    fn from(bindings: Object) -> Self {
        Self { bindings }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Namespace {
    fn from(entries: serde_json::Map<String, serde_json::Value>) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Into<Arc<str>>, V: Into<Value>> FromIterator<(K, V)> for Namespace {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            bindings: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Namespace {
    type Item = (Arc<str>, Value);
    type IntoIter = indexmap::map::IntoIter<Arc<str>, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.bindings.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_matches_string_conversion() {
        assert_eq!(Value::from(3.0).to_text(), "3");
        assert_eq!(Value::from(0.5).to_text(), "0.5");
        assert_eq!(Value::from(-0.0).to_text(), "0");
        assert_eq!(Value::from(f64::NAN).to_text(), "NaN");
        assert_eq!(Value::from(1e21).to_text(), "1e+21");
        assert_eq!(Value::from(1.5e300).to_text(), "1.5e+300");
        assert_eq!(Value::from(1e-7).to_text(), "1e-7");
        assert_eq!(Value::from(-2.5e-8).to_text(), "-2.5e-8");
        assert_eq!(Value::from(0.000001).to_text(), "0.000001");
        assert_eq!(Value::from(123456789012345680000.0).to_text(), "123456789012345680000");
        assert_eq!(Value::from(json!([1, null, "a"])).to_text(), "1,,a");
        assert_eq!(Value::from(json!({"a": 1})).to_text(), "[object Object]");
        assert_eq!(Value::Undefined.to_text(), "undefined");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(Value::from(json!([])).is_truthy());
        assert!(Value::from("0").is_truthy());
    }

    #[test]
    fn test_number_conversion() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.);
        assert_eq!(Value::from("").to_number(), 0.);
        assert!(Value::from("inf").to_number().is_nan());
        assert_eq!(Value::from("1e3").to_number(), 1000.);
        assert_eq!(Value::Bool(true).to_number(), 1.);
    }

    #[test]
    fn test_equality() {
        assert!(Value::from(1).loose_equals(&Value::from("1")));
        assert!(!Value::from(1).strict_equals(&Value::from("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        let items = Value::from(json!([1]));
        assert!(items.strict_equals(&items.clone()));
        assert!(!items.strict_equals(&Value::from(json!([1]))));
    }

    #[test]
    fn test_serializes_like_json_stringify() {
        let value = Value::from(Object::from_iter([
            (Arc::from("count"), Value::from(2)),
            (Arc::from("ratio"), Value::from(0.5)),
            (Arc::from("missing"), Value::Undefined),
            (Arc::from("items"), Value::from(vec![Value::Undefined, Value::from("x")])),
        ]));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"count":2,"ratio":0.5,"items":[null,"x"]}"#
        );
    }

    #[test]
    fn test_namespace_from_json() {
        let serde_json::Value::Object(entries) = json!({"param": "test", "n": 1}) else {
            unreachable!()
        };
        let namespace = Namespace::from(entries);
        assert_eq!(namespace.len(), 2);
        assert_eq!(namespace.get("param").unwrap().to_text(), "test");
    }
}
