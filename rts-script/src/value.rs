use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::FunctionDef;
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::eval::Scope;

/// Dict storage. Keys stay sorted so every enumeration is deterministic.
pub type Dict = BTreeMap<String, Value>;

pub type NativeResult = Result<Value, RuntimeError>;

pub type NativeFn = dyn Fn(&mut Ctx, &[Value]) -> NativeResult + Send + Sync;

pub struct NativeFunction {
    name: String,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut Ctx, &[Value]) -> NativeResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, ctx: &mut Ctx, args: &[Value]) -> NativeResult {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A script-level function together with the scope it closes over.
pub struct Closure {
    pub def: Arc<FunctionDef>,
    pub scope: Arc<Scope>,
}

impl Closure {
    pub fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Capability object: the one way to expose namespaces and host state to
/// scripts. `get_member` must not have side effects; mutation only happens
/// through `call_member`.
pub trait Object: Send + Sync {
    fn type_name(&self) -> &str;

    fn get_member(&self, name: &str) -> Option<Value>;

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult;

    fn index(&self, key: &Value) -> NativeResult {
        let key = key.to_key()?;
        Ok(self.get_member(&key).unwrap_or(Value::Null))
    }
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    List(Arc<Vec<Value>>),
    Dict(Arc<Dict>),
    Native(Arc<NativeFunction>),
    Function(Arc<Closure>),
    Object(Arc<dyn Object>),
}

impl Value {
    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Value::String(value.into())
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Arc::new(values))
    }

    pub fn dict(entries: Dict) -> Self {
        Value::Dict(Arc::new(entries))
    }

    pub fn native(
        name: impl Into<String>,
        func: impl Fn(&mut Ctx, &[Value]) -> NativeResult + Send + Sync + 'static,
    ) -> Self {
        Value::Native(Arc::new(NativeFunction::new(name, func)))
    }

    pub fn object(object: impl Object + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Native(_) | Value::Function(_) => "function",
            Value::Object(object) => object.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Native(_) | Value::Function(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::String(text) => !text.is_empty(),
            Value::List(values) => !values.is_empty(),
            Value::Dict(entries) => !entries.is_empty(),
            Value::Native(_) | Value::Function(_) | Value::Object(_) => true,
        }
    }

    /// Turns a value into a dict key. Shared by every lookup helper so that
    /// `d[1]`, `dict.get(d, 1)` and `contains(d, 1)` agree.
    pub fn to_key(&self) -> Result<String, RuntimeError> {
        match self {
            Value::String(text) => Ok(text.to_string()),
            Value::Number(value) => Ok(format_number(*value)),
            Value::Bool(value) => Ok(value.to_string()),
            Value::Null => Ok("null".to_string()),
            other => Err(RuntimeError::type_error(format!(
                "{} cannot be used as a key",
                other.type_name()
            ))),
        }
    }

    /// Integral index for list access; `None` when the number has a fraction.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Value::Number(value) if value.fract() == 0.0 && value.is_finite() => {
                Some(*value as i64)
            }
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => Value::Number(number.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(text) => Value::string(text),
            serde_json::Value::Array(values) => {
                Value::list(values.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::dict(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, RuntimeError> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Number(value) => number_to_json(*value)?,
            Value::String(text) => serde_json::Value::String(text.to_string()),
            Value::List(values) => serde_json::Value::Array(
                values
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Dict(entries) => {
                let mut out = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries.iter() {
                    out.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(out)
            }
            other => {
                return Err(RuntimeError::type_error(format!(
                    "cannot encode {} as JSON",
                    other.type_name()
                )));
            }
        })
    }

    fn write_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(text) => write!(f, "{text:?}"),
            other => write!(f, "{other}"),
        }
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn number_to_json(value: f64) -> Result<serde_json::Value, RuntimeError> {
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        return Ok(serde_json::Value::from(value as i64));
    }
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .ok_or_else(|| RuntimeError::type_error(format!("cannot encode {value} as JSON")))
}

pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(value) => write!(f, "{}", format_number(*value)),
            Value::String(text) => write!(f, "{text}"),
            Value::List(values) => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    value.write_nested(f)?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{key:?}:")?;
                    value.write_nested(f)?;
                }
                write!(f, "}}")
            }
            Value::Native(native) => write!(f, "<fn {}>", native.name()),
            Value::Function(closure) => write!(f, "<fn {}>", closure.name()),
            Value::Object(object) => write!(f, "<{}>", object.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(text) => write!(f, "{text:?}"),
            other => write!(f, "{other}"),
        }
    }
}

/// Structural equality for data, identity for callables and objects.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
            (Value::Number(lhs), Value::Number(rhs)) => lhs == rhs,
            (Value::String(lhs), Value::String(rhs)) => lhs == rhs,
            (Value::List(lhs), Value::List(rhs)) => Arc::ptr_eq(lhs, rhs) || lhs == rhs,
            (Value::Dict(lhs), Value::Dict(rhs)) => Arc::ptr_eq(lhs, rhs) || lhs == rhs,
            (Value::Native(lhs), Value::Native(rhs)) => Arc::ptr_eq(lhs, rhs),
            (Value::Function(lhs), Value::Function(rhs)) => Arc::ptr_eq(lhs, rhs),
            (Value::Object(lhs), Value::Object(rhs)) => {
                std::ptr::addr_eq(Arc::as_ptr(lhs), Arc::as_ptr(rhs))
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::string(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::list(values)
    }
}

impl From<Dict> for Value {
    fn from(entries: Dict) -> Self {
        Value::dict(entries)
    }
}
