//! Host objects: `request`, `vars`, `vars.global` and `env`. Each one keeps
//! a local snapshot that every successful write updates, so scripts read
//! their own writes without a round trip through the host.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::args::{expect_arg_count, expect_arg_range, expect_string};
use crate::ctx::Ctx;
use crate::error::{ErrorKind, HostError, RuntimeError};
use crate::stdlib::query::{query_part, query_to_dict, query_values, replace_param};
use crate::value::{Dict, NativeResult, Object, Value};

/// Request state visible to scripts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RequestSnapshot {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Applies `edit` after validating it.
    pub fn apply(&mut self, edit: &RequestEdit) -> Result<(), RuntimeError> {
        match edit {
            RequestEdit::SetMethod(method) => {
                validate_token("request.setMethod", method)?;
                self.method = method.clone();
            }
            RequestEdit::SetUrl(url) => {
                if url.trim().is_empty() {
                    return Err(RuntimeError::invalid("request.setURL: URL must not be empty"));
                }
                self.url = url.clone();
            }
            RequestEdit::SetHeader { name, value } => {
                validate_header(name, value)?;
                self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
                self.headers.push((name.clone(), value.clone()));
            }
            RequestEdit::AddHeader { name, value } => {
                validate_header(name, value)?;
                self.headers.push((name.clone(), value.clone()));
            }
            RequestEdit::RemoveHeader(name) => {
                self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
            }
            RequestEdit::SetQueryParam { name, values } => {
                if name.is_empty() {
                    return Err(RuntimeError::invalid(
                        "request.setQueryParam: name must not be empty",
                    ));
                }
                self.url = replace_param(&self.url, name, values);
            }
            RequestEdit::SetBody(body) => self.body = body.clone(),
        }
        Ok(())
    }
}

fn validate_token(name: &str, token: &str) -> Result<(), RuntimeError> {
    let valid = !token.is_empty()
        && token
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte));
    if valid {
        Ok(())
    } else {
        Err(RuntimeError::invalid(format!("{name}: invalid token {token:?}")))
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), RuntimeError> {
    validate_token("request header name", name)?;
    if value.contains(['\r', '\n']) {
        return Err(RuntimeError::invalid(format!(
            "request header {name:?}: value must not contain line breaks"
        )));
    }
    Ok(())
}

/// One request mutation, as forwarded to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestEdit {
    SetMethod(String),
    SetUrl(String),
    SetHeader { name: String, value: String },
    AddHeader { name: String, value: String },
    RemoveHeader(String),
    /// An empty `values` removes the parameter.
    SetQueryParam { name: String, values: Vec<String> },
    SetBody(String),
}

/// Receives request edits. No host object lock is held during the call, so
/// an implementation may read the script's host objects again.
pub trait RequestMutator: Send + Sync {
    fn apply(&self, edit: &RequestEdit) -> Result<(), HostError>;
}

pub trait VarsMutator: Send + Sync {
    fn set_var(&self, name: &str, value: &Value) -> Result<(), HostError>;
}

pub trait GlobalMutator: Send + Sync {
    fn set_global(&self, name: &str, value: &Value, secret: bool) -> Result<(), HostError>;

    fn delete_global(&self, name: &str) -> Result<(), HostError>;
}

/// A global variable and whether the host should mask it.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalVar {
    pub value: Value,
    pub secret: bool,
}

impl GlobalVar {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

trait HostState: Send + Sync + 'static {
    fn invoke(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult;
}

/// A member function value that stays bound to its host object.
fn bound_method<T: HostState>(type_name: &str, name: &str, state: &Arc<T>) -> Value {
    let state = state.clone();
    let member = name.to_string();
    Value::native(format!("{type_name}.{name}"), move |ctx, args| {
        state.invoke(ctx, &member, args)
    })
}

fn unknown_member(type_name: &str, member: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::UnknownMember {
        type_name: type_name.to_string(),
        member: member.to_string(),
    })
}

fn scalar_text(name: &str, value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::String(text) => Ok(text.to_string()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(RuntimeError::type_error(format!(
            "{name}: expected a string, got {}",
            other.type_name()
        ))),
    }
}

const REQUEST_METHODS: &[&str] = &[
    "header",
    "setMethod",
    "setURL",
    "setHeader",
    "addHeader",
    "removeHeader",
    "setQueryParam",
    "setBody",
];

struct RequestState {
    snapshot: Mutex<RequestSnapshot>,
    mutator: Option<Arc<dyn RequestMutator>>,
}

impl RequestState {
    fn mutate(&self, method: &str, edit: RequestEdit) -> NativeResult {
        let Some(mutator) = &self.mutator else {
            return Err(RuntimeError::read_only(format!(
                "request.{method} requires a mutable request"
            )));
        };
        let mut next = self.snapshot.lock().clone();
        next.apply(&edit)?;
        mutator.apply(&edit).map_err(RuntimeError::host)?;
        self.snapshot.lock().apply(&edit)?;
        Ok(Value::Null)
    }
}

impl HostState for RequestState {
    fn invoke(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        let qualified = format!("request.{name}");
        let edit = match name {
            "header" => {
                expect_arg_count(&qualified, args, 1)?;
                let header = expect_string(&qualified, args, 0)?;
                return Ok(self
                    .snapshot
                    .lock()
                    .header(header)
                    .map(Value::from)
                    .unwrap_or(Value::Null));
            }
            "setMethod" => {
                expect_arg_count(&qualified, args, 1)?;
                RequestEdit::SetMethod(expect_string(&qualified, args, 0)?.to_ascii_uppercase())
            }
            "setURL" => {
                expect_arg_count(&qualified, args, 1)?;
                RequestEdit::SetUrl(expect_string(&qualified, args, 0)?.to_string())
            }
            "setHeader" | "addHeader" => {
                expect_arg_count(&qualified, args, 2)?;
                let header = expect_string(&qualified, args, 0)?.to_string();
                let value = scalar_text(&qualified, &args[1])?;
                if name == "setHeader" {
                    RequestEdit::SetHeader {
                        name: header,
                        value,
                    }
                } else {
                    RequestEdit::AddHeader {
                        name: header,
                        value,
                    }
                }
            }
            "removeHeader" => {
                expect_arg_count(&qualified, args, 1)?;
                RequestEdit::RemoveHeader(expect_string(&qualified, args, 0)?.to_string())
            }
            "setQueryParam" => {
                expect_arg_count(&qualified, args, 2)?;
                RequestEdit::SetQueryParam {
                    name: expect_string(&qualified, args, 0)?.to_string(),
                    values: query_values(&qualified, &args[1])?,
                }
            }
            "setBody" => {
                expect_arg_count(&qualified, args, 1)?;
                let body = match &args[0] {
                    Value::String(text) => text.to_string(),
                    other => other.to_json()?.to_string(),
                };
                ctx.limits().check_string(body.len())?;
                RequestEdit::SetBody(body)
            }
            _ => return Err(unknown_member("request", name)),
        };
        self.mutate(name, edit)
    }
}

/// The `request` object.
pub struct RequestObject {
    state: Arc<RequestState>,
}

impl RequestObject {
    pub fn new(snapshot: RequestSnapshot, mutator: Option<Arc<dyn RequestMutator>>) -> Self {
        Self {
            state: Arc::new(RequestState {
                snapshot: Mutex::new(snapshot),
                mutator,
            }),
        }
    }

    /// Current local view, including writes made through this object.
    pub fn snapshot(&self) -> RequestSnapshot {
        self.state.snapshot.lock().clone()
    }
}

/// Headers keyed by lower-cased name; repeated names collect into a list.
fn headers_dict(headers: &[(String, String)]) -> Value {
    let mut out = Dict::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let value = Value::from(value.as_str());
        let merged = match out.remove(&name) {
            None => value,
            Some(Value::List(existing)) => {
                let mut items = Vec::clone(&existing);
                items.push(value);
                Value::list(items)
            }
            Some(existing) => Value::list(vec![existing, value]),
        };
        out.insert(name, merged);
    }
    Value::dict(out)
}

impl Object for RequestObject {
    fn type_name(&self) -> &str {
        "request"
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        if REQUEST_METHODS.contains(&name) {
            return Some(bound_method("request", name, &self.state));
        }
        let snapshot = self.state.snapshot.lock();
        Some(match name {
            "method" => Value::from(snapshot.method.as_str()),
            "url" => Value::from(snapshot.url.as_str()),
            "headers" => headers_dict(&snapshot.headers),
            "query" => Value::dict(query_to_dict(query_part(&snapshot.url))),
            "body" => Value::from(snapshot.body.as_str()),
            _ => return None,
        })
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        self.state.invoke(ctx, name, args)
    }
}

struct VarsState {
    values: Mutex<BTreeMap<String, Value>>,
    mutator: Option<Arc<dyn VarsMutator>>,
}

impl VarsState {
    fn lookup(&self, name: &str) -> Value {
        self.values
            .lock()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl HostState for VarsState {
    fn invoke(&self, _ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        let qualified = format!("vars.{name}");
        match name {
            "get" => {
                expect_arg_count(&qualified, args, 1)?;
                Ok(self.lookup(expect_string(&qualified, args, 0)?))
            }
            "has" => {
                expect_arg_count(&qualified, args, 1)?;
                let key = expect_string(&qualified, args, 0)?.to_ascii_lowercase();
                Ok(Value::Bool(self.values.lock().contains_key(&key)))
            }
            "set" => {
                expect_arg_count(&qualified, args, 2)?;
                let key = expect_string(&qualified, args, 0)?;
                let Some(mutator) = &self.mutator else {
                    return Err(RuntimeError::read_only(
                        "vars.set requires a mutable variable store",
                    ));
                };
                mutator
                    .set_var(key, &args[1])
                    .map_err(RuntimeError::host)?;
                self.values
                    .lock()
                    .insert(key.to_ascii_lowercase(), args[1].clone());
                Ok(Value::Null)
            }
            _ => Err(unknown_member("vars", name)),
        }
    }
}

const VARS_METHODS: &[&str] = &["get", "has", "set"];

/// The `vars` object. Names are case-insensitive.
pub struct VarsObject {
    state: Arc<VarsState>,
    global: Value,
}

impl VarsObject {
    pub fn new(
        values: BTreeMap<String, Value>,
        mutator: Option<Arc<dyn VarsMutator>>,
        global: GlobalObject,
    ) -> Self {
        let values = values
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self {
            state: Arc::new(VarsState {
                values: Mutex::new(values),
                mutator,
            }),
            global: Value::object(global),
        }
    }
}

impl Object for VarsObject {
    fn type_name(&self) -> &str {
        "vars"
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        if name == "global" {
            return Some(self.global.clone());
        }
        if VARS_METHODS.contains(&name) {
            return Some(bound_method("vars", name, &self.state));
        }
        Some(self.state.lookup(name))
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        self.state.invoke(ctx, name, args)
    }

    fn index(&self, key: &Value) -> NativeResult {
        Ok(self.state.lookup(&key.to_key()?))
    }
}

struct GlobalState {
    values: Mutex<BTreeMap<String, GlobalVar>>,
    mutator: Option<Arc<dyn GlobalMutator>>,
}

impl GlobalState {
    fn lookup(&self, name: &str) -> Value {
        self.values
            .lock()
            .get(&name.to_ascii_lowercase())
            .map(|global| global.value.clone())
            .unwrap_or(Value::Null)
    }

    fn mutator(&self, method: &str) -> Result<&Arc<dyn GlobalMutator>, RuntimeError> {
        self.mutator.as_ref().ok_or_else(|| {
            RuntimeError::read_only(format!(
                "vars.global.{method} requires a mutable global store"
            ))
        })
    }
}

fn secret_flag(name: &str, value: Option<&Value>) -> Result<bool, RuntimeError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(secret)) => Ok(*secret),
        Some(Value::Dict(options)) => match options.get("secret") {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(secret)) => Ok(*secret),
            Some(other) => Err(RuntimeError::type_error(format!(
                "{name}: secret must be a bool, got {}",
                other.type_name()
            ))),
        },
        Some(other) => Err(RuntimeError::type_error(format!(
            "{name}: argument 3 must be a bool or {{secret: bool}}, got {}",
            other.type_name()
        ))),
    }
}

impl HostState for GlobalState {
    fn invoke(&self, _ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        let qualified = format!("vars.global.{name}");
        match name {
            "get" => {
                expect_arg_count(&qualified, args, 1)?;
                Ok(self.lookup(expect_string(&qualified, args, 0)?))
            }
            "has" => {
                expect_arg_count(&qualified, args, 1)?;
                let key = expect_string(&qualified, args, 0)?.to_ascii_lowercase();
                Ok(Value::Bool(self.values.lock().contains_key(&key)))
            }
            "set" => {
                expect_arg_range(&qualified, args, 2, 3)?;
                let key = expect_string(&qualified, args, 0)?;
                let secret = secret_flag(&qualified, args.get(2))?;
                let mutator = self.mutator("set")?;
                mutator
                    .set_global(key, &args[1], secret)
                    .map_err(RuntimeError::host)?;
                self.values.lock().insert(
                    key.to_ascii_lowercase(),
                    GlobalVar {
                        value: args[1].clone(),
                        secret,
                    },
                );
                Ok(Value::Null)
            }
            "delete" => {
                expect_arg_count(&qualified, args, 1)?;
                let key = expect_string(&qualified, args, 0)?;
                let mutator = self.mutator("delete")?;
                mutator.delete_global(key).map_err(RuntimeError::host)?;
                self.values.lock().remove(&key.to_ascii_lowercase());
                Ok(Value::Null)
            }
            _ => Err(unknown_member("global", name)),
        }
    }
}

const GLOBAL_METHODS: &[&str] = &["get", "has", "set", "delete"];

/// The `vars.global` object.
pub struct GlobalObject {
    state: Arc<GlobalState>,
}

impl GlobalObject {
    pub fn new(
        values: BTreeMap<String, GlobalVar>,
        mutator: Option<Arc<dyn GlobalMutator>>,
    ) -> Self {
        let values = values
            .into_iter()
            .map(|(name, global)| (name.to_ascii_lowercase(), global))
            .collect();
        Self {
            state: Arc::new(GlobalState {
                values: Mutex::new(values),
                mutator,
            }),
        }
    }
}

impl Object for GlobalObject {
    fn type_name(&self) -> &str {
        "global"
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        if GLOBAL_METHODS.contains(&name) {
            return Some(bound_method("vars.global", name, &self.state));
        }
        Some(self.state.lookup(name))
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        self.state.invoke(ctx, name, args)
    }

    fn index(&self, key: &Value) -> NativeResult {
        Ok(self.state.lookup(&key.to_key()?))
    }
}

struct EnvState {
    values: BTreeMap<String, String>,
}

impl EnvState {
    fn lookup(&self, name: &str) -> Value {
        self.values
            .get(name)
            .map(|value| Value::from(value.as_str()))
            .unwrap_or(Value::Null)
    }
}

impl HostState for EnvState {
    fn invoke(&self, _ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        match name {
            "get" => {
                expect_arg_count("env.get", args, 1)?;
                Ok(self.lookup(expect_string("env.get", args, 0)?))
            }
            "has" => {
                expect_arg_count("env.has", args, 1)?;
                let key = expect_string("env.has", args, 0)?;
                Ok(Value::Bool(self.values.contains_key(key)))
            }
            _ => Err(unknown_member("env", name)),
        }
    }
}

/// The read-only `env` object.
pub struct EnvObject {
    state: Arc<EnvState>,
}

impl EnvObject {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self {
            state: Arc::new(EnvState { values }),
        }
    }
}

impl Object for EnvObject {
    fn type_name(&self) -> &str {
        "env"
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        if name == "get" || name == "has" {
            return Some(bound_method("env", name, &self.state));
        }
        Some(self.state.lookup(name))
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        self.state.invoke(ctx, name, args)
    }

    fn index(&self, key: &Value) -> NativeResult {
        Ok(self.state.lookup(&key.to_key()?))
    }
}
