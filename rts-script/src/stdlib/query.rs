use url::form_urlencoded;

use crate::args::{expect_arg_count, expect_dict, expect_string};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{Dict, NativeResult, Value};

/// The query part of `text`, which may be a bare query, `?query` or a
/// full URL. Fragments are dropped.
pub(crate) fn query_part(text: &str) -> &str {
    let text = text.split('#').next().unwrap_or_default();
    match text.split_once('?') {
        Some((_, query)) => query,
        None if text.contains("://") => "",
        None => text,
    }
}

/// Decodes a query string into a dict. Repeated keys collect into a list.
pub(crate) fn query_to_dict(query: &str) -> Dict {
    let mut out = Dict::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let value = Value::from(value.into_owned());
        match out.remove(key.as_ref()) {
            None => {
                out.insert(key.into_owned(), value);
            }
            Some(Value::List(existing)) => {
                let mut items = Vec::clone(&existing);
                items.push(value);
                out.insert(key.into_owned(), Value::list(items));
            }
            Some(existing) => {
                out.insert(key.into_owned(), Value::list(vec![existing, value]));
            }
        }
    }
    out
}

/// String forms of a query value. `null` means no values at all.
pub(crate) fn query_values(name: &str, value: &Value) -> Result<Vec<String>, RuntimeError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => Ok(vec![text.to_string()]),
        Value::Number(_) | Value::Bool(_) => Ok(vec![value.to_string()]),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.extend(query_values(name, item)?);
            }
            Ok(out)
        }
        other => Err(RuntimeError::type_error(format!(
            "{name}: query value must be a string, number, bool or list, got {}",
            other.type_name()
        ))),
    }
}

/// Replaces every `name` parameter of `url` with `values`, keeping the
/// other parameters in order. No values removes the parameter.
pub(crate) fn replace_param(url: &str, name: &str, values: &[String]) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };
    let (base, query) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key != name {
            serializer.append_pair(&key, &value);
        }
    }
    for value in values {
        serializer.append_pair(name, value);
    }
    let query = serializer.finish();

    let mut out = base.to_string();
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

pub(super) fn parse(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("query.parse", args, 1)?;
    let text = expect_string("query.parse", args, 0)?;
    Ok(Value::dict(query_to_dict(query_part(text))))
}

pub(super) fn encode(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("query.encode", args, 1)?;
    let params = expect_dict("query.encode", args, 0)?;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        for value in query_values("query.encode", value)? {
            serializer.append_pair(name, &value);
        }
    }
    let encoded = serializer.finish();
    ctx.limits().check_string(encoded.len())?;
    Ok(Value::from(encoded))
}

pub(super) fn merge(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("query.merge", args, 2)?;
    let mut url = expect_string("query.merge", args, 0)?.to_string();
    let params = expect_dict("query.merge", args, 1)?;
    for (name, value) in params {
        let values = query_values("query.merge", value)?;
        url = replace_param(&url, name, &values);
        ctx.limits().check_string(url.len())?;
    }
    Ok(Value::from(url))
}
