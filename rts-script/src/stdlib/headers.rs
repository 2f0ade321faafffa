//! Header dicts map a name to a string or a list of strings. Names compare
//! case-insensitively everywhere in this namespace.

use crate::args::{expect_arg_count, expect_dict, expect_string};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{Dict, NativeResult, Value};

fn find<'a>(headers: &'a Dict, name: &str) -> Option<&'a Value> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

fn without(headers: &Dict, name: &str) -> Dict {
    headers
        .iter()
        .filter(|(key, _)| !key.eq_ignore_ascii_case(name))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn header_value(name: &str, value: &Value) -> NativeResult {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(_) | Value::Bool(_) => Ok(Value::from(value.to_string())),
        Value::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items.iter() {
                values.push(header_value(name, item)?);
            }
            Ok(Value::list(values))
        }
        other => Err(RuntimeError::type_error(format!(
            "{name}: header value must be a string or list of strings, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn get(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("headers.get", args, 2)?;
    let headers = expect_dict("headers.get", args, 0)?;
    let name = expect_string("headers.get", args, 1)?;
    Ok(match find(headers, name) {
        Some(Value::List(values)) => values.first().cloned().unwrap_or(Value::Null),
        Some(value) => value.clone(),
        None => Value::Null,
    })
}

pub(super) fn has(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("headers.has", args, 2)?;
    let headers = expect_dict("headers.has", args, 0)?;
    let name = expect_string("headers.has", args, 1)?;
    Ok(Value::Bool(find(headers, name).is_some()))
}

pub(super) fn set(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("headers.set", args, 3)?;
    let headers = expect_dict("headers.set", args, 0)?;
    let name = expect_string("headers.set", args, 1)?;
    let value = header_value("headers.set", &args[2])?;
    let mut out = without(headers, name);
    out.insert(name.to_string(), value);
    Ok(Value::dict(out))
}

pub(super) fn remove(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("headers.remove", args, 2)?;
    let headers = expect_dict("headers.remove", args, 0)?;
    let name = expect_string("headers.remove", args, 1)?;
    Ok(Value::dict(without(headers, name)))
}

pub(super) fn merge(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("headers.merge", args, 2)?;
    let base = expect_dict("headers.merge", args, 0)?;
    let overrides = expect_dict("headers.merge", args, 1)?;
    let mut out = base.clone();
    for (name, value) in overrides {
        let value = header_value("headers.merge", value)?;
        out = without(&out, name);
        out.insert(name.clone(), value);
    }
    Ok(Value::dict(out))
}

pub(super) fn normalize(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("headers.normalize", args, 1)?;
    let headers = expect_dict("headers.normalize", args, 0)?;
    let mut grouped: std::collections::BTreeMap<String, Vec<Value>> = Default::default();
    for (name, value) in headers {
        let values = grouped.entry(name.to_ascii_lowercase()).or_default();
        match header_value("headers.normalize", value)? {
            Value::List(items) => values.extend(items.iter().cloned()),
            single => values.push(single),
        }
    }
    let out = grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::list(values)
            };
            (name, value)
        })
        .collect();
    Ok(Value::dict(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Value {
        Value::dict(
            pairs
                .iter()
                .map(|(name, value)| (name.to_string(), Value::from(*value)))
                .collect(),
        )
    }

    #[test]
    fn lookups_ignore_case() {
        let mut ctx = Ctx::new();
        let h = headers(&[("Content-Type", "application/json")]);
        for name in ["content-type", "CONTENT-TYPE", "Content-Type"] {
            let value = get(&mut ctx, &[h.clone(), Value::from(name)]).expect("get");
            assert_eq!(value, Value::from("application/json"));
            let present = has(&mut ctx, &[h.clone(), Value::from(name)]).expect("has");
            assert_eq!(present, Value::Bool(true));
        }
    }

    #[test]
    fn set_replaces_every_case_variant() {
        let mut ctx = Ctx::new();
        let h = headers(&[("accept", "a"), ("Accept", "b"), ("X-Id", "1")]);
        let updated = set(&mut ctx, &[h, Value::from("ACCEPT"), Value::from("c")]).expect("set");
        assert_eq!(updated.to_string(), r#"{"ACCEPT":"c","X-Id":"1"}"#);
    }

    #[test]
    fn merge_lets_the_right_side_win() {
        let mut ctx = Ctx::new();
        let base = headers(&[("Authorization", "old"), ("Accept", "*/*")]);
        let extra = headers(&[("authorization", "new")]);
        let merged = merge(&mut ctx, &[base, extra]).expect("merge");
        assert_eq!(merged.to_string(), r#"{"Accept":"*/*","authorization":"new"}"#);
    }

    #[test]
    fn normalize_lowercases_and_groups_duplicates() {
        let mut ctx = Ctx::new();
        let h = headers(&[("Set-Cookie", "a=1"), ("set-cookie", "b=2"), ("Host", "x")]);
        let normalized = normalize(&mut ctx, &[h]).expect("normalize");
        assert_eq!(
            normalized.to_string(),
            r#"{"host":"x","set-cookie":["a=1","b=2"]}"#
        );
    }
}
