use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::args::{expect_arg_count, expect_arg_range, expect_string, optional};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::eval::resolve_index;
use crate::value::{NativeResult, Value};

fn decode(name: &str, text: &str) -> NativeResult {
    serde_json::from_str::<serde_json::Value>(text)
        .map(Value::from_json)
        .map_err(|err| RuntimeError::decode(format!("{name}: {err}")))
}

pub(super) fn parse(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("json.parse", args, 1)?;
    decode("json.parse", expect_string("json.parse", args, 0)?)
}

pub(super) fn stringify(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("json.stringify", args, 1, 2)?;
    let json = args[0].to_json()?;
    let indent = match optional(args, 1) {
        None => None,
        Some(Value::Number(width)) if *width >= 0.0 && *width <= 16.0 => {
            Some(" ".repeat(*width as usize))
        }
        Some(Value::String(text)) => Some(text.to_string()),
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "json.stringify: indent must be a number between 0 and 16 or a string, got {other}"
            )));
        }
    };

    let text = match indent {
        None => json.to_string(),
        Some(indent) => {
            let mut out = Vec::new();
            let formatter = PrettyFormatter::with_indent(indent.as_bytes());
            let mut serializer = Serializer::with_formatter(&mut out, formatter);
            json.serialize(&mut serializer)
                .map_err(|err| RuntimeError::invalid(format!("json.stringify: {err}")))?;
            String::from_utf8(out)
                .map_err(|err| RuntimeError::invalid(format!("json.stringify: {err}")))?
        }
    };
    ctx.limits().check_string(text.len())?;
    Ok(Value::from(text))
}

pub(super) fn file(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("json.file", args, 1)?;
    let path = ctx.resolve_path(expect_string("json.file", args, 0)?);
    let bytes = ctx.read_file(&path)?;
    ctx.limits().check_string(bytes.len())?;
    let text = String::from_utf8(bytes).map_err(|_| {
        RuntimeError::decode(format!("json.file: '{}' is not valid UTF-8", path.display()))
    })?;
    decode("json.file", &text)
}

/// `json.get(value, "a.b[0].c")`; null as soon as a step is missing.
pub(super) fn get(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("json.get", args, 2)?;
    let path = expect_string("json.get", args, 1)?;
    let mut current = args[0].clone();
    for step in parse_path(path)? {
        current = match (&current, step) {
            (Value::Dict(entries), Step::Key(key)) => {
                entries.get(&key).cloned().unwrap_or(Value::Null)
            }
            (Value::Dict(entries), Step::Index(idx)) => {
                entries.get(&idx.to_string()).cloned().unwrap_or(Value::Null)
            }
            (Value::List(items), Step::Index(idx)) => resolve_index(idx, items.len())
                .map(|slot| items[slot].clone())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if current.is_null() {
            break;
        }
    }
    Ok(current)
}

#[derive(Debug, PartialEq)]
enum Step {
    Key(String),
    Index(i64),
}

fn parse_path(path: &str) -> Result<Vec<Step>, RuntimeError> {
    let invalid = || RuntimeError::invalid(format!("json.get: invalid path {path:?}"));
    let path = path.strip_prefix('$').unwrap_or(path);
    let mut steps = Vec::new();
    let mut chars = path.chars().peekable();
    let mut key = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if !key.is_empty() {
                    steps.push(Step::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    steps.push(Step::Key(std::mem::take(&mut key)));
                }
                let quote = chars.next_if(|ch| *ch == '"' || *ch == '\'');
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if Some(ch) == quote => {
                            if chars.next() != Some(']') {
                                return Err(invalid());
                            }
                            break;
                        }
                        Some(']') if quote.is_none() => break,
                        Some(ch) => inner.push(ch),
                        None => return Err(invalid()),
                    }
                }
                if quote.is_some() {
                    steps.push(Step::Key(inner));
                } else {
                    let idx = inner.trim().parse::<i64>().map_err(|_| invalid())?;
                    steps.push(Step::Index(idx));
                }
            }
            _ => key.push(ch),
        }
    }
    if !key.is_empty() {
        steps.push(Step::Key(key));
    }
    Ok(steps)
}
