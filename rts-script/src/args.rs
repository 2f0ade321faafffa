use crate::error::{ErrorKind, RuntimeError};
use crate::value::{Dict, Value};

pub(crate) fn expect_arg_count(
    name: &str,
    args: &[Value],
    expected: usize,
) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::new(ErrorKind::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        }));
    }
    Ok(())
}

pub(crate) fn expect_arg_range(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::new(ErrorKind::Arity {
            name: name.to_string(),
            expected: format!("{min} to {max}"),
            got: args.len(),
        }));
    }
    Ok(())
}

fn mismatch(name: &str, index: usize, expected: &str, got: Option<&Value>) -> RuntimeError {
    let got = got.map(Value::type_name).unwrap_or("nothing");
    RuntimeError::type_error(format!(
        "{name}: argument {} must be {expected}, got {got}",
        index + 1
    ))
}

pub(crate) fn expect_string<'a>(
    name: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a str, RuntimeError> {
    match args.get(index) {
        Some(Value::String(text)) => Ok(text),
        other => Err(mismatch(name, index, "a string", other)),
    }
}

pub(crate) fn expect_number(name: &str, args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    match args.get(index) {
        Some(Value::Number(value)) => Ok(*value),
        other => Err(mismatch(name, index, "a number", other)),
    }
}

pub(crate) fn expect_int(name: &str, args: &[Value], index: usize) -> Result<i64, RuntimeError> {
    match args.get(index) {
        Some(value @ Value::Number(_)) => value
            .as_index()
            .ok_or_else(|| mismatch(name, index, "an integer", Some(value))),
        other => Err(mismatch(name, index, "an integer", other)),
    }
}

pub(crate) fn expect_list<'a>(
    name: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a [Value], RuntimeError> {
    match args.get(index) {
        Some(Value::List(items)) => Ok(items),
        other => Err(mismatch(name, index, "a list", other)),
    }
}

pub(crate) fn expect_dict<'a>(
    name: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a Dict, RuntimeError> {
    match args.get(index) {
        Some(Value::Dict(entries)) => Ok(entries),
        other => Err(mismatch(name, index, "a dict", other)),
    }
}

pub(crate) fn expect_callable<'a>(
    name: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a Value, RuntimeError> {
    match args.get(index) {
        Some(value) if value.is_callable() => Ok(value),
        other => Err(mismatch(name, index, "a function", other)),
    }
}

/// An optional trailing argument; `null` counts as absent.
pub(crate) fn optional(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index).filter(|value| !value.is_null())
}
