use regex::RegexBuilder;

use crate::args::{expect_arg_count, expect_string};
use crate::ctx::Ctx;
use crate::error::{ErrorKind, RuntimeError};
use crate::value::{NativeResult, Value};

const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub(super) fn fail(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("fail", args, 1)?;
    Err(RuntimeError::new(ErrorKind::Fail(args[0].to_string())))
}

pub(super) fn len(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("len", args, 1)?;
    match &args[0] {
        Value::String(text) => Ok(Value::from(text.chars().count())),
        Value::List(items) => Ok(Value::from(items.len())),
        Value::Dict(entries) => Ok(Value::from(entries.len())),
        other => Err(RuntimeError::type_error(format!(
            "len: unsupported type {}",
            other.type_name()
        ))),
    }
}

pub(super) fn contains(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("contains", args, 2)?;
    let needle = &args[1];
    let found = match &args[0] {
        Value::String(text) => text.contains(expect_string("contains", args, 1)?),
        Value::List(items) => items.iter().any(|item| item == needle),
        Value::Dict(entries) => entries.contains_key(&needle.to_key()?),
        other => {
            return Err(RuntimeError::type_error(format!(
                "contains: unsupported type {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Bool(found))
}

pub(super) fn match_regex(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("match", args, 2)?;
    let pattern = expect_string("match", args, 0)?;
    let text = expect_string("match", args, 1)?;
    let regex = RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|err| RuntimeError::new(ErrorKind::Regex(err.to_string())))?;
    Ok(Value::Bool(regex.is_match(text)))
}

pub(super) fn str(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("str", args, 1)?;
    Ok(match &args[0] {
        value @ Value::String(_) => value.clone(),
        other => Value::from(other.to_string()),
    })
}

pub(super) fn default(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("default", args, 2)?;
    if args[0].is_null() {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

pub(super) fn uuid(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("uuid", args, 0)?;
    ctx.next_uuid().map(Value::from)
}

pub(super) fn type_of(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("type", args, 1)?;
    Ok(Value::from(args[0].type_name()))
}

pub(super) fn num(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("num", args, 1)?;
    match &args[0] {
        Value::Number(value) => Ok(Value::Number(*value)),
        Value::Bool(value) => Ok(Value::Number(if *value { 1.0 } else { 0.0 })),
        Value::String(text) => text.trim().parse::<f64>().map(Value::Number).map_err(|_| {
            RuntimeError::invalid(format!("num: cannot convert {text:?} to a number"))
        }),
        other => Err(RuntimeError::type_error(format!(
            "num: cannot convert {} to a number",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dict;

    #[test]
    fn contains_uses_value_equality_and_key_coercion() {
        let mut ctx = Ctx::new();
        let list = Value::list(vec![Value::from(1.0), Value::from("a")]);
        let found = contains(&mut ctx, &[list.clone(), Value::from(1.0)]).expect("contains");
        assert_eq!(found, Value::Bool(true));
        let missing = contains(&mut ctx, &[list, Value::from("1")]).expect("contains");
        assert_eq!(missing, Value::Bool(false));

        let mut entries = Dict::new();
        entries.insert("2".to_string(), Value::Null);
        let found =
            contains(&mut ctx, &[Value::dict(entries), Value::from(2.0)]).expect("contains");
        assert_eq!(found, Value::Bool(true));
    }

    #[test]
    fn match_reports_invalid_patterns() {
        let mut ctx = Ctx::new();
        let err = match_regex(&mut ctx, &[Value::from("("), Value::from("x")])
            .expect_err("unbalanced group should fail");
        assert!(matches!(err.kind, ErrorKind::Regex(_)));
    }

    #[test]
    fn len_counts_characters_not_bytes() {
        let mut ctx = Ctx::new();
        let value = len(&mut ctx, &[Value::from("héllo")]).expect("len");
        assert_eq!(value, Value::from(5.0));
    }

    #[test]
    fn arity_errors_name_the_builtin() {
        let mut ctx = Ctx::new();
        let err = default(&mut ctx, &[Value::Null]).expect_err("missing fallback");
        assert_eq!(err.to_string(), "default: expected 2 arguments, got 1");
    }
}
