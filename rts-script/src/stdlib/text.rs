use crate::args::{
    expect_arg_count, expect_arg_range, expect_int, expect_list, expect_string, optional,
};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{NativeResult, Value};

pub(super) fn lower(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.lower", args, 1)?;
    Ok(Value::from(expect_string("text.lower", args, 0)?.to_lowercase()))
}

pub(super) fn upper(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.upper", args, 1)?;
    Ok(Value::from(expect_string("text.upper", args, 0)?.to_uppercase()))
}

pub(super) fn trim(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.trim", args, 1)?;
    Ok(Value::from(expect_string("text.trim", args, 0)?.trim()))
}

pub(super) fn split(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.split", args, 2)?;
    let text = expect_string("text.split", args, 0)?;
    let separator = expect_string("text.split", args, 1)?;
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|ch| Value::from(ch.to_string())).collect()
    } else {
        text.split(separator).map(Value::from).collect()
    };
    ctx.limits().check_list(parts.len())?;
    Ok(Value::list(parts))
}

pub(super) fn replace(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.replace", args, 3)?;
    let text = expect_string("text.replace", args, 0)?;
    let from = expect_string("text.replace", args, 1)?;
    let to = expect_string("text.replace", args, 2)?;
    if from.is_empty() {
        return Err(RuntimeError::invalid(
            "text.replace: search string must not be empty",
        ));
    }
    let hits = text.matches(from).count();
    let len = text.len() - hits * from.len() + hits * to.len();
    ctx.limits().check_string(len)?;
    Ok(Value::from(text.replace(from, to)))
}

pub(super) fn starts_with(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.startsWith", args, 2)?;
    let text = expect_string("text.startsWith", args, 0)?;
    let prefix = expect_string("text.startsWith", args, 1)?;
    Ok(Value::Bool(text.starts_with(prefix)))
}

pub(super) fn ends_with(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.endsWith", args, 2)?;
    let text = expect_string("text.endsWith", args, 0)?;
    let suffix = expect_string("text.endsWith", args, 1)?;
    Ok(Value::Bool(text.ends_with(suffix)))
}

pub(super) fn repeat(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("text.repeat", args, 2)?;
    let text = expect_string("text.repeat", args, 0)?;
    let count = expect_int("text.repeat", args, 1)?;
    let count = usize::try_from(count).map_err(|_| {
        RuntimeError::invalid(format!("text.repeat: count must not be negative, got {count}"))
    })?;
    let len = text.len().checked_mul(count).unwrap_or(usize::MAX);
    ctx.limits().check_string(len)?;
    Ok(Value::from(text.repeat(count)))
}

/// Normalizes a slice range the way list and text slicing share: negative
/// bounds count from the end and everything clamps to `0..len`.
pub(super) fn slice_bounds(len: usize, start: i64, end: Option<i64>) -> (usize, usize) {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |idx: i64| {
        let idx = if idx < 0 { idx + len_i } else { idx };
        idx.clamp(0, len_i) as usize
    };
    let start = clamp(start);
    let end = end.map(clamp).unwrap_or(len);
    (start, end.max(start))
}

pub(super) fn slice(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("text.slice", args, 2, 3)?;
    let text = expect_string("text.slice", args, 0)?;
    let start = expect_int("text.slice", args, 1)?;
    let end = match optional(args, 2) {
        Some(_) => Some(expect_int("text.slice", args, 2)?),
        None => None,
    };
    let chars = text.chars().count();
    let (start, end) = slice_bounds(chars, start, end);
    Ok(Value::from(
        text.chars().skip(start).take(end - start).collect::<String>(),
    ))
}

pub(super) fn join(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("text.join", args, 1, 2)?;
    let items = expect_list("text.join", args, 0)?;
    let separator = match optional(args, 1) {
        Some(_) => expect_string("text.join", args, 1)?,
        None => "",
    };
    join_values(ctx, items, separator)
}

pub(super) fn join_values(ctx: &mut Ctx, items: &[Value], separator: &str) -> NativeResult {
    let mut out = String::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(separator);
        }
        match item {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        ctx.limits().check_string(out.len())?;
    }
    Ok(Value::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Limits;

    #[test]
    fn repeat_checks_the_limit_before_allocating() {
        let mut ctx = Ctx::new().with_limits(Limits {
            max_string: 10,
            ..Limits::default()
        });
        assert_eq!(
            repeat(&mut ctx, &[Value::from("ab"), Value::from(5.0)]).expect("within limit"),
            Value::from("ababababab")
        );
        let err = repeat(&mut ctx, &[Value::from("ab"), Value::from(1e15)])
            .expect_err("over the limit");
        assert!(err.to_string().contains("resource limit exceeded: string length"));
    }

    #[test]
    fn slice_counts_characters_and_supports_negative_bounds() {
        let mut ctx = Ctx::new();
        let sliced = slice(&mut ctx, &[Value::from("héllo"), Value::from(1.0), Value::from(-1.0)])
            .expect("slice");
        assert_eq!(sliced, Value::from("éll"));
        let tail = slice(&mut ctx, &[Value::from("héllo"), Value::from(-2.0)]).expect("slice");
        assert_eq!(tail, Value::from("lo"));
    }

    #[test]
    fn split_with_empty_separator_yields_characters() {
        let mut ctx = Ctx::new();
        let parts = split(&mut ctx, &[Value::from("abc"), Value::from("")]).expect("split");
        assert_eq!(parts.to_string(), r#"["a","b","c"]"#);
    }

    #[test]
    fn join_displays_non_string_items() {
        let mut ctx = Ctx::new();
        let items = Value::list(vec![Value::from("a"), Value::from(1.0), Value::Bool(true)]);
        let joined = join(&mut ctx, &[items, Value::from("-")]).expect("join");
        assert_eq!(joined, Value::from("a-1-true"));
    }
}
