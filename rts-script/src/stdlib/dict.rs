use crate::args::{expect_arg_count, expect_arg_range, expect_dict};
use crate::ctx::Ctx;
use crate::value::{NativeResult, Value};

pub(super) fn keys(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("dict.keys", args, 1)?;
    let entries = expect_dict("dict.keys", args, 0)?;
    Ok(Value::list(
        entries.keys().map(|key| Value::from(key.as_str())).collect(),
    ))
}

pub(super) fn values(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("dict.values", args, 1)?;
    let entries = expect_dict("dict.values", args, 0)?;
    Ok(Value::list(entries.values().cloned().collect()))
}

/// `[[key, value], ...]` in key order.
pub(super) fn items(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("dict.items", args, 1)?;
    let entries = expect_dict("dict.items", args, 0)?;
    Ok(Value::list(
        entries
            .iter()
            .map(|(key, value)| Value::list(vec![Value::from(key.as_str()), value.clone()]))
            .collect(),
    ))
}

pub(super) fn get(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("dict.get", args, 2, 3)?;
    let entries = expect_dict("dict.get", args, 0)?;
    let fallback = args.get(2).cloned().unwrap_or(Value::Null);
    Ok(entries.get(&args[1].to_key()?).cloned().unwrap_or(fallback))
}

pub(super) fn set(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("dict.set", args, 3)?;
    let mut entries = expect_dict("dict.set", args, 0)?.clone();
    entries.insert(args[1].to_key()?, args[2].clone());
    ctx.limits().check_dict(entries.len())?;
    Ok(Value::dict(entries))
}

pub(super) fn remove(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("dict.remove", args, 2)?;
    let mut entries = expect_dict("dict.remove", args, 0)?.clone();
    entries.remove(&args[1].to_key()?);
    Ok(Value::dict(entries))
}

/// Merges any number of dicts left to right; later keys win.
pub(super) fn merge(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    let mut out = crate::value::Dict::new();
    for idx in 0..args.len() {
        let entries = expect_dict("dict.merge", args, idx)?;
        out.extend(entries.iter().map(|(key, value)| (key.clone(), value.clone())));
        ctx.limits().check_dict(out.len())?;
    }
    Ok(Value::dict(out))
}

pub(super) fn has(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("dict.has", args, 2)?;
    let entries = expect_dict("dict.has", args, 0)?;
    Ok(Value::Bool(entries.contains_key(&args[1].to_key()?)))
}
