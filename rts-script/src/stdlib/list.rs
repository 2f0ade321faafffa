use std::cmp::Ordering;

use crate::args::{
    expect_arg_count, expect_arg_range, expect_callable, expect_int, expect_list, expect_number,
    expect_string, optional,
};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{NativeResult, Value};

use super::text::{join_values, slice_bounds};

pub(super) fn append(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.append", args, 2)?;
    let items = expect_list("list.append", args, 0)?;
    ctx.limits().check_list(items.len() + 1)?;
    let mut out = items.to_vec();
    out.push(args[1].clone());
    Ok(Value::list(out))
}

pub(super) fn concat(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    let mut out = Vec::new();
    for idx in 0..args.len() {
        let items = expect_list("list.concat", args, idx)?;
        ctx.limits().check_list(out.len() + items.len())?;
        out.extend(items.iter().cloned());
    }
    Ok(Value::list(out))
}

pub(super) fn slice(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("list.slice", args, 2, 3)?;
    let items = expect_list("list.slice", args, 0)?;
    let start = expect_int("list.slice", args, 1)?;
    let end = match optional(args, 2) {
        Some(_) => Some(expect_int("list.slice", args, 2)?),
        None => None,
    };
    let (start, end) = slice_bounds(items.len(), start, end);
    Ok(Value::list(items[start..end].to_vec()))
}

pub(super) fn reverse(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.reverse", args, 1)?;
    let mut out = expect_list("list.reverse", args, 0)?.to_vec();
    out.reverse();
    Ok(Value::list(out))
}

fn natural_order(lhs: &Value, rhs: &Value) -> Result<Ordering, RuntimeError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a.total_cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(RuntimeError::type_error(format!(
            "list.sort: cannot compare {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

/// `list.sort(items, [compare])`. `compare(a, b)` returns a number (negative
/// sorts `a` first) or a bool meaning `a < b`.
pub(super) fn sort(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("list.sort", args, 1, 2)?;
    let mut out = expect_list("list.sort", args, 0)?.to_vec();
    let compare = match optional(args, 1) {
        Some(_) => Some(expect_callable("list.sort", args, 1)?.clone()),
        None => None,
    };

    let mut failure = None;
    out.sort_by(|lhs, rhs| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let ordering = match &compare {
            None => natural_order(lhs, rhs),
            Some(compare) => match ctx.call(compare, &[lhs.clone(), rhs.clone()]) {
                Ok(Value::Number(n)) => Ok(n.partial_cmp(&0.0).unwrap_or(Ordering::Equal)),
                Ok(Value::Bool(true)) => Ok(Ordering::Less),
                Ok(Value::Bool(false)) => Ok(Ordering::Greater),
                Ok(other) => Err(RuntimeError::type_error(format!(
                    "list.sort: comparator must return a number or bool, got {}",
                    other.type_name()
                ))),
                Err(err) => Err(err),
            },
        };
        ordering.unwrap_or_else(|err| {
            failure = Some(err);
            Ordering::Equal
        })
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(Value::list(out)),
    }
}

pub(super) fn map(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.map", args, 2)?;
    let items = expect_list("list.map", args, 0)?;
    let func = expect_callable("list.map", args, 1)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(ctx.call(func, std::slice::from_ref(item))?);
    }
    Ok(Value::list(out))
}

pub(super) fn filter(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.filter", args, 2)?;
    let items = expect_list("list.filter", args, 0)?;
    let func = expect_callable("list.filter", args, 1)?;
    let mut out = Vec::new();
    for item in items {
        if ctx.call(func, std::slice::from_ref(item))?.is_truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::list(out))
}

pub(super) fn first(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.first", args, 1)?;
    let items = expect_list("list.first", args, 0)?;
    Ok(items.first().cloned().unwrap_or(Value::Null))
}

pub(super) fn last(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.last", args, 1)?;
    let items = expect_list("list.last", args, 0)?;
    Ok(items.last().cloned().unwrap_or(Value::Null))
}

pub(super) fn index(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.index", args, 2)?;
    let items = expect_list("list.index", args, 0)?;
    Ok(match items.iter().position(|item| *item == args[1]) {
        Some(idx) => Value::from(idx),
        None => Value::Number(-1.0),
    })
}

pub(super) fn unique(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("list.unique", args, 1)?;
    let items = expect_list("list.unique", args, 0)?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    Ok(Value::list(out))
}

/// `list.range(end)` or `list.range(start, end, [step])`, end exclusive.
pub(super) fn range(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("list.range", args, 1, 3)?;
    let (start, end) = if args.len() == 1 {
        (0.0, expect_number("list.range", args, 0)?)
    } else {
        (
            expect_number("list.range", args, 0)?,
            expect_number("list.range", args, 1)?,
        )
    };
    let step = match optional(args, 2) {
        Some(_) => expect_number("list.range", args, 2)?,
        None => 1.0,
    };
    if step == 0.0 || !step.is_finite() || !start.is_finite() || !end.is_finite() {
        return Err(RuntimeError::invalid(
            "list.range: bounds and step must be finite and step non-zero",
        ));
    }

    let count = ((end - start) / step).ceil().max(0.0);
    let max_list = ctx.limits().max_list;
    if count > max_list as f64 {
        return Err(RuntimeError::limit(format!("list length {count} > {max_list}")));
    }
    let count = count as usize;
    Ok(Value::list(
        (0..count)
            .map(|idx| Value::Number(start + step * idx as f64))
            .collect(),
    ))
}

pub(super) fn join(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_range("list.join", args, 1, 2)?;
    let items = expect_list("list.join", args, 0)?;
    let separator = match optional(args, 1) {
        Some(_) => expect_string("list.join", args, 1)?,
        None => "",
    };
    join_values(ctx, items, separator)
}
