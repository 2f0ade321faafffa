use crate::args::{expect_arg_count, expect_number};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{NativeResult, Value};

fn unary(name: &str, args: &[Value], op: fn(f64) -> f64) -> NativeResult {
    expect_arg_count(name, args, 1)?;
    Ok(Value::Number(op(expect_number(name, args, 0)?)))
}

pub(super) fn abs(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    unary("math.abs", args, f64::abs)
}

pub(super) fn floor(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    unary("math.floor", args, f64::floor)
}

pub(super) fn ceil(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    unary("math.ceil", args, f64::ceil)
}

pub(super) fn round(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    unary("math.round", args, f64::round)
}

pub(super) fn sqrt(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    unary("math.sqrt", args, f64::sqrt)
}

pub(super) fn pow(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("math.pow", args, 2)?;
    let base = expect_number("math.pow", args, 0)?;
    let exponent = expect_number("math.pow", args, 1)?;
    Ok(Value::Number(base.powf(exponent)))
}

/// Numbers to fold: the arguments themselves, or the items of a single
/// list argument.
fn operands<'a>(name: &str, args: &'a [Value]) -> Result<&'a [Value], RuntimeError> {
    let operands = match args {
        [Value::List(items)] => items.as_slice(),
        _ => args,
    };
    if operands.is_empty() {
        return Err(RuntimeError::invalid(format!(
            "{name}: expected at least one number"
        )));
    }
    Ok(operands)
}

fn fold(name: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> NativeResult {
    let operands = operands(name, args)?;
    let mut acc = expect_number(name, operands, 0)?;
    for idx in 1..operands.len() {
        acc = pick(acc, expect_number(name, operands, idx)?);
    }
    Ok(Value::Number(acc))
}

pub(super) fn min(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    fold("math.min", args, f64::min)
}

pub(super) fn max(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    fold("math.max", args, f64::max)
}

pub(super) fn random(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("math.random", args, 0)?;
    ctx.random_unit("math.random").map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_and_max_accept_a_list_or_varargs() {
        let mut ctx = Ctx::new();
        let listed = Value::list(vec![Value::from(3.0), Value::from(-1.0), Value::from(2.0)]);
        assert_eq!(min(&mut ctx, &[listed]).expect("min"), Value::from(-1.0));
        assert_eq!(
            max(&mut ctx, &[Value::from(3.0), Value::from(7.0)]).expect("max"),
            Value::from(7.0)
        );
        assert!(min(&mut ctx, &[]).is_err());
    }

    #[test]
    fn round_goes_half_away_from_zero() {
        let mut ctx = Ctx::new();
        assert_eq!(round(&mut ctx, &[Value::from(2.5)]).expect("round"), Value::from(3.0));
        assert_eq!(round(&mut ctx, &[Value::from(-2.5)]).expect("round"), Value::from(-3.0));
    }

    #[test]
    fn random_requires_permission() {
        let mut denied = Ctx::new();
        assert!(random(&mut denied, &[]).is_err());
        let mut allowed = Ctx::new().allow_random(true);
        let value = random(&mut allowed, &[])
            .expect("random allowed")
            .as_number()
            .expect("number");
        assert!((0.0..1.0).contains(&value));
    }
}
