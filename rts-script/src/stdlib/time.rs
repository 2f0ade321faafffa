use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::args::{expect_arg_count, expect_number, expect_string};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{NativeResult, Value};

fn from_seconds(name: &str, seconds: f64) -> Result<DateTime<Utc>, RuntimeError> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    if !whole.is_finite() || whole.abs() > i64::MAX as f64 {
        return Err(RuntimeError::invalid(format!(
            "{name}: timestamp {seconds} out of range"
        )));
    }
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).ok_or_else(|| {
        RuntimeError::invalid(format!("{name}: timestamp {seconds} out of range"))
    })
}

fn to_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) / 1e9
}

pub(super) fn now(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("time.now", args, 0)?;
    Ok(Value::from(
        ctx.now().to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

pub(super) fn unix(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("time.unix", args, 0)?;
    Ok(Value::from(ctx.now().timestamp()))
}

pub(super) fn unix_ms(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("time.unixMs", args, 0)?;
    Ok(Value::from(ctx.now().timestamp_millis()))
}

pub(super) fn format(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("time.format", args, 2)?;
    let seconds = expect_number("time.format", args, 0)?;
    let layout = expect_string("time.format", args, 1)?;
    let items: Vec<Item<'_>> = StrftimeItems::new(layout).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(RuntimeError::invalid(format!(
            "time.format: invalid layout {layout:?}"
        )));
    }
    let time = from_seconds("time.format", seconds)?;
    Ok(Value::from(
        time.format_with_items(items.into_iter()).to_string(),
    ))
}

pub(super) fn parse(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("time.parse", args, 1)?;
    let text = expect_string("time.parse", args, 0)?;
    let time = DateTime::parse_from_rfc3339(text.trim())
        .map_err(|err| RuntimeError::decode(format!("time.parse: {err}")))?;
    Ok(Value::Number(to_seconds(time.with_timezone(&Utc))))
}

/// `delta` is seconds, or a duration such as `90s`, `15m`, `1h30m`, `-2d`.
pub(super) fn add(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("time.add", args, 2)?;
    let seconds = expect_number("time.add", args, 0)?;
    let delta = match &args[1] {
        Value::Number(delta) => *delta,
        Value::String(text) => parse_duration(text)?,
        other => {
            return Err(RuntimeError::type_error(format!(
                "time.add: argument 2 must be a number or duration, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Number(seconds + delta))
}

fn parse_duration(text: &str) -> Result<f64, RuntimeError> {
    let invalid = || RuntimeError::decode(format!("time.add: invalid duration {text:?}"));
    let trimmed = text.trim();
    let (sign, mut rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0.0;
    while !rest.is_empty() {
        let digits = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        let unit = rest[digits..].chars().next().ok_or_else(invalid)?;
        let scale = match unit {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            'd' => 86_400.0,
            _ => return Err(invalid()),
        };
        total += amount * scale;
        rest = &rest[digits + unit.len_utf8()..];
    }
    Ok(sign * total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_ctx() -> Ctx {
        Ctx::new().with_clock(|| {
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45)
                .single()
                .expect("valid fixed time")
        })
    }

    #[test]
    fn now_and_unix_use_the_injected_clock() {
        let mut ctx = fixed_ctx();
        assert_eq!(
            now(&mut ctx, &[]).expect("now"),
            Value::from("2024-03-01T12:30:45Z")
        );
        assert_eq!(unix(&mut ctx, &[]).expect("unix"), Value::from(1_709_296_245.0));
        assert_eq!(
            unix_ms(&mut ctx, &[]).expect("unixMs"),
            Value::from(1_709_296_245_000.0)
        );
    }

    #[test]
    fn format_rejects_invalid_layouts() {
        let mut ctx = fixed_ctx();
        let formatted = format(
            &mut ctx,
            &[Value::from(1_709_296_245.0), Value::from("%Y-%m-%d %H:%M")],
        )
        .expect("format");
        assert_eq!(formatted, Value::from("2024-03-01 12:30"));
        assert!(format(&mut ctx, &[Value::from(0.0), Value::from("%Q")]).is_err());
    }

    #[test]
    fn parse_accepts_offsets() {
        let mut ctx = fixed_ctx();
        let parsed = parse(&mut ctx, &[Value::from("2024-03-01T13:30:45+01:00")]).expect("parse");
        assert_eq!(parsed, Value::from(1_709_296_245.0));
        assert!(parse(&mut ctx, &[Value::from("yesterday")]).is_err());
    }

    #[test]
    fn add_understands_duration_strings() {
        assert_eq!(parse_duration("1h30m").expect("duration"), 5400.0);
        assert_eq!(parse_duration("-2d").expect("duration"), -172_800.0);
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m").is_err());
    }
}
