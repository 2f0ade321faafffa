use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::args::{expect_arg_count, expect_string};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{NativeResult, Value};

const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Everything except the RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn utf8(name: &str, bytes: Vec<u8>) -> NativeResult {
    String::from_utf8(bytes)
        .map(Value::from)
        .map_err(|_| RuntimeError::decode(format!("{name}: decoded bytes are not valid UTF-8")))
}

pub(super) fn base64_encode(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("base64.encode", args, 1)?;
    let input = expect_string("base64.encode", args, 0)?;
    ctx.limits().check_string(input.len().div_ceil(3) * 4)?;
    Ok(Value::from(STANDARD.encode(input)))
}

pub(super) fn base64_decode(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("base64.decode", args, 1)?;
    let input = expect_string("base64.decode", args, 0)?;
    let bytes = STANDARD
        .decode(input.trim())
        .map_err(|err| RuntimeError::decode(format!("base64.decode: {err}")))?;
    utf8("base64.decode", bytes)
}

pub(super) fn base64url_encode(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("base64url.encode", args, 1)?;
    let input = expect_string("base64url.encode", args, 0)?;
    ctx.limits().check_string(input.len().div_ceil(3) * 4)?;
    Ok(Value::from(BASE64URL.encode(input)))
}

pub(super) fn base64url_decode(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("base64url.decode", args, 1)?;
    let input = expect_string("base64url.decode", args, 0)?;
    let bytes = BASE64URL
        .decode(input.trim())
        .map_err(|err| RuntimeError::decode(format!("base64url.decode: {err}")))?;
    utf8("base64url.decode", bytes)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(DIGITS[usize::from(byte >> 4)] as char);
        out.push(DIGITS[usize::from(byte & 0x0f)] as char);
    }
    out
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

fn from_hex(input: &str) -> Result<Vec<u8>, RuntimeError> {
    if input.len() % 2 != 0 {
        return Err(RuntimeError::decode("hex.decode: odd number of digits"));
    }
    input
        .as_bytes()
        .chunks(2)
        .map(|pair| match (hex_digit(pair[0]), hex_digit(pair[1])) {
            (Some(high), Some(low)) => Ok((high << 4) | low),
            _ => Err(RuntimeError::decode(format!(
                "hex.decode: invalid digits {:?}",
                String::from_utf8_lossy(pair)
            ))),
        })
        .collect()
}

pub(super) fn hex_encode(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("hex.encode", args, 1)?;
    let input = expect_string("hex.encode", args, 0)?;
    ctx.limits().check_string(input.len() * 2)?;
    Ok(Value::from(to_hex(input.as_bytes())))
}

pub(super) fn hex_decode(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("hex.decode", args, 1)?;
    let input = expect_string("hex.decode", args, 0)?;
    utf8("hex.decode", from_hex(input.trim())?)
}

pub(super) fn url_encode(ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("url.encode", args, 1)?;
    let input = expect_string("url.encode", args, 0)?;
    let encoded = utf8_percent_encode(input, COMPONENT).to_string();
    ctx.limits().check_string(encoded.len())?;
    Ok(Value::from(encoded))
}

pub(super) fn url_decode(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("url.decode", args, 1)?;
    let input = expect_string("url.decode", args, 0)?;
    percent_decode_str(input)
        .decode_utf8()
        .map(|text| Value::from(text.into_owned()))
        .map_err(|_| RuntimeError::decode("url.decode: decoded bytes are not valid UTF-8"))
}
