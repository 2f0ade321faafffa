use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::args::{expect_arg_count, expect_string};
use crate::ctx::Ctx;
use crate::error::RuntimeError;
use crate::value::{NativeResult, Value};

use super::encoding::to_hex;

#[derive(Clone, Copy)]
enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    fn parse(name: &str, algo: &str) -> Result<Self, RuntimeError> {
        match algo.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(RuntimeError::invalid(format!(
                "{name}: unsupported algorithm {algo:?} (expected sha1, sha256 or sha512)"
            ))),
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Algorithm::Sha1 => Sha1::digest(data).to_vec(),
            Algorithm::Sha256 => Sha256::digest(data).to_vec(),
            Algorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn mac(self, name: &str, key: &[u8], data: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let invalid_key = |_| RuntimeError::invalid(format!("{name}: invalid key length"));
        Ok(match self {
            Algorithm::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Algorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Algorithm::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }
}

pub(super) fn hash(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("crypto.hash", args, 2)?;
    let algo = Algorithm::parse("crypto.hash", expect_string("crypto.hash", args, 0)?)?;
    let data = expect_string("crypto.hash", args, 1)?;
    Ok(Value::from(to_hex(&algo.digest(data.as_bytes()))))
}

pub(super) fn hmac(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("crypto.hmac", args, 3)?;
    let algo = Algorithm::parse("crypto.hmac", expect_string("crypto.hmac", args, 0)?)?;
    let key = expect_string("crypto.hmac", args, 1)?;
    let data = expect_string("crypto.hmac", args, 2)?;
    let mac = algo.mac("crypto.hmac", key.as_bytes(), data.as_bytes())?;
    Ok(Value::from(to_hex(&mac)))
}

pub(super) fn sha256(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("crypto.sha256", args, 1)?;
    let data = expect_string("crypto.sha256", args, 0)?;
    Ok(Value::from(to_hex(&Algorithm::Sha256.digest(data.as_bytes()))))
}

pub(super) fn hmac_sha256(_ctx: &mut Ctx, args: &[Value]) -> NativeResult {
    expect_arg_count("crypto.hmacSha256", args, 2)?;
    let key = expect_string("crypto.hmacSha256", args, 0)?;
    let data = expect_string("crypto.hmacSha256", args, 1)?;
    let mac = Algorithm::Sha256.mac("crypto.hmacSha256", key.as_bytes(), data.as_bytes())?;
    Ok(Value::from(to_hex(&mac)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_digest() {
        let mut ctx = Ctx::new();
        assert_eq!(
            sha256(&mut ctx, &[Value::from("abc")]).expect("sha256"),
            Value::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn hmac_matches_rfc_4231_case_two() {
        let mut ctx = Ctx::new();
        let mac = hmac_sha256(
            &mut ctx,
            &[Value::from("Jefe"), Value::from("what do ya want for nothing?")],
        )
        .expect("hmac");
        assert_eq!(
            mac,
            Value::from("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn unknown_algorithms_are_rejected() {
        let mut ctx = Ctx::new();
        let err = hash(&mut ctx, &[Value::from("md5"), Value::from("x")]).expect_err("md5");
        assert!(err.to_string().contains("unsupported algorithm"));
    }
}
