//! A minimal bencode-style codec for serializing key bytes as text.
//!
//! Only the two primitives the account payload needs are implemented:
//! byte strings and integers. Byte strings are hex-encoded before being
//! wrapped in the usual `<len>:<data>` bencode framing so that the result is
//! always ASCII and never contains a literal `\n` — the account payload
//! joins fields with `\n` and a bencoded key must not be able to smuggle
//! one in.

use crate::error::{AftError, Result};

/// Encode a byte string as `<hexlen>:<hex>`.
pub fn encode_bytes(data: &[u8]) -> String {
    let hex = hex::encode(data);
    format!("{}:{}", hex.len(), hex)
}

/// Decode a `<hexlen>:<hex>` byte string back into raw bytes.
pub fn decode_bytes(s: &str) -> Result<Vec<u8>> {
    let (len_str, rest) = s
        .split_once(':')
        .ok_or_else(|| AftError::Format("bencode: missing ':' separator".into()))?;
    let len: usize = len_str
        .parse()
        .map_err(|_| AftError::Format("bencode: invalid length prefix".into()))?;
    if rest.len() != len {
        return Err(AftError::Format("bencode: length mismatch".into()));
    }
    hex::decode(rest).map_err(|e| AftError::Format(format!("bencode: bad hex body: {e}")))
}

/// Encode an integer as `i<N>e`.
pub fn encode_int(n: i64) -> String {
    format!("i{n}e")
}

/// Decode an `i<N>e` integer.
pub fn decode_int(s: &str) -> Result<i64> {
    let inner = s
        .strip_prefix('i')
        .and_then(|s| s.strip_suffix('e'))
        .ok_or_else(|| AftError::Format("bencode: malformed integer".into()))?;
    inner
        .parse()
        .map_err(|_| AftError::Format("bencode: invalid integer body".into()))
}
