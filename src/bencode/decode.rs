//! Bencode decoder
//!
//! Single-pass recursive descent over a byte buffer. Byte strings are raw
//! byte sequences, not text.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::TorrentError;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Decoding failure, carrying the byte position of the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    pub position: usize,
    pub reason: String,
}

impl Malformed {
    fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed bencode at byte {}: {}", self.position, self.reason)
    }
}

impl std::error::Error for Malformed {}

impl From<Malformed> for TorrentError {
    fn from(err: Malformed) -> Self {
        TorrentError::parse_error_with_source("Failed to decode bencode data", err.to_string())
    }
}

/// Decode a complete bencode document.
///
/// The top-level value must consume the entire buffer.
pub fn decode(buf: &[u8]) -> Result<Value, Malformed> {
    let (value, end) = decode_prefix(buf, 0)?;
    if end != buf.len() {
        return Err(Malformed::new(end, "trailing data after top-level value"));
    }
    Ok(value)
}

/// Decode one value starting at `pos`, returning it together with the index
/// just past the consumed input.
///
/// Public so callers can walk a container themselves and learn the byte
/// span each value occupies (the metainfo parser uses this to retain the
/// raw `info` dictionary bytes for hashing).
pub fn decode_prefix(buf: &[u8], pos: usize) -> Result<(Value, usize), Malformed> {
    match buf.get(pos) {
        None => Err(Malformed::new(pos, "unexpected end of input")),
        Some(b'i') => decode_int(buf, pos),
        Some(b'l') => decode_list(buf, pos),
        Some(b'd') => decode_dict(buf, pos),
        Some(b'0'..=b'9') => {
            let (bytes, end) = decode_bytes(buf, pos)?;
            Ok((Value::Bytes(bytes.to_vec()), end))
        }
        Some(&byte) => Err(Malformed::new(pos, format!("invalid token 0x{:02x}", byte))),
    }
}

fn decode_int(buf: &[u8], start: usize) -> Result<(Value, usize), Malformed> {
    let mut pos = start + 1;
    let digits_start = pos;

    if buf.get(pos) == Some(&b'-') {
        pos += 1;
        match buf.get(pos) {
            Some(b'1'..=b'9') => {}
            Some(b'0') => return Err(Malformed::new(pos, "negative zero")),
            _ => return Err(Malformed::new(pos, "sign without digits")),
        }
    }

    match buf.get(pos) {
        Some(b'0') => {
            // The literal zero is the only integer allowed to start with '0'.
            if buf.get(pos + 1) != Some(&b'e') {
                return Err(Malformed::new(pos, "leading zero in integer"));
            }
            pos += 1;
        }
        Some(b'1'..=b'9') => {
            while matches!(buf.get(pos), Some(b'0'..=b'9')) {
                pos += 1;
            }
        }
        _ => return Err(Malformed::new(pos, "integer without digits")),
    }

    if buf.get(pos) != Some(&b'e') {
        return Err(Malformed::new(pos, "unterminated integer"));
    }

    let digits = std::str::from_utf8(&buf[digits_start..pos])
        .map_err(|_| Malformed::new(digits_start, "integer is not valid ASCII"))?;
    let value: i64 = digits
        .parse()
        .map_err(|_| Malformed::new(digits_start, "integer out of range"))?;

    Ok((Value::Int(value), pos + 1))
}

fn decode_bytes(buf: &[u8], start: usize) -> Result<(&[u8], usize), Malformed> {
    let mut pos = start;
    while matches!(buf.get(pos), Some(b'0'..=b'9')) {
        pos += 1;
    }

    if buf.get(pos) != Some(&b':') {
        return Err(Malformed::new(pos, "unterminated string length"));
    }

    let length: usize = std::str::from_utf8(&buf[start..pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Malformed::new(start, "string length out of range"))?;

    let data_start = pos + 1;
    let data_end = data_start
        .checked_add(length)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| Malformed::new(data_start, "string extends past end of input"))?;

    Ok((&buf[data_start..data_end], data_end))
}

fn decode_list(buf: &[u8], start: usize) -> Result<(Value, usize), Malformed> {
    let mut pos = start + 1;
    let mut items = Vec::new();

    while buf.get(pos).is_some_and(|&b| b != b'e') {
        let (item, end) = decode_prefix(buf, pos)?;
        items.push(item);
        pos = end;
    }

    if buf.get(pos) != Some(&b'e') {
        return Err(Malformed::new(pos, "unterminated list"));
    }

    Ok((Value::List(items), pos + 1))
}

fn decode_dict(buf: &[u8], start: usize) -> Result<(Value, usize), Malformed> {
    let mut pos = start + 1;
    let mut entries = BTreeMap::new();

    while buf.get(pos).is_some_and(|&b| b != b'e') {
        if !matches!(buf.get(pos), Some(b'0'..=b'9')) {
            return Err(Malformed::new(pos, "dictionary key must be a string"));
        }
        let key_pos = pos;
        let (key, key_end) = decode_bytes(buf, pos)?;
        let (value, value_end) = decode_prefix(buf, key_end)?;

        if entries.insert(key.to_vec(), value).is_some() {
            return Err(Malformed::new(
                key_pos,
                format!("duplicate key {:?}", String::from_utf8_lossy(key)),
            ));
        }
        pos = value_end;
    }

    if buf.get(pos) != Some(&b'e') {
        return Err(Malformed::new(pos, "unterminated dictionary"));
    }

    Ok((Value::Dict(entries), pos + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_int() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
        assert_eq!(decode(b"i-17e").unwrap(), Value::Int(-17));
    }

    #[test]
    fn test_decode_int_rejects_leading_zero() {
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i00e").is_err());
    }

    #[test]
    fn test_decode_int_rejects_negative_zero() {
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"i-e").is_err());
    }

    #[test]
    fn test_decode_int_unterminated() {
        let err = decode(b"i42").unwrap_err();
        assert_eq!(err.position, 3);
    }

    #[test]
    fn test_decode_string() {
        assert_eq!(decode(b"4:spam").unwrap(), Value::Bytes(b"spam".to_vec()));
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_decode_string_binary_safe() {
        assert_eq!(
            decode(b"3:\x00\xff\x7f").unwrap(),
            Value::Bytes(vec![0x00, 0xff, 0x7f])
        );
    }

    #[test]
    fn test_decode_string_truncated() {
        assert!(decode(b"5:spam").is_err());
    }

    #[test]
    fn test_decode_list() {
        let value = decode(b"l4:spami42ee").unwrap();
        assert_eq!(
            value,
            Value::List(vec![Value::Bytes(b"spam".to_vec()), Value::Int(42)])
        );
    }

    #[test]
    fn test_decode_dict() {
        let value = decode(b"d3:cow3:moo4:spami7ee").unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict[b"cow".as_slice()], Value::Bytes(b"moo".to_vec()));
        assert_eq!(dict[b"spam".as_slice()], Value::Int(7));
    }

    #[test]
    fn test_decode_dict_rejects_duplicate_key() {
        let err = decode(b"d1:ai1e1:ai2ee").unwrap_err();
        assert!(err.reason.contains("duplicate key"));
    }

    #[test]
    fn test_decode_dict_rejects_non_string_key() {
        assert!(decode(b"di1ei2ee").is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_data() {
        let err = decode(b"i1ei2e").unwrap_err();
        assert_eq!(err.position, 3);
        assert!(err.reason.contains("trailing"));
    }

    #[test]
    fn test_decode_rejects_empty_input() {
        assert!(decode(b"").is_err());
    }

    #[test]
    fn test_decode_prefix_reports_end_index() {
        let buf = b"d4:infod3:foo3:baree";
        let (_, end) = decode_prefix(buf, 7).unwrap();
        assert_eq!(&buf[7..end], b"d3:foo3:bare");
    }

    #[test]
    fn test_decode_nested() {
        let value = decode(b"d4:listli0ei1eee").unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(
            dict[b"list".as_slice()],
            Value::List(vec![Value::Int(0), Value::Int(1)])
        );
    }
}
