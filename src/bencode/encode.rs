//! Canonical bencode encoder
//!
//! Re-emits a decoded value tree. Dictionary keys are written in ascending
//! lexicographic byte order, so re-encoding a dictionary that was decoded
//! from canonical input reproduces the original bytes.

use super::decode::Value;

/// Encode a value into its canonical bencode representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(&mut out, value);
    out
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => encode_bytes(out, bytes),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_value(out, item);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            // BTreeMap iterates keys in ascending byte order.
            for (key, item) in entries {
                encode_bytes(out, key);
                encode_value(out, item);
            }
            out.push(b'e');
        }
    }
}

fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}
