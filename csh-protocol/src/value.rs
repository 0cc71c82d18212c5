//! The ten value kinds the wire protocol carries, and the tagged
//! binary codec that (de)serializes them.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;

/// Single-byte discriminant identifying the kind of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Int = 0,
    Float = 1,
    Text = 2,
    Bytes = 3,
    List = 4,
    Tuple = 5,
    Mapping = 6,
    Null = 7,
    Bool = 8,
    Set = 9,
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        Ok(match b {
            0 => Tag::Int,
            1 => Tag::Float,
            2 => Tag::Text,
            3 => Tag::Bytes,
            4 => Tag::List,
            5 => Tag::Tuple,
            6 => Tag::Mapping,
            7 => Tag::Null,
            8 => Tag::Bool,
            9 => Tag::Set,
            other => return Err(CodecError::UnknownTag(other)),
        })
    }
}

/// A value of one of the ten wire kinds. Mappings are kept as ordered
/// key/value pairs rather than a `HashMap` since keys are arbitrary
/// `Value`s (not just hashable primitives) and insertion order barely
/// matters once the later-key-wins fold has been applied at decode
/// time.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f32),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Mapping(Vec<(Value, Value)>),
    Null,
    Bool(bool),
    Set(Vec<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Text(a), Text(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) | (Set(a), Set(b)) => a == b,
            (Mapping(a), Mapping(b)) => a == b,
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn mapping<const N: usize>(entries: [(&str, Value); N]) -> Value {
        Value::Mapping(entries.into_iter().map(|(k, v)| (Value::Text(k.to_string()), v)).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) | Value::Tuple(l) | Value::Set(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    /// Look up a key in a `Mapping` by text key. Returns `None` for any
    /// other variant, or if the key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Mapping(entries) => entries
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    pub fn tag(&self) -> Tag {
        match self {
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::Text(_) => Tag::Text,
            Value::Bytes(_) => Tag::Bytes,
            Value::List(_) => Tag::List,
            Value::Tuple(_) => Tag::Tuple,
            Value::Mapping(_) => Tag::Mapping,
            Value::Null => Tag::Null,
            Value::Bool(_) => Tag::Bool,
            Value::Set(_) => Tag::Set,
        }
    }

    /// Encode this value as `tag(1) | payload_len(8 LE) | payload`.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut out = Vec::with_capacity(1 + 8 + payload.len());
        out.push(self.tag() as u8);
        let mut len_buf = [0u8; 8];
        LittleEndian::write_u64(&mut len_buf, payload.len() as u64);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&payload);
        out
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => encode_int(*v),
            Value::Float(v) => v.to_le_bytes().to_vec(),
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend_from_slice(&item.encode());
                }
                out
            }
            Value::Mapping(entries) => {
                let as_list = Value::List(
                    entries
                        .iter()
                        .map(|(k, v)| Value::List(vec![k.clone(), v.clone()]))
                        .collect(),
                );
                as_list.encode_payload()
            }
            Value::Null => vec![0u8],
            Value::Bool(b) => vec![if *b { 1 } else { 0 }],
        }
    }

    /// Decode a single tagged value from the front of `buf`, returning
    /// the value and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Value, usize), CodecError> {
        if buf.len() < 9 {
            return Err(CodecError::Truncated { expected: 9, got: buf.len() });
        }
        let tag = Tag::try_from(buf[0])?;
        let len = LittleEndian::read_u64(&buf[1..9]);
        let payload_start = 9;
        let payload_end = payload_start
            .checked_add(len as usize)
            .ok_or(CodecError::Truncated { expected: len, got: buf.len() })?;
        if buf.len() < payload_end {
            return Err(CodecError::Truncated { expected: len, got: buf.len() - payload_start });
        }
        let payload = &buf[payload_start..payload_end];
        let value = decode_payload(tag, payload)?;
        Ok((value, payload_end))
    }
}

fn decode_payload(tag: Tag, payload: &[u8]) -> Result<Value, CodecError> {
    Ok(match tag {
        Tag::Int => Value::Int(decode_int(payload)?),
        Tag::Float => {
            if payload.len() != 4 {
                return Err(CodecError::InvalidLength { tag: Tag::Float as u8, len: payload.len() as u64 });
            }
            let mut b = [0u8; 4];
            b.copy_from_slice(payload);
            Value::Float(f32::from_le_bytes(b))
        }
        Tag::Text => Value::Text(String::from_utf8(payload.to_vec())?),
        Tag::Bytes => Value::Bytes(payload.to_vec()),
        Tag::List => Value::List(decode_elements(payload)?),
        Tag::Tuple => Value::Tuple(decode_elements(payload)?),
        Tag::Set => Value::Set(decode_elements(payload)?),
        Tag::Mapping => {
            let pairs = decode_elements(payload)?;
            let mut entries: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let mut items = match pair {
                    Value::List(items) | Value::Tuple(items) => items,
                    _ => return Err(CodecError::InvalidLength { tag: Tag::Mapping as u8, len: payload.len() as u64 }),
                };
                if items.len() != 2 {
                    return Err(CodecError::InvalidLength { tag: Tag::Mapping as u8, len: payload.len() as u64 });
                }
                let value = items.pop().unwrap();
                let key = items.pop().unwrap();
                // later entries overwrite earlier ones with the same key
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                } else {
                    entries.push((key, value));
                }
            }
            Value::Mapping(entries)
        }
        Tag::Null => {
            if payload.len() != 1 || payload[0] != 0 {
                return Err(CodecError::InvalidLength { tag: Tag::Null as u8, len: payload.len() as u64 });
            }
            Value::Null
        }
        Tag::Bool => {
            if payload.len() != 1 {
                return Err(CodecError::InvalidLength { tag: Tag::Bool as u8, len: payload.len() as u64 });
            }
            Value::Bool(payload[0] != 0)
        }
    })
}

fn decode_elements(mut payload: &[u8]) -> Result<Vec<Value>, CodecError> {
    let mut out = Vec::new();
    while !payload.is_empty() {
        let (value, consumed) = Value::decode(payload)?;
        out.push(value);
        payload = &payload[consumed..];
    }
    Ok(out)
}

/// Minimal little-endian two's-complement encoding of `v`: the
/// smallest byte count such that the sign bit still fits, per the
/// wire format's `floor(bitlen/8)+1` rule.
fn encode_int(v: i64) -> Vec<u8> {
    let mut bytes = v.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let prev_sign = bytes[bytes.len() - 2] & 0x80 != 0;
        let droppable = (last == 0x00 && !prev_sign) || (last == 0xFF && prev_sign);
        if droppable {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

fn decode_int(payload: &[u8]) -> Result<i64, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::InvalidLength { tag: Tag::Int as u8, len: 0 });
    }
    if payload.len() > 8 {
        return Err(CodecError::IntTooWide);
    }
    let sign_extend = payload[payload.len() - 1] & 0x80 != 0;
    let mut buf = [if sign_extend { 0xFFu8 } else { 0x00u8 }; 8];
    buf[..payload.len()].copy_from_slice(payload);
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn int_round_trip() {
        for v in [0i64, 1, -1, 127, -128, 128, -129, 70000, -70000, i64::MAX, i64::MIN] {
            let encoded = Value::Int(v).encode();
            let (decoded, consumed) = Value::decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(decoded, Value::Int(v));
        }
    }

    #[test]
    fn int_minimal_length() {
        assert_eq!(Value::Int(0).encode_payload().len(), 1);
        assert_eq!(Value::Int(127).encode_payload().len(), 1);
        assert_eq!(Value::Int(128).encode_payload().len(), 2);
        assert_eq!(Value::Int(-128).encode_payload().len(), 1);
        assert_eq!(Value::Int(-129).encode_payload().len(), 2);
    }

    #[test]
    fn float_round_trip() {
        let encoded = Value::Float(3.25).encode();
        let (decoded, _) = Value::decode(&encoded).unwrap();
        assert_eq!(decoded, Value::Float(3.25));
    }

    #[test]
    fn text_round_trip() {
        let encoded = Value::Text("hello, csh".to_string()).encode();
        let (decoded, _) = Value::decode(&encoded).unwrap();
        assert_eq!(decoded, Value::Text("hello, csh".to_string()));
    }

    #[test]
    fn bytes_round_trip() {
        let encoded = Value::Bytes(vec![0, 1, 2, 255]).encode();
        let (decoded, _) = Value::decode(&encoded).unwrap();
        assert_eq!(decoded, Value::Bytes(vec![0, 1, 2, 255]));
    }

    #[test]
    fn null_and_bool_round_trip() {
        assert_eq!(Value::decode(&Value::Null.encode()).unwrap().0, Value::Null);
        assert_eq!(Value::decode(&Value::Bool(true).encode()).unwrap().0, Value::Bool(true));
        assert_eq!(Value::decode(&Value::Bool(false).encode()).unwrap().0, Value::Bool(false));
    }

    #[test]
    fn list_round_trip() {
        let v = Value::List(vec![Value::Int(1), Value::Text("x".into()), Value::Bool(true)]);
        let encoded = v.encode();
        let (decoded, consumed) = Value::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, v);
    }

    #[test]
    fn mapping_round_trip_and_later_key_wins() {
        let payload_list = Value::List(vec![
            Value::List(vec![Value::Text("a".into()), Value::Int(1)]),
            Value::List(vec![Value::Text("a".into()), Value::Int(2)]),
        ]);
        let encoded_payload = payload_list.encode_payload();
        let mut framed = vec![Tag::Mapping as u8];
        let mut len_buf = [0u8; 8];
        LittleEndian::write_u64(&mut len_buf, encoded_payload.len() as u64);
        framed.extend_from_slice(&len_buf);
        framed.extend_from_slice(&encoded_payload);

        let (decoded, _) = Value::decode(&framed).unwrap();
        match decoded {
            Value::Mapping(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0], (Value::Text("a".into()), Value::Int(2)));
            }
            other => panic!("expected mapping, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_errors() {
        let buf = [42u8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(Value::decode(&buf), Err(CodecError::UnknownTag(42))));
    }

    #[test]
    fn truncated_payload_errors() {
        let mut encoded = Value::Text("hello".into()).encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(Value::decode(&encoded), Err(CodecError::Truncated { .. })));
    }
}
