//! Serialization codec for values crossing an engine boundary
//!
//! A value is turned into a `(payload, type tag, metadata)` triple. Arrays of
//! homogeneous numbers take a packed little-endian buffer path tagged
//! `ndarray` with `{dtype, shape}` metadata; everything else is JSON encoded.
//! Decoding always produces an owned value, never a view into the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::{EngineError, Result};

/// How a payload is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Json,
    Ndarray,
}

/// A value in transportable form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Serialized {
    #[serde(with = "payload_base64")]
    pub payload: Bytes,
    pub type_tag: TypeTag,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Convert values to and from their transportable form
pub trait Codec: Send + Sync {
    fn serialize(&self, value: &JsonValue) -> Result<Serialized>;

    fn deserialize(&self, data: &Serialized) -> Result<JsonValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    I64,
    F64,
}

impl Dtype {
    fn as_str(&self) -> &'static str {
        match self {
            Dtype::I64 => "i64",
            Dtype::F64 => "f64",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "i64" => Some(Dtype::I64),
            "f64" => Some(Dtype::F64),
            _ => None,
        }
    }

    fn of(items: &[JsonValue]) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        if items.iter().all(JsonValue::is_i64) {
            Some(Dtype::I64)
        } else if items.iter().all(JsonValue::is_f64) {
            Some(Dtype::F64)
        } else {
            None
        }
    }
}

/// The default codec: JSON with a packed path for numeric arrays
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    array_fast_path: bool,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonCodec {
    pub fn new() -> Self {
        Self {
            array_fast_path: true,
        }
    }

    /// A codec that always uses the JSON path
    pub fn json_only() -> Self {
        Self {
            array_fast_path: false,
        }
    }

    fn pack(items: &[JsonValue], dtype: Dtype) -> Serialized {
        let mut buf = BytesMut::with_capacity(items.len() * 8);
        for item in items {
            match dtype {
                Dtype::I64 => buf.put_i64_le(item.as_i64().unwrap_or_default()),
                Dtype::F64 => buf.put_f64_le(item.as_f64().unwrap_or_default()),
            }
        }
        Serialized {
            payload: buf.freeze(),
            type_tag: TypeTag::Ndarray,
            metadata: json!({ "dtype": dtype.as_str(), "shape": [items.len()] }),
        }
    }

    fn unpack(data: &Serialized) -> Result<JsonValue> {
        let dtype = data
            .metadata
            .get("dtype")
            .and_then(JsonValue::as_str)
            .and_then(Dtype::parse)
            .ok_or_else(|| EngineError::serialization("ndarray payload without a known dtype"))?;
        let len = data
            .metadata
            .get("shape")
            .and_then(|shape| shape.get(0))
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| EngineError::serialization("ndarray payload without a shape"))?;

        // Shape comes off the wire; never size anything from it before checking the payload
        let len = usize::try_from(len)
            .ok()
            .filter(|len| len.checked_mul(8) == Some(data.payload.len()))
            .ok_or_else(|| {
                EngineError::serialization(format!(
                    "ndarray payload holds {} bytes, shape declares {} elements",
                    data.payload.len(),
                    len
                ))
            })?;

        let mut buf = &data.payload[..];
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            let item = match dtype {
                Dtype::I64 => JsonValue::from(buf.get_i64_le()),
                Dtype::F64 => serde_json::Number::from_f64(buf.get_f64_le())
                    .map(JsonValue::Number)
                    .ok_or_else(|| {
                        EngineError::serialization("non-finite float in ndarray payload")
                    })?,
            };
            items.push(item);
        }
        Ok(JsonValue::Array(items))
    }
}

impl Codec for JsonCodec {
    fn serialize(&self, value: &JsonValue) -> Result<Serialized> {
        if self.array_fast_path {
            if let JsonValue::Array(items) = value {
                if let Some(dtype) = Dtype::of(items) {
                    return Ok(Self::pack(items, dtype));
                }
            }
        }

        let payload = serde_json::to_vec(value)?;
        Ok(Serialized {
            payload: Bytes::from(payload),
            type_tag: TypeTag::Json,
            metadata: JsonValue::Null,
        })
    }

    fn deserialize(&self, data: &Serialized) -> Result<JsonValue> {
        match data.type_tag {
            TypeTag::Json => Ok(serde_json::from_slice(&data.payload)?),
            TypeTag::Ndarray => Self::unpack(data),
        }
    }
}

/// Serialize with the default codec
pub fn serialize(value: &JsonValue) -> Result<Serialized> {
    JsonCodec::new().serialize(value)
}

/// Deserialize with the default codec
pub fn deserialize(data: &Serialized) -> Result<JsonValue> {
    JsonCodec::new().deserialize(data)
}

/// Convert any serializable value to an owned value that survived a full
/// codec round trip.
pub fn round_trip<T: Serialize + ?Sized>(value: &T) -> Result<JsonValue> {
    let value = serde_json::to_value(value)?;
    deserialize(&serialize(&value)?)
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
