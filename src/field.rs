use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Longest text attribute a page can hold (its length prefix is one byte).
pub const MAX_TEXT_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    String,
    Float,
}

impl DataType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int" | "integer" | "bigint" | "long" => Some(DataType::Int),
            "string" | "text" | "varchar" | "str" => Some(DataType::String),
            "float" | "double" | "real" => Some(DataType::Float),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    String(String),
    Float(f64),
}

impl Field {
    pub fn data_type(&self) -> DataType {
        match self {
            Field::Int(_) => DataType::Int,
            Field::String(_) => DataType::String,
            Field::Float(_) => DataType::Float,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Field::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Field::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Field::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Three-way comparison between two values of the same tag.
    /// Floats use the IEEE total order so NaN has a fixed place.
    pub fn compare(&self, other: &Field) -> Result<Ordering, ExecError> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Ok(a.cmp(b)),
            (Field::String(a), Field::String(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (Field::Float(a), Field::Float(b)) => Ok(a.total_cmp(b)),
            (a, b) => Err(ExecError::TypeMismatch {
                left: a.data_type(),
                right: b.data_type(),
            }),
        }
    }

    /// Bytes this value occupies inside a page.
    pub fn encoded_size(&self) -> usize {
        match self {
            Field::Int(_) | Field::Float(_) => 8,
            Field::String(s) => 1 + s.len(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ExecError> {
        match self {
            Field::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::String(s) => {
                if s.len() > MAX_TEXT_LEN {
                    return Err(ExecError::TextTooLong(s.len()));
                }
                out.push(s.len() as u8);
                out.extend_from_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    /// Decodes one value of `dtype` from the front of `bytes`.
    /// Returns the value and the number of bytes consumed.
    pub fn decode(dtype: DataType, bytes: &[u8]) -> Result<(Field, usize), ExecError> {
        match dtype {
            DataType::Int | DataType::Float => {
                let raw: [u8; 8] = bytes
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| {
                        ExecError::MalformedPage(format!(
                            "need 8 bytes for {:?}, {} left",
                            dtype,
                            bytes.len()
                        ))
                    })?;
                let field = if dtype == DataType::Int {
                    Field::Int(i64::from_be_bytes(raw))
                } else {
                    Field::Float(f64::from_be_bytes(raw))
                };
                Ok((field, 8))
            }
            DataType::String => {
                let len = *bytes.first().ok_or_else(|| {
                    ExecError::MalformedPage("missing text length prefix".to_string())
                })? as usize;
                let text = bytes.get(1..1 + len).ok_or_else(|| {
                    ExecError::MalformedPage(format!(
                        "text of {} bytes runs past the page end",
                        len
                    ))
                })?;
                let s = std::str::from_utf8(text)
                    .map_err(|e| ExecError::MalformedPage(format!("invalid utf-8 text: {}", e)))?;
                Ok((Field::String(s.to_string()), 1 + len))
            }
        }
    }

    /// Appends an order-preserving encoding of the value: comparing two
    /// encodings of the same tag bytewise gives the same result as `compare`.
    /// Descending keys invert every byte of the encoding.
    pub fn write_normalized(&self, asc: bool, out: &mut Vec<u8>) {
        let start = out.len();
        match self {
            Field::Int(v) => {
                let flipped = (*v as u64) ^ (1 << 63);
                out.extend_from_slice(&flipped.to_be_bytes());
            }
            Field::Float(v) => {
                let bits = v.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            Field::String(s) => {
                // 0x00 is escaped so the 0x00 0x00 terminator sorts before any content byte.
                for &b in s.as_bytes() {
                    if b == 0 {
                        out.extend_from_slice(&[0x00, 0xFF]);
                    } else {
                        out.push(b);
                    }
                }
                out.extend_from_slice(&[0x00, 0x00]);
            }
        }
        if !asc {
            for b in &mut out[start..] {
                *b = !*b;
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::String(s) => write!(f, "{}", s),
            Field::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Int(v as i64)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Float(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::String(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::String(v)
    }
}
