use std::fmt;

use crate::{error::ExecError, field::Field};

/// A row: a fixed-length sequence of values in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    fields: Vec<Field>,
}

impl Tuple {
    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn get(&self, idx: usize) -> &Field {
        &self.fields[idx]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Bytes this tuple occupies inside a page. Text longer than 255 bytes
    /// cannot be represented and is rejected here.
    pub fn encoded_size(&self) -> Result<usize, ExecError> {
        let mut size = 0;
        for field in &self.fields {
            if let Field::String(s) = field {
                if s.len() > crate::field::MAX_TEXT_LEN {
                    return Err(ExecError::TextTooLong(s.len()));
                }
            }
            size += field.encoded_size();
        }
        Ok(size)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ExecError> {
        for field in &self.fields {
            field.encode_into(out)?;
        }
        Ok(())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut split = "";
        for field in &self.fields {
            write!(f, "{}{}", split, field)?;
            split = ", ";
        }
        Ok(())
    }
}
