//! Fixed-width rows
//!
//! A [`Record`] is one row of a dataset: a value per schema column, encoded
//! as little-endian integers and zero-padded byte strings with no separators.

use pix_packet::{FieldSource, FieldValue};

use crate::error::{FormatError, Result};
use crate::schema::{DatasetSchema, FieldType};

/// A single stored column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl Value {
    /// Zero value for a column type
    pub fn default_for(ty: FieldType) -> Self {
        match ty {
            FieldType::U8 => Value::U8(0),
            FieldType::U32 => Value::U32(0),
            FieldType::U64 => Value::U64(0),
            FieldType::Bytes(_) => Value::Bytes(Vec::new()),
        }
    }

    /// Integer view; byte strings read as 0
    pub fn as_u64(&self) -> u64 {
        match self {
            Value::U8(v) => (*v).into(),
            Value::U32(v) => (*v).into(),
            Value::U64(v) => *v,
            Value::Bytes(_) => 0,
        }
    }

    /// Byte string view; integers read as empty
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::Bytes(b) => b,
            _ => &[],
        }
    }
}

/// One row of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: &'static DatasetSchema,
    values: Vec<Value>,
}

impl Record {
    /// A row with every column at its zero value
    pub fn new(schema: &'static DatasetSchema) -> Self {
        let values = schema.fields.iter().map(|f| Value::default_for(f.ty)).collect();
        Self { schema, values }
    }

    pub fn schema(&self) -> &'static DatasetSchema {
        self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Stored value of a column by name
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Integer value of a column, 0 when absent
    pub fn uint(&self, name: &str) -> u64 {
        self.value(name).map(Value::as_u64).unwrap_or(0)
    }

    /// Set a column by name; returns `Ok(false)` if the dataset lacks it
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match self.schema.index_of(name) {
            Some(column) => {
                self.set_column(column, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Set a column by index, converting to the column type
    ///
    /// Integers wider than the column fail with
    /// [`FormatError::ValueOutOfRange`]. Byte strings longer than the column
    /// fail with [`FormatError::FieldTooLong`], and byte strings ending in NUL
    /// with [`FormatError::TrailingNul`] since padding is stripped on read.
    pub fn set_column(&mut self, column: usize, value: FieldValue) -> Result<()> {
        let field = &self.schema.fields[column];
        let out_of_range = |max: u64| FormatError::ValueOutOfRange {
            field: field.name,
            value: value.as_u64(),
            max,
        };
        self.values[column] = match field.ty {
            FieldType::U8 => Value::U8(
                u8::try_from(value.as_u64()).map_err(|_| out_of_range(u8::MAX.into()))?,
            ),
            FieldType::U32 => Value::U32(
                u32::try_from(value.as_u64()).map_err(|_| out_of_range(u32::MAX.into()))?,
            ),
            FieldType::U64 => Value::U64(value.as_u64()),
            FieldType::Bytes(max) => {
                let bytes = value.as_bytes();
                if bytes.len() > max {
                    return Err(FormatError::FieldTooLong {
                        field: field.name,
                        len: bytes.len(),
                        max,
                    });
                }
                if bytes.last() == Some(&0) {
                    return Err(FormatError::TrailingNul { field: field.name });
                }
                Value::Bytes(bytes.to_vec())
            }
        };
        Ok(())
    }

    /// Append the encoded row to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (field, value) in self.schema.fields.iter().zip(&self.values) {
            match (field.ty, value) {
                (FieldType::Bytes(n), value) => {
                    let bytes = value.as_bytes();
                    let len = bytes.len().min(n);
                    out.extend_from_slice(&bytes[..len]);
                    out.resize(out.len() + (n - len), 0);
                }
                (FieldType::U8, value) => out.push(value.as_u64() as u8),
                (FieldType::U32, value) => {
                    out.extend_from_slice(&(value.as_u64() as u32).to_le_bytes())
                }
                (FieldType::U64, value) => out.extend_from_slice(&value.as_u64().to_le_bytes()),
            }
        }
    }

    /// Encoded row bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.schema.width());
        self.write_to(&mut out);
        out
    }

    /// Decode one row; trailing NUL padding is stripped from byte strings
    pub fn from_bytes(schema: &'static DatasetSchema, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != schema.width() {
            return Err(FormatError::CorruptContainer(format!(
                "{} row is {} bytes, expected {}",
                schema.name,
                bytes.len(),
                schema.width()
            )));
        }

        let mut values = Vec::with_capacity(schema.fields.len());
        for (column, field) in schema.fields.iter().enumerate() {
            let start = schema.offset(column);
            let raw = &bytes[start..start + field.ty.width()];
            let value = match field.ty {
                FieldType::U8 => Value::U8(raw[0]),
                FieldType::U32 => {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(raw);
                    Value::U32(u32::from_le_bytes(buf))
                }
                FieldType::U64 => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(raw);
                    Value::U64(u64::from_le_bytes(buf))
                }
                FieldType::Bytes(_) => {
                    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                    Value::Bytes(raw[..end].to_vec())
                }
            };
            values.push(value);
        }
        Ok(Self { schema, values })
    }
}

impl FieldSource for Record {
    fn get(&self, name: &str) -> Option<FieldValue> {
        self.value(name).map(|value| match value {
            Value::Bytes(b) => FieldValue::Bytes(b.clone()),
            other => FieldValue::Uint(other.as_u64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema;

    fn messages() -> &'static DatasetSchema {
        schema("1.0").unwrap().messages.as_ref().unwrap()
    }

    #[test]
    fn test_defaults_are_zero() {
        let record = Record::new(&schema("2.0").unwrap().packets);
        assert!(record.to_bytes().iter().all(|b| *b == 0));
        assert_eq!(record.to_bytes().len(), 30);
        assert_eq!(record.uint("timestamp"), 0);
    }

    #[test]
    fn test_row_layout() {
        let mut record = Record::new(messages());
        record.set("message", FieldValue::Bytes(b"hi".to_vec())).unwrap();
        record.set("timestamp", FieldValue::Uint(0x0102)).unwrap();
        record.set("index", FieldValue::Uint(7)).unwrap();

        let bytes = record.to_bytes();
        assert_eq!(&bytes[..3], b"hi\0");
        assert_eq!(&bytes[64..66], &[0x02, 0x01]);
        assert_eq!(&bytes[72..76], &[7, 0, 0, 0]);

        let decoded = Record::from_bytes(messages(), &bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_field_too_long() {
        let mut record = Record::new(messages());
        let err = record
            .set("message", FieldValue::Bytes(vec![b'x'; 65]))
            .unwrap_err();
        assert!(matches!(
            err,
            FormatError::FieldTooLong {
                field: "message",
                len: 65,
                max: 64
            }
        ));
        assert!(record.set("message", FieldValue::Bytes(vec![b'x'; 64])).is_ok());
    }

    #[test]
    fn test_trailing_nul_rejected() {
        let mut record = Record::new(messages());
        assert!(matches!(
            record.set("message", FieldValue::Bytes(b"end\0".to_vec())),
            Err(FormatError::TrailingNul { field: "message" })
        ));
        // interior NULs survive the padding strip
        record
            .set("message", FieldValue::Bytes(b"a\0b".to_vec()))
            .unwrap();
        let decoded = Record::from_bytes(messages(), &record.to_bytes()).unwrap();
        assert_eq!(decoded.value("message").unwrap().as_bytes(), b"a\0b");
    }

    #[test]
    fn test_integer_out_of_range() {
        let mut record = Record::new(messages());
        assert!(matches!(
            record.set("index", FieldValue::Uint(u64::from(u32::MAX) + 1)),
            Err(FormatError::ValueOutOfRange {
                field: "index",
                max,
                ..
            }) if max == u64::from(u32::MAX)
        ));
        record
            .set("index", FieldValue::Uint(u32::MAX.into()))
            .unwrap();
        assert_eq!(record.uint("index"), u64::from(u32::MAX));

        let mut packet = Record::new(&schema("2.0").unwrap().packets);
        assert!(matches!(
            packet.set("chip_id", FieldValue::Uint(256)),
            Err(FormatError::ValueOutOfRange { value: 256, .. })
        ));
        assert_eq!(packet.uint("chip_id"), 0);
    }

    #[test]
    fn test_unknown_column_is_ignored() {
        let mut record = Record::new(messages());
        assert!(!record.set("chip_key", FieldValue::Uint(1)).unwrap());
    }

    #[test]
    fn test_short_row_is_corrupt() {
        assert!(matches!(
            Record::from_bytes(messages(), &[0; 10]),
            Err(FormatError::CorruptContainer(_))
        ));
    }
}
