use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::db::error::DriverError;

/// A single column or parameter value crossing the driver boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept in its textual form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

/// Declared column / parameter type as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Char,
    VarChar,
    LongVarChar,
    NChar,
    NVarChar,
    Clob,
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Numeric,
    Float,
    Double,
    Real,
    Date,
    Time,
    TimeWithTimezone,
    Timestamp,
    TimestampWithTimezone,
    RefCursor,
    Object,
    Other,
}

impl SqlType {
    pub fn name(&self) -> &'static str {
        match self {
            SqlType::Binary => "BINARY",
            SqlType::VarBinary => "VARBINARY",
            SqlType::LongVarBinary => "LONGVARBINARY",
            SqlType::Blob => "BLOB",
            SqlType::Char => "CHAR",
            SqlType::VarChar => "VARCHAR",
            SqlType::LongVarChar => "LONGVARCHAR",
            SqlType::NChar => "NCHAR",
            SqlType::NVarChar => "NVARCHAR",
            SqlType::Clob => "CLOB",
            SqlType::Bit => "BIT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Decimal => "DECIMAL",
            SqlType::Numeric => "NUMERIC",
            SqlType::Float => "FLOAT",
            SqlType::Double => "DOUBLE",
            SqlType::Real => "REAL",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::TimeWithTimezone => "TIME WITH TIME ZONE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampWithTimezone => "TIMESTAMP WITH TIME ZONE",
            SqlType::RefCursor => "REF CURSOR",
            SqlType::Object => "OBJECT",
            SqlType::Other => "OTHER",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn mismatch(value: &Value, wanted: &str) -> DriverError {
    DriverError::new(format!("Cannot read {} as {wanted}", value.type_name()))
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn to_bool(&self) -> Result<Option<bool>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Int(i) => Ok(Some(*i != 0)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "y" | "yes" => Ok(Some(true)),
                "false" | "0" | "n" | "no" => Ok(Some(false)),
                _ => Err(mismatch(self, "boolean")),
            },
            _ => Err(mismatch(self, "boolean")),
        }
    }

    pub fn to_i64(&self) -> Result<Option<i64>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            Value::Int(i) => Ok(Some(*i)),
            Value::Decimal(s) | Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| mismatch(self, "integer")),
            _ => Err(mismatch(self, "integer")),
        }
    }

    pub fn to_f64(&self) -> Result<Option<f64>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i as f64)),
            Value::Float(f) => Ok(Some(*f)),
            Value::Decimal(s) | Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| mismatch(self, "float")),
            _ => Err(mismatch(self, "float")),
        }
    }

    pub fn to_decimal(&self) -> Result<Option<String>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(i.to_string())),
            Value::Float(f) => Ok(Some(f.to_string())),
            Value::Decimal(s) => Ok(Some(s.clone())),
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.parse::<f64>().is_ok() {
                    Ok(Some(trimmed.to_string()))
                } else {
                    Err(mismatch(self, "decimal"))
                }
            }
            _ => Err(mismatch(self, "decimal")),
        }
    }

    pub fn to_text(&self) -> Result<Option<String>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Bytes(_) => Err(mismatch(self, "text")),
            other => Ok(Some(other.to_string())),
        }
    }

    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Bytes(b) => Ok(Some(b.clone())),
            Value::Text(s) => Ok(Some(s.as_bytes().to_vec())),
            _ => Err(mismatch(self, "bytes")),
        }
    }

    pub fn to_date(&self) -> Result<Option<NaiveDate>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Date(d) => Ok(Some(*d)),
            Value::Timestamp(ts) => Ok(Some(ts.date())),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Some)
                .map_err(|_| mismatch(self, "date")),
            _ => Err(mismatch(self, "date")),
        }
    }

    pub fn to_time(&self) -> Result<Option<NaiveTime>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Time(t) => Ok(Some(*t)),
            Value::Timestamp(ts) => Ok(Some(ts.time())),
            Value::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
                .map(Some)
                .map_err(|_| mismatch(self, "time")),
            _ => Err(mismatch(self, "time")),
        }
    }

    pub fn to_timestamp(&self) -> Result<Option<NaiveDateTime>, DriverError> {
        match self {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(*ts)),
            Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0)),
            Value::Text(s) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                .map(Some)
                .map_err(|_| mismatch(self, "timestamp")),
            _ => Err(mismatch(self, "timestamp")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(s) | Value::Text(s) => f.write_str(s),
            Value::Bytes(bytes) => {
                f.write_str("0x")?;
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_reads_as_none_through_every_accessor() {
        let null = Value::Null;
        assert_eq!(null.to_bool().unwrap(), None);
        assert_eq!(null.to_i64().unwrap(), None);
        assert_eq!(null.to_f64().unwrap(), None);
        assert_eq!(null.to_decimal().unwrap(), None);
        assert_eq!(null.to_text().unwrap(), None);
        assert_eq!(null.to_bytes().unwrap(), None);
        assert_eq!(null.to_date().unwrap(), None);
        assert_eq!(null.to_time().unwrap(), None);
        assert_eq!(null.to_timestamp().unwrap(), None);
    }

    #[test]
    fn text_flags_and_numbers_convert() {
        assert_eq!(Value::from(" Yes ").to_bool().unwrap(), Some(true));
        assert_eq!(Value::from("0").to_bool().unwrap(), Some(false));
        assert_eq!(Value::Int(0).to_bool().unwrap(), Some(false));
        assert!(Value::from("maybe").to_bool().is_err());

        assert_eq!(Value::Bool(true).to_i64().unwrap(), Some(1));
        assert_eq!(Value::Decimal("42".to_string()).to_i64().unwrap(), Some(42));
        assert!(Value::Decimal("4.2".to_string()).to_i64().is_err());
        assert_eq!(Value::from(" 2.5 ").to_f64().unwrap(), Some(2.5));
        assert!(Value::Bool(true).to_f64().is_err());
    }

    #[test]
    fn decimal_keeps_its_textual_form() {
        assert_eq!(
            Value::Decimal("12.50".to_string()).to_decimal().unwrap(),
            Some("12.50".to_string())
        );
        assert_eq!(Value::Int(7).to_decimal().unwrap(), Some("7".to_string()));
        assert_eq!(Value::from(" 3.10 ").to_decimal().unwrap(), Some("3.10".to_string()));
        assert!(Value::from("abc").to_decimal().is_err());
    }

    #[test]
    fn bytes_and_text_convert_one_way() {
        assert_eq!(Value::from("ab").to_bytes().unwrap(), Some(b"ab".to_vec()));
        assert!(Value::Bytes(vec![1]).to_text().is_err());
        assert!(Value::Int(1).to_bytes().is_err());
        assert_eq!(Value::Int(9).to_text().unwrap(), Some("9".to_string()));
        assert_eq!(Value::Bytes(vec![0x0A, 0xFF]).to_string(), "0x0AFF");
    }

    #[test]
    fn temporal_values_convert_between_each_other() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_opt(13, 5, 9).unwrap();
        let stamp = date.and_time(time);

        assert_eq!(Value::Timestamp(stamp).to_date().unwrap(), Some(date));
        assert_eq!(Value::Timestamp(stamp).to_time().unwrap(), Some(time));
        assert_eq!(
            Value::Date(date).to_timestamp().unwrap(),
            date.and_hms_opt(0, 0, 0)
        );
        assert_eq!(Value::from("2024-02-29").to_date().unwrap(), Some(date));
        assert_eq!(Value::from("13:05:09").to_time().unwrap(), Some(time));
        assert_eq!(
            Value::from("2024-02-29 13:05:09").to_timestamp().unwrap(),
            Some(stamp)
        );
        assert!(Value::Time(time).to_date().is_err());
        assert!(Value::from("29/02/2024").to_date().is_err());
    }

    #[test]
    fn mismatch_names_the_source_type() {
        let err = Value::Float(1.5).to_date().unwrap_err();
        assert_eq!(err.message(), "Cannot read float as date");
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(3u8)), Value::Int(3));
    }
}
