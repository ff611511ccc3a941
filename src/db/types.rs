//! Driver row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the declared column type into a logical category
//! 2. Database-specific decoders extract a [`SqlValue`] for that category
//!
//! NULL is checked on the raw value before decoding, so a value that fails to
//! decode is never mistaken for NULL.

use crate::models::{ColumnMetadata, DatabaseType, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    UnsignedInteger,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.trim().to_lowercase();
    let base = lower
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or("");
    let with_tz = lower.contains("with time zone");

    match base {
        // SQLite's NUMERIC affinity stores plain integers and reals
        "numeric" if db == DatabaseType::SQLite => TypeCategory::Float,
        "decimal" | "numeric" | "dec" => TypeCategory::Decimal,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
        | "int8" | "smallserial" | "serial" | "bigserial" | "year" => {
            if lower.contains("unsigned") {
                TypeCategory::UnsignedInteger
            } else {
                TypeCategory::Integer
            }
        }
        "bool" | "boolean" => TypeCategory::Boolean,
        "float" | "float4" | "float8" | "double" | "real" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
            TypeCategory::Binary
        }
        "date" => TypeCategory::Date,
        "time" if !with_tz => TypeCategory::Time,
        "timestamptz" => TypeCategory::DateTimeTz,
        "timestamp" if with_tz => TypeCategory::DateTimeTz,
        "timestamp" | "datetime" => TypeCategory::DateTime,
        "text" | "varchar" | "char" | "character" | "bpchar" | "name" | "citext" | "string"
        | "tinytext" | "mediumtext" | "longtext" | "enum" | "set" | "clob" | "nvarchar"
        | "nchar" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("numeric")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

/// Render the PostgreSQL binary NUMERIC format as exact decimal text.
///
/// Layout: ndigits, weight, sign, dscale (all i16/u16 big endian) followed by
/// `ndigits` base-10000 digits.
fn pg_numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;
    const POS_INF: u16 = 0xD000;
    const NEG_INF: u16 = 0xF000;

    let read_u16 = |at: usize| -> Result<u16, sqlx::error::BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i64;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    match sign {
        NAN => return Ok("NaN".to_string()),
        POS_INF => return Ok("Infinity".to_string()),
        NEG_INF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2).map(|d| d as i16))
        .collect::<Result<Vec<_>, _>>()?;
    let digit_at = |i: i64| -> i16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NEGATIVE && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                out.push_str(&digit_at(i).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(i)));
            }
        }
    }

    if dscale > 0 {
        out.push('.');
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push_str(&frac);
    }

    Ok(out)
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Decode driver rows into column metadata and [`SqlValue`]s.
pub trait RowDecoder {
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
    fn decode_values(&self) -> Vec<SqlValue>;
}

fn metadata<R: Row>(row: &R) -> Vec<ColumnMetadata> {
    row.columns()
        .iter()
        .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
        .collect()
}

fn is_null<R>(row: &R, idx: usize) -> bool
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<T, _>(idx).ok()
}

fn float_value(v: f64) -> SqlValue {
    SqlValue::Float(v)
}

fn unsupported(type_name: &str, idx: usize) -> SqlValue {
    tracing::warn!(column = idx, type_name = %type_name, "Unsupported column type");
    SqlValue::Text(format!("<unsupported type {}>", type_name))
}

fn decode_row<R>(
    row: &R,
    db: DatabaseType,
    decode: fn(&R, usize, TypeCategory) -> Option<SqlValue>,
) -> Vec<SqlValue>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            if is_null(row, idx) {
                return SqlValue::Null;
            }
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, db);
            decode(row, idx, category).unwrap_or_else(|| unsupported(type_name, idx))
        })
        .collect()
}

impl RowDecoder for MySqlRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        metadata(self)
    }

    fn decode_values(&self) -> Vec<SqlValue> {
        decode_row(self, DatabaseType::MySQL, mysql::decode_column)
    }
}

impl RowDecoder for PgRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        metadata(self)
    }

    fn decode_values(&self) -> Vec<SqlValue> {
        decode_row(self, DatabaseType::PostgreSQL, postgres::decode_column)
    }
}

impl RowDecoder for SqliteRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        metadata(self)
    }

    fn decode_values(&self) -> Vec<SqlValue> {
        decode_row(self, DatabaseType::SQLite, sqlite::decode_column)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<SqlValue> {
        match category {
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|v| SqlValue::Decimal(v.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::UnsignedInteger => get::<_, u64>(row, idx).map(SqlValue::UInt),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(SqlValue::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(SqlValue::Bytes),
            TypeCategory::Json => get::<_, Json<JsonValue>>(row, idx).map(|j| SqlValue::Json(j.0)),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(SqlValue::Date),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(SqlValue::Time),
            TypeCategory::DateTime => get::<_, NaiveDateTime>(row, idx).map(SqlValue::DateTime),
            TypeCategory::DateTimeTz => {
                get::<_, DateTime<Utc>>(row, idx).map(SqlValue::DateTimeTz)
            }
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<SqlValue> {
        get::<_, i64>(row, idx)
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i16>(row, idx).map(i64::from))
            .or_else(|| get::<_, i8>(row, idx).map(i64::from))
            .map(SqlValue::Int)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Option<SqlValue> {
        get::<_, String>(row, idx)
            .map(SqlValue::Text)
            .or_else(|| {
                // VARBINARY-backed text columns come back as bytes
                get::<_, Vec<u8>>(row, idx).map(|b| match String::from_utf8(b) {
                    Ok(s) => SqlValue::Text(s),
                    Err(e) => SqlValue::Bytes(e.into_bytes()),
                })
            })
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Option<SqlValue> {
        match category {
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|v| SqlValue::Decimal(v.0)),
            TypeCategory::Integer | TypeCategory::UnsignedInteger => decode_integer(row, idx),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(SqlValue::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(SqlValue::Bytes),
            TypeCategory::Json => get::<_, JsonValue>(row, idx).map(SqlValue::Json),
            TypeCategory::Uuid => {
                get::<_, sqlx::types::Uuid>(row, idx).map(|u| SqlValue::Uuid(u.to_string()))
            }
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(SqlValue::Date),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(SqlValue::Time),
            TypeCategory::DateTime => get::<_, NaiveDateTime>(row, idx).map(SqlValue::DateTime),
            TypeCategory::DateTimeTz => {
                get::<_, DateTime<Utc>>(row, idx).map(SqlValue::DateTimeTz)
            }
            _ => get::<_, String>(row, idx).map(SqlValue::Text),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<SqlValue> {
        get::<_, i64>(row, idx)
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i16>(row, idx).map(i64::from))
            .map(SqlValue::Int)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        category: TypeCategory,
    ) -> Option<SqlValue> {
        let typed = match category {
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(SqlValue::Bool),
            TypeCategory::Json => get::<_, Json<JsonValue>>(row, idx).map(|j| SqlValue::Json(j.0)),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(SqlValue::Date),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(SqlValue::Time),
            TypeCategory::DateTime => get::<_, NaiveDateTime>(row, idx).map(SqlValue::DateTime),
            TypeCategory::DateTimeTz => {
                get::<_, DateTime<Utc>>(row, idx).map(SqlValue::DateTimeTz)
            }
            _ => None,
        };
        typed.or_else(|| decode_dynamic(row, idx))
    }

    /// SQLite values carry their own storage class regardless of the declared type.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Option<SqlValue> {
        let storage = row
            .try_get_raw(idx)
            .ok()?
            .type_info()
            .name()
            .to_ascii_uppercase();
        match storage.as_str() {
            "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => get::<_, i64>(row, idx).map(SqlValue::Int),
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => get::<_, f64>(row, idx).map(float_value),
            "BLOB" => get::<_, Vec<u8>>(row, idx).map(SqlValue::Bytes),
            _ => get::<_, String>(row, idx)
                .map(SqlValue::Text)
                .or_else(|| get::<_, i64>(row, idx).map(SqlValue::Int))
                .or_else(|| get::<_, f64>(row, idx).map(float_value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", DatabaseType::MySQL),
            TypeCategory::UnsignedInteger
        );
        assert_eq!(
            categorize_type("int8", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_not_fooled_by_substrings() {
        assert_eq!(
            categorize_type("POINT", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL(10,2)", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATE", DatabaseType::SQLite),
            TypeCategory::Date
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::DateTimeTz
        );
        assert_eq!(
            categorize_type("timestamp with time zone", DatabaseType::PostgreSQL),
            TypeCategory::DateTimeTz
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::DateTime
        );
        assert_eq!(
            categorize_type("TIME", DatabaseType::MySQL),
            TypeCategory::Time
        );
        assert_eq!(
            categorize_type("timetz", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("uuid", DatabaseType::PostgreSQL),
            TypeCategory::Uuid
        );
        assert_eq!(
            categorize_type("VARCHAR(255)", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("BYTEA", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
    }

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_pg_numeric_integer_and_fraction() {
        // 12345.6789 = [1, 2345, 6789], weight 1
        let buf = numeric_bytes(1, 0, 4, &[1, 2345, 6789]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "12345.6789");
    }

    #[test]
    fn test_pg_numeric_small_fraction() {
        // 0.0005 = [5], weight -1, dscale 4
        let buf = numeric_bytes(-1, 0, 4, &[5]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "0.0005");
        // 0.00000012 = [12], weight -2, dscale 8
        let buf = numeric_bytes(-2, 0, 8, &[12]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "0.00000012");
    }

    #[test]
    fn test_pg_numeric_negative_and_trailing_zero_groups() {
        // -1000000.50 = [100, 0, 5000], weight 1 => 100 0000 . 5000
        let buf = numeric_bytes(1, 0x4000, 2, &[100, 0, 5000]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "-1000000.50");
        // 20000 stored as [2], weight 1 (trailing zero group omitted)
        let buf = numeric_bytes(1, 0, 0, &[2]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "20000");
    }

    #[test]
    fn test_pg_numeric_zero_and_special() {
        let buf = numeric_bytes(0, 0, 2, &[]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "0.00");
        let buf = numeric_bytes(0, 0xC000, 0, &[]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "NaN");
    }

    #[test]
    fn test_pg_numeric_truncated_buffer() {
        assert!(pg_numeric_to_string(&[0, 1]).is_err());
        let mut buf = numeric_bytes(0, 0, 0, &[1]);
        buf.pop();
        assert!(pg_numeric_to_string(&buf).is_err());
    }
}
