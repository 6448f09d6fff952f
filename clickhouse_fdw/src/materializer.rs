//! Conversion between wire blocks and host tuples.
//!
//! Every wire type has one canonical host type. A declared host column may be
//! the canonical type or a wider one; anything narrower is rejected when the
//! result header is bound, before a single row is converted. Values are
//! checked again per row where the wire type can hold values the host type
//! cannot (UInt64, UInt8 read as boolean, strings into `varchar(n)`).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use common::tuple::{Column, Schema, Tuple, Type, Value};
use common::{BridgeError, Result};
use wire_client::{Block, BlockColumn, Cell, WireType};

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// The host type a wire type maps to when nothing else is declared, and
/// whether the column may hold NULL.
pub fn canonical_type(wire_type: &WireType) -> (Type, bool) {
    let host = match wire_type.base() {
        WireType::Int8 | WireType::UInt8 | WireType::Int16 => Type::SmallInt,
        WireType::UInt16 | WireType::Int32 => Type::Integer,
        WireType::UInt32 | WireType::Int64 | WireType::UInt64 => Type::BigInt,
        WireType::Float32 => Type::Real,
        WireType::Float64 => Type::Double,
        WireType::String | WireType::FixedString(_) => Type::Text,
        WireType::Date => Type::Date,
        WireType::DateTime => Type::Timestamp,
        WireType::Bool => Type::Bool,
        WireType::Nullable(inner) => canonical_type(inner).0,
    };
    (host, wire_type.is_nullable())
}

/// The host row type of a result header, one canonical column per wire column.
pub fn schema_of(header: &Block) -> Schema {
    let columns = header
        .columns
        .iter()
        .map(|c| {
            let (column_type, nullable) = canonical_type(&c.wire_type);
            Column {
                name: c.name.clone(),
                column_type,
                nullable,
            }
        })
        .collect();
    Schema::new(columns)
}

fn int_rank(t: &Type) -> Option<u8> {
    match t {
        Type::SmallInt => Some(1),
        Type::Integer => Some(2),
        Type::BigInt => Some(3),
        _ => None,
    }
}

/// Whether values of `wire` may be stored in a host column of type `host`.
pub fn is_coercible(wire: &WireType, host: &Type) -> bool {
    let (canonical, _) = canonical_type(wire);
    match (wire.base(), host) {
        // UInt8 doubles as the remote's boolean; values are checked per row.
        (WireType::UInt8, Type::Bool) => true,
        (WireType::Float32, Type::Double) => true,
        (WireType::String | WireType::FixedString(_), Type::Text | Type::Varchar(_) | Type::Bytea) => {
            true
        }
        (WireType::Date, Type::Timestamp) => true,
        _ => match (int_rank(&canonical), int_rank(host)) {
            (Some(from), Some(to)) => from <= to,
            _ => canonical == *host,
        },
    }
}

#[derive(Debug, Clone)]
struct Binding {
    name: String,
    wire_type: WireType,
    target: Type,
    nullable: bool,
}

/// Converts rows of blocks with one header shape into tuples of one schema.
#[derive(Debug, Clone)]
pub struct Materializer {
    bindings: Vec<Binding>,
}

impl Materializer {
    /// Checks `header` against `schema` column by column.
    pub fn bind(header: &Block, schema: &Schema) -> Result<Materializer> {
        if header.num_columns() != schema.len() {
            return Err(BridgeError::type_mismatch(
                "*",
                format!(
                    "remote result has {} columns, the foreign table declares {}",
                    header.num_columns(),
                    schema.len()
                ),
            ));
        }
        let mut bindings = Vec::with_capacity(schema.len());
        for (wire, column) in header.columns.iter().zip(&schema.columns) {
            if !is_coercible(&wire.wire_type, &column.column_type) {
                return Err(BridgeError::type_mismatch(
                    &column.name,
                    format!(
                        "remote type {} cannot be stored as {}",
                        wire.wire_type.name(),
                        column.column_type.sql_name()
                    ),
                ));
            }
            bindings.push(Binding {
                name: column.name.clone(),
                wire_type: wire.wire_type.clone(),
                target: column.column_type,
                nullable: column.nullable,
            });
        }
        Ok(Materializer { bindings })
    }

    /// Whether `block` has the column types this materializer was bound to.
    pub fn matches(&self, block: &Block) -> bool {
        block.columns.len() == self.bindings.len()
            && block
                .columns
                .iter()
                .zip(&self.bindings)
                .all(|(c, b)| c.wire_type == b.wire_type)
    }

    pub fn arity(&self) -> usize {
        self.bindings.len()
    }

    /// Fills `tuple` with row `row` of `block`, reusing its slots.
    ///
    /// On error the tuple holds a partial row and must not be handed out.
    pub fn convert_row(&self, block: &Block, row: usize, tuple: &mut Tuple) -> Result<()> {
        if row >= block.rows {
            return Err(BridgeError::InvalidState(format!(
                "row {} is past the end of a {}-row block",
                row, block.rows
            )));
        }
        tuple.values.resize(self.bindings.len(), Value::Null);
        for ((binding, column), slot) in self
            .bindings
            .iter()
            .zip(&block.columns)
            .zip(tuple.values.iter_mut())
        {
            convert_cell(binding, column, row, slot)?;
        }
        Ok(())
    }
}

fn convert_cell(binding: &Binding, column: &BlockColumn, row: usize, slot: &mut Value) -> Result<()> {
    let mismatch = |message: String| BridgeError::type_mismatch(&binding.name, message);
    let cell = column.cell(row);
    *slot = match (cell, binding.target) {
        (Cell::Null, _) => {
            if !binding.nullable {
                return Err(mismatch("NULL in a column declared NOT NULL".to_string()));
            }
            Value::Null
        }
        (Cell::Int(v), target) if int_rank(&target).is_some() => integer_value(v, target)
            .ok_or_else(|| mismatch(format!("value {} is out of range for {}", v, target.sql_name())))?,
        (Cell::UInt(v), target) if int_rank(&target).is_some() => i64::try_from(v)
            .ok()
            .and_then(|v| integer_value(v, target))
            .ok_or_else(|| mismatch(format!("value {} is out of range for {}", v, target.sql_name())))?,
        (Cell::UInt(v), Type::Bool) => match v {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(mismatch(format!("value {} is not a boolean", other))),
        },
        (Cell::Bool(b), Type::Bool) => Value::Bool(b),
        (Cell::Float32(f), Type::Real) => Value::Real(f),
        (Cell::Float32(f), Type::Double) => Value::Double(f as f64),
        (Cell::Float64(f), Type::Double) => Value::Double(f),
        (Cell::Bytes(bytes), Type::Bytea) => {
            if let Value::Bytea(buf) = &mut *slot {
                buf.clear();
                buf.extend_from_slice(bytes);
                return Ok(());
            }
            Value::Bytea(bytes.to_vec())
        }
        (Cell::Bytes(bytes), target @ (Type::Text | Type::Varchar(_))) => {
            let bytes = match binding.wire_type.base() {
                WireType::FixedString(_) => trim_padding(bytes),
                _ => bytes,
            };
            let text = std::str::from_utf8(bytes)
                .map_err(|_| mismatch("remote string is not valid UTF-8".to_string()))?;
            if let Type::Varchar(max) = target {
                let len = text.chars().count();
                if len > max as usize {
                    return Err(mismatch(format!(
                        "value of {} characters is too long for varchar({})",
                        len, max
                    )));
                }
            }
            if let Value::Varchar(buf) = &mut *slot {
                buf.clear();
                buf.push_str(text);
                return Ok(());
            }
            Value::Varchar(text.to_string())
        }
        (Cell::Date(days), Type::Date) => Value::Date(epoch() + Duration::days(days as i64)),
        (Cell::Date(days), Type::Timestamp) => {
            let date = epoch() + Duration::days(days as i64);
            Value::Timestamp(date.and_hms_opt(0, 0, 0).unwrap_or_default())
        }
        (Cell::DateTime(secs), Type::Timestamp) => Value::Timestamp(timestamp(secs as i64).ok_or_else(
            || mismatch(format!("timestamp {} is out of range", secs)),
        )?),
        (cell, target) => {
            return Err(mismatch(format!(
                "cannot store {:?} as {}",
                cell,
                target.sql_name()
            )))
        }
    };
    Ok(())
}

fn integer_value(v: i64, target: Type) -> Option<Value> {
    match target {
        Type::SmallInt => i16::try_from(v).ok().map(Value::SmallInt),
        Type::Integer => i32::try_from(v).ok().map(Value::Integer),
        Type::BigInt => Some(Value::BigInt(v)),
        _ => None,
    }
}

fn timestamp(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// FixedString values are NUL-padded on the wire.
fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Encodes one host row as a single-row block shaped like `header`.
///
/// `header` is the insert header sent by the remote: one column per value of
/// `tuple`, in order. Values the remote column cannot hold are rejected.
pub fn encode_row(header: &Block, schema: &Schema, tuple: &Tuple) -> Result<Block> {
    if header.num_columns() != tuple.values.len() || schema.len() != tuple.values.len() {
        return Err(BridgeError::type_mismatch(
            "*",
            format!(
                "row has {} values, remote insert expects {} columns",
                tuple.values.len(),
                header.num_columns()
            ),
        ));
    }
    let mut columns = Vec::with_capacity(header.num_columns());
    for ((wire, column), value) in header.columns.iter().zip(&schema.columns).zip(&tuple.values) {
        let mut out = BlockColumn::empty(wire.name.clone(), wire.wire_type.clone());
        let mismatch = |message: String| BridgeError::type_mismatch(&column.name, message);
        let encoded = encode_value(value, wire.wire_type.base()).map_err(&mismatch)?;
        out.push(encoded).map_err(mismatch)?;
        columns.push(out);
    }
    Block::new(columns).map_err(BridgeError::Protocol)
}

fn encode_value<'a>(value: &'a Value, wire: &WireType) -> std::result::Result<Cell<'a>, String> {
    let out_of_range = || format!("value {} is out of range for remote type {}", value, wire.name());
    let cell = match (value, wire) {
        (Value::Null, _) => Cell::Null,
        (Value::Bool(b), WireType::Bool) => Cell::Bool(*b),
        (Value::Bool(b), WireType::UInt8) => Cell::UInt(*b as u64),
        (Value::SmallInt(_) | Value::Integer(_) | Value::BigInt(_), _) => {
            let v = value.as_i64().ok_or_else(out_of_range)?;
            let (min, max): (i128, i128) = match wire {
                WireType::Int8 => (i8::MIN as i128, i8::MAX as i128),
                WireType::Int16 => (i16::MIN as i128, i16::MAX as i128),
                WireType::Int32 => (i32::MIN as i128, i32::MAX as i128),
                WireType::Int64 => (i64::MIN as i128, i64::MAX as i128),
                WireType::UInt8 => (0, u8::MAX as i128),
                WireType::UInt16 => (0, u16::MAX as i128),
                WireType::UInt32 => (0, u32::MAX as i128),
                WireType::UInt64 => (0, u64::MAX as i128),
                _ => return Err(format!("cannot send {} as remote type {}", value, wire.name())),
            };
            if (v as i128) < min || (v as i128) > max {
                return Err(out_of_range());
            }
            match wire {
                WireType::UInt8 | WireType::UInt16 | WireType::UInt32 | WireType::UInt64 => {
                    Cell::UInt(v as u64)
                }
                _ => Cell::Int(v),
            }
        }
        (Value::Real(f), WireType::Float32) => Cell::Float32(*f),
        (Value::Real(f), WireType::Float64) => Cell::Float64(*f as f64),
        (Value::Double(f), WireType::Float64) => Cell::Float64(*f),
        (Value::Varchar(s), WireType::String | WireType::FixedString(_)) => Cell::Bytes(s.as_bytes()),
        (Value::Bytea(b), WireType::String | WireType::FixedString(_)) => Cell::Bytes(b),
        (Value::Date(d), WireType::Date) => {
            let days = (*d - epoch()).num_days();
            Cell::Date(u16::try_from(days).map_err(|_| out_of_range())?)
        }
        (Value::Date(d), WireType::DateTime) => {
            let secs = d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp();
            Cell::DateTime(u32::try_from(secs).map_err(|_| out_of_range())?)
        }
        (Value::Timestamp(ts), WireType::DateTime) => {
            Cell::DateTime(u32::try_from(ts.and_utc().timestamp()).map_err(|_| out_of_range())?)
        }
        _ => return Err(format!("cannot send {} as remote type {}", value, wire.name())),
    };
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorCategory;
    use test_case::test_case;
    use wire_client::ColumnValues;

    fn single(wire_type: WireType, values: ColumnValues, nulls: Option<Vec<bool>>) -> Block {
        let column = match nulls {
            Some(nulls) => BlockColumn::nullable("c", wire_type, values, nulls),
            None => BlockColumn::new("c", wire_type, values),
        };
        Block::new(vec![column]).unwrap()
    }

    fn convert(block: &Block, column: Column) -> Result<Value> {
        let schema = Schema::new(vec![column]);
        let materializer = Materializer::bind(block, &schema)?;
        let mut tuple = Tuple::with_arity(1);
        materializer.convert_row(block, 0, &mut tuple)?;
        Ok(tuple.values.remove(0))
    }

    #[test_case(WireType::Int8, Type::SmallInt, true)]
    #[test_case(WireType::UInt8, Type::Bool, true)]
    #[test_case(WireType::UInt16, Type::SmallInt, false)]
    #[test_case(WireType::UInt16, Type::Integer, true)]
    #[test_case(WireType::Int32, Type::BigInt, true)]
    #[test_case(WireType::Int64, Type::Integer, false)]
    #[test_case(WireType::UInt64, Type::BigInt, true)]
    #[test_case(WireType::Float64, Type::Real, false)]
    #[test_case(WireType::Float32, Type::Double, true)]
    #[test_case(WireType::FixedString(4), Type::Varchar(4), true)]
    #[test_case(WireType::DateTime, Type::Date, false)]
    #[test_case(WireType::Date, Type::Timestamp, true)]
    #[test_case(WireType::Nullable(Box::new(WireType::Int32)), Type::Integer, true)]
    #[test_case(WireType::String, Type::Integer, false)]
    fn test_coercion_table(wire: WireType, host: Type, expected: bool) {
        assert_eq!(is_coercible(&wire, &host), expected);
    }

    #[test]
    fn test_narrowing_rejected_at_bind() {
        let block = single(WireType::Int64, ColumnValues::Int64(vec![1]), None);
        let err = convert(&block, Column::new("c", Type::Integer)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    }

    #[test]
    fn test_uint64_range_checked_per_value() {
        let block = single(WireType::UInt64, ColumnValues::UInt64(vec![u64::MAX]), None);
        let err = convert(&block, Column::new("c", Type::BigInt)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeMismatch);

        let block = single(WireType::UInt64, ColumnValues::UInt64(vec![42]), None);
        assert_eq!(convert(&block, Column::new("c", Type::BigInt)).unwrap(), Value::BigInt(42));
    }

    #[test]
    fn test_null_fidelity() {
        let block = single(
            WireType::Int32,
            ColumnValues::Int32(vec![0]),
            Some(vec![true]),
        );
        assert_eq!(convert(&block, Column::new("c", Type::Integer)).unwrap(), Value::Null);
        let err = convert(&block, Column::not_null("c", Type::Integer)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    }

    #[test]
    fn test_uint8_as_bool() {
        let block = single(WireType::UInt8, ColumnValues::UInt8(vec![1]), None);
        assert_eq!(convert(&block, Column::new("c", Type::Bool)).unwrap(), Value::Bool(true));
        let block = single(WireType::UInt8, ColumnValues::UInt8(vec![2]), None);
        assert!(convert(&block, Column::new("c", Type::Bool)).is_err());
    }

    #[test]
    fn test_strings() {
        let block = single(
            WireType::FixedString(5),
            ColumnValues::Bytes(vec![b"ab\0\0\0".to_vec()]),
            None,
        );
        assert_eq!(
            convert(&block, Column::new("c", Type::Text)).unwrap(),
            Value::Varchar("ab".to_string())
        );
        assert_eq!(
            convert(&block, Column::new("c", Type::Bytea)).unwrap(),
            Value::Bytea(b"ab\0\0\0".to_vec())
        );

        let block = single(WireType::String, ColumnValues::Bytes(vec![b"hello".to_vec()]), None);
        assert!(convert(&block, Column::new("c", Type::Varchar(3))).is_err());

        let block = single(WireType::String, ColumnValues::Bytes(vec![vec![0xff, 0xfe]]), None);
        assert!(convert(&block, Column::new("c", Type::Text)).is_err());
    }

    #[test]
    fn test_dates() {
        let block = single(WireType::Date, ColumnValues::Date(vec![19723]), None);
        assert_eq!(
            convert(&block, Column::new("c", Type::Date)).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        let block = single(WireType::DateTime, ColumnValues::DateTime(vec![1_704_067_200 + 3661]), None);
        assert_eq!(
            convert(&block, Column::new("c", Type::Timestamp)).unwrap(),
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(1, 1, 1)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_string_slot_reused() {
        let block = single(
            WireType::String,
            ColumnValues::Bytes(vec![b"a longer first value".to_vec(), b"second".to_vec()]),
            None,
        );
        let schema = Schema::new(vec![Column::new("c", Type::Text)]);
        let materializer = Materializer::bind(&block, &schema).unwrap();
        let mut tuple = Tuple::with_arity(1);
        materializer.convert_row(&block, 0, &mut tuple).unwrap();
        let ptr = match &tuple.values[0] {
            Value::Varchar(s) => s.as_ptr(),
            _ => panic!("expected text"),
        };
        materializer.convert_row(&block, 1, &mut tuple).unwrap();
        match &tuple.values[0] {
            Value::Varchar(s) => {
                assert_eq!(s, "second");
                assert_eq!(s.as_ptr(), ptr);
            }
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn test_arity_mismatch() {
        let block = single(WireType::Int32, ColumnValues::Int32(vec![1]), None);
        let schema = Schema::new(vec![Column::new("a", Type::Integer), Column::new("b", Type::Integer)]);
        assert!(Materializer::bind(&block, &schema).is_err());
    }

    #[test]
    fn test_encode_row_checks_ranges() {
        let header = Block::new(vec![
            BlockColumn::empty("a", WireType::UInt8),
            BlockColumn::empty("b", WireType::Nullable(Box::new(WireType::String))),
        ])
        .unwrap();
        let schema = Schema::new(vec![Column::new("a", Type::Integer), Column::new("b", Type::Text)]);

        let block = encode_row(
            &header,
            &schema,
            &Tuple::new(vec![Value::Integer(200), Value::Null]),
        )
        .unwrap();
        assert_eq!(block.rows, 1);
        assert_eq!(block.columns[0].cell(0), Cell::UInt(200));
        assert_eq!(block.columns[1].cell(0), Cell::Null);

        let err = encode_row(
            &header,
            &schema,
            &Tuple::new(vec![Value::Integer(256), Value::Null]),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeMismatch);

        let not_null_header = Block::new(vec![
            BlockColumn::empty("a", WireType::UInt8),
            BlockColumn::empty("b", WireType::String),
        ])
        .unwrap();
        assert!(encode_row(
            &not_null_header,
            &schema,
            &Tuple::new(vec![Value::Integer(1), Value::Null])
        )
        .is_err());
    }
}
