//! Host-side row model: declared column types, schemas, values and tuples.

use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;

/// A column type as declared on the host's foreign table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Unbounded text.
    Text,
    /// Text with a maximum length in characters.
    Varchar(u32),
    Bytea,
    Date,
    Timestamp,
}

impl Type {
    /// Host SQL spelling of the type, used when generating DDL.
    pub fn sql_name(&self) -> String {
        match self {
            Type::Bool => "boolean".to_string(),
            Type::SmallInt => "smallint".to_string(),
            Type::Integer => "integer".to_string(),
            Type::BigInt => "bigint".to_string(),
            Type::Real => "real".to_string(),
            Type::Double => "double precision".to_string(),
            Type::Text => "text".to_string(),
            Type::Varchar(n) => format!("varchar({})", n),
            Type::Bytea => "bytea".to_string(),
            Type::Date => "date".to_string(),
            Type::Timestamp => "timestamp".to_string(),
        }
    }

    /// Rough on-row width in bytes, used for planner width estimates.
    pub fn estimated_width(&self) -> u32 {
        match self {
            Type::Bool => 1,
            Type::SmallInt => 2,
            Type::Integer | Type::Real | Type::Date => 4,
            Type::BigInt | Type::Double | Type::Timestamp => 8,
            Type::Varchar(n) => (*n).min(64),
            Type::Text | Type::Bytea => 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: Type,
    pub nullable: bool,
}

impl Column {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, column_type: Type) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Creates a column declared NOT NULL.
    pub fn not_null(name: impl Into<String>, column_type: Type) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the position of the named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns a schema made of the named columns, in the given order.
    pub fn project(&self, names: &[String]) -> Option<Schema> {
        names
            .iter()
            .map(|n| self.columns.iter().find(|c| &c.name == n).cloned())
            .collect::<Option<Vec<_>>>()
            .map(Schema::new)
    }
}

/// A single host value, including SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Varchar(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widens any integer value to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Compares two values using SQL semantics.
    ///
    /// NULL comparisons and comparisons across unrelated types return None.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            (Value::Bytea(a), Value::Bytea(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }

    /// Adds two numeric values. NULL propagates; overflow yields None.
    pub fn add(&self, other: &Value) -> Option<Value> {
        self.arith(other, i64::checked_add, |a, b| a + b)
    }

    pub fn subtract(&self, other: &Value) -> Option<Value> {
        self.arith(other, i64::checked_sub, |a, b| a - b)
    }

    pub fn multiply(&self, other: &Value) -> Option<Value> {
        self.arith(other, i64::checked_mul, |a, b| a * b)
    }

    fn arith(
        &self,
        other: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Option<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Some(Value::Null),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => int_op(x, y).map(Value::BigInt),
                _ => Some(Value::Double(float_op(a.as_f64()?, b.as_f64()?))),
            },
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::SmallInt(i) => write!(f, "{}", i),
            Value::Integer(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Real(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Varchar(s) => write!(f, "{}", s),
            Value::Bytea(b) => {
                write!(f, "\\x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple {
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// A tuple of `arity` NULL slots, used as a reusable conversion buffer.
    pub fn with_arity(arity: usize) -> Self {
        Self {
            values: vec![Value::Null; arity],
        }
    }
}
