//! Columnar result blocks and their wire encoding.
//!
//! A block carries a fixed number of rows for each of its columns. Every
//! column names its wire type, so consecutive blocks of one result are
//! validated independently.

use crate::codec::*;
use std::io::{self, Read, Write};

/// Column type as reported by the remote engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    FixedString(usize),
    /// Days since 1970-01-01, stored as UInt16.
    Date,
    /// Seconds since the Unix epoch, stored as UInt32.
    DateTime,
    Bool,
    Nullable(Box<WireType>),
}

impl WireType {
    /// Parses a remote type name such as `Nullable(Int32)` or `FixedString(16)`.
    pub fn parse(name: &str) -> Result<WireType, String> {
        let name = name.trim();
        if let Some(inner) = strip_wrapper(name, "Nullable") {
            let inner = WireType::parse(inner)?;
            if inner.is_nullable() {
                return Err(format!("nested Nullable in \"{}\"", name));
            }
            return Ok(WireType::Nullable(Box::new(inner)));
        }
        if let Some(len) = strip_wrapper(name, "FixedString") {
            let len = len
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid FixedString length in \"{}\"", name))?;
            if len == 0 || len as u64 > MAX_FIELD_LEN {
                return Err(format!("FixedString length out of range in \"{}\"", name));
            }
            return Ok(WireType::FixedString(len));
        }
        // DateTime('Europe/Berlin') carries a display time zone only; the
        // stored value is still UTC seconds.
        if strip_wrapper(name, "DateTime").is_some() {
            return Ok(WireType::DateTime);
        }
        let parsed = match name {
            "UInt8" => WireType::UInt8,
            "UInt16" => WireType::UInt16,
            "UInt32" => WireType::UInt32,
            "UInt64" => WireType::UInt64,
            "Int8" => WireType::Int8,
            "Int16" => WireType::Int16,
            "Int32" => WireType::Int32,
            "Int64" => WireType::Int64,
            "Float32" => WireType::Float32,
            "Float64" => WireType::Float64,
            "String" => WireType::String,
            "Date" => WireType::Date,
            "DateTime" => WireType::DateTime,
            "Bool" => WireType::Bool,
            other => return Err(format!("unsupported wire type \"{}\"", other)),
        };
        Ok(parsed)
    }

    /// The remote spelling of this type.
    pub fn name(&self) -> String {
        match self {
            WireType::FixedString(n) => format!("FixedString({})", n),
            WireType::Nullable(inner) => format!("Nullable({})", inner.name()),
            other => format!("{:?}", other),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, WireType::Nullable(_))
    }

    /// The type with any Nullable wrapper removed.
    pub fn base(&self) -> &WireType {
        match self {
            WireType::Nullable(inner) => inner,
            other => other,
        }
    }
}

fn strip_wrapper<'a>(name: &'a str, wrapper: &str) -> Option<&'a str> {
    name.strip_prefix(wrapper)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Values of one column, stored by base type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    /// Shared by String and FixedString; FixedString values keep their padding.
    Bytes(Vec<Vec<u8>>),
    Date(Vec<u16>),
    DateTime(Vec<u32>),
    Bool(Vec<bool>),
}

impl ColumnValues {
    /// An empty value vector matching `wire_type`'s base type.
    pub fn empty_for(wire_type: &WireType, capacity: usize) -> ColumnValues {
        match wire_type.base() {
            WireType::UInt8 => ColumnValues::UInt8(Vec::with_capacity(capacity)),
            WireType::UInt16 => ColumnValues::UInt16(Vec::with_capacity(capacity)),
            WireType::UInt32 => ColumnValues::UInt32(Vec::with_capacity(capacity)),
            WireType::UInt64 => ColumnValues::UInt64(Vec::with_capacity(capacity)),
            WireType::Int8 => ColumnValues::Int8(Vec::with_capacity(capacity)),
            WireType::Int16 => ColumnValues::Int16(Vec::with_capacity(capacity)),
            WireType::Int32 => ColumnValues::Int32(Vec::with_capacity(capacity)),
            WireType::Int64 => ColumnValues::Int64(Vec::with_capacity(capacity)),
            WireType::Float32 => ColumnValues::Float32(Vec::with_capacity(capacity)),
            WireType::Float64 => ColumnValues::Float64(Vec::with_capacity(capacity)),
            WireType::String | WireType::FixedString(_) => {
                ColumnValues::Bytes(Vec::with_capacity(capacity))
            }
            WireType::Date => ColumnValues::Date(Vec::with_capacity(capacity)),
            WireType::DateTime => ColumnValues::DateTime(Vec::with_capacity(capacity)),
            WireType::Bool => ColumnValues::Bool(Vec::with_capacity(capacity)),
            WireType::Nullable(_) => unreachable!("base() strips Nullable"),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::UInt8(v) => v.len(),
            ColumnValues::UInt16(v) => v.len(),
            ColumnValues::UInt32(v) => v.len(),
            ColumnValues::UInt64(v) => v.len(),
            ColumnValues::Int8(v) => v.len(),
            ColumnValues::Int16(v) => v.len(),
            ColumnValues::Int32(v) => v.len(),
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::Float32(v) => v.len(),
            ColumnValues::Float64(v) => v.len(),
            ColumnValues::Bytes(v) => v.len(),
            ColumnValues::Date(v) => v.len(),
            ColumnValues::DateTime(v) => v.len(),
            ColumnValues::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One cell read out of a block, borrowed from the column storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Null,
    UInt(u64),
    Int(i64),
    Float32(f32),
    Float64(f64),
    Bytes(&'a [u8]),
    Date(u16),
    DateTime(u32),
    Bool(bool),
}

/// A named, typed column of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockColumn {
    pub name: String,
    pub wire_type: WireType,
    pub values: ColumnValues,
    /// Null map, present only for Nullable columns. `true` marks a NULL row.
    pub nulls: Option<Vec<bool>>,
}

impl BlockColumn {
    pub fn new(name: impl Into<String>, wire_type: WireType, values: ColumnValues) -> Self {
        let nulls = wire_type.is_nullable().then(|| vec![false; values.len()]);
        Self {
            name: name.into(),
            wire_type,
            values,
            nulls,
        }
    }

    /// A Nullable column; `nulls[i] == true` marks row `i` as NULL.
    pub fn nullable(
        name: impl Into<String>,
        inner: WireType,
        values: ColumnValues,
        nulls: Vec<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            wire_type: WireType::Nullable(Box::new(inner)),
            values,
            nulls: Some(nulls),
        }
    }

    /// An empty column ready for `push`.
    pub fn empty(name: impl Into<String>, wire_type: WireType) -> Self {
        let values = ColumnValues::empty_for(&wire_type, 1);
        Self::new(name, wire_type, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reads row `row`. Callers must stay below `len()`.
    pub fn cell(&self, row: usize) -> Cell<'_> {
        if let Some(nulls) = &self.nulls {
            if nulls[row] {
                return Cell::Null;
            }
        }
        match &self.values {
            ColumnValues::UInt8(v) => Cell::UInt(v[row] as u64),
            ColumnValues::UInt16(v) => Cell::UInt(v[row] as u64),
            ColumnValues::UInt32(v) => Cell::UInt(v[row] as u64),
            ColumnValues::UInt64(v) => Cell::UInt(v[row]),
            ColumnValues::Int8(v) => Cell::Int(v[row] as i64),
            ColumnValues::Int16(v) => Cell::Int(v[row] as i64),
            ColumnValues::Int32(v) => Cell::Int(v[row] as i64),
            ColumnValues::Int64(v) => Cell::Int(v[row]),
            ColumnValues::Float32(v) => Cell::Float32(v[row]),
            ColumnValues::Float64(v) => Cell::Float64(v[row]),
            ColumnValues::Bytes(v) => Cell::Bytes(&v[row]),
            ColumnValues::Date(v) => Cell::Date(v[row]),
            ColumnValues::DateTime(v) => Cell::DateTime(v[row]),
            ColumnValues::Bool(v) => Cell::Bool(v[row]),
        }
    }

    /// Appends one value. The cell must already fit the column's base type;
    /// range checks belong to the caller.
    pub fn push(&mut self, cell: Cell<'_>) -> Result<(), String> {
        if let Cell::Null = cell {
            let nulls = self
                .nulls
                .as_mut()
                .ok_or_else(|| format!("NULL pushed into non-Nullable column \"{}\"", self.name))?;
            nulls.push(true);
            self.push_default();
            return Ok(());
        }
        let mismatch = || format!("{:?} does not fit column type {}", cell, self.wire_type.name());
        match (&mut self.values, cell) {
            (ColumnValues::UInt8(v), Cell::UInt(x)) => v.push(x as u8),
            (ColumnValues::UInt8(v), Cell::Bool(x)) => v.push(x as u8),
            (ColumnValues::UInt16(v), Cell::UInt(x)) => v.push(x as u16),
            (ColumnValues::UInt32(v), Cell::UInt(x)) => v.push(x as u32),
            (ColumnValues::UInt64(v), Cell::UInt(x)) => v.push(x),
            (ColumnValues::Int8(v), Cell::Int(x)) => v.push(x as i8),
            (ColumnValues::Int16(v), Cell::Int(x)) => v.push(x as i16),
            (ColumnValues::Int32(v), Cell::Int(x)) => v.push(x as i32),
            (ColumnValues::Int64(v), Cell::Int(x)) => v.push(x),
            (ColumnValues::Float32(v), Cell::Float32(x)) => v.push(x),
            (ColumnValues::Float64(v), Cell::Float64(x)) => v.push(x),
            (ColumnValues::Bytes(v), Cell::Bytes(x)) => {
                if let WireType::FixedString(n) = self.wire_type.base() {
                    if x.len() > *n {
                        return Err(mismatch());
                    }
                    let mut padded = x.to_vec();
                    padded.resize(*n, 0);
                    v.push(padded);
                } else {
                    v.push(x.to_vec());
                }
            }
            (ColumnValues::Date(v), Cell::Date(x)) => v.push(x),
            (ColumnValues::DateTime(v), Cell::DateTime(x)) => v.push(x),
            (ColumnValues::Bool(v), Cell::Bool(x)) => v.push(x),
            _ => return Err(mismatch()),
        }
        if let Some(nulls) = self.nulls.as_mut() {
            nulls.push(false);
        }
        Ok(())
    }

    fn push_default(&mut self) {
        let fixed_len = match self.wire_type.base() {
            WireType::FixedString(n) => *n,
            _ => 0,
        };
        match &mut self.values {
            ColumnValues::UInt8(v) => v.push(0),
            ColumnValues::UInt16(v) => v.push(0),
            ColumnValues::UInt32(v) => v.push(0),
            ColumnValues::UInt64(v) => v.push(0),
            ColumnValues::Int8(v) => v.push(0),
            ColumnValues::Int16(v) => v.push(0),
            ColumnValues::Int32(v) => v.push(0),
            ColumnValues::Int64(v) => v.push(0),
            ColumnValues::Float32(v) => v.push(0.0),
            ColumnValues::Float64(v) => v.push(0.0),
            ColumnValues::Bytes(v) => v.push(vec![0; fixed_len]),
            ColumnValues::Date(v) => v.push(0),
            ColumnValues::DateTime(v) => v.push(0),
            ColumnValues::Bool(v) => v.push(false),
        }
    }

    fn write_data<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if let Some(nulls) = &self.nulls {
            for &is_null in nulls {
                w.write_all(&[is_null as u8])?;
            }
        }
        match &self.values {
            ColumnValues::UInt8(v) => w.write_all(v)?,
            ColumnValues::UInt16(v) => v.iter().try_for_each(|x| write_u16(w, *x))?,
            ColumnValues::UInt32(v) => v.iter().try_for_each(|x| write_u32(w, *x))?,
            ColumnValues::UInt64(v) => v.iter().try_for_each(|x| write_u64(w, *x))?,
            ColumnValues::Int8(v) => v.iter().try_for_each(|x| write_i8(w, *x))?,
            ColumnValues::Int16(v) => v.iter().try_for_each(|x| write_i16(w, *x))?,
            ColumnValues::Int32(v) => v.iter().try_for_each(|x| write_i32(w, *x))?,
            ColumnValues::Int64(v) => v.iter().try_for_each(|x| write_i64(w, *x))?,
            ColumnValues::Float32(v) => v.iter().try_for_each(|x| write_f32(w, *x))?,
            ColumnValues::Float64(v) => v.iter().try_for_each(|x| write_f64(w, *x))?,
            ColumnValues::Bytes(v) => match self.wire_type.base() {
                WireType::FixedString(_) => v.iter().try_for_each(|x| w.write_all(x))?,
                _ => v.iter().try_for_each(|x| write_bytes(w, x))?,
            },
            ColumnValues::Date(v) => v.iter().try_for_each(|x| write_u16(w, *x))?,
            ColumnValues::DateTime(v) => v.iter().try_for_each(|x| write_u32(w, *x))?,
            ColumnValues::Bool(v) => v.iter().try_for_each(|x| w.write_all(&[*x as u8]))?,
        }
        Ok(())
    }

    fn read_data<R: Read>(
        r: &mut R,
        name: String,
        wire_type: WireType,
        rows: usize,
    ) -> io::Result<BlockColumn> {
        let nulls = if wire_type.is_nullable() {
            let map = read_exact_vec(r, rows)?;
            Some(map.into_iter().map(|b| b != 0).collect())
        } else {
            None
        };
        let values = match wire_type.base() {
            WireType::UInt8 => ColumnValues::UInt8(read_exact_vec(r, rows)?),
            WireType::UInt16 => ColumnValues::UInt16(read_n(r, rows, read_u16)?),
            WireType::UInt32 => ColumnValues::UInt32(read_n(r, rows, read_u32)?),
            WireType::UInt64 => ColumnValues::UInt64(read_n(r, rows, read_u64)?),
            WireType::Int8 => ColumnValues::Int8(read_n(r, rows, read_i8)?),
            WireType::Int16 => ColumnValues::Int16(read_n(r, rows, read_i16)?),
            WireType::Int32 => ColumnValues::Int32(read_n(r, rows, read_i32)?),
            WireType::Int64 => ColumnValues::Int64(read_n(r, rows, read_i64)?),
            WireType::Float32 => ColumnValues::Float32(read_n(r, rows, read_f32)?),
            WireType::Float64 => ColumnValues::Float64(read_n(r, rows, read_f64)?),
            WireType::String => ColumnValues::Bytes(read_n(r, rows, read_bytes)?),
            WireType::FixedString(n) => {
                let n = *n;
                let total = rows.checked_mul(n).filter(|t| *t as u64 <= MAX_FIELD_LEN);
                if total.is_none() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("FixedString({}) column of {} rows exceeds limit", n, rows),
                    ));
                }
                ColumnValues::Bytes(read_n(r, rows, |r| read_exact_vec(r, n))?)
            }
            WireType::Date => ColumnValues::Date(read_n(r, rows, read_u16)?),
            WireType::DateTime => ColumnValues::DateTime(read_n(r, rows, read_u32)?),
            WireType::Bool => ColumnValues::Bool(read_n(r, rows, |r| read_u8(r).map(|b| b != 0))?),
            WireType::Nullable(_) => unreachable!("base() strips Nullable"),
        };
        Ok(BlockColumn {
            name,
            wire_type,
            values,
            nulls,
        })
    }
}

fn read_n<R: Read, T>(
    r: &mut R,
    rows: usize,
    read_one: impl Fn(&mut R) -> io::Result<T>,
) -> io::Result<Vec<T>> {
    let mut out = Vec::with_capacity(rows.min(65_536));
    for _ in 0..rows {
        out.push(read_one(r)?);
    }
    Ok(out)
}

/// A batch of rows delivered for one query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub columns: Vec<BlockColumn>,
    pub rows: usize,
}

impl Block {
    /// Builds a block, checking that every column has the same row count.
    pub fn new(columns: Vec<BlockColumn>) -> Result<Block, String> {
        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for column in &columns {
            if column.len() != rows {
                return Err(format!(
                    "column \"{}\" has {} rows, expected {}",
                    column.name,
                    column.len(),
                    rows
                ));
            }
            if let Some(nulls) = &column.nulls {
                if nulls.len() != rows {
                    return Err(format!("null map of \"{}\" has wrong length", column.name));
                }
            }
        }
        Ok(Block { columns, rows })
    }

    /// A block with no columns and no rows; terminates a data stream.
    pub fn empty() -> Block {
        Block::default()
    }

    /// Column names and types only, as sent in the header of a result.
    pub fn header(&self) -> Block {
        let columns = self
            .columns
            .iter()
            .map(|c| BlockColumn::empty(c.name.clone(), c.wire_type.clone()))
            .collect();
        Block { columns, rows: 0 }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        // Block info: is_overflows = false, bucket_num = -1.
        write_varint(w, 1)?;
        w.write_all(&[0])?;
        write_varint(w, 2)?;
        write_i32(w, -1)?;
        write_varint(w, 0)?;

        write_varint(w, self.columns.len() as u64)?;
        write_varint(w, self.rows as u64)?;
        for column in &self.columns {
            write_string(w, &column.name)?;
            write_string(w, &column.wire_type.name())?;
            column.write_data(w)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Block> {
        loop {
            match read_varint(r)? {
                0 => break,
                1 => {
                    read_u8(r)?;
                }
                2 => {
                    read_i32(r)?;
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown block info field {}", other),
                    ))
                }
            }
        }
        let num_columns = read_varint(r)? as usize;
        let rows = read_varint(r)?;
        if rows > MAX_FIELD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("block row count {} exceeds limit", rows),
            ));
        }
        let rows = rows as usize;
        let mut columns = Vec::with_capacity(num_columns.min(1024));
        for _ in 0..num_columns {
            let name = read_string(r)?;
            let type_name = read_string(r)?;
            let wire_type = WireType::parse(&type_name)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            columns.push(BlockColumn::read_data(r, name, wire_type, rows)?);
        }
        Ok(Block { columns, rows })
    }
}
