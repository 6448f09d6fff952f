//! Builds the SQL text shipped to the remote engine.
//!
//! Identifiers are always back-quoted and literals are always escaped; no
//! caller-supplied text reaches the remote unquoted.

use common::table::RowId;
use common::tuple::Value;
use std::fmt::Write;

/// A remote table, optionally qualified by database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTable {
    pub database: Option<String>,
    pub table: String,
}

impl RemoteTable {
    pub fn new(database: Option<String>, table: impl Into<String>) -> Self {
        Self {
            database,
            table: table.into(),
        }
    }

    pub fn qualified(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}", quote_identifier(db), quote_identifier(&self.table)),
            None => quote_identifier(&self.table),
        }
    }
}

pub fn quote_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('`');
    for c in name.chars() {
        match c {
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('`');
    out
}

pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Renders a host value as a remote literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Real(f) => float_literal(*f as f64),
        Value::Double(f) => float_literal(*f),
        Value::Varchar(s) => quote_string(s),
        Value::Bytea(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 4 + 2);
            out.push('\'');
            for b in bytes {
                let _ = write!(out, "\\x{:02X}", b);
            }
            out.push('\'');
            out
        }
        Value::Date(d) => format!("toDate('{}')", d.format("%Y-%m-%d")),
        Value::Timestamp(ts) => format!("toDateTime('{}', 'UTC')", ts.format("%Y-%m-%d %H:%M:%S")),
    }
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else {
        format!("{:?}", f)
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn select(
    columns: &[String],
    table: &RemoteTable,
    conditions: &[String],
    limit: Option<u64>,
) -> String {
    let mut sql = format!("SELECT {} FROM {}", column_list(columns), table.qualified());
    if !conditions.is_empty() {
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }
    if let Some(n) = limit {
        let _ = write!(sql, " LIMIT {}", n);
    }
    sql
}

/// `key = literal AND ...` for each key of `row_id`.
pub fn row_id_condition(row_id: &RowId) -> String {
    row_id
        .keys
        .iter()
        .map(|(name, value)| format!("{} = {}", quote_identifier(name), literal(value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Statement header for a native insert; rows follow as data blocks.
pub fn insert(table: &RemoteTable, columns: &[String]) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES",
        table.qualified(),
        column_list(columns)
    )
}

pub fn update(table: &RemoteTable, assignments: &[(String, Value)], row_id: &RowId) -> String {
    let set = assignments
        .iter()
        .map(|(name, value)| format!("{} = {}", quote_identifier(name), literal(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "ALTER TABLE {} UPDATE {} WHERE {}",
        table.qualified(),
        set,
        row_id_condition(row_id)
    )
}

pub fn delete(table: &RemoteTable, row_id: &RowId) -> String {
    format!(
        "ALTER TABLE {} DELETE WHERE {}",
        table.qualified(),
        row_id_condition(row_id)
    )
}

pub fn count(table: &RemoteTable, conditions: &[String]) -> String {
    let mut sql = format!("SELECT count() FROM {}", table.qualified());
    if !conditions.is_empty() {
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }
    sql
}

/// Random sample used by ANALYZE.
pub fn sample(columns: &[String], table: &RemoteTable, rows: u64) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY rand() LIMIT {}",
        column_list(columns),
        table.qualified(),
        rows
    )
}

/// Column listing for schema import, restricted to `tables` when given.
pub fn columns_of(database: &str, tables: Option<&[String]>, exclude: &[String]) -> String {
    let mut sql = format!(
        "SELECT table, name, type FROM system.columns WHERE database = {}",
        quote_string(database)
    );
    let list = |names: &[String]| {
        names
            .iter()
            .map(|n| quote_string(n))
            .collect::<Vec<_>>()
            .join(", ")
    };
    if let Some(tables) = tables {
        let _ = write!(sql, " AND table IN ({})", list(tables));
    }
    if !exclude.is_empty() {
        let _ = write!(sql, " AND table NOT IN ({})", list(exclude));
    }
    sql.push_str(" ORDER BY table, position");
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use test_case::test_case;

    #[test_case(Value::Null, "NULL")]
    #[test_case(Value::Integer(-5), "-5")]
    #[test_case(Value::Double(1.5), "1.5")]
    #[test_case(Value::Double(f64::NEG_INFINITY), "-inf")]
    #[test_case(Value::Varchar("it's \\ ok".to_string()), "'it\\'s \\\\ ok'")]
    #[test_case(Value::Bytea(vec![0x00, 0xff]), "'\\x00\\xFF'")]
    #[test_case(Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()), "toDate('2024-02-29')")]
    fn test_literal(value: Value, expected: &str) {
        assert_eq!(literal(&value), expected);
    }

    #[test]
    fn test_quote_identifier_escapes_backticks() {
        assert_eq!(quote_identifier("we`ird"), "`we\\`ird`");
    }

    #[test]
    fn test_select() {
        let table = RemoteTable::new(Some("db".to_string()), "t");
        let sql = select(
            &["a".to_string(), "b".to_string()],
            &table,
            &["(`a` > 1)".to_string()],
            Some(10),
        );
        assert_eq!(sql, "SELECT `a`, `b` FROM `db`.`t` WHERE (`a` > 1) LIMIT 10");
    }

    #[test]
    fn test_mutations() {
        let table = RemoteTable::new(None, "t");
        let row_id = RowId::new(vec![("id".to_string(), Value::Integer(7))]);
        assert_eq!(
            update(&table, &[("b".to_string(), Value::Varchar("z".to_string()))], &row_id),
            "ALTER TABLE `t` UPDATE `b` = 'z' WHERE `id` = 7"
        );
        assert_eq!(delete(&table, &row_id), "ALTER TABLE `t` DELETE WHERE `id` = 7");
        assert_eq!(
            insert(&table, &["id".to_string(), "b".to_string()]),
            "INSERT INTO `t` (`id`, `b`) VALUES"
        );
    }

    #[test]
    fn test_columns_of() {
        let sql = columns_of("default", Some(&["t1".to_string()]), &[]);
        assert_eq!(
            sql,
            "SELECT table, name, type FROM system.columns WHERE database = 'default' \
             AND table IN ('t1') ORDER BY table, position"
        );
    }
}
