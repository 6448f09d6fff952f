//! IMPORT FOREIGN SCHEMA: generates foreign-table DDL from `system.columns`.

use crate::catalog::ForeignServer;
use crate::deparse;
use crate::execute::ch_execute;
use crate::materializer::canonical_type;
use common::tuple::{Column, Schema, Type, Value};
use common::{BridgeError, Result};
use tracing::{debug, warn};
use wire_client::{WireClient, WireType};

/// Which remote tables an import covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportListType {
    All,
    LimitTo(Vec<String>),
    Except(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    pub server_name: String,
    /// Remote database to read tables from.
    pub remote_schema: String,
    /// Host schema the foreign tables are created in.
    pub local_schema: String,
    pub list: ImportListType,
}

/// Returns one `CREATE FOREIGN TABLE` command per importable remote table.
///
/// Columns whose remote type has no host mapping are left out; a table with
/// no mappable column is skipped.
pub fn import_schema(server: &ForeignServer, stmt: &ImportStatement) -> Result<Vec<String>> {
    let (tables, exclude): (Option<&[String]>, &[String]) = match &stmt.list {
        ImportListType::All => (None, &[]),
        ImportListType::LimitTo(names) if names.is_empty() => return Ok(Vec::new()),
        ImportListType::LimitTo(names) => (Some(names.as_slice()), &[]),
        ImportListType::Except(names) => (None, names.as_slice()),
    };
    let sql = deparse::columns_of(&stmt.remote_schema, tables, exclude);
    let schema = Schema::new(vec![
        Column::not_null("table", Type::Text),
        Column::not_null("name", Type::Text),
        Column::not_null("type", Type::Text),
    ]);
    let client = WireClient::new(server.params.clone());

    let mut grouped: Vec<(String, Vec<Column>)> = Vec::new();
    for row in ch_execute(&client, sql, schema)? {
        let row = row?;
        let [table, name, type_name] = match row.values.as_slice() {
            [Value::Varchar(t), Value::Varchar(n), Value::Varchar(ty)] => [t, n, ty],
            _ => {
                return Err(BridgeError::Protocol(
                    "unexpected row shape from system.columns".to_string(),
                ))
            }
        };
        if grouped.last().map(|(t, _)| t != table).unwrap_or(true) {
            grouped.push((table.clone(), Vec::new()));
        }
        let wire_type = match WireType::parse(type_name) {
            Ok(wire_type) => wire_type,
            Err(e) => {
                warn!(table = %table, column = %name, error = %e, "skipping column with unsupported type");
                continue;
            }
        };
        let (column_type, nullable) = canonical_type(&wire_type);
        if let Some((_, columns)) = grouped.last_mut() {
            columns.push(Column {
                name: name.clone(),
                column_type,
                nullable,
            });
        }
    }

    let mut commands = Vec::with_capacity(grouped.len());
    for (table, columns) in grouped {
        if columns.is_empty() {
            warn!(table = %table, "skipping table with no importable columns");
            continue;
        }
        commands.push(create_foreign_table(
            &stmt.local_schema,
            &table,
            &columns,
            &server.name,
            &stmt.remote_schema,
        ));
    }
    debug!(server = %server.name, tables = commands.len(), "imported foreign schema");
    Ok(commands)
}

fn host_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn host_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn create_foreign_table(
    local_schema: &str,
    table: &str,
    columns: &[Column],
    server: &str,
    remote_schema: &str,
) -> String {
    let columns = columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", host_identifier(&c.name), c.column_type.sql_name());
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE FOREIGN TABLE {}.{} ({}) SERVER {} OPTIONS (database {}, table {})",
        host_identifier(local_schema),
        host_identifier(table),
        columns,
        host_identifier(server),
        host_literal(remote_schema),
        host_literal(table)
    )
}
