//! Planning and execution of INSERT, UPDATE and DELETE on foreign tables.

use super::scan::ScanFlags;
use crate::catalog::TableInfo;
use crate::deparse::{self, quote_identifier};
use crate::session::{ModifySession, ModifyStats};
use common::table::RowId;
use common::tuple::Tuple;
use common::{BridgeError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use wire_client::WireClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ModifyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModifyOperation::Insert => "INSERT",
            ModifyOperation::Update => "UPDATE",
            ModifyOperation::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Operations the remote table accepts. Without key columns rows cannot be
/// identified, so only inserts are possible.
pub fn updatable_operations(table: &TableInfo) -> Vec<ModifyOperation> {
    if table.options.key_columns.is_empty() {
        vec![ModifyOperation::Insert]
    } else {
        vec![
            ModifyOperation::Insert,
            ModifyOperation::Update,
            ModifyOperation::Delete,
        ]
    }
}

/// Columns the host must fetch during the scan to identify rows.
pub fn row_identity_columns(table: &TableInfo) -> Result<Vec<String>> {
    if table.options.key_columns.is_empty() {
        return Err(BridgeError::InvalidOption(format!(
            "foreign table \"{}\" needs the key_columns option for UPDATE and DELETE",
            table.name
        )));
    }
    Ok(table.options.key_columns.clone())
}

#[derive(Debug, Clone)]
pub struct ForeignModifyPlan {
    pub table: Arc<TableInfo>,
    pub operation: ModifyOperation,
    pub key_columns: Vec<String>,
    /// Statement shape shown by EXPLAIN; `?` marks per-row values.
    pub remote_sql: String,
}

pub fn plan_modify(table: &Arc<TableInfo>, operation: ModifyOperation) -> Result<ForeignModifyPlan> {
    let remote = table.remote();
    let columns: Vec<String> = table.schema.columns.iter().map(|c| c.name.clone()).collect();
    let key_columns = match operation {
        ModifyOperation::Insert => table.options.key_columns.clone(),
        ModifyOperation::Update | ModifyOperation::Delete => row_identity_columns(table)?,
    };
    let key_condition = key_columns
        .iter()
        .map(|k| format!("{} = ?", quote_identifier(k)))
        .collect::<Vec<_>>()
        .join(" AND ");

    let remote_sql = match operation {
        ModifyOperation::Insert => deparse::insert(&remote, &columns),
        ModifyOperation::Update => {
            let set = columns
                .iter()
                .filter(|c| !key_columns.contains(c))
                .map(|c| format!("{} = ?", quote_identifier(c)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "ALTER TABLE {} UPDATE {} WHERE {}",
                remote.qualified(),
                set,
                key_condition
            )
        }
        ModifyOperation::Delete => format!(
            "ALTER TABLE {} DELETE WHERE {}",
            remote.qualified(),
            key_condition
        ),
    };
    debug!(table = %table.name, %operation, sql = %remote_sql, "planned foreign modify");
    Ok(ForeignModifyPlan {
        table: table.clone(),
        operation,
        key_columns,
        remote_sql,
    })
}

pub struct ForeignModifyState {
    plan: ForeignModifyPlan,
    session: Option<ModifySession>,
}

impl ForeignModifyState {
    pub fn begin(plan: ForeignModifyPlan, flags: ScanFlags) -> Result<Self> {
        debug!(table = %plan.table.name, operation = %plan.operation, "begin foreign modify");
        if flags.explain_only {
            return Ok(Self {
                plan,
                session: None,
            });
        }
        let mut session = ModifySession::new(
            WireClient::new(plan.table.server.params.clone()),
            plan.table.remote(),
            plan.table.schema.clone(),
            plan.key_columns.clone(),
        );
        session.begin()?;
        Ok(Self {
            plan,
            session: Some(session),
        })
    }

    pub fn plan(&self) -> &ForeignModifyPlan {
        &self.plan
    }

    pub fn stats(&self) -> Option<ModifyStats> {
        self.session.as_ref().map(|s| s.stats())
    }

    pub fn insert(&mut self, tuple: &Tuple) -> Result<Option<Tuple>> {
        self.expect(ModifyOperation::Insert)?;
        self.session_mut()?.insert(tuple).map(Some)
    }

    pub fn update(&mut self, row_id: &RowId, tuple: &Tuple) -> Result<Option<Tuple>> {
        self.expect(ModifyOperation::Update)?;
        self.session_mut()?.update(row_id, tuple)
    }

    pub fn delete(&mut self, row_id: &RowId) -> Result<Option<Tuple>> {
        self.expect(ModifyOperation::Delete)?;
        self.session_mut()?.delete(row_id)
    }

    pub fn end(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.end();
        }
    }

    fn expect(&self, operation: ModifyOperation) -> Result<()> {
        if self.plan.operation != operation {
            return Err(BridgeError::InvalidState(format!(
                "{} on a node planned for {}",
                operation, self.plan.operation
            )));
        }
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut ModifySession> {
        self.session.as_mut().ok_or_else(|| {
            BridgeError::InvalidState("modify was begun for EXPLAIN only".to_string())
        })
    }
}
