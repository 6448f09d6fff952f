//! Size estimates, access paths and scan plans for foreign tables.

use crate::catalog::TableInfo;
use crate::deparse;
use crate::execute::ch_execute;
use crate::expression::Expression;
use common::config::ServerOptions;
use common::tuple::{Column, Schema, Type};
use common::{BridgeError, Result};
use std::sync::Arc;
use tracing::debug;
use wire_client::WireClient;

/// Row estimate used when the remote is not asked.
pub const DEFAULT_ROW_ESTIMATE: f64 = 1000.0;

/// Estimated size of a foreign relation after its restrictions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelSize {
    pub rows: f64,
    /// Average row width in bytes.
    pub width: u32,
}

/// Decides how many rows a scan is expected to return.
pub trait SizeEstimator {
    fn estimate_rows(&self, table: &TableInfo, remote_conditions: &[String]) -> Result<f64>;
}

/// A fixed estimate, independent of the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantEstimate(pub f64);

impl Default for ConstantEstimate {
    fn default() -> Self {
        ConstantEstimate(DEFAULT_ROW_ESTIMATE)
    }
}

impl SizeEstimator for ConstantEstimate {
    fn estimate_rows(&self, _table: &TableInfo, _remote_conditions: &[String]) -> Result<f64> {
        Ok(self.0)
    }
}

/// Asks the remote for `count()` under the shippable conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteCountEstimate;

impl SizeEstimator for RemoteCountEstimate {
    fn estimate_rows(&self, table: &TableInfo, remote_conditions: &[String]) -> Result<f64> {
        let client = WireClient::new(table.server.params.clone());
        let count = remote_count(&client, table, remote_conditions)?;
        Ok(count as f64)
    }
}

/// Runs `SELECT count()` against the remote table of `table`.
pub(crate) fn remote_count(client: &WireClient, table: &TableInfo, conditions: &[String]) -> Result<u64> {
    let sql = deparse::count(&table.remote(), conditions);
    let schema = Schema::new(vec![Column::not_null("count()", Type::BigInt)]);
    let mut rows = ch_execute(client, sql, schema)?;
    let count = match rows.next() {
        Some(row) => row?.values.first().and_then(|v| v.as_i64()).unwrap_or(0),
        None => 0,
    };
    Ok(count.max(0) as u64)
}

/// The estimator configured for `table`.
pub fn estimator_for(table: &TableInfo) -> Box<dyn SizeEstimator> {
    if table.use_remote_estimate() {
        Box::new(RemoteCountEstimate)
    } else {
        Box::new(ConstantEstimate::default())
    }
}

/// Restrictions partitioned by where they are evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualSplit {
    /// Deparsed conditions for the remote WHERE clause.
    pub remote: Vec<String>,
    /// Restrictions the host evaluates on returned rows.
    pub local: Vec<Expression>,
}

pub fn split_quals(schema: &Schema, quals: &[Expression]) -> QualSplit {
    let mut split = QualSplit::default();
    for qual in quals {
        match qual.deparse(schema) {
            Some(sql) => split.remote.push(sql),
            None => split.local.push(qual.clone()),
        }
    }
    split
}

pub fn estimate_size(
    estimator: &dyn SizeEstimator,
    table: &TableInfo,
    quals: &[Expression],
) -> Result<RelSize> {
    let split = split_quals(&table.schema, quals);
    let rows = estimator.estimate_rows(table, &split.remote)?;
    let width = table
        .schema
        .columns
        .iter()
        .map(|c| c.column_type.estimated_width())
        .sum();
    debug!(table = %table.name, rows, width, "estimated relation size");
    Ok(RelSize { rows, width })
}

/// One way of scanning a foreign table, with its costs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForeignPath {
    pub rows: f64,
    pub startup_cost: f64,
    pub total_cost: f64,
}

impl ForeignPath {
    pub fn new(options: &ServerOptions, size: &RelSize) -> Self {
        Self {
            rows: size.rows,
            startup_cost: options.fdw_startup_cost,
            total_cost: options.fdw_startup_cost + options.fdw_tuple_cost * size.rows,
        }
    }
}

/// A planned foreign scan: the remote query and what is left for the host.
#[derive(Debug, Clone)]
pub struct ForeignScanPlan {
    pub table: Arc<TableInfo>,
    /// Columns fetched from the remote, in result order.
    pub schema: Schema,
    pub remote_sql: String,
    pub remote_conditions: Vec<String>,
    /// Restrictions bound to `schema`, evaluated by the host.
    pub local_quals: Vec<Expression>,
    pub rows: f64,
}

impl ForeignScanPlan {
    /// The local restrictions joined into one predicate.
    pub fn local_filter(&self) -> Option<Expression> {
        self.local_quals
            .iter()
            .cloned()
            .reduce(|acc, qual| acc.and(qual))
    }
}

pub fn plan_scan(
    table: &Arc<TableInfo>,
    path: &ForeignPath,
    target_columns: &[String],
    quals: &[Expression],
) -> Result<ForeignScanPlan> {
    let split = split_quals(&table.schema, quals);

    let mut fetched: Vec<String> = target_columns.to_vec();
    for qual in &split.local {
        for name in qual.columns(&table.schema) {
            if !fetched.contains(&name) {
                fetched.push(name);
            }
        }
    }
    // The remote needs at least one column in the select list.
    if fetched.is_empty() {
        let first = table.schema.columns.first().ok_or_else(|| {
            BridgeError::InvalidState(format!("foreign table \"{}\" has no columns", table.name))
        })?;
        fetched.push(first.name.clone());
    }

    let schema = table.schema.project(&fetched).ok_or_else(|| {
        BridgeError::InvalidState(format!(
            "target column not found in foreign table \"{}\"",
            table.name
        ))
    })?;
    let local_quals = split
        .local
        .iter()
        .map(|qual| qual.bind(&schema))
        .collect::<Result<Vec<_>>>()?;

    let remote_sql = deparse::select(&fetched, &table.remote(), &split.remote, None);
    debug!(table = %table.name, sql = %remote_sql, local = local_quals.len(), "planned foreign scan");
    Ok(ForeignScanPlan {
        table: table.clone(),
        schema,
        remote_sql,
        remote_conditions: split.remote,
        local_quals,
        rows: path.rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ForeignServer};
    use crate::expression::{col, lit, lit_value};
    use common::tuple::Value;

    fn table() -> Arc<TableInfo> {
        let catalog = Catalog::new();
        let server = ForeignServer::from_options(
            "ch",
            &[("fdw_startup_cost".to_string(), "10".to_string())],
            &[],
        )
        .unwrap();
        catalog.create_server(server).unwrap();
        catalog
            .create_foreign_table(
                "events",
                "ch",
                Schema::new(vec![
                    Column::not_null("id", Type::BigInt),
                    Column::new("payload", Type::Bytea),
                    Column::new("kind", Type::Text),
                ]),
                &[("database".to_string(), "logs".to_string())],
            )
            .unwrap()
    }

    #[test]
    fn test_constant_estimate_and_path_costs() {
        let table = table();
        let size = estimate_size(&ConstantEstimate::default(), &table, &[]).unwrap();
        assert_eq!(size.rows, DEFAULT_ROW_ESTIMATE);
        assert_eq!(size.width, 8 + 32 + 32);

        let path = ForeignPath::new(&table.server.options, &size);
        assert_eq!(path.startup_cost, 10.0);
        assert!((path.total_cost - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_ships_deparsable_quals() {
        let table = table();
        let path = ForeignPath::new(&table.server.options, &RelSize { rows: 5.0, width: 8 });
        let quals = vec![
            col("id").gt(lit(3)),
            col("payload").eq(lit_value(Value::Bytea(vec![1, 2]))),
        ];
        let plan = plan_scan(&table, &path, &["kind".to_string()], &quals).unwrap();

        assert_eq!(
            plan.remote_sql,
            "SELECT `kind`, `payload` FROM `logs`.`events` WHERE (`id` > 3)"
        );
        assert_eq!(plan.schema.len(), 2);
        assert_eq!(plan.local_quals.len(), 1);
        assert!(plan.local_filter().is_some());
        assert_eq!(plan.rows, 5.0);
    }

    #[test]
    fn test_plan_with_no_target_columns_fetches_first_column() {
        let table = table();
        let path = ForeignPath::new(&table.server.options, &RelSize { rows: 1.0, width: 8 });
        let plan = plan_scan(&table, &path, &[], &[]).unwrap();
        assert_eq!(plan.remote_sql, "SELECT `id` FROM `logs`.`events`");
        assert!(plan.local_filter().is_none());
    }

    #[test]
    fn test_plan_rejects_unknown_target_column() {
        let table = table();
        let path = ForeignPath::new(&table.server.options, &RelSize { rows: 1.0, width: 8 });
        assert!(plan_scan(&table, &path, &["nope".to_string()], &[]).is_err());
    }
}
