//! Row sampling for host-side statistics.

use super::planner::remote_count;
use crate::catalog::TableInfo;
use crate::deparse;
use crate::execute::ch_execute;
use common::tuple::Tuple;
use common::Result;
use tracing::debug;
use wire_client::WireClient;

/// Rows collected for ANALYZE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzeSample {
    /// Up to the requested number of rows, chosen at random by the remote.
    pub rows: Vec<Tuple>,
    /// Rows in the remote table when the sample was taken.
    pub total_rows: u64,
}

pub fn sample_table(table: &TableInfo, max_rows: usize) -> Result<AnalyzeSample> {
    let client = WireClient::new(table.server.params.clone());
    let total_rows = remote_count(&client, table, &[])?;
    if max_rows == 0 || total_rows == 0 || table.schema.is_empty() {
        return Ok(AnalyzeSample {
            rows: Vec::new(),
            total_rows,
        });
    }

    let columns: Vec<String> = table.schema.columns.iter().map(|c| c.name.clone()).collect();
    let sql = deparse::sample(&columns, &table.remote(), max_rows as u64);
    let rows = ch_execute(&client, sql, table.schema.clone())?.collect::<Result<Vec<_>>>()?;
    debug!(table = %table.name, sampled = rows.len(), total_rows, "analyzed foreign table");
    Ok(AnalyzeSample { rows, total_rows })
}
