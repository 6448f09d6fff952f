//! Execution using the Volcano iterator model.
//!
//! Drives foreign scans the way a host executor does: parents pull tuples
//! from children with `next()`.

use crate::catalog::TableInfo;
use crate::expression::Expression;
use crate::fdw::ForeignDataWrapper;
use common::tuple::{Schema, Tuple};
use common::{BridgeError, Result};
use std::sync::Arc;

pub mod filter;
pub mod foreign_scan;

pub use filter::FilterExecutor;
pub use foreign_scan::ForeignScanExecutor;

/// The core executor trait for the Volcano iterator model.
///
/// Executors are pull-based: parents call next() on children to retrieve tuples.
pub trait Executor {
    /// Returns the schema of tuples produced by this executor.
    fn schema(&self) -> &Schema;

    /// Initialize the executor (open remote scans, position cursors).
    fn init(&mut self) -> Result<()>;

    /// Get the next tuple, or None if exhausted.
    fn next(&mut self) -> Result<Option<Tuple>>;

    /// Reset the executor to its initial state for re-execution.
    fn reset(&mut self) -> Result<()> {
        self.init()
    }
}

/// A boxed executor for dynamic dispatch.
pub type BoxedExecutor = Box<dyn Executor>;

/// Plans a scan of `table` through `fdw` and wraps it in a filter for the
/// restrictions that stay local.
pub fn build_scan(
    fdw: Arc<dyn ForeignDataWrapper>,
    table: &Arc<TableInfo>,
    target_columns: &[String],
    quals: &[Expression],
) -> Result<BoxedExecutor> {
    let size = fdw.get_rel_size(table, quals)?;
    let path = fdw
        .get_paths(table, &size)?
        .into_iter()
        .min_by(|a, b| a.total_cost.total_cmp(&b.total_cost))
        .ok_or_else(|| BridgeError::InvalidState(format!("no path for \"{}\"", table.name)))?;
    let plan = fdw.get_plan(table, &path, target_columns, quals)?;
    let filter = plan.local_filter();
    let scan: BoxedExecutor = Box::new(ForeignScanExecutor::new(fdw, plan));
    Ok(match filter {
        Some(predicate) => Box::new(FilterExecutor::new(scan, predicate)),
        None => scan,
    })
}

/// Initializes `executor` and drains it.
pub fn collect_results(executor: &mut dyn Executor) -> Result<Vec<Tuple>> {
    let mut results = Vec::new();
    executor.init()?;
    while let Some(tuple) = executor.next()? {
        results.push(tuple);
    }
    Ok(results)
}
