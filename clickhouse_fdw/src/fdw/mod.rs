//! Callback contract between a host engine and a foreign-data integration.
//!
//! The host drives a foreign table through planning (size, paths, plan),
//! scanning (begin, iterate, rescan, end) and modification callbacks. The
//! [`ForeignDataWrapper`] trait lists them; hooks an integration need not
//! provide default to [`BridgeError::NotSupported`].

use crate::catalog::{ForeignServer, TableInfo};
use crate::expression::Expression;
use common::config::{self, OptionContext};
use common::table::RowId;
use common::tuple::Tuple;
use common::{BridgeError, Result};
use std::sync::Arc;
use tracing::debug;

pub mod analyze;
pub mod explain;
pub mod import;
pub mod modify;
pub mod planner;
pub mod scan;

pub use analyze::AnalyzeSample;
pub use explain::ExplainProperty;
pub use import::{ImportListType, ImportStatement};
pub use modify::{ForeignModifyPlan, ForeignModifyState, ModifyOperation};
pub use planner::{
    ConstantEstimate, ForeignPath, ForeignScanPlan, RelSize, RemoteCountEstimate, SizeEstimator,
};
pub use scan::{ForeignScanState, ScanFlags};

/// How the host locks rows of a foreign table read under FOR UPDATE/SHARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMarkType {
    /// The host keeps a copy of the whole row.
    Copy,
    /// The host refetches the row by identifier.
    Reference,
}

fn not_supported<T>(what: &str) -> Result<T> {
    Err(BridgeError::NotSupported(what.to_string()))
}

/// Planner and executor callbacks for one kind of foreign table.
pub trait ForeignDataWrapper {
    /// Checks options attached to a wrapper, server, user mapping or table.
    fn validate_options(&self, context: OptionContext, options: &[(String, String)]) -> Result<()>;

    fn get_rel_size(&self, table: &TableInfo, quals: &[Expression]) -> Result<RelSize>;

    fn get_paths(&self, table: &TableInfo, size: &RelSize) -> Result<Vec<ForeignPath>>;

    fn get_plan(
        &self,
        table: &Arc<TableInfo>,
        path: &ForeignPath,
        target_columns: &[String],
        quals: &[Expression],
    ) -> Result<ForeignScanPlan>;

    fn begin_scan(&self, plan: &ForeignScanPlan, flags: ScanFlags) -> Result<ForeignScanState>;

    /// The next row, or `None` at the end. The row is valid until the next call.
    fn iterate_scan<'a>(&self, state: &'a mut ForeignScanState) -> Result<Option<&'a Tuple>>;

    fn rescan(&self, state: &mut ForeignScanState) -> Result<()>;

    /// Releases the scan. Must be safe in every state.
    fn end_scan(&self, state: &mut ForeignScanState);

    fn explain_scan(&self, _state: &ForeignScanState, _analyze: bool) -> Vec<ExplainProperty> {
        Vec::new()
    }

    /// Columns the host must fetch during an UPDATE or DELETE scan to
    /// identify rows.
    fn add_update_targets(&self, _table: &TableInfo) -> Result<Vec<String>> {
        not_supported("UPDATE and DELETE")
    }

    fn plan_modify(
        &self,
        _table: &Arc<TableInfo>,
        _operation: ModifyOperation,
    ) -> Result<ForeignModifyPlan> {
        not_supported("modification")
    }

    fn begin_modify(&self, _plan: &ForeignModifyPlan, _flags: ScanFlags) -> Result<ForeignModifyState> {
        not_supported("modification")
    }

    fn exec_insert(&self, _state: &mut ForeignModifyState, _tuple: &Tuple) -> Result<Option<Tuple>> {
        not_supported("INSERT")
    }

    fn exec_update(
        &self,
        _state: &mut ForeignModifyState,
        _row_id: &RowId,
        _tuple: &Tuple,
    ) -> Result<Option<Tuple>> {
        not_supported("UPDATE")
    }

    fn exec_delete(&self, _state: &mut ForeignModifyState, _row_id: &RowId) -> Result<Option<Tuple>> {
        not_supported("DELETE")
    }

    fn end_modify(&self, _state: &mut ForeignModifyState) {}

    /// Operations the table accepts; empty means read-only.
    fn is_updatable(&self, _table: &TableInfo) -> Vec<ModifyOperation> {
        Vec::new()
    }

    fn explain_modify(&self, _state: &ForeignModifyState, _analyze: bool) -> Vec<ExplainProperty> {
        Vec::new()
    }

    fn analyze_table(&self, _table: &TableInfo, _max_rows: usize) -> Result<AnalyzeSample> {
        not_supported("ANALYZE")
    }

    fn import_foreign_schema(
        &self,
        _server: &ForeignServer,
        _stmt: &ImportStatement,
    ) -> Result<Vec<String>> {
        not_supported("IMPORT FOREIGN SCHEMA")
    }

    fn get_row_mark_type(&self, _table: &TableInfo) -> Result<RowMarkType> {
        not_supported("row marks")
    }

    fn get_join_paths(&self, _outer: &TableInfo, _inner: &TableInfo) -> Result<Vec<ForeignPath>> {
        not_supported("join pushdown")
    }

    fn refetch_row(&self, _state: &mut ForeignScanState, _row_id: &RowId) -> Result<Option<Tuple>> {
        not_supported("row re-fetch")
    }
}

/// The ClickHouse integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouseFdw;

impl ClickHouseFdw {
    pub fn new() -> Self {
        ClickHouseFdw
    }
}

impl ForeignDataWrapper for ClickHouseFdw {
    fn validate_options(&self, context: OptionContext, options: &[(String, String)]) -> Result<()> {
        debug!(?context, count = options.len(), "validate_options");
        config::validate_options(context, options)
    }

    fn get_rel_size(&self, table: &TableInfo, quals: &[Expression]) -> Result<RelSize> {
        debug!(table = %table.name, "get_rel_size");
        let estimator = planner::estimator_for(table);
        planner::estimate_size(estimator.as_ref(), table, quals)
    }

    fn get_paths(&self, table: &TableInfo, size: &RelSize) -> Result<Vec<ForeignPath>> {
        debug!(table = %table.name, "get_paths");
        Ok(vec![ForeignPath::new(&table.server.options, size)])
    }

    fn get_plan(
        &self,
        table: &Arc<TableInfo>,
        path: &ForeignPath,
        target_columns: &[String],
        quals: &[Expression],
    ) -> Result<ForeignScanPlan> {
        debug!(table = %table.name, "get_plan");
        planner::plan_scan(table, path, target_columns, quals)
    }

    fn begin_scan(&self, plan: &ForeignScanPlan, flags: ScanFlags) -> Result<ForeignScanState> {
        ForeignScanState::begin(plan.clone(), flags)
    }

    fn iterate_scan<'a>(&self, state: &'a mut ForeignScanState) -> Result<Option<&'a Tuple>> {
        state.iterate()
    }

    fn rescan(&self, state: &mut ForeignScanState) -> Result<()> {
        state.rescan()
    }

    fn end_scan(&self, state: &mut ForeignScanState) {
        debug!(table = %state.plan().table.name, "end_scan");
        state.end();
    }

    fn explain_scan(&self, state: &ForeignScanState, analyze: bool) -> Vec<ExplainProperty> {
        explain::scan_properties(state, analyze)
    }

    fn add_update_targets(&self, table: &TableInfo) -> Result<Vec<String>> {
        debug!(table = %table.name, "add_update_targets");
        modify::row_identity_columns(table)
    }

    fn plan_modify(
        &self,
        table: &Arc<TableInfo>,
        operation: ModifyOperation,
    ) -> Result<ForeignModifyPlan> {
        modify::plan_modify(table, operation)
    }

    fn begin_modify(&self, plan: &ForeignModifyPlan, flags: ScanFlags) -> Result<ForeignModifyState> {
        ForeignModifyState::begin(plan.clone(), flags)
    }

    fn exec_insert(&self, state: &mut ForeignModifyState, tuple: &Tuple) -> Result<Option<Tuple>> {
        state.insert(tuple)
    }

    fn exec_update(
        &self,
        state: &mut ForeignModifyState,
        row_id: &RowId,
        tuple: &Tuple,
    ) -> Result<Option<Tuple>> {
        state.update(row_id, tuple)
    }

    fn exec_delete(&self, state: &mut ForeignModifyState, row_id: &RowId) -> Result<Option<Tuple>> {
        state.delete(row_id)
    }

    fn end_modify(&self, state: &mut ForeignModifyState) {
        debug!(table = %state.plan().table.name, "end_modify");
        state.end();
    }

    fn is_updatable(&self, table: &TableInfo) -> Vec<ModifyOperation> {
        modify::updatable_operations(table)
    }

    fn explain_modify(&self, state: &ForeignModifyState, analyze: bool) -> Vec<ExplainProperty> {
        explain::modify_properties(state, analyze)
    }

    fn analyze_table(&self, table: &TableInfo, max_rows: usize) -> Result<AnalyzeSample> {
        debug!(table = %table.name, max_rows, "analyze_table");
        analyze::sample_table(table, max_rows)
    }

    fn import_foreign_schema(
        &self,
        server: &ForeignServer,
        stmt: &ImportStatement,
    ) -> Result<Vec<String>> {
        debug!(server = %server.name, remote_schema = %stmt.remote_schema, "import_foreign_schema");
        import::import_schema(server, stmt)
    }

    fn get_row_mark_type(&self, _table: &TableInfo) -> Result<RowMarkType> {
        Ok(RowMarkType::Copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use common::tuple::{Column, Schema, Type};
    use common::ErrorCategory;

    /// Implements only the required callbacks.
    struct ReadOnly;

    impl ForeignDataWrapper for ReadOnly {
        fn validate_options(&self, _: OptionContext, _: &[(String, String)]) -> Result<()> {
            Ok(())
        }
        fn get_rel_size(&self, _: &TableInfo, _: &[Expression]) -> Result<RelSize> {
            Ok(RelSize { rows: 0.0, width: 0 })
        }
        fn get_paths(&self, _: &TableInfo, _: &RelSize) -> Result<Vec<ForeignPath>> {
            Ok(Vec::new())
        }
        fn get_plan(
            &self,
            _: &Arc<TableInfo>,
            _: &ForeignPath,
            _: &[String],
            _: &[Expression],
        ) -> Result<ForeignScanPlan> {
            not_supported("plan")
        }
        fn begin_scan(&self, _: &ForeignScanPlan, _: ScanFlags) -> Result<ForeignScanState> {
            not_supported("scan")
        }
        fn iterate_scan<'a>(&self, _: &'a mut ForeignScanState) -> Result<Option<&'a Tuple>> {
            Ok(None)
        }
        fn rescan(&self, _: &mut ForeignScanState) -> Result<()> {
            Ok(())
        }
        fn end_scan(&self, _: &mut ForeignScanState) {}
    }

    fn table() -> Arc<TableInfo> {
        let catalog = Catalog::new();
        catalog
            .create_server(ForeignServer::from_options("ch", &[], &[]).unwrap())
            .unwrap();
        catalog
            .create_foreign_table(
                "t",
                "ch",
                Schema::new(vec![Column::not_null("id", Type::Integer)]),
                &[],
            )
            .unwrap()
    }

    #[test]
    fn test_optional_hooks_default_to_not_supported() {
        let table = table();
        let fdw = ReadOnly;
        assert!(fdw.is_updatable(&table).is_empty());
        for err in [
            fdw.add_update_targets(&table).unwrap_err(),
            fdw.plan_modify(&table, ModifyOperation::Insert).unwrap_err(),
            fdw.analyze_table(&table, 10).unwrap_err(),
            fdw.get_row_mark_type(&table).map(|_| ()).unwrap_err(),
            fdw.get_join_paths(&table, &table).unwrap_err(),
        ] {
            assert_eq!(err.category(), ErrorCategory::NotSupported);
        }
    }

    #[test]
    fn test_clickhouse_capabilities() {
        let table = table();
        let fdw = ClickHouseFdw::new();
        assert_eq!(fdw.get_row_mark_type(&table).unwrap(), RowMarkType::Copy);
        assert_eq!(
            fdw.get_join_paths(&table, &table).unwrap_err().category(),
            ErrorCategory::NotSupported
        );
        assert_eq!(fdw.is_updatable(&table), vec![ModifyOperation::Insert]);

        let size = fdw.get_rel_size(&table, &[]).unwrap();
        let paths = fdw.get_paths(&table, &size).unwrap();
        assert_eq!(paths.len(), 1);

        let plan = fdw.get_plan(&table, &paths[0], &["id".to_string()], &[]).unwrap();
        let mut state = fdw.begin_scan(&plan, ScanFlags { explain_only: true }).unwrap();
        assert!(state.session_state().is_none());
        let props = fdw.explain_scan(&state, false);
        assert_eq!(props[0], ExplainProperty::new("Remote SQL", "SELECT `id` FROM `t`"));
        fdw.end_scan(&mut state);
        fdw.end_scan(&mut state);
    }

    #[test]
    fn test_validate_options_rejects_unknown() {
        let fdw = ClickHouseFdw::new();
        let err = fdw
            .validate_options(
                OptionContext::Table,
                &[("color".to_string(), "red".to_string())],
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidOption);
    }
}
