//! EXPLAIN output for foreign scans and modifications.

use super::modify::ForeignModifyState;
use super::scan::ForeignScanState;
use std::fmt;

/// One `label: value` line of EXPLAIN output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainProperty {
    pub label: String,
    pub value: String,
}

impl ExplainProperty {
    pub fn new(label: impl Into<String>, value: impl ToString) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ExplainProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.value)
    }
}

pub fn scan_properties(state: &ForeignScanState, analyze: bool) -> Vec<ExplainProperty> {
    let plan = state.plan();
    let mut props = vec![
        ExplainProperty::new("Remote SQL", &plan.remote_sql),
        ExplainProperty::new(
            "Server",
            format!("{} ({})", plan.table.server.name, plan.table.server.params.address()),
        ),
    ];
    if let Some(filter) = plan.local_filter() {
        props.push(ExplainProperty::new("Local Filter", format!("{:?}", filter)));
    }
    if analyze {
        if let Some(stats) = state.stats() {
            props.push(ExplainProperty::new("Blocks Fetched", stats.blocks_fetched));
            props.push(ExplainProperty::new("Rows Returned", stats.rows_returned));
            props.push(ExplainProperty::new("Remote Rows Read", stats.remote_rows_read));
        }
    }
    props
}

pub fn modify_properties(state: &ForeignModifyState, analyze: bool) -> Vec<ExplainProperty> {
    let plan = state.plan();
    let mut props = vec![
        ExplainProperty::new("Remote SQL", &plan.remote_sql),
        ExplainProperty::new(
            "Server",
            format!("{} ({})", plan.table.server.name, plan.table.server.params.address()),
        ),
    ];
    if analyze {
        if let Some(stats) = state.stats() {
            props.push(ExplainProperty::new("Rows Inserted", stats.inserted));
            props.push(ExplainProperty::new("Rows Updated", stats.updated));
            props.push(ExplainProperty::new("Rows Deleted", stats.deleted));
        }
    }
    props
}
