//! Foreign scan executor.
//!
//! Begins the remote scan on init, pulls rows through the wrapper's
//! iterate callback, and ends the scan when dropped.

use super::Executor;
use crate::fdw::{ForeignDataWrapper, ForeignScanPlan, ForeignScanState, ScanFlags};
use common::tuple::{Schema, Tuple};
use common::Result;
use std::sync::Arc;

pub struct ForeignScanExecutor {
    fdw: Arc<dyn ForeignDataWrapper>,
    plan: ForeignScanPlan,
    state: Option<ForeignScanState>,
}

impl ForeignScanExecutor {
    pub fn new(fdw: Arc<dyn ForeignDataWrapper>, plan: ForeignScanPlan) -> Self {
        Self {
            fdw,
            plan,
            state: None,
        }
    }

    /// The running scan, once initialized.
    pub fn scan_state(&self) -> Option<&ForeignScanState> {
        self.state.as_ref()
    }
}

impl Executor for ForeignScanExecutor {
    fn schema(&self) -> &Schema {
        &self.plan.schema
    }

    fn init(&mut self) -> Result<()> {
        match self.state.as_mut() {
            Some(state) => self.fdw.rescan(state),
            None => {
                let state = self.fdw.begin_scan(&self.plan, ScanFlags::default())?;
                self.state = Some(state);
                Ok(())
            }
        }
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        Ok(self.fdw.iterate_scan(state)?.cloned())
    }
}

impl Drop for ForeignScanExecutor {
    fn drop(&mut self) {
        if let Some(state) = self.state.as_mut() {
            self.fdw.end_scan(state);
        }
    }
}
