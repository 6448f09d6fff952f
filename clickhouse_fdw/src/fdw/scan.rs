//! Execution state of one foreign scan.

use super::planner::ForeignScanPlan;
use crate::session::{ScanSession, ScanStats, SessionOptions, SessionState};
use common::tuple::Tuple;
use common::{BridgeError, Result};
use tracing::debug;
use wire_client::{QueryRequest, WireClient};

/// Flags passed by the host when a scan or modify node starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFlags {
    /// The node is only being explained; no remote I/O may happen.
    pub explain_only: bool,
}

pub struct ForeignScanState {
    plan: ForeignScanPlan,
    session: Option<ScanSession>,
}

impl ForeignScanState {
    pub fn begin(plan: ForeignScanPlan, flags: ScanFlags) -> Result<Self> {
        debug!(table = %plan.table.name, explain_only = flags.explain_only, "begin foreign scan");
        if flags.explain_only {
            return Ok(Self {
                plan,
                session: None,
            });
        }
        let client = WireClient::new(plan.table.server.params.clone());
        let options = SessionOptions {
            prefetch: plan.table.server.options.prefetch,
        };
        let mut session = ScanSession::new(client, plan.schema.clone(), options);
        session.begin(QueryRequest::new(plan.remote_sql.clone()))?;
        Ok(Self {
            plan,
            session: Some(session),
        })
    }

    pub fn plan(&self) -> &ForeignScanPlan {
        &self.plan
    }

    /// `None` for a scan begun for EXPLAIN only.
    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state())
    }

    pub fn stats(&self) -> Option<ScanStats> {
        self.session.as_ref().map(|s| s.stats())
    }

    pub fn iterate(&mut self) -> Result<Option<&Tuple>> {
        self.session_mut()?.advance()
    }

    pub fn rescan(&mut self) -> Result<()> {
        debug!(table = %self.plan.table.name, "rescan foreign scan");
        self.session_mut()?.restart()
    }

    /// Safe in every state, including after a failure.
    pub fn end(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.end();
        }
    }

    fn session_mut(&mut self) -> Result<&mut ScanSession> {
        self.session.as_mut().ok_or_else(|| {
            BridgeError::InvalidState("scan was begun for EXPLAIN only".to_string())
        })
    }
}
