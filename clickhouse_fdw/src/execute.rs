//! Ad-hoc queries outside of a foreign-table scan.

use crate::session::{ScanSession, ScanStats, SessionOptions};
use common::tuple::{Column, Schema, Tuple, Type};
use common::Result;
use tracing::debug;
use wire_client::{AbortHandle, QueryRequest, WireClient};

/// Rows of one ad-hoc query. The session ends when the iterator is exhausted,
/// fails, or is dropped.
pub struct QueryRows {
    session: ScanSession,
    done: bool,
}

impl QueryRows {
    pub fn schema(&self) -> &Schema {
        self.session.schema()
    }

    pub fn stats(&self) -> ScanStats {
        self.session.stats()
    }

    /// See [`ScanSession::abort_handle`].
    pub fn abort_handle(&self) -> Result<AbortHandle> {
        self.session.abort_handle()
    }
}

impl Iterator for QueryRows {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.advance() {
            Ok(Some(tuple)) => Some(Ok(tuple.clone())),
            Ok(None) => {
                self.done = true;
                self.session.end();
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Runs `sql` and streams its rows converted to `schema`.
pub fn ch_execute(client: &WireClient, sql: impl Into<String>, schema: Schema) -> Result<QueryRows> {
    ch_execute_request(client, QueryRequest::new(sql), schema, SessionOptions::default())
}

pub fn ch_execute_request(
    client: &WireClient,
    request: QueryRequest,
    schema: Schema,
    options: SessionOptions,
) -> Result<QueryRows> {
    let mut session = ScanSession::new(client.clone(), schema, options);
    session.begin(request)?;
    Ok(QueryRows {
        session,
        done: false,
    })
}

/// Runs `request` and types its rows from the result header, so the
/// statement reaches the server once.
pub fn ch_execute_inferred(
    client: &WireClient,
    request: QueryRequest,
    options: SessionOptions,
) -> Result<QueryRows> {
    let mut session = ScanSession::inferring(client.clone(), options);
    session.begin(request)?;
    debug!(columns = session.schema().len(), "result schema from header");
    Ok(QueryRows {
        session,
        done: false,
    })
}

/// Asks the server for the plan of `sql` with `EXPLAIN`. The statement itself
/// is not run.
pub fn explain(client: &WireClient, sql: &str) -> Result<Vec<String>> {
    let schema = Schema::new(vec![Column::not_null("explain", Type::Text)]);
    ch_execute(client, format!("EXPLAIN {}", sql), schema)?
        .map(|row| {
            row.map(|tuple| {
                tuple
                    .values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
        })
        .collect()
}
