//! Per-statement sessions binding a query to one connection.
//!
//! A [`ScanSession`] moves through
//! `Idle -> Opening -> Streaming -> Exhausted -> Closed`, with `Failed`
//! reachable from `Opening` and `Streaming`. It holds at most one result
//! block and converts rows into a single reused tuple buffer. Every error
//! closes the connection before it is returned.
//!
//! A [`ModifySession`] runs single-row inserts, updates and deletes serially
//! on one connection.

use crate::deparse::{self, RemoteTable};
use crate::materializer::{encode_row, schema_of, Materializer};
use crate::prefetch::Prefetcher;
use common::table::RowId;
use common::tuple::{Schema, Tuple, Value};
use common::{BridgeError, Result};
use tracing::{debug, info, warn};
use wire_client::{AbortHandle, Block, Connection, Progress, QueryHandle, QueryRequest, WireClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Exhausted,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Read the next block on a background thread.
    pub prefetch: bool,
}

/// Position of a scan within its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCursor {
    /// Number of non-empty blocks received so far.
    pub current_block: usize,
    pub block_rows: usize,
    pub current_row: usize,
}

/// Run-time counters reported by EXPLAIN ANALYZE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub blocks_fetched: u64,
    pub rows_returned: u64,
    pub scans: u64,
    /// Rows the remote reports having read, summed over scans.
    pub remote_rows_read: u64,
}

enum BlockSource {
    Direct { conn: Connection, handle: QueryHandle },
    Prefetch(Prefetcher),
}

impl BlockSource {
    fn next_block(&mut self) -> Result<Option<Block>> {
        match self {
            BlockSource::Direct { conn, handle } => conn.fetch_next_block(handle),
            BlockSource::Prefetch(prefetcher) => prefetcher.next_block(),
        }
    }

    fn progress(&self) -> Progress {
        match self {
            BlockSource::Direct { conn, .. } => conn.progress(),
            BlockSource::Prefetch(prefetcher) => prefetcher.progress(),
        }
    }

    fn abort_handle(&self) -> Result<AbortHandle> {
        match self {
            BlockSource::Direct { conn, .. } => conn.abort_handle(),
            BlockSource::Prefetch(prefetcher) => prefetcher.abort_handle(),
        }
    }

    fn close(&mut self) {
        match self {
            BlockSource::Direct { conn, .. } => conn.close(),
            BlockSource::Prefetch(prefetcher) => prefetcher.close(),
        }
    }
}

/// Streams the result of one query into host tuples.
pub struct ScanSession {
    client: WireClient,
    schema: Schema,
    /// Take the schema from each result header instead of `schema`.
    infer_schema: bool,
    options: SessionOptions,
    request: Option<QueryRequest>,
    state: SessionState,
    source: Option<BlockSource>,
    materializer: Option<Materializer>,
    block: Option<Block>,
    cursor: SessionCursor,
    tuple: Tuple,
    stats: ScanStats,
}

impl ScanSession {
    /// A session in `Idle`; nothing is opened until [`ScanSession::begin`].
    pub fn new(client: WireClient, schema: Schema, options: SessionOptions) -> Self {
        let tuple = Tuple::with_arity(schema.len());
        Self {
            client,
            schema,
            infer_schema: false,
            options,
            request: None,
            state: SessionState::Idle,
            source: None,
            materializer: None,
            block: None,
            cursor: SessionCursor::default(),
            tuple,
            stats: ScanStats::default(),
        }
    }

    /// A session whose row type is the canonical mapping of the result
    /// header, known once the query has been submitted.
    pub fn inferring(client: WireClient, options: SessionOptions) -> Self {
        let mut session = Self::new(client, Schema::default(), options);
        session.infer_schema = true;
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session currently owns a remote connection.
    pub fn has_connection(&self) -> bool {
        self.source.is_some()
    }

    /// A handle that shuts the open connection down from another thread.
    /// A blocked [`ScanSession::advance`] then fails with a stream error.
    pub fn abort_handle(&self) -> Result<AbortHandle> {
        match &self.source {
            Some(source) => source.abort_handle(),
            None => Err(BridgeError::InvalidState("scan has no open connection".to_string())),
        }
    }

    pub fn cursor(&self) -> SessionCursor {
        self.cursor
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The query this session runs, once begun.
    pub fn request(&self) -> Option<&QueryRequest> {
        self.request.as_ref()
    }

    /// Opens a connection and submits `request`. Valid only in `Idle`.
    pub fn begin(&mut self, request: QueryRequest) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(BridgeError::InvalidState(format!(
                "begin called in state {:?}",
                self.state
            )));
        }
        self.request = Some(request);
        self.open()
    }

    fn open(&mut self) -> Result<()> {
        self.state = SessionState::Opening;
        let request = match &self.request {
            Some(request) => request,
            None => return self.fail(BridgeError::InvalidState("no query to run".to_string())),
        };
        debug!(sql = %request.sql, "opening scan");

        let declared = &self.schema;
        let infer = self.infer_schema;
        let opened = self.client.open().and_then(|mut conn| {
            let handle = conn.submit(request)?;
            let inferred = infer.then(|| schema_of(handle.header()));
            let schema = inferred.as_ref().unwrap_or(declared);
            let materializer = Materializer::bind(handle.header(), schema)?;
            let source = if self.options.prefetch {
                BlockSource::Prefetch(Prefetcher::spawn(conn, handle)?)
            } else {
                BlockSource::Direct { conn, handle }
            };
            Ok((source, materializer, inferred))
        });
        match opened {
            Ok((source, materializer, inferred)) => {
                info!(address = %self.client.params().address(), "scan opened");
                if let Some(schema) = inferred {
                    self.tuple = Tuple::with_arity(schema.len());
                    self.schema = schema;
                }
                self.source = Some(source);
                self.materializer = Some(materializer);
                self.block = None;
                self.cursor = SessionCursor::default();
                self.stats.scans += 1;
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Returns the next row, or `None` once the result is exhausted.
    ///
    /// The returned tuple is overwritten by the next call.
    pub fn advance(&mut self) -> Result<Option<&Tuple>> {
        match self.state {
            SessionState::Streaming => {}
            SessionState::Exhausted => return Ok(None),
            other => {
                return Err(BridgeError::InvalidState(format!(
                    "advance called in state {:?}",
                    other
                )))
            }
        }

        while self.cursor.current_row >= self.cursor.block_rows {
            if !self.fetch_block()? {
                return Ok(None);
            }
        }

        let row = self.cursor.current_row;
        let converted = match (&self.materializer, &self.block) {
            (Some(materializer), Some(block)) => materializer.convert_row(block, row, &mut self.tuple),
            _ => Err(BridgeError::InvalidState("no block to read from".to_string())),
        };
        if let Err(e) = converted {
            return self.fail(e);
        }
        self.cursor.current_row += 1;
        self.stats.rows_returned += 1;
        Ok(Some(&self.tuple))
    }

    /// Replaces the held block with the next non-empty one. Returns false at
    /// the end of the stream.
    fn fetch_block(&mut self) -> Result<bool> {
        // Release the drained block before asking for the next one.
        self.block = None;
        let fetched = match self.source.as_mut() {
            Some(source) => source.next_block(),
            None => Err(BridgeError::InvalidState("scan has no open connection".to_string())),
        };
        match fetched {
            Ok(Some(block)) => {
                self.stats.blocks_fetched += 1;
                if block.rows == 0 {
                    return Ok(true);
                }
                let rebound = match &self.materializer {
                    Some(m) if m.matches(&block) => None,
                    _ => Some(Materializer::bind(&block, &self.schema)),
                };
                match rebound {
                    Some(Ok(m)) => self.materializer = Some(m),
                    Some(Err(e)) => return self.fail(e),
                    None => {}
                }
                self.cursor.current_block += 1;
                self.cursor.block_rows = block.rows;
                self.cursor.current_row = 0;
                self.block = Some(block);
                Ok(true)
            }
            Ok(None) => {
                if let Some(source) = &self.source {
                    self.stats.remote_rows_read += source.progress().rows;
                }
                self.cursor.block_rows = 0;
                self.cursor.current_row = 0;
                self.state = SessionState::Exhausted;
                debug!(rows = self.stats.rows_returned, "scan exhausted");
                Ok(false)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Re-runs the same query on a fresh connection from the first row.
    pub fn restart(&mut self) -> Result<()> {
        match self.state {
            SessionState::Streaming | SessionState::Exhausted => {}
            other => {
                return Err(BridgeError::InvalidState(format!(
                    "restart called in state {:?}",
                    other
                )))
            }
        }
        self.release();
        self.open()
    }

    /// Closes the connection if open. Safe in every state and repeatable.
    pub fn end(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.release();
        self.state = SessionState::Closed;
        debug!(
            blocks = self.stats.blocks_fetched,
            rows = self.stats.rows_returned,
            "scan ended"
        );
    }

    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            info!(address = %self.client.params().address(), "scan connection closed");
        }
        self.block = None;
        self.cursor = SessionCursor::default();
    }

    fn fail<T>(&mut self, error: BridgeError) -> Result<T> {
        warn!(category = error.category().as_str(), %error, "scan failed");
        self.release();
        self.state = SessionState::Failed;
        Err(error)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.end();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyState {
    Idle,
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifyStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Applies single-row changes to one remote table.
pub struct ModifySession {
    client: WireClient,
    table: RemoteTable,
    schema: Schema,
    key_columns: Vec<String>,
    state: ModifyState,
    conn: Option<Connection>,
    stats: ModifyStats,
}

impl ModifySession {
    /// `schema` is the full foreign-table schema; rows passed to the
    /// operations carry one value per column of it.
    pub fn new(client: WireClient, table: RemoteTable, schema: Schema, key_columns: Vec<String>) -> Self {
        Self {
            client,
            table,
            schema,
            key_columns,
            state: ModifyState::Idle,
            conn: None,
            stats: ModifyStats::default(),
        }
    }

    pub fn state(&self) -> ModifyState {
        self.state
    }

    pub fn stats(&self) -> ModifyStats {
        self.stats
    }

    pub fn table(&self) -> &RemoteTable {
        &self.table
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != ModifyState::Idle {
            return Err(BridgeError::InvalidState(format!(
                "begin called in state {:?}",
                self.state
            )));
        }
        match self.client.open() {
            Ok(conn) => {
                info!(address = %self.client.params().address(), table = %self.table.qualified(), "modify opened");
                self.conn = Some(conn);
                self.state = ModifyState::Open;
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Inserts one row and returns it as stored.
    pub fn insert(&mut self, tuple: &Tuple) -> Result<Tuple> {
        let columns: Vec<String> = self.schema.columns.iter().map(|c| c.name.clone()).collect();
        let sql = deparse::insert(&self.table, &columns);
        self.with_conn(|conn, schema| {
            let handle = conn.submit(&QueryRequest::new(sql))?;
            let block = encode_row(handle.header(), schema, tuple)?;
            conn.send_data(&handle, &block)?;
            conn.finish_insert(&handle)
        })?;
        self.stats.inserted += 1;
        Ok(tuple.clone())
    }

    /// Updates the row identified by `row_id` to `tuple`.
    ///
    /// Returns the new row, or `None` when no remote row matches. Key columns
    /// are never rewritten.
    pub fn update(&mut self, row_id: &RowId, tuple: &Tuple) -> Result<Option<Tuple>> {
        let Some(mut current) = self.fetch_row(row_id)? else {
            return Ok(None);
        };
        let assignments: Vec<(String, Value)> = self
            .schema
            .columns
            .iter()
            .zip(&tuple.values)
            .filter(|(c, _)| !self.key_columns.contains(&c.name))
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect();
        if !assignments.is_empty() {
            let sql = deparse::update(&self.table, &assignments, row_id);
            self.run(sql)?;
        }
        for (i, (column, value)) in self.schema.columns.iter().zip(&tuple.values).enumerate() {
            if !self.key_columns.contains(&column.name) {
                current.values[i] = value.clone();
            }
        }
        self.stats.updated += 1;
        Ok(Some(current))
    }

    /// Deletes the row identified by `row_id` and returns it, or `None` when
    /// no remote row matches.
    pub fn delete(&mut self, row_id: &RowId) -> Result<Option<Tuple>> {
        let Some(current) = self.fetch_row(row_id)? else {
            return Ok(None);
        };
        let sql = deparse::delete(&self.table, row_id);
        self.run(sql)?;
        self.stats.deleted += 1;
        Ok(Some(current))
    }

    /// Closes the connection. Safe in every state and repeatable.
    pub fn end(&mut self) {
        if self.state == ModifyState::Closed {
            return;
        }
        if let Some(mut conn) = self.conn.take() {
            conn.close();
            info!(table = %self.table.qualified(), "modify connection closed");
        }
        self.state = ModifyState::Closed;
    }

    /// Reads the current remote version of the row identified by `row_id`.
    fn fetch_row(&mut self, row_id: &RowId) -> Result<Option<Tuple>> {
        let columns: Vec<String> = self.schema.columns.iter().map(|c| c.name.clone()).collect();
        let sql = deparse::select(
            &columns,
            &self.table,
            &[deparse::row_id_condition(row_id)],
            Some(1),
        );
        self.with_conn(|conn, schema| {
            let handle = conn.submit(&QueryRequest::new(sql))?;
            let materializer = Materializer::bind(handle.header(), schema)?;
            let mut found = None;
            while let Some(block) = conn.fetch_next_block(&handle)? {
                if found.is_none() && block.rows > 0 {
                    let materializer = if materializer.matches(&block) {
                        materializer.clone()
                    } else {
                        Materializer::bind(&block, schema)?
                    };
                    let mut tuple = Tuple::with_arity(schema.len());
                    materializer.convert_row(&block, 0, &mut tuple)?;
                    found = Some(tuple);
                }
            }
            Ok(found)
        })
    }

    /// Runs a statement that returns no rows.
    fn run(&mut self, sql: String) -> Result<()> {
        debug!(%sql, "running mutation");
        self.with_conn(|conn, _| {
            let handle = conn.submit(&QueryRequest::new(sql))?;
            while conn.fetch_next_block(&handle)?.is_some() {}
            Ok(())
        })
    }

    fn with_conn<T>(
        &mut self,
        op: impl FnOnce(&mut Connection, &Schema) -> Result<T>,
    ) -> Result<T> {
        if self.state != ModifyState::Open {
            return Err(BridgeError::InvalidState(format!(
                "modify operation in state {:?}",
                self.state
            )));
        }
        let result = match self.conn.as_mut() {
            Some(conn) => op(conn, &self.schema),
            None => Err(BridgeError::InvalidState("no open connection".to_string())),
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.fail(e),
        }
    }

    fn fail<T>(&mut self, error: BridgeError) -> Result<T> {
        warn!(category = error.category().as_str(), %error, "modify failed");
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.state = ModifyState::Failed;
        Err(error)
    }
}

impl Drop for ModifySession {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tuple::{Column, Type};
    use common::ErrorCategory;
    use wire_client::mock::{MockServer, Reply};
    use wire_client::{BlockColumn, ColumnValues, WireType};

    fn ab_block(a: Vec<i32>, b: Vec<&str>) -> Block {
        Block::new(vec![
            BlockColumn::new("a", WireType::Int32, ColumnValues::Int32(a)),
            BlockColumn::new(
                "b",
                WireType::String,
                ColumnValues::Bytes(b.into_iter().map(|s| s.as_bytes().to_vec()).collect()),
            ),
        ])
        .unwrap()
    }

    fn ab_schema() -> Schema {
        Schema::new(vec![Column::new("a", Type::Integer), Column::new("b", Type::Text)])
    }

    #[test]
    fn test_cursor_walks_blocks_and_skips_empty_ones() {
        let server = MockServer::builder().start(|_, _| {
            vec![
                Reply::Header(ab_block(vec![], vec![]).header()),
                Reply::Data(ab_block(vec![1, 2], vec!["x", "y"])),
                Reply::Data(ab_block(vec![], vec![])),
                Reply::Data(ab_block(vec![3], vec!["z"])),
                Reply::EndOfStream,
            ]
        });
        let mut session =
            ScanSession::new(WireClient::new(server.params()), ab_schema(), SessionOptions::default());
        assert_eq!(session.state(), SessionState::Idle);
        session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.cursor(), SessionCursor::default());

        let mut seen = Vec::new();
        while let Some(tuple) = session.advance().unwrap() {
            seen.push(tuple.values[0].clone());
        }
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert_eq!(session.state(), SessionState::Exhausted);
        assert_eq!(session.stats().blocks_fetched, 3);
        assert_eq!(session.stats().rows_returned, 3);
        assert!(session.advance().unwrap().is_none());
    }

    #[test]
    fn test_begin_failure_moves_to_failed() {
        let server = MockServer::builder()
            .start(|_, _| vec![Reply::exception(60, "Table default.t doesn't exist")]);
        let mut session =
            ScanSession::new(WireClient::new(server.params()), ab_schema(), SessionOptions::default());
        let err = session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::RemoteExecution);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(
            session.advance().unwrap_err().category(),
            ErrorCategory::InvalidState
        );
        session.end();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_header_type_mismatch_fails_begin() {
        let server = MockServer::builder()
            .start(|_, _| vec![Reply::Header(ab_block(vec![], vec![]).header()), Reply::EndOfStream]);
        let schema = Schema::new(vec![Column::new("a", Type::SmallInt), Column::new("b", Type::Text)]);
        let mut session =
            ScanSession::new(WireClient::new(server.params()), schema, SessionOptions::default());
        let err = session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeMismatch);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_restart_opens_fresh_connection() {
        let server = MockServer::builder().start(|_, _| {
            vec![
                Reply::Header(ab_block(vec![], vec![]).header()),
                Reply::Data(ab_block(vec![1], vec!["x"])),
                Reply::EndOfStream,
            ]
        });
        let mut session =
            ScanSession::new(WireClient::new(server.params()), ab_schema(), SessionOptions::default());
        assert!(session.restart().is_err());
        session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
        assert!(session.advance().unwrap().is_some());
        session.restart().unwrap();
        assert_eq!(session.cursor(), SessionCursor::default());
        assert_eq!(session.advance().unwrap().unwrap().values[0], Value::Integer(1));
        assert!(session.advance().unwrap().is_none());
        session.end();

        assert_eq!(server.state().connection_count(), 2);
        assert_eq!(session.stats().scans, 2);
    }

    #[test]
    fn test_prefetch_delivers_same_rows() {
        let server = MockServer::builder().start(|_, _| {
            let mut replies = vec![Reply::Header(ab_block(vec![], vec![]).header())];
            for i in 0..5 {
                replies.push(Reply::Data(ab_block(vec![i * 2, i * 2 + 1], vec!["p", "q"])));
            }
            replies.push(Reply::EndOfStream);
            replies
        });
        let mut session = ScanSession::new(
            WireClient::new(server.params()),
            ab_schema(),
            SessionOptions { prefetch: true },
        );
        session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
        let mut seen = Vec::new();
        while let Some(tuple) = session.advance().unwrap() {
            seen.push(tuple.values[0].as_i64().unwrap());
        }
        assert_eq!(seen, (0..10).collect::<Vec<i64>>());
        session.end();
    }

    #[test]
    fn test_prefetch_end_before_exhaustion() {
        let server = MockServer::builder().start(|_, _| {
            let mut replies = vec![Reply::Header(ab_block(vec![], vec![]).header())];
            for i in 0..50 {
                replies.push(Reply::Data(ab_block(vec![i], vec!["r"])));
            }
            replies.push(Reply::EndOfStream);
            replies
        });
        let mut session = ScanSession::new(
            WireClient::new(server.params()),
            ab_schema(),
            SessionOptions { prefetch: true },
        );
        session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
        assert!(session.advance().unwrap().is_some());
        session.end();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_abort_ends_prefetched_wait() {
        let server = MockServer::builder().start(|_, _| {
            vec![
                Reply::Header(ab_block(vec![], vec![]).header()),
                Reply::Sleep(std::time::Duration::from_secs(3)),
                Reply::Data(ab_block(vec![1], vec!["x"])),
                Reply::EndOfStream,
            ]
        });
        let mut session = ScanSession::new(
            WireClient::new(server.params()),
            ab_schema(),
            SessionOptions { prefetch: true },
        );
        assert!(session.abort_handle().is_err());
        session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
        session.abort_handle().unwrap().abort();

        let err = session.advance().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Stream);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.has_connection());
    }

    #[test]
    fn test_modify_update_missing_row_returns_none() {
        let server = MockServer::builder().start(|sql, _| {
            if sql.starts_with("SELECT") {
                vec![Reply::Header(ab_block(vec![], vec![]).header()), Reply::EndOfStream]
            } else {
                vec![Reply::EndOfStream]
            }
        });
        let mut session = ModifySession::new(
            WireClient::new(server.params()),
            RemoteTable::new(None, "t"),
            ab_schema(),
            vec!["a".to_string()],
        );
        session.begin().unwrap();
        let row_id = RowId::new(vec![("a".to_string(), Value::Integer(9))]);
        let result = session
            .update(&row_id, &Tuple::new(vec![Value::Integer(9), Value::Varchar("n".into())]))
            .unwrap();
        assert!(result.is_none());
        assert!(session.delete(&row_id).unwrap().is_none());
        assert_eq!(session.stats(), ModifyStats::default());
        assert!(server
            .state()
            .queries()
            .iter()
            .all(|q| q.starts_with("SELECT")));
        session.end();
        session.end();
    }

    #[test]
    fn test_modify_update_and_delete_existing_row() {
        let server = MockServer::builder().start(|sql, _| {
            if sql.starts_with("SELECT") {
                let row = ab_block(vec![9], vec!["old"]);
                vec![Reply::Header(row.header()), Reply::Data(row), Reply::EndOfStream]
            } else {
                vec![Reply::EndOfStream]
            }
        });
        let mut session = ModifySession::new(
            WireClient::new(server.params()),
            RemoteTable::new(Some("db".to_string()), "t"),
            ab_schema(),
            vec!["a".to_string()],
        );
        session.begin().unwrap();
        let row_id = RowId::new(vec![("a".to_string(), Value::Integer(9))]);

        let updated = session
            .update(&row_id, &Tuple::new(vec![Value::Integer(9), Value::Varchar("new".into())]))
            .unwrap()
            .unwrap();
        assert_eq!(updated.values[1], Value::Varchar("new".to_string()));

        let deleted = session.delete(&row_id).unwrap().unwrap();
        assert_eq!(deleted.values[1], Value::Varchar("old".to_string()));

        let queries = server.state().queries();
        assert!(queries.contains(&"ALTER TABLE `db`.`t` UPDATE `b` = 'new' WHERE `a` = 9".to_string()));
        assert!(queries.contains(&"ALTER TABLE `db`.`t` DELETE WHERE `a` = 9".to_string()));
        assert_eq!(session.stats().updated, 1);
        assert_eq!(session.stats().deleted, 1);
    }
}
