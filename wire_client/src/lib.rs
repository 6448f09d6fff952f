//! A blocking client for the remote engine's native TCP protocol.
//!
//! [`WireClient`] opens [`Connection`]s. A connection runs one query at a
//! time: [`Connection::submit`] sends it and waits for the result header,
//! then [`Connection::fetch_next_block`] pulls data blocks until the stream
//! ends. Any transport failure closes the connection; a closed connection is
//! never reused.

pub mod block;
pub mod codec;
pub mod compression;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod protocol;

pub use block::{Block, BlockColumn, Cell, ColumnValues, WireType};
pub use protocol::{Progress, ProfileInfo, RemoteException, ServerHello, Stage};

use common::config::ConnectionParams;
use common::{BridgeError, Result};
use protocol::{ClientInfo, ServerPacket, CLIENT_REVISION, MIN_SERVER_REVISION};
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Opens connections with one fixed set of parameters.
#[derive(Debug, Clone)]
pub struct WireClient {
    params: ConnectionParams,
}

impl WireClient {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Connects, performs the handshake, and returns a ready connection.
    ///
    /// Resolution, connect, handshake failures and a rejected login are all
    /// reported as [`BridgeError::Connection`]; a server too old to speak our
    /// revision is a [`BridgeError::Protocol`].
    pub fn open(&self) -> Result<Connection> {
        let params = &self.params;
        let address = params.address();
        let addrs: Vec<SocketAddr> = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(|e| BridgeError::Connection(format!("cannot resolve {}: {}", address, e)))?
            .collect();

        let mut last_error = None;
        let mut stream = None;
        for addr in &addrs {
            let attempt = match non_zero(params.timeouts.connect) {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let stream = stream.ok_or_else(|| {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string());
            BridgeError::Connection(format!("cannot connect to {}: {}", address, reason))
        })?;

        let setup = |e: io::Error| BridgeError::Connection(format!("{}: {}", address, e));
        stream.set_nodelay(true).map_err(setup)?;
        stream
            .set_read_timeout(non_zero(params.timeouts.connect))
            .map_err(setup)?;
        stream
            .set_write_timeout(non_zero(params.timeouts.send))
            .map_err(setup)?;

        let mut reader = BufReader::new(stream.try_clone().map_err(setup)?);
        let mut writer = BufWriter::new(stream.try_clone().map_err(setup)?);

        let handshake = |e: io::Error| {
            BridgeError::Connection(format!("handshake with {} failed: {}", address, e))
        };
        protocol::write_hello(
            &mut writer,
            &params.client_name,
            &params.database,
            &params.user,
            &params.password,
        )
        .map_err(handshake)?;
        writer.flush().map_err(handshake)?;

        let server = match protocol::read_server_packet(&mut reader, false).map_err(handshake)? {
            ServerPacket::Hello(hello) => hello,
            ServerPacket::Exception(e) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(BridgeError::Connection(format!(
                    "{} rejected the login: {}",
                    address, e.message
                )));
            }
            other => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(BridgeError::Protocol(format!(
                    "expected server hello, got {:?}",
                    packet_kind(&other)
                )));
            }
        };
        if server.revision < MIN_SERVER_REVISION {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(BridgeError::Protocol(format!(
                "server revision {} is older than the minimum supported {}",
                server.revision, MIN_SERVER_REVISION
            )));
        }

        stream
            .set_read_timeout(non_zero(params.timeouts.receive))
            .map_err(setup)?;

        let revision = server.revision.min(CLIENT_REVISION);
        debug!(
            %address,
            server = %server.name,
            server_revision = server.revision,
            revision,
            "connected"
        );

        Ok(Connection {
            stream,
            reader,
            writer,
            server,
            revision,
            compression: params.compression,
            info: ClientInfo {
                user: params.user.clone(),
                os_user: std::env::var("USER").unwrap_or_default(),
                hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
                client_name: params.client_name.clone(),
            },
            query: QueryState::Idle,
            next_seq: 0,
            progress: Progress::default(),
            profile: None,
            closed: false,
        })
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

fn packet_kind(packet: &ServerPacket) -> &'static str {
    match packet {
        ServerPacket::Hello(_) => "Hello",
        ServerPacket::Data(_) => "Data",
        ServerPacket::Exception(_) => "Exception",
        ServerPacket::Progress(_) => "Progress",
        ServerPacket::Pong => "Pong",
        ServerPacket::EndOfStream => "EndOfStream",
        ServerPacket::ProfileInfo(_) => "ProfileInfo",
        ServerPacket::Totals(_) => "Totals",
        ServerPacket::Extremes(_) => "Extremes",
        ServerPacket::Log(_) => "Log",
        ServerPacket::TableColumns { .. } => "TableColumns",
    }
}

/// A query to run remotely. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub stage: Stage,
    pub query_id: String,
    /// Temporary tables shipped with the query, by name.
    pub external_tables: Vec<(String, Block)>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            stage: Stage::Complete,
            query_id: String::new(),
            external_tables: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// An empty id lets the server assign one.
    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn with_external_table(mut self, name: impl Into<String>, block: Block) -> Self {
        self.external_tables.push((name.into(), block));
        self
    }
}

/// Identifies a submitted query and carries its result header.
#[derive(Debug)]
pub struct QueryHandle {
    seq: u64,
    query_id: String,
    header: Block,
}

impl QueryHandle {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Column names and types of the result, with no rows.
    pub fn header(&self) -> &Block {
        &self.header
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Idle,
    Running(u64),
    Finished(u64),
}

/// Shuts a connection's socket down from another thread.
///
/// A blocked `fetch_next_block` on the owning connection then fails with
/// [`BridgeError::Stream`].
#[derive(Debug)]
pub struct AbortHandle {
    stream: TcpStream,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub fn try_clone(&self) -> Result<AbortHandle> {
        let stream = self
            .stream
            .try_clone()
            .map_err(|e| BridgeError::Connection(e.to_string()))?;
        Ok(AbortHandle { stream })
    }
}

/// One open session with the remote engine.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    server: ServerHello,
    revision: u64,
    compression: bool,
    info: ClientInfo,
    query: QueryState,
    next_seq: u64,
    progress: Progress,
    profile: Option<ProfileInfo>,
    closed: bool,
}

impl Connection {
    pub fn server(&self) -> &ServerHello {
        &self.server
    }

    /// Negotiated protocol revision, the lower of client and server.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Progress reported by the server for the current or last query.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn profile_info(&self) -> Option<ProfileInfo> {
        self.profile
    }

    pub fn abort_handle(&self) -> Result<AbortHandle> {
        let stream = self
            .stream
            .try_clone()
            .map_err(|e| BridgeError::Connection(e.to_string()))?;
        Ok(AbortHandle { stream })
    }

    /// Sends a query and waits for its result header.
    ///
    /// A query that finishes without producing a header (DDL, `ALTER ... UPDATE`)
    /// returns a handle with an empty header whose stream is already exhausted.
    pub fn submit(&mut self, request: &QueryRequest) -> Result<QueryHandle> {
        self.ensure_open()?;
        if let QueryState::Running(_) = self.query {
            return Err(BridgeError::Protocol(
                "another query is still in flight on this connection".to_string(),
            ));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.progress = Progress::default();
        self.profile = None;
        debug!(seq, sql = %request.sql, "submitting query");

        if let Err(e) = self.write_query(request) {
            self.close();
            return Err(BridgeError::Connection(format!("sending query failed: {}", e)));
        }
        self.query = QueryState::Running(seq);

        loop {
            match self.read_packet()? {
                ServerPacket::Data(header) => {
                    return Ok(QueryHandle {
                        seq,
                        query_id: request.query_id.clone(),
                        header,
                    })
                }
                ServerPacket::EndOfStream => {
                    self.query = QueryState::Finished(seq);
                    return Ok(QueryHandle {
                        seq,
                        query_id: request.query_id.clone(),
                        header: Block::empty(),
                    });
                }
                packet => self.absorb(packet)?,
            }
        }
    }

    fn write_query(&mut self, request: &QueryRequest) -> io::Result<()> {
        protocol::write_query(
            &mut self.writer,
            &request.query_id,
            &self.info,
            request.stage,
            self.compression,
            &request.sql,
        )?;
        for (name, block) in &request.external_tables {
            protocol::write_client_data(&mut self.writer, name, block, self.compression)?;
        }
        protocol::write_client_data(&mut self.writer, "", &Block::empty(), self.compression)?;
        self.writer.flush()
    }

    /// Returns the next data block, or `None` once the stream has ended.
    ///
    /// Blocks may have zero rows; callers skip them.
    pub fn fetch_next_block(&mut self, handle: &QueryHandle) -> Result<Option<Block>> {
        match self.query {
            QueryState::Finished(seq) if seq == handle.seq => return Ok(None),
            QueryState::Running(seq) if seq == handle.seq => {}
            _ => {
                return Err(BridgeError::InvalidState(
                    "query handle does not belong to the running query".to_string(),
                ))
            }
        }
        self.ensure_open()?;
        loop {
            match self.read_packet()? {
                ServerPacket::Data(block) => {
                    trace!(rows = block.rows, "data block");
                    return Ok(Some(block));
                }
                ServerPacket::EndOfStream => {
                    self.query = QueryState::Finished(handle.seq);
                    debug!(rows = self.progress.rows, "query finished");
                    return Ok(None);
                }
                packet => self.absorb(packet)?,
            }
        }
    }

    /// Sends one block of rows for a running `INSERT`.
    pub fn send_data(&mut self, handle: &QueryHandle, block: &Block) -> Result<()> {
        self.ensure_running(handle)?;
        let compression = self.compression;
        let sent = protocol::write_client_data(&mut self.writer, "", block, compression)
            .and_then(|_| self.writer.flush());
        if let Err(e) = sent {
            self.close();
            return Err(BridgeError::Stream(format!("sending data failed: {}", e)));
        }
        Ok(())
    }

    /// Ends an `INSERT` and waits for the server to acknowledge it.
    pub fn finish_insert(&mut self, handle: &QueryHandle) -> Result<()> {
        self.send_data(handle, &Block::empty())?;
        while self.fetch_next_block(handle)?.is_some() {}
        Ok(())
    }

    pub fn ping(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let QueryState::Running(_) = self.query {
            return Err(BridgeError::InvalidState("cannot ping while a query is running".to_string()));
        }
        let sent = protocol::write_ping(&mut self.writer).and_then(|_| self.writer.flush());
        if let Err(e) = sent {
            self.close();
            return Err(BridgeError::Connection(format!("ping failed: {}", e)));
        }
        loop {
            match self.read_packet()? {
                ServerPacket::Pong => return Ok(()),
                ServerPacket::Progress(_) => {}
                other => {
                    self.close();
                    return Err(BridgeError::Protocol(format!(
                        "expected Pong, got {}",
                        packet_kind(&other)
                    )));
                }
            }
        }
    }

    /// Closes the connection, cancelling any running query. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let QueryState::Running(_) = self.query {
            let _ = protocol::write_cancel(&mut self.writer).and_then(|_| self.writer.flush());
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        self.closed = true;
        self.query = QueryState::Idle;
        debug!(server = %self.server.name, "connection closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BridgeError::InvalidState("connection is closed".to_string()));
        }
        Ok(())
    }

    fn ensure_running(&self, handle: &QueryHandle) -> Result<()> {
        self.ensure_open()?;
        match self.query {
            QueryState::Running(seq) if seq == handle.seq => Ok(()),
            _ => Err(BridgeError::InvalidState(
                "query handle does not belong to the running query".to_string(),
            )),
        }
    }

    /// Reads one packet, closing the connection on any failure. A server
    /// exception ends the query and is returned as an error.
    fn read_packet(&mut self) -> Result<ServerPacket> {
        match protocol::read_server_packet(&mut self.reader, self.compression) {
            Ok(ServerPacket::Exception(e)) => {
                warn!(code = e.code, name = %e.name, message = %e.message, "remote exception");
                self.query = QueryState::Idle;
                Err(BridgeError::RemoteExecution {
                    code: e.code,
                    name: e.name,
                    message: e.message,
                })
            }
            Ok(packet) => Ok(packet),
            Err(e) => {
                self.close();
                Err(map_read_error(e))
            }
        }
    }

    /// Handles packets that carry no rows.
    fn absorb(&mut self, packet: ServerPacket) -> Result<()> {
        match packet {
            ServerPacket::Progress(p) => self.progress.accumulate(&p),
            ServerPacket::ProfileInfo(info) => self.profile = Some(info),
            ServerPacket::Totals(_) | ServerPacket::Extremes(_) | ServerPacket::Log(_) => {
                trace!(kind = packet_kind(&packet), "ignored side block");
            }
            ServerPacket::TableColumns { table, .. } => trace!(%table, "table columns"),
            other => {
                self.close();
                return Err(BridgeError::Protocol(format!(
                    "unexpected {} packet during query",
                    packet_kind(&other)
                )));
            }
        }
        Ok(())
    }
}

fn map_read_error(e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::InvalidData => BridgeError::Protocol(e.to_string()),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            BridgeError::Stream(format!("timed out waiting for the server: {}", e))
        }
        io::ErrorKind::UnexpectedEof => {
            BridgeError::Stream("server closed the connection mid-stream".to_string())
        }
        _ => BridgeError::Stream(e.to_string()),
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
