//! A scripted in-process server for tests.
//!
//! Each accepted connection is served on its own thread. After the
//! handshake, every query is passed to the handler, which returns the
//! replies to play back in order.

use crate::block::Block;
use crate::protocol::{self, ClientPacket, Progress, RemoteException, ServerHello, Stage, CLIENT_REVISION};
use common::config::ConnectionParams;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// One step of a scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The result header; a Data packet with no rows.
    Header(Block),
    Data(Block),
    Progress(Progress),
    Exception { code: i32, name: String, message: String },
    EndOfStream,
    /// Drop the socket without a goodbye.
    Sever,
    /// Read client Data packets up to the empty terminator and record them.
    ReadInsert,
    Sleep(Duration),
}

impl Reply {
    pub fn exception(code: i32, message: impl Into<String>) -> Reply {
        Reply::Exception {
            code,
            name: "DB::Exception".to_string(),
            message: message.into(),
        }
    }
}

/// What the server has seen, shared with the handler.
#[derive(Debug, Default)]
pub struct MockState {
    queries: Mutex<Vec<String>>,
    stages: Mutex<Vec<Stage>>,
    inserted: Mutex<Vec<Block>>,
    external_tables: Mutex<Vec<(String, Block)>>,
    connections: AtomicUsize,
}

impl MockState {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Processing stage requested by each query, in arrival order.
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn inserted_blocks(&self) -> Vec<Block> {
        self.inserted.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn external_tables(&self) -> Vec<(String, Block)> {
        self.external_tables.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

type Handler = dyn Fn(&str, &MockState) -> Vec<Reply> + Send + Sync;

#[derive(Debug, Clone)]
pub struct MockServerBuilder {
    revision: u64,
    timezone: String,
    reject: Option<(i32, String)>,
}

impl MockServerBuilder {
    pub fn revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Answer every hello with an exception instead of a server hello.
    pub fn reject_hello(mut self, code: i32, message: impl Into<String>) -> Self {
        self.reject = Some((code, message.into()));
        self
    }

    pub fn start<F>(self, handler: F) -> MockServer
    where
        F: Fn(&str, &MockState) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let state = Arc::new(MockState::default());
        let stop = Arc::new(AtomicBool::new(false));
        let handler: Arc<Handler> = Arc::new(handler);

        let accept_state = state.clone();
        let accept_stop = stop.clone();
        let config = self.clone();
        let thread = thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                let handler = handler.clone();
                let config = config.clone();
                thread::spawn(move || {
                    if let Err(e) = serve(stream, &config, &state, handler.as_ref()) {
                        debug!(error = %e, "mock connection ended");
                    }
                });
            }
        });

        MockServer {
            addr,
            state,
            stop,
            thread: Some(thread),
        }
    }
}

/// A running scripted server; stops accepting when dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder {
            revision: CLIENT_REVISION,
            timezone: "UTC".to_string(),
            reject: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection parameters pointing at this server, with short timeouts.
    pub fn params(&self) -> ConnectionParams {
        let mut params = ConnectionParams {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            ..ConnectionParams::default()
        };
        params.timeouts.connect = Duration::from_secs(5);
        params.timeouts.receive = Duration::from_secs(5);
        params.timeouts.send = Duration::from_secs(5);
        params
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve(
    stream: TcpStream,
    config: &MockServerBuilder,
    state: &MockState,
    handler: &Handler,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream.try_clone()?);

    match protocol::read_client_packet(&mut reader, false)? {
        ClientPacket::Hello { .. } => {}
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected hello, got {:?}", other),
            ))
        }
    }
    if let Some((code, message)) = &config.reject {
        protocol::write_exception(&mut writer, &exception(*code, "DB::Exception", message))?;
        return writer.flush();
    }
    protocol::write_server_hello(
        &mut writer,
        &ServerHello {
            name: "ClickHouse".to_string(),
            version_major: 1,
            version_minor: 1,
            revision: config.revision,
            timezone: Some(config.timezone.clone()),
        },
    )?;
    writer.flush()?;

    let mut compressed = false;
    loop {
        let packet = match protocol::read_client_packet(&mut reader, compressed) {
            Ok(packet) => packet,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        match packet {
            ClientPacket::Ping => {
                protocol::write_pong(&mut writer)?;
                writer.flush()?;
            }
            ClientPacket::Cancel | ClientPacket::Hello { .. } => {}
            ClientPacket::Data { .. } => {}
            ClientPacket::Query {
                sql,
                stage,
                compression,
                ..
            } => {
                compressed = compression;
                push(&state.queries, sql.clone());
                push(&state.stages, stage);
                for (table, block) in read_data_until_empty(&mut reader, compressed)? {
                    push(&state.external_tables, (table, block));
                }
                for reply in handler(&sql, state) {
                    match reply {
                        Reply::Header(block) | Reply::Data(block) => {
                            protocol::write_server_data(&mut writer, &block, compressed)?
                        }
                        Reply::Progress(p) => protocol::write_progress(&mut writer, &p)?,
                        Reply::Exception {
                            code,
                            name,
                            message,
                        } => protocol::write_exception(&mut writer, &exception(code, &name, &message))?,
                        Reply::EndOfStream => protocol::write_end_of_stream(&mut writer)?,
                        Reply::Sever => {
                            writer.flush()?;
                            let _ = stream.shutdown(Shutdown::Both);
                            return Ok(());
                        }
                        Reply::ReadInsert => {
                            writer.flush()?;
                            for (_, block) in read_data_until_empty(&mut reader, compressed)? {
                                push(&state.inserted, block);
                            }
                        }
                        Reply::Sleep(duration) => {
                            writer.flush()?;
                            thread::sleep(duration);
                        }
                    }
                }
                writer.flush()?;
            }
        }
    }
}

fn read_data_until_empty<R: io::Read>(
    reader: &mut R,
    compressed: bool,
) -> io::Result<Vec<(String, Block)>> {
    let mut blocks = Vec::new();
    loop {
        match protocol::read_client_packet(reader, compressed)? {
            ClientPacket::Data { table, block } => {
                if block.columns.is_empty() && block.rows == 0 {
                    return Ok(blocks);
                }
                blocks.push((table, block));
            }
            ClientPacket::Cancel => return Ok(blocks),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected Data, got {:?}", other),
                ))
            }
        }
    }
}

fn exception(code: i32, name: &str, message: &str) -> RemoteException {
    RemoteException {
        code,
        name: name.to_string(),
        message: message.to_string(),
        stack_trace: String::new(),
        nested: None,
    }
}

fn push<T>(list: &Mutex<Vec<T>>, item: T) {
    if let Ok(mut guard) = list.lock() {
        guard.push(item);
    }
}
