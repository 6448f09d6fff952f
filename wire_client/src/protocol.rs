//! Packet layouts of the native protocol, both directions.
//!
//! The client side is used by [`crate::Connection`]; the server side exists
//! for the scripted test server and is kept next to it so the two stay in
//! step.

use crate::block::Block;
use crate::codec::*;
use crate::compression;
use std::io::{self, Cursor, Read, Write};

/// Revision this client speaks. Servers below it are refused.
pub const CLIENT_REVISION: u64 = 54058;
pub const MIN_SERVER_REVISION: u64 = 54058;
pub const CLIENT_VERSION_MAJOR: u64 = 1;
pub const CLIENT_VERSION_MINOR: u64 = 1;

pub mod client {
    pub const HELLO: u64 = 0;
    pub const QUERY: u64 = 1;
    pub const DATA: u64 = 2;
    pub const CANCEL: u64 = 3;
    pub const PING: u64 = 4;
}

pub mod server {
    pub const HELLO: u64 = 0;
    pub const DATA: u64 = 1;
    pub const EXCEPTION: u64 = 2;
    pub const PROGRESS: u64 = 3;
    pub const PONG: u64 = 4;
    pub const END_OF_STREAM: u64 = 5;
    pub const PROFILE_INFO: u64 = 6;
    pub const TOTALS: u64 = 7;
    pub const EXTREMES: u64 = 8;
    pub const LOG: u64 = 10;
    pub const TABLE_COLUMNS: u64 = 11;
}

/// How far the remote engine should take the query before streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    FetchColumns = 0,
    WithMergeableState = 1,
    #[default]
    Complete = 2,
}

impl Stage {
    fn from_u64(value: u64) -> io::Result<Stage> {
        match value {
            0 => Ok(Stage::FetchColumns),
            1 => Ok(Stage::WithMergeableState),
            2 => Ok(Stage::Complete),
            other => Err(invalid(format!("unknown query stage {}", other))),
        }
    }
}

/// Identity announced by the server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub revision: u64,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteException {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Option<Box<RemoteException>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
}

impl Progress {
    pub fn accumulate(&mut self, other: &Progress) {
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.total_rows += other.total_rows;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Hello(ServerHello),
    Data(Block),
    Exception(RemoteException),
    Progress(Progress),
    Pong,
    EndOfStream,
    ProfileInfo(ProfileInfo),
    Totals(Block),
    Extremes(Block),
    Log(Block),
    TableColumns { table: String, description: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Hello {
        client_name: String,
        revision: u64,
        database: String,
        user: String,
        password: String,
    },
    Query {
        query_id: String,
        stage: Stage,
        compression: bool,
        sql: String,
    },
    Data {
        table: String,
        block: Block,
    },
    Cancel,
    Ping,
}

/// Fields of the Query packet's client-info section that vary per process.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user: String,
    pub os_user: String,
    pub hostname: String,
    pub client_name: String,
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn write_block<W: Write>(w: &mut W, block: &Block, compressed: bool) -> io::Result<()> {
    if compressed {
        let mut raw = Vec::new();
        block.write(&mut raw)?;
        compression::write_frame(w, &raw)
    } else {
        block.write(w)
    }
}

fn read_block<R: Read>(r: &mut R, compressed: bool) -> io::Result<Block> {
    if compressed {
        let raw = compression::read_frame(r)?;
        let mut cursor = Cursor::new(raw);
        let block = Block::read(&mut cursor)?;
        if cursor.position() as usize != cursor.get_ref().len() {
            return Err(invalid("trailing bytes after compressed block".to_string()));
        }
        Ok(block)
    } else {
        Block::read(r)
    }
}

// Client side.

pub fn write_hello<W: Write>(
    w: &mut W,
    client_name: &str,
    database: &str,
    user: &str,
    password: &str,
) -> io::Result<()> {
    write_varint(w, client::HELLO)?;
    write_string(w, client_name)?;
    write_varint(w, CLIENT_VERSION_MAJOR)?;
    write_varint(w, CLIENT_VERSION_MINOR)?;
    write_varint(w, CLIENT_REVISION)?;
    write_string(w, database)?;
    write_string(w, user)?;
    write_string(w, password)
}

pub fn write_query<W: Write>(
    w: &mut W,
    query_id: &str,
    info: &ClientInfo,
    stage: Stage,
    compression: bool,
    sql: &str,
) -> io::Result<()> {
    write_varint(w, client::QUERY)?;
    write_string(w, query_id)?;

    // Client info: initial query, TCP interface.
    w.write_all(&[1])?;
    write_string(w, &info.user)?;
    write_string(w, query_id)?;
    write_string(w, "0.0.0.0:0")?;
    w.write_all(&[1])?;
    write_string(w, &info.os_user)?;
    write_string(w, &info.hostname)?;
    write_string(w, &info.client_name)?;
    write_varint(w, CLIENT_VERSION_MAJOR)?;
    write_varint(w, CLIENT_VERSION_MINOR)?;
    write_varint(w, CLIENT_REVISION)?;

    // No settings; an empty name ends the list.
    write_string(w, "")?;

    write_varint(w, stage as u64)?;
    write_varint(w, compression as u64)?;
    write_string(w, sql)
}

pub fn write_client_data<W: Write>(
    w: &mut W,
    table: &str,
    block: &Block,
    compressed: bool,
) -> io::Result<()> {
    write_varint(w, client::DATA)?;
    write_string(w, table)?;
    write_block(w, block, compressed)
}

pub fn write_cancel<W: Write>(w: &mut W) -> io::Result<()> {
    write_varint(w, client::CANCEL)
}

pub fn write_ping<W: Write>(w: &mut W) -> io::Result<()> {
    write_varint(w, client::PING)
}

fn read_exception<R: Read>(r: &mut R) -> io::Result<RemoteException> {
    let code = read_i32(r)?;
    let name = read_string(r)?;
    let message = read_string(r)?;
    let stack_trace = read_string(r)?;
    let nested = if read_u8(r)? != 0 {
        Some(Box::new(read_exception(r)?))
    } else {
        None
    };
    Ok(RemoteException {
        code,
        name,
        message,
        stack_trace,
        nested,
    })
}

pub fn read_server_packet<R: Read>(r: &mut R, compressed: bool) -> io::Result<ServerPacket> {
    let packet = match read_varint(r)? {
        server::HELLO => {
            let name = read_string(r)?;
            let version_major = read_varint(r)?;
            let version_minor = read_varint(r)?;
            let revision = read_varint(r)?;
            let timezone = if revision >= CLIENT_REVISION {
                Some(read_string(r)?)
            } else {
                None
            };
            ServerPacket::Hello(ServerHello {
                name,
                version_major,
                version_minor,
                revision,
                timezone,
            })
        }
        server::DATA => {
            let _table = read_string(r)?;
            ServerPacket::Data(read_block(r, compressed)?)
        }
        server::EXCEPTION => ServerPacket::Exception(read_exception(r)?),
        server::PROGRESS => ServerPacket::Progress(Progress {
            rows: read_varint(r)?,
            bytes: read_varint(r)?,
            total_rows: read_varint(r)?,
        }),
        server::PONG => ServerPacket::Pong,
        server::END_OF_STREAM => ServerPacket::EndOfStream,
        server::PROFILE_INFO => ServerPacket::ProfileInfo(ProfileInfo {
            rows: read_varint(r)?,
            blocks: read_varint(r)?,
            bytes: read_varint(r)?,
            applied_limit: read_u8(r)? != 0,
            rows_before_limit: read_varint(r)?,
            calculated_rows_before_limit: read_u8(r)? != 0,
        }),
        server::TOTALS => {
            let _table = read_string(r)?;
            ServerPacket::Totals(read_block(r, compressed)?)
        }
        server::EXTREMES => {
            let _table = read_string(r)?;
            ServerPacket::Extremes(read_block(r, compressed)?)
        }
        // Log blocks are never compressed.
        server::LOG => {
            let _table = read_string(r)?;
            ServerPacket::Log(Block::read(r)?)
        }
        server::TABLE_COLUMNS => ServerPacket::TableColumns {
            table: read_string(r)?,
            description: read_string(r)?,
        },
        other => return Err(invalid(format!("unknown server packet type {}", other))),
    };
    Ok(packet)
}

// Server side.

pub fn read_client_packet<R: Read>(r: &mut R, compressed: bool) -> io::Result<ClientPacket> {
    let packet = match read_varint(r)? {
        client::HELLO => {
            let client_name = read_string(r)?;
            let _major = read_varint(r)?;
            let _minor = read_varint(r)?;
            let revision = read_varint(r)?;
            ClientPacket::Hello {
                client_name,
                revision,
                database: read_string(r)?,
                user: read_string(r)?,
                password: read_string(r)?,
            }
        }
        client::QUERY => {
            let query_id = read_string(r)?;
            let _query_kind = read_u8(r)?;
            for _ in 0..3 {
                read_string(r)?;
            }
            let _interface = read_u8(r)?;
            for _ in 0..3 {
                read_string(r)?;
            }
            for _ in 0..3 {
                read_varint(r)?;
            }
            // Settings are name/value pairs up to an empty name.
            while !read_string(r)?.is_empty() {
                read_string(r)?;
            }
            let stage = Stage::from_u64(read_varint(r)?)?;
            let compression = read_varint(r)? != 0;
            let sql = read_string(r)?;
            ClientPacket::Query {
                query_id,
                stage,
                compression,
                sql,
            }
        }
        client::DATA => ClientPacket::Data {
            table: read_string(r)?,
            block: read_block(r, compressed)?,
        },
        client::CANCEL => ClientPacket::Cancel,
        client::PING => ClientPacket::Ping,
        other => return Err(invalid(format!("unknown client packet type {}", other))),
    };
    Ok(packet)
}

pub fn write_server_hello<W: Write>(w: &mut W, hello: &ServerHello) -> io::Result<()> {
    write_varint(w, server::HELLO)?;
    write_string(w, &hello.name)?;
    write_varint(w, hello.version_major)?;
    write_varint(w, hello.version_minor)?;
    write_varint(w, hello.revision)?;
    if hello.revision >= CLIENT_REVISION {
        write_string(w, hello.timezone.as_deref().unwrap_or("UTC"))?;
    }
    Ok(())
}

pub fn write_server_data<W: Write>(w: &mut W, block: &Block, compressed: bool) -> io::Result<()> {
    write_varint(w, server::DATA)?;
    write_string(w, "")?;
    write_block(w, block, compressed)
}

pub fn write_exception<W: Write>(w: &mut W, exception: &RemoteException) -> io::Result<()> {
    write_varint(w, server::EXCEPTION)?;
    write_exception_body(w, exception)
}

fn write_exception_body<W: Write>(w: &mut W, exception: &RemoteException) -> io::Result<()> {
    write_i32(w, exception.code)?;
    write_string(w, &exception.name)?;
    write_string(w, &exception.message)?;
    write_string(w, &exception.stack_trace)?;
    match &exception.nested {
        Some(nested) => {
            w.write_all(&[1])?;
            write_exception_body(w, nested)
        }
        None => w.write_all(&[0]),
    }
}

pub fn write_progress<W: Write>(w: &mut W, progress: &Progress) -> io::Result<()> {
    write_varint(w, server::PROGRESS)?;
    write_varint(w, progress.rows)?;
    write_varint(w, progress.bytes)?;
    write_varint(w, progress.total_rows)
}

pub fn write_profile_info<W: Write>(w: &mut W, info: &ProfileInfo) -> io::Result<()> {
    write_varint(w, server::PROFILE_INFO)?;
    write_varint(w, info.rows)?;
    write_varint(w, info.blocks)?;
    write_varint(w, info.bytes)?;
    w.write_all(&[info.applied_limit as u8])?;
    write_varint(w, info.rows_before_limit)?;
    w.write_all(&[info.calculated_rows_before_limit as u8])
}

pub fn write_pong<W: Write>(w: &mut W) -> io::Result<()> {
    write_varint(w, server::PONG)
}

pub fn write_end_of_stream<W: Write>(w: &mut W) -> io::Result<()> {
    write_varint(w, server::END_OF_STREAM)
}
