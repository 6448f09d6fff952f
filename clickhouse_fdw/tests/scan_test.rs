mod support;

use clickhouse_fdw::session::{ScanSession, SessionOptions, SessionState};
use common::tuple::{Column, Schema, Type, Value};
use common::ErrorCategory;
use std::time::Duration;
use support::{ab_block, ab_header, ab_schema};
use wire_client::mock::{MockServer, Reply};
use wire_client::{Block, BlockColumn, ColumnValues, QueryRequest, WireClient, WireType};

fn session_for(server: &MockServer, schema: Schema) -> ScanSession {
    ScanSession::new(WireClient::new(server.params()), schema, SessionOptions::default())
}

#[test]
fn test_scan_returns_rows_then_end() {
    let server = MockServer::builder().start(|_, _| {
        vec![
            Reply::Header(ab_header()),
            Reply::Data(ab_block(&[1, 2], &["x", "y"])),
            Reply::EndOfStream,
        ]
    });
    let mut session = session_for(&server, ab_schema());
    session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();

    let first = session.advance().unwrap().unwrap().clone();
    assert_eq!(first.values, vec![Value::Integer(1), Value::Varchar("x".to_string())]);
    let second = session.advance().unwrap().unwrap().clone();
    assert_eq!(second.values, vec![Value::Integer(2), Value::Varchar("y".to_string())]);
    assert!(session.advance().unwrap().is_none());
    assert_eq!(session.state(), SessionState::Exhausted);

    session.end();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(server.state().queries(), vec!["SELECT a, b FROM t".to_string()]);
}

#[test]
fn test_scan_zero_rows() {
    let server =
        MockServer::builder().start(|_, _| vec![Reply::Header(ab_header()), Reply::EndOfStream]);
    let mut session = session_for(&server, ab_schema());
    session.begin(QueryRequest::new("SELECT a, b FROM t WHERE 0")).unwrap();
    assert!(session.advance().unwrap().is_none());
    assert_eq!(session.state(), SessionState::Exhausted);
    assert_eq!(session.stats().rows_returned, 0);
}

#[test]
fn test_end_is_idempotent_in_every_state() {
    let server = MockServer::builder()
        .start(|_, _| vec![Reply::Header(ab_header()), Reply::Data(ab_block(&[1], &["x"])), Reply::EndOfStream]);

    let mut idle = session_for(&server, ab_schema());
    idle.end();
    idle.end();
    assert_eq!(idle.state(), SessionState::Closed);

    let mut streaming = session_for(&server, ab_schema());
    streaming.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
    streaming.end();
    streaming.end();
    assert_eq!(streaming.state(), SessionState::Closed);
    assert!(streaming.advance().is_err());
}

#[test]
fn test_null_fidelity() {
    let header = Block::new(vec![BlockColumn::empty(
        "v",
        WireType::Nullable(Box::new(WireType::Int32)),
    )])
    .unwrap();
    let data = Block::new(vec![BlockColumn::nullable(
        "v",
        WireType::Int32,
        ColumnValues::Int32(vec![0, 5]),
        vec![true, false],
    )])
    .unwrap();
    let server = MockServer::builder().start(move |_, _| {
        vec![
            Reply::Header(header.clone()),
            Reply::Data(data.clone()),
            Reply::EndOfStream,
        ]
    });

    let mut session = session_for(&server, Schema::new(vec![Column::new("v", Type::Integer)]));
    session.begin(QueryRequest::new("SELECT v FROM t")).unwrap();
    assert_eq!(session.advance().unwrap().unwrap().values[0], Value::Null);
    assert_eq!(session.advance().unwrap().unwrap().values[0], Value::Integer(5));

    // NULL into a NOT NULL column is an error, never a zero.
    let mut strict = session_for(&server, Schema::new(vec![Column::not_null("v", Type::Integer)]));
    strict.begin(QueryRequest::new("SELECT v FROM t")).unwrap();
    let err = strict.advance().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
    assert_eq!(strict.state(), SessionState::Failed);
}

#[test]
fn test_severed_stream_fails_session() {
    let server = MockServer::builder().start(|_, _| {
        vec![
            Reply::Header(ab_header()),
            Reply::Data(ab_block(&[1], &["x"])),
            Reply::Sever,
        ]
    });
    let mut session = session_for(&server, ab_schema());
    session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
    assert!(session.advance().unwrap().is_some());

    assert!(session.has_connection());

    let err = session.advance().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Stream);
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.has_connection());
    assert!(session.restart().is_err());
    session.end();
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_remote_exception_mid_stream_is_verbatim() {
    let server = MockServer::builder().start(|_, _| {
        vec![
            Reply::Header(ab_header()),
            Reply::Data(ab_block(&[1], &["x"])),
            Reply::exception(241, "Memory limit (for query) exceeded"),
        ]
    });
    let mut session = session_for(&server, ab_schema());
    session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
    assert!(session.advance().unwrap().is_some());

    match session.advance().unwrap_err() {
        common::BridgeError::RemoteExecution { code, message, .. } => {
            assert_eq!(code, 241);
            assert_eq!(message, "Memory limit (for query) exceeded");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_old_server_revision_is_rejected() {
    let server = MockServer::builder()
        .revision(54000)
        .start(|_, _| vec![Reply::EndOfStream]);
    let mut session = session_for(&server, ab_schema());
    let err = session.begin(QueryRequest::new("SELECT 1")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Protocol);
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_malformed_header_is_protocol_error() {
    let server = MockServer::builder().start(|_, _| {
        let header = Block {
            columns: vec![BlockColumn::empty("s", WireType::FixedString(usize::MAX))],
            rows: 0,
        };
        vec![Reply::Header(header), Reply::EndOfStream]
    });
    let mut session = session_for(&server, Schema::new(vec![Column::new("s", Type::Text)]));
    let err = session.begin(QueryRequest::new("SELECT s FROM t")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Protocol);
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.has_connection());
}

#[test]
fn test_unreachable_server_is_connection_error() {
    let params = {
        let server = MockServer::builder().start(|_, _| Vec::new());
        server.params()
    };
    // The server is gone; nothing listens on the port any more.
    let mut session = ScanSession::new(WireClient::new(params), ab_schema(), SessionOptions::default());
    let err = session.begin(QueryRequest::new("SELECT 1")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
}

#[test]
fn test_compressed_scan() {
    let server = MockServer::builder().start(|_, _| {
        vec![
            Reply::Header(ab_header()),
            Reply::Data(ab_block(&[7; 100], &["compressible"; 100])),
            Reply::EndOfStream,
        ]
    });
    let mut params = server.params();
    params.compression = true;
    let mut session = ScanSession::new(WireClient::new(params), ab_schema(), SessionOptions::default());
    session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
    let mut rows = 0;
    while let Some(tuple) = session.advance().unwrap() {
        assert_eq!(tuple.values[1], Value::Varchar("compressible".to_string()));
        rows += 1;
    }
    assert_eq!(rows, 100);
}

#[test]
fn test_receive_timeout_fails_session() {
    let server = MockServer::builder().start(|_, _| {
        vec![
            Reply::Header(ab_header()),
            Reply::Sleep(Duration::from_millis(2500)),
            Reply::Data(ab_block(&[1], &["x"])),
            Reply::EndOfStream,
        ]
    });
    let mut params = server.params();
    params.timeouts.receive = Duration::from_secs(1);
    let mut session = ScanSession::new(WireClient::new(params), ab_schema(), SessionOptions::default());
    session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
    let err = session.advance().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Stream);
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_prefetch_matches_direct_scan() {
    let server = MockServer::builder().start(|_, _| {
        let mut replies = vec![Reply::Header(ab_header())];
        for i in 0..20 {
            replies.push(Reply::Data(ab_block(&[i, i + 100], &["p", "q"])));
        }
        replies.push(Reply::EndOfStream);
        replies
    });

    let collect = |prefetch: bool| {
        let mut session = ScanSession::new(
            WireClient::new(server.params()),
            ab_schema(),
            SessionOptions { prefetch },
        );
        session.begin(QueryRequest::new("SELECT a, b FROM t")).unwrap();
        let mut rows = Vec::new();
        while let Some(tuple) = session.advance().unwrap() {
            rows.push(tuple.clone());
        }
        session.end();
        rows
    };
    let direct = collect(false);
    let prefetched = collect(true);
    assert_eq!(direct.len(), 40);
    assert_eq!(direct, prefetched);
}
