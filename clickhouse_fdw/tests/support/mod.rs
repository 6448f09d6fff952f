#![allow(dead_code)]

use clickhouse_fdw::catalog::{Catalog, ForeignServer};
use common::config::ServerOptions;
use common::tuple::{Column, Schema, Type};
use wire_client::mock::MockServer;
use wire_client::{Block, BlockColumn, ColumnValues, WireType};

/// Block with `a Int32, b String`.
pub fn ab_block(a: &[i32], b: &[&str]) -> Block {
    Block::new(vec![
        BlockColumn::new("a", WireType::Int32, ColumnValues::Int32(a.to_vec())),
        BlockColumn::new(
            "b",
            WireType::String,
            ColumnValues::Bytes(b.iter().map(|s| s.as_bytes().to_vec()).collect()),
        ),
    ])
    .unwrap()
}

pub fn ab_header() -> Block {
    ab_block(&[], &[]).header()
}

pub fn ab_schema() -> Schema {
    Schema::new(vec![
        Column::not_null("a", Type::Integer),
        Column::new("b", Type::Text),
    ])
}

pub fn opts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A catalog with a server named `ch` pointing at `server`.
pub fn catalog_for(server: &MockServer, options: ServerOptions) -> Catalog {
    let catalog = Catalog::new();
    catalog
        .create_server(ForeignServer {
            name: "ch".to_string(),
            params: server.params(),
            options,
        })
        .unwrap();
    catalog
}
