//! ClickHouse foreign tables for a relational host engine.
//!
//! The host plans and executes statements on foreign tables through the
//! callbacks of [`fdw::ForeignDataWrapper`]. Scans ship SQL to ClickHouse over
//! the native protocol and stream the result back one row at a time.
//!
//! # Example
//!
//! ```no_run
//! use clickhouse_fdw::catalog::{Catalog, ForeignServer};
//! use clickhouse_fdw::executor::{build_scan, collect_results};
//! use clickhouse_fdw::expression::{col, lit};
//! use clickhouse_fdw::fdw::ClickHouseFdw;
//! use common::tuple::{Column, Schema, Type};
//! use std::sync::Arc;
//!
//! # fn main() -> common::Result<()> {
//! let catalog = Catalog::new();
//! let opts = |pairs: &[(&str, &str)]| {
//!     pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<Vec<_>>()
//! };
//! catalog.create_server(ForeignServer::from_options(
//!     "ch",
//!     &opts(&[("host", "localhost")]),
//!     &opts(&[("user", "default")]),
//! )?)?;
//! let table = catalog.create_foreign_table(
//!     "events",
//!     "ch",
//!     Schema::new(vec![Column::not_null("id", Type::BigInt), Column::new("kind", Type::Text)]),
//!     &opts(&[("key_columns", "id")]),
//! )?;
//!
//! let mut scan = build_scan(
//!     Arc::new(ClickHouseFdw::new()),
//!     &table,
//!     &["id".to_string(), "kind".to_string()],
//!     &[col("id").gt(lit(100))],
//! )?;
//! let rows = collect_results(scan.as_mut())?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod deparse;
pub mod execute;
pub mod executor;
pub mod expression;
pub mod fdw;
pub mod materializer;
mod prefetch;
pub mod session;

pub use execute::{ch_execute, ch_execute_inferred, explain, QueryRows};
pub use fdw::{ClickHouseFdw, ForeignDataWrapper};
pub use materializer::Materializer;
pub use session::{ModifySession, ScanSession, SessionOptions, SessionState};
