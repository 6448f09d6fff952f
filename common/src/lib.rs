//! Types shared by the wire client and the foreign-table bridge.

pub mod api;
pub mod config;
pub mod table;
pub mod tuple;

pub use api::{BridgeError, ErrorCategory, Result};
