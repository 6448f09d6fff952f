//! Catalog of foreign servers and foreign tables.
//!
//! A foreign server carries connection parameters and planner tuning; a
//! foreign table maps a local schema onto one remote table of a server.
//! Uses RwLock for concurrent lookups and exclusive DDL.

use crate::deparse::RemoteTable;
use common::config::{
    validate_options, ConnectionParams, OptionContext, ServerOptions, TableOptions,
};
use common::tuple::Schema;
use common::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A remote engine the host knows how to reach.
#[derive(Debug, Clone)]
pub struct ForeignServer {
    pub name: String,
    pub params: ConnectionParams,
    pub options: ServerOptions,
}

impl ForeignServer {
    /// Builds a server from host-style option lists, rejecting unknown options.
    pub fn from_options(
        name: impl Into<String>,
        server_options: &[(String, String)],
        user_mapping: &[(String, String)],
    ) -> Result<Self> {
        validate_options(OptionContext::Server, server_options)?;
        validate_options(OptionContext::UserMapping, user_mapping)?;
        Ok(Self {
            name: name.into(),
            params: ConnectionParams::from_options(server_options, user_mapping)?,
            options: ServerOptions::from_options(server_options)?,
        })
    }
}

/// Information about a foreign table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub table_id: u32,
    pub name: String,
    pub server: Arc<ForeignServer>,
    pub schema: Schema,
    pub options: TableOptions,
}

impl TableInfo {
    pub fn new(
        table_id: u32,
        name: String,
        server: Arc<ForeignServer>,
        schema: Schema,
        options: TableOptions,
    ) -> Self {
        Self {
            table_id,
            name,
            server,
            schema,
            options,
        }
    }

    /// The remote table this foreign table reads and writes.
    pub fn remote(&self) -> RemoteTable {
        RemoteTable::new(self.options.database.clone(), self.options.table.clone())
    }

    pub fn use_remote_estimate(&self) -> bool {
        self.options
            .use_remote_estimate
            .unwrap_or(self.server.options.use_remote_estimate)
    }
}

pub struct Catalog {
    servers: RwLock<HashMap<String, Arc<ForeignServer>>>,
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
    next_table_id: RwLock<u32>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            next_table_id: RwLock::new(1),
        }
    }

    pub fn create_server(&self, server: ForeignServer) -> Result<Arc<ForeignServer>> {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        if servers.contains_key(&server.name) {
            return Err(BridgeError::InvalidState(format!(
                "server \"{}\" already exists",
                server.name
            )));
        }
        let server = Arc::new(server);
        servers.insert(server.name.clone(), server.clone());
        debug!(server = %server.name, address = %server.params.address(), "created foreign server");
        Ok(server)
    }

    pub fn get_server(&self, name: &str) -> Result<Arc<ForeignServer>> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        servers
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidState(format!("server \"{}\" does not exist", name)))
    }

    /// Creates a foreign table on `server`, validating its options.
    pub fn create_foreign_table(
        &self,
        name: &str,
        server: &str,
        schema: Schema,
        options: &[(String, String)],
    ) -> Result<Arc<TableInfo>> {
        validate_options(OptionContext::Table, options)?;
        let table_options = TableOptions::from_options(name, options)?;
        for key in &table_options.key_columns {
            if schema.index_of(key).is_none() {
                return Err(BridgeError::InvalidOption(format!(
                    "key column \"{}\" is not a column of \"{}\"",
                    key, name
                )));
            }
        }
        let server = self.get_server(server)?;

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(name) {
            return Err(BridgeError::InvalidState(format!(
                "table \"{}\" already exists",
                name
            )));
        }

        let mut next_id = self.next_table_id.write().unwrap_or_else(PoisonError::into_inner);
        let table_id = *next_id;
        *next_id += 1;
        drop(next_id);

        let table_info = Arc::new(TableInfo::new(
            table_id,
            name.to_string(),
            server,
            schema,
            table_options,
        ));
        tables.insert(name.to_string(), table_info.clone());
        Ok(table_info)
    }

    /// Looks up a table by name.
    pub fn get_table(&self, name: &str) -> Result<Arc<TableInfo>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidState(format!("table \"{}\" does not exist", name)))
    }

    /// Returns all table names, sorted.
    pub fn list_tables(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .remove(name)
            .ok_or_else(|| BridgeError::InvalidState(format!("table \"{}\" does not exist", name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tuple::{Column, Type};
    use common::ErrorCategory;

    fn opts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn catalog_with_server() -> Catalog {
        let catalog = Catalog::new();
        let server = ForeignServer::from_options(
            "ch",
            &opts(&[("host", "ch.internal"), ("port", "9001")]),
            &opts(&[("user", "reader")]),
        )
        .unwrap();
        catalog.create_server(server).unwrap();
        catalog
    }

    #[test]
    fn test_catalog_create_and_get_table() {
        let catalog = catalog_with_server();
        let schema = Schema::new(vec![
            Column::not_null("id", Type::Integer),
            Column::new("name", Type::Varchar(50)),
        ]);

        let table_info = catalog
            .create_foreign_table(
                "users",
                "ch",
                schema,
                &opts(&[("table", "users_v2"), ("key_columns", "id")]),
            )
            .unwrap();
        assert_eq!(table_info.table_id, 1);
        assert_eq!(table_info.remote().qualified(), "`users_v2`");
        assert_eq!(table_info.server.params.port, 9001);
        assert_eq!(table_info.server.params.user, "reader");

        let retrieved = catalog.get_table("users").unwrap();
        assert_eq!(retrieved.name, "users");
        assert_eq!(catalog.list_tables(), vec!["users"]);

        catalog.drop_table("users").unwrap();
        assert!(catalog.get_table("users").is_err());
    }

    #[test]
    fn test_catalog_rejects_bad_options() {
        let catalog = catalog_with_server();
        let schema = Schema::new(vec![Column::new("id", Type::Integer)]);

        let err = catalog
            .create_foreign_table("t", "ch", schema.clone(), &opts(&[("colour", "red")]))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidOption);

        let err = catalog
            .create_foreign_table("t", "ch", schema.clone(), &opts(&[("key_columns", "nope")]))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidOption);

        let err = ForeignServer::from_options("x", &opts(&[("password", "p")]), &[]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidOption);
    }

    #[test]
    fn test_catalog_table_not_found() {
        let catalog = Catalog::new();
        assert!(catalog.get_table("nonexistent").is_err());
        assert!(catalog
            .create_foreign_table("t", "missing", Schema::default(), &[])
            .is_err());
    }
}
