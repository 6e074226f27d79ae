//! Catalog lookup interface plus an in-memory implementation.
//!
//! Persistence of catalog objects is not quarry's concern; planners only need
//! lookups. `MemoryCatalog` is the service object handed to the planner (and
//! filled by the plan DSL) instead of any process-wide static state.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;

/// Where a stored table physically lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMeta {
    pub name: String,
    /// Store address used in federated table references, e.g. `mysql://db1:3306/tpch`.
    pub url: String,
    /// Compute node co-located with the store, if any (enables same-host shortcuts).
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMeta {
    pub name: String,
    pub connection: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub schema_name: String,
    pub attributes: Schema,
    /// Connection names holding (a replica of) this table.
    pub connections: Vec<String>,
}

/// Read-side catalog contract consumed by table-operator resolution.
pub trait Catalog: Send + Sync {
    fn get_table(&self, name: &str) -> Result<TableMeta>;
    fn get_connections_for_table(&self, name: &str) -> Result<Vec<ConnectionMeta>>;
    fn get_schema(&self, name: &str) -> Result<SchemaMeta>;
}

#[derive(Debug, Default)]
struct CatalogState {
    connections: BTreeMap<String, ConnectionMeta>,
    schemas: BTreeMap<String, SchemaMeta>,
    tables: BTreeMap<String, TableMeta>,
}

/// Catalog kept in memory behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CatalogState>> {
        self.state
            .lock()
            .map_err(|_| Error::Invariant("catalog lock poisoned".into()))
    }

    pub fn create_connection(&self, conn: ConnectionMeta) -> Result<()> {
        let mut st = self.lock()?;
        if st.connections.contains_key(&conn.name) {
            return Err(Error::CatalogObjectAlreadyExists {
                kind: "connection",
                name: conn.name,
            });
        }
        st.connections.insert(conn.name.clone(), conn);
        Ok(())
    }

    pub fn create_schema(&self, schema: SchemaMeta) -> Result<()> {
        let mut st = self.lock()?;
        if st.schemas.contains_key(&schema.name) {
            return Err(Error::CatalogObjectAlreadyExists {
                kind: "schema",
                name: schema.name,
            });
        }
        if !st.connections.contains_key(&schema.connection) {
            return Err(Error::CatalogObjectNotFound {
                kind: "connection",
                name: schema.connection,
            });
        }
        st.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn create_table(&self, table: TableMeta) -> Result<()> {
        let mut st = self.lock()?;
        if st.tables.contains_key(&table.name) {
            return Err(Error::CatalogObjectAlreadyExists {
                kind: "table",
                name: table.name,
            });
        }
        if !st.schemas.contains_key(&table.schema_name) {
            return Err(Error::CatalogObjectNotFound {
                kind: "schema",
                name: table.schema_name,
            });
        }
        if let Some(missing) = table
            .connections
            .iter()
            .find(|c| !st.connections.contains_key(c.as_str()))
        {
            return Err(Error::CatalogObjectNotFound {
                kind: "connection",
                name: missing.clone(),
            });
        }
        st.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<TableMeta> {
        self.lock()?
            .tables
            .remove(name)
            .ok_or_else(|| Error::CatalogObjectNotFound {
                kind: "table",
                name: name.to_string(),
            })
    }
}

impl Catalog for MemoryCatalog {
    fn get_table(&self, name: &str) -> Result<TableMeta> {
        self.lock()?
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CatalogObjectNotFound {
                kind: "table",
                name: name.to_string(),
            })
    }

    fn get_connections_for_table(&self, name: &str) -> Result<Vec<ConnectionMeta>> {
        let st = self.lock()?;
        let table = st
            .tables
            .get(name)
            .ok_or_else(|| Error::CatalogObjectNotFound {
                kind: "table",
                name: name.to_string(),
            })?;
        table
            .connections
            .iter()
            .map(|c| {
                st.connections
                    .get(c)
                    .cloned()
                    .ok_or_else(|| Error::CatalogObjectNotFound {
                        kind: "connection",
                        name: c.clone(),
                    })
            })
            .collect()
    }

    fn get_schema(&self, name: &str) -> Result<SchemaMeta> {
        self.lock()?
            .schemas
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CatalogObjectNotFound {
                kind: "schema",
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{DataType, Field};

    fn seeded() -> MemoryCatalog {
        let cat = MemoryCatalog::new();
        cat.create_connection(ConnectionMeta {
            name: "c1".into(),
            url: "mysql://db1:3306/tpch".into(),
            node: Some("db1:5500".into()),
        })
        .unwrap();
        cat.create_schema(SchemaMeta {
            name: "tpch".into(),
            connection: "c1".into(),
        })
        .unwrap();
        cat.create_table(TableMeta {
            name: "orders".into(),
            schema_name: "tpch".into(),
            attributes: Schema::new(vec![Field::new("o_orderkey", DataType::Int64)]),
            connections: vec!["c1".into()],
        })
        .unwrap();
        cat
    }

    #[test]
    fn lookups_resolve_connections() {
        let cat = seeded();
        let conns = cat.get_connections_for_table("orders").unwrap();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].url, "mysql://db1:3306/tpch");
        assert_eq!(cat.get_schema("tpch").unwrap().connection, "c1");
    }

    #[test]
    fn duplicate_and_missing_objects_are_reported() {
        let cat = seeded();
        let dup = cat
            .create_connection(ConnectionMeta {
                name: "c1".into(),
                url: "x".into(),
                node: None,
            })
            .unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::CatalogObjectAlreadyExists);

        let missing = cat.get_table("lineitem").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::CatalogObjectNotFound);

        cat.drop_table("orders").unwrap();
        assert!(cat.get_connections_for_table("orders").is_err());
    }
}
