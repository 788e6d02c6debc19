//! Table schemas and the catalog consulted for every mutation.
//!
//! The catalog is populated from outside the pipeline (driver metadata,
//! schema change listener, tests). The handler only reads it: a lookup
//! either returns the current schema or reports the table as unknown.

use super::position::KeyspaceTable;
use super::types::{CqlType, TypeRegistry};
use crate::common::Result;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Role of a column in the table's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    PartitionKey,
    ClusteringKey,
    Regular,
    Static,
}

impl ColumnKind {
    pub fn is_primary_key(&self) -> bool {
        matches!(self, ColumnKind::PartitionKey | ColumnKind::ClusteringKey)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub cql_type: CqlType,
    pub kind: ColumnKind,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, cql_type: CqlType, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            cql_type,
            kind,
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.kind.is_primary_key()
    }
}

/// Column definitions of one table, key columns first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: KeyspaceTable,
    columns: Vec<ColumnDefinition>,
}

impl TableSchema {
    pub fn new(table: KeyspaceTable, columns: Vec<ColumnDefinition>) -> Self {
        Self { table, columns }
    }

    pub fn builder(keyspace: impl Into<String>, table: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            table: KeyspaceTable::new(keyspace, table),
            columns: Vec::new(),
        }
    }

    pub fn table(&self) -> &KeyspaceTable {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Partition key columns followed by clustering columns.
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::PartitionKey)
            .chain(
                self.columns
                    .iter()
                    .filter(|c| c.kind == ColumnKind::ClusteringKey),
            )
    }

    /// Avro-style record schema for the row, every field nullable.
    pub fn value_schema(&self, registry: &TypeRegistry) -> Result<Value> {
        let fields = self
            .columns
            .iter()
            .map(|column| {
                let field_type = registry.schema(&column.cql_type)?;
                let field_type = if column.is_primary_key() {
                    field_type
                } else {
                    json!(["null", field_type])
                };
                Ok(json!({
                    "name": column.name,
                    "type": field_type,
                }))
            })
            .collect::<Result<Vec<Value>>>()?;

        Ok(json!({
            "type": "record",
            "name": self.table.table,
            "namespace": format!("rivven.cdc.cassandra.{}", self.table.keyspace),
            "fields": fields
        }))
    }
}

pub struct TableSchemaBuilder {
    table: KeyspaceTable,
    columns: Vec<ColumnDefinition>,
}

impl TableSchemaBuilder {
    pub fn column(mut self, name: impl Into<String>, cql_type: CqlType, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDefinition::new(name, cql_type, kind));
        self
    }

    pub fn partition_key(self, name: impl Into<String>, cql_type: CqlType) -> Self {
        self.column(name, cql_type, ColumnKind::PartitionKey)
    }

    pub fn clustering_key(self, name: impl Into<String>, cql_type: CqlType) -> Self {
        self.column(name, cql_type, ColumnKind::ClusteringKey)
    }

    pub fn regular(self, name: impl Into<String>, cql_type: CqlType) -> Self {
        self.column(name, cql_type, ColumnKind::Regular)
    }

    pub fn static_column(self, name: impl Into<String>, cql_type: CqlType) -> Self {
        self.column(name, cql_type, ColumnKind::Static)
    }

    pub fn build(self) -> TableSchema {
        TableSchema::new(self.table, self.columns)
    }
}

/// Read access to the current table schemas.
pub trait SchemaCatalog: Send + Sync {
    /// Current schema of a table, or `None` when the table is unknown.
    fn lookup(&self, table: &KeyspaceTable) -> Option<Arc<TableSchema>>;
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemorySchemaCatalog {
    tables: RwLock<HashMap<KeyspaceTable, Arc<TableSchema>>>,
}

impl MemorySchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table schema.
    pub fn register(&self, schema: TableSchema) {
        let table = schema.table().clone();
        self.tables.write().insert(table, Arc::new(schema));
    }

    pub fn remove(&self, table: &KeyspaceTable) -> Option<Arc<TableSchema>> {
        self.tables.write().remove(table)
    }

    pub fn tables(&self) -> Vec<KeyspaceTable> {
        let mut tables: Vec<_> = self.tables.read().keys().cloned().collect();
        tables.sort();
        tables
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Wait for a table's schema to appear, polling until `timeout`.
    pub async fn await_schema(
        &self,
        table: &KeyspaceTable,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<Arc<TableSchema>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(schema) = self.lookup(table) {
                return Some(schema);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl SchemaCatalog for MemorySchemaCatalog {
    fn lookup(&self, table: &KeyspaceTable) -> Option<Arc<TableSchema>> {
        self.tables.read().get(table).cloned()
    }
}
