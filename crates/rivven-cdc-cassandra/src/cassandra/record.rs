//! Raw mutations and their translation into records.

use super::event::{ChangeRecord, Column, Operation, Record, SourceInfo, TombstoneRecord};
use super::filter::FieldFilter;
use super::position::{CommitLogPosition, CommitLogSegment, KeyspaceTable};
use super::schema::TableSchema;
use super::types::{CellValue, TypeRegistry};
use crate::common::{CdcError, Result, SharedMetrics};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// One written cell as decoded from the commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    pub column: String,
    /// Serialized value; `None` for a null or deleted cell.
    pub value: Option<Bytes>,
}

impl RawCell {
    pub fn new(column: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            column: column.into(),
            value: Some(value.into()),
        }
    }

    pub fn null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: None,
        }
    }
}

/// A single-row mutation read from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMutation {
    pub table: KeyspaceTable,
    pub cells: Vec<RawCell>,
    /// Write time in microseconds
    pub timestamp_micros: i64,
    pub position: CommitLogPosition,
    /// Row liveness info present; the write was an INSERT rather than an UPDATE.
    pub row_liveness: bool,
}

impl RawMutation {
    pub fn new(table: KeyspaceTable, position: CommitLogPosition, timestamp_micros: i64) -> Self {
        Self {
            table,
            cells: Vec::new(),
            timestamp_micros,
            position,
            row_liveness: false,
        }
    }

    pub fn cell(mut self, column: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.cells.push(RawCell::new(column, value));
        self
    }

    pub fn null_cell(mut self, column: impl Into<String>) -> Self {
        self.cells.push(RawCell::null(column));
        self
    }

    pub fn with_row_liveness(mut self, row_liveness: bool) -> Self {
        self.row_liveness = row_liveness;
        self
    }

    fn cell_for(&self, column: &str) -> Option<&RawCell> {
        self.cells.iter().find(|c| c.column == column)
    }
}

/// Builds records from raw mutations using the table schema.
pub struct RecordMaker {
    cluster_name: String,
    registry: Arc<TypeRegistry>,
    filter: FieldFilter,
    tombstones_on_delete: bool,
    metrics: SharedMetrics,
}

impl RecordMaker {
    pub fn new(
        cluster_name: impl Into<String>,
        registry: Arc<TypeRegistry>,
        filter: FieldFilter,
        tombstones_on_delete: bool,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            registry,
            filter,
            tombstones_on_delete,
            metrics,
        }
    }

    /// Build the record for a mutation.
    ///
    /// Returns `Ok(None)` for a deletion when tombstones are disabled. A key
    /// column that is missing, unsupported or undecodable fails the whole
    /// mutation; the same problem on any other column only drops that column.
    pub fn make(
        &self,
        segment: &CommitLogSegment,
        schema: &TableSchema,
        mutation: &RawMutation,
        is_deletion: bool,
    ) -> Result<Option<Record>> {
        if is_deletion && !self.tombstones_on_delete {
            debug!(
                "Deletion on {} at {} suppressed",
                mutation.table, mutation.position
            );
            return Ok(None);
        }

        let key = self.key_columns(schema, mutation)?;
        let source = SourceInfo::new(
            self.cluster_name.clone(),
            segment,
            mutation.position,
            &mutation.table,
            mutation.timestamp_micros,
        );

        if is_deletion {
            return Ok(Some(Record::Tombstone(TombstoneRecord {
                source,
                table: mutation.table.clone(),
                key,
                timestamp_micros: mutation.timestamp_micros,
            })));
        }

        let op = if mutation.row_liveness {
            Operation::Insert
        } else {
            Operation::Update
        };
        Ok(Some(Record::Change(ChangeRecord {
            source,
            table: mutation.table.clone(),
            key,
            columns: self.value_columns(schema, mutation),
            op,
            timestamp_micros: mutation.timestamp_micros,
        })))
    }

    fn decode(&self, cell: &RawCell, schema: &TableSchema) -> Result<CellValue> {
        let definition = schema.column(&cell.column).ok_or_else(|| {
            CdcError::schema(format!("Unknown column {}", cell.column))
        })?;
        match &cell.value {
            Some(bytes) => self.registry.deserialize(&definition.cql_type, bytes),
            None => Ok(CellValue::Null),
        }
    }

    fn key_columns(&self, schema: &TableSchema, mutation: &RawMutation) -> Result<Vec<Column>> {
        schema
            .primary_key()
            .map(|definition| {
                let cell = mutation.cell_for(&definition.name).ok_or_else(|| {
                    CdcError::decode(format!(
                        "Mutation on {} is missing key column {}",
                        mutation.table, definition.name
                    ))
                })?;
                let value = self.decode(cell, schema).map_err(|e| {
                    self.metrics.record_decode_error();
                    e
                })?;
                Ok(Column::new(definition.name.clone(), value))
            })
            .collect()
    }

    fn value_columns(&self, schema: &TableSchema, mutation: &RawMutation) -> Vec<Column> {
        let mut columns = Vec::new();
        for definition in schema.columns().iter().filter(|c| !c.is_primary_key()) {
            let Some(cell) = mutation.cell_for(&definition.name) else {
                continue;
            };
            if self.filter.is_excluded(&mutation.table, definition) {
                continue;
            }
            match self.decode(cell, schema) {
                Ok(value) => columns.push(Column::new(definition.name.clone(), value)),
                Err(e) => {
                    self.metrics.record_decode_error();
                    warn!(
                        "Dropping column {}.{} at {}: {}",
                        mutation.table, definition.name, mutation.position, e
                    );
                }
            }
        }

        for cell in &mutation.cells {
            if schema.column(&cell.column).is_none() {
                debug!("Ignoring cell for unknown column {}.{}", mutation.table, cell.column);
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassandra::types::CqlType;
    use crate::common::CommitLogMetrics;

    fn schema() -> TableSchema {
        TableSchema::builder("shop", "orders")
            .partition_key("id", CqlType::Int)
            .regular("name", CqlType::Text)
            .regular("secret", CqlType::Text)
            .regular("shape", CqlType::Custom("address".into()))
            .build()
    }

    fn segment() -> CommitLogSegment {
        CommitLogSegment::from_path("/cdc/CommitLog-7-1.log").unwrap()
    }

    fn maker(exclude: &[&str], tombstones: bool) -> (RecordMaker, SharedMetrics) {
        let metrics: SharedMetrics = Arc::new(CommitLogMetrics::new("test"));
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        let maker = RecordMaker::new(
            "cluster1",
            Arc::new(TypeRegistry::new()),
            FieldFilter::new(&exclude).unwrap(),
            tombstones,
            metrics.clone(),
        );
        (maker, metrics)
    }

    fn mutation() -> RawMutation {
        RawMutation::new(
            KeyspaceTable::new("shop", "orders"),
            CommitLogPosition::new(1, 64),
            1_000,
        )
        .cell("id", 7i32.to_be_bytes().to_vec())
        .cell("name", "widget")
    }

    #[test]
    fn test_insert_vs_update() {
        let (maker, _) = maker(&[], true);
        let insert = maker
            .make(&segment(), &schema(), &mutation().with_row_liveness(true), false)
            .unwrap()
            .unwrap();
        assert_eq!(insert.op(), Operation::Insert);

        let update = maker
            .make(&segment(), &schema(), &mutation(), false)
            .unwrap()
            .unwrap();
        assert_eq!(update.op(), Operation::Update);
        assert_eq!(update.source().commit_log_file, "CommitLog-7-1.log");
        assert_eq!(update.position(), CommitLogPosition::new(1, 64));
    }

    #[test]
    fn test_excluded_column_absent_key_kept() {
        let (maker, _) = maker(&["shop.orders.secret", "shop.orders.id"], true);
        let record = maker
            .make(&segment(), &schema(), &mutation().cell("secret", "x"), false)
            .unwrap()
            .unwrap();
        let Record::Change(change) = record else {
            panic!("expected change");
        };
        assert_eq!(change.key, vec![Column::new("id", CellValue::Int(7))]);
        assert_eq!(
            change.columns,
            vec![Column::new("name", CellValue::Text("widget".into()))]
        );
    }

    #[test]
    fn test_unsupported_regular_column_dropped() {
        let (maker, metrics) = maker(&[], true);
        let record = maker
            .make(&segment(), &schema(), &mutation().cell("shape", "blob"), false)
            .unwrap()
            .unwrap();
        let Record::Change(change) = record else {
            panic!("expected change");
        };
        assert!(change.columns.iter().all(|c| c.name != "shape"));
        assert_eq!(metrics.snapshot().decode_errors, 1);
    }

    #[test]
    fn test_bad_key_fails_mutation() {
        let (maker, _) = maker(&[], true);
        let bad_key = RawMutation::new(
            KeyspaceTable::new("shop", "orders"),
            CommitLogPosition::new(1, 64),
            1_000,
        )
        .cell("id", vec![1u8, 2]);
        assert!(matches!(
            maker.make(&segment(), &schema(), &bad_key, false),
            Err(CdcError::Decode(_))
        ));

        let no_key = RawMutation::new(
            KeyspaceTable::new("shop", "orders"),
            CommitLogPosition::new(1, 64),
            1_000,
        );
        assert!(maker.make(&segment(), &schema(), &no_key, false).is_err());
    }

    #[test]
    fn test_deletion() {
        let (with_tombstones, _) = maker(&[], true);
        let record = with_tombstones
            .make(&segment(), &schema(), &mutation(), true)
            .unwrap()
            .unwrap();
        let Record::Tombstone(tombstone) = record else {
            panic!("expected tombstone");
        };
        assert_eq!(tombstone.key, vec![Column::new("id", CellValue::Int(7))]);

        let (without_tombstones, _) = maker(&[], false);
        assert!(without_tombstones
            .make(&segment(), &schema(), &mutation(), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_null_cell() {
        let (maker, _) = maker(&[], true);
        let record = maker
            .make(&segment(), &schema(), &mutation().null_cell("secret"), false)
            .unwrap()
            .unwrap();
        let Record::Change(change) = record else {
            panic!("expected change");
        };
        assert!(change
            .columns
            .contains(&Column::new("secret", CellValue::Null)));
    }
}
