//! Column exclusion.
//!
//! Entries in `field_exclude_list` name columns as `keyspace.table.column`,
//! with `*` and `?` wildcards. Primary key columns are never excluded: a
//! record without its key could not be routed or compacted.

use super::position::KeyspaceTable;
use super::schema::ColumnDefinition;
use crate::common::pattern::FieldPatternSet;
use crate::common::{CdcError, Result};

#[derive(Debug, Clone, Default)]
pub struct FieldFilter {
    excluded: FieldPatternSet,
}

impl FieldFilter {
    /// Build from exclusion patterns; blank entries are ignored.
    pub fn new(exclude_list: &[String]) -> Result<Self> {
        let excluded = FieldPatternSet::from_patterns(exclude_list)
            .map_err(|e| CdcError::config(format!("Invalid field_exclude_list: {}", e)))?;
        Ok(Self { excluded })
    }

    /// A filter that keeps every column.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// True when the column must be left out of emitted records.
    pub fn is_excluded(&self, table: &KeyspaceTable, column: &ColumnDefinition) -> bool {
        !column.is_primary_key()
            && self
                .excluded
                .matches_field(&table.keyspace, &table.table, &column.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassandra::schema::ColumnKind;
    use crate::cassandra::types::CqlType;

    fn regular(name: &str) -> ColumnDefinition {
        ColumnDefinition::new(name, CqlType::Text, ColumnKind::Regular)
    }

    #[test]
    fn test_excludes_listed_column_only() {
        let filter = FieldFilter::new(&["shop.orders.secret".to_string()]).unwrap();
        let orders = KeyspaceTable::new("shop", "orders");
        let users = KeyspaceTable::new("shop", "users");

        assert!(filter.is_excluded(&orders, &regular("secret")));
        assert!(!filter.is_excluded(&orders, &regular("note")));
        assert!(!filter.is_excluded(&users, &regular("secret")));
    }

    #[test]
    fn test_key_columns_never_excluded() {
        let filter = FieldFilter::new(&["shop.orders.*".to_string()]).unwrap();
        let orders = KeyspaceTable::new("shop", "orders");
        let id = ColumnDefinition::new("id", CqlType::Int, ColumnKind::PartitionKey);
        let line = ColumnDefinition::new("line", CqlType::Int, ColumnKind::ClusteringKey);

        assert!(!filter.is_excluded(&orders, &id));
        assert!(!filter.is_excluded(&orders, &line));
        assert!(filter.is_excluded(&orders, &regular("anything")));
    }

    #[test]
    fn test_empty_filter() {
        let filter = FieldFilter::new(&[String::new()]).unwrap();
        assert!(filter.is_empty());
        assert!(!FieldFilter::allow_all().is_excluded(
            &KeyspaceTable::new("a", "b"),
            &regular("c")
        ));
    }
}
