//! Logical type deserializers.
//!
//! A logical deserializer wraps a native one: the native entry decodes the
//! bytes, then the logical layer reformats the value for output.

use super::cql_type::CqlType;
use super::registry::{TypeDeserializer, TypeRegistry};
use super::value::CellValue;
use crate::common::{CdcError, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// `uuid` and `timeuuid`: always emitted as the lower-case hyphenated string,
/// whatever layout the native decoder accepted.
pub struct UuidTypeDeserializer {
    native: Arc<dyn TypeDeserializer>,
}

impl UuidTypeDeserializer {
    pub fn new(native: Arc<dyn TypeDeserializer>) -> Self {
        Self { native }
    }

    fn format_deserialized_value(&self, ty: &CqlType, value: CellValue) -> Result<CellValue> {
        match value {
            CellValue::Null => Ok(CellValue::Null),
            CellValue::Uuid(uuid) => Ok(CellValue::Text(uuid.hyphenated().to_string())),
            CellValue::Text(text) => uuid::Uuid::parse_str(&text)
                .map(|uuid| CellValue::Text(uuid.hyphenated().to_string()))
                .map_err(|e| CdcError::decode(format!("{}: {}", ty, e))),
            other => Err(CdcError::decode(format!(
                "{} decoded to unexpected value {:?}",
                ty, other
            ))),
        }
    }
}

impl TypeDeserializer for UuidTypeDeserializer {
    fn deserialize(&self, registry: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let value = self.native.deserialize(registry, ty, bytes)?;
        self.format_deserialized_value(ty, value)
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string", "logicalType": "uuid"}))
    }
}
