//! Deserializer registry keyed by CQL type tag.

use super::collection::{ListDeserializer, MapDeserializer, SetDeserializer, TupleDeserializer};
use super::cql_type::{CqlType, TypeTag};
use super::logical::UuidTypeDeserializer;
use super::native::{
    BlobDeserializer, BooleanDeserializer, DateDeserializer, DecimalDeserializer,
    DoubleDeserializer, DurationDeserializer, FloatDeserializer, InetDeserializer,
    IntegerDeserializer, TextDeserializer, TimeDeserializer, TimestampDeserializer,
    UuidDeserializer, VarintDeserializer,
};
use super::value::CellValue;
use crate::common::{CdcError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Decodes one CQL type from its serialized cell bytes.
///
/// Composite deserializers receive the registry so element types resolve
/// through the same table.
pub trait TypeDeserializer: Send + Sync {
    /// Decode `bytes` as a value of `ty`.
    fn deserialize(&self, registry: &TypeRegistry, ty: &CqlType, bytes: &[u8])
        -> Result<CellValue>;

    /// Avro-style schema descriptor for values of `ty`.
    fn schema(&self, registry: &TypeRegistry, ty: &CqlType) -> Result<serde_json::Value>;
}

/// Table of deserializers looked up by [`TypeTag`].
#[derive(Clone)]
pub struct TypeRegistry {
    deserializers: HashMap<TypeTag, Arc<dyn TypeDeserializer>>,
}

impl TypeRegistry {
    /// Registry with every native, composite and logical type installed.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(TypeTag::Ascii, Arc::new(TextDeserializer::ascii()));
        registry.register(TypeTag::Text, Arc::new(TextDeserializer::utf8()));
        registry.register(TypeTag::Boolean, Arc::new(BooleanDeserializer));
        registry.register(TypeTag::Tinyint, Arc::new(IntegerDeserializer::new(1)));
        registry.register(TypeTag::Smallint, Arc::new(IntegerDeserializer::new(2)));
        registry.register(TypeTag::Int, Arc::new(IntegerDeserializer::new(4)));
        registry.register(TypeTag::Bigint, Arc::new(IntegerDeserializer::new(8)));
        registry.register(TypeTag::Counter, Arc::new(IntegerDeserializer::new(8)));
        registry.register(TypeTag::Float, Arc::new(FloatDeserializer));
        registry.register(TypeTag::Double, Arc::new(DoubleDeserializer));
        registry.register(TypeTag::Blob, Arc::new(BlobDeserializer));
        registry.register(TypeTag::Decimal, Arc::new(DecimalDeserializer));
        registry.register(TypeTag::Varint, Arc::new(VarintDeserializer));
        registry.register(TypeTag::Date, Arc::new(DateDeserializer));
        registry.register(TypeTag::Time, Arc::new(TimeDeserializer));
        registry.register(TypeTag::Timestamp, Arc::new(TimestampDeserializer));
        registry.register(TypeTag::Inet, Arc::new(InetDeserializer));
        registry.register(TypeTag::Duration, Arc::new(DurationDeserializer));

        registry.register(TypeTag::List, Arc::new(ListDeserializer));
        registry.register(TypeTag::Set, Arc::new(SetDeserializer));
        registry.register(TypeTag::Map, Arc::new(MapDeserializer));
        registry.register(TypeTag::Tuple, Arc::new(TupleDeserializer));

        let native_uuid: Arc<dyn TypeDeserializer> = Arc::new(UuidDeserializer);
        registry.register(
            TypeTag::Uuid,
            Arc::new(UuidTypeDeserializer::new(native_uuid.clone())),
        );
        registry.register(
            TypeTag::Timeuuid,
            Arc::new(UuidTypeDeserializer::new(native_uuid)),
        );

        registry
    }

    /// Registry with nothing installed.
    pub fn empty() -> Self {
        Self {
            deserializers: HashMap::new(),
        }
    }

    /// Install or replace the deserializer for a tag.
    pub fn register(&mut self, tag: TypeTag, deserializer: Arc<dyn TypeDeserializer>) {
        self.deserializers.insert(tag, deserializer);
    }

    /// Find the deserializer for a tag.
    pub fn lookup(&self, tag: &TypeTag) -> Result<&Arc<dyn TypeDeserializer>> {
        self.deserializers
            .get(tag)
            .ok_or_else(|| CdcError::unsupported_type(format!("{:?}", tag)))
    }

    /// Decode a cell of the given type.
    pub fn deserialize(&self, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        self.lookup(&ty.tag())
            .map_err(|_| CdcError::unsupported_type(ty.to_string()))?
            .deserialize(self, ty, bytes)
    }

    /// Schema descriptor for a type.
    pub fn schema(&self, ty: &CqlType) -> Result<serde_json::Value> {
        self.lookup(&ty.tag())
            .map_err(|_| CdcError::unsupported_type(ty.to_string()))?
            .schema(self, ty)
    }

    /// True when `ty` and every type nested inside it have a deserializer.
    pub fn supports(&self, ty: &CqlType) -> bool {
        if !self.deserializers.contains_key(&ty.tag()) {
            return false;
        }
        match ty {
            CqlType::List(inner) | CqlType::Set(inner) => self.supports(inner),
            CqlType::Map(k, v) => self.supports(k) && self.supports(v),
            CqlType::Tuple(items) => items.iter().all(|item| self.supports(item)),
            _ => true,
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.deserializers.len())
            .finish()
    }
}
