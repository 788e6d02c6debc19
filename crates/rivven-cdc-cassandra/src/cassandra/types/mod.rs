//! CQL type model and the deserializer registry.
//!
//! Every column value passes through [`TypeRegistry::deserialize`], which
//! dispatches on the column's [`TypeTag`]:
//!
//! | Kind | Types |
//! |------|-------|
//! | Native | ascii, text, varchar, bigint, counter, int, smallint, tinyint, boolean, float, double, blob, decimal, varint, date, time, timestamp, inet, duration |
//! | Composite | list, set, map, tuple |
//! | Logical | uuid, timeuuid |
//!
//! User-defined and custom marshal types have no entry and fail with
//! [`CdcError::UnsupportedType`](crate::common::CdcError::UnsupportedType).

mod collection;
mod cql_type;
mod logical;
mod native;
mod registry;
mod value;

pub use collection::{ListDeserializer, MapDeserializer, SetDeserializer, TupleDeserializer};
pub use cql_type::{CqlType, TypeTag};
pub use logical::UuidTypeDeserializer;
pub use native::{
    BlobDeserializer, BooleanDeserializer, DateDeserializer, DecimalDeserializer,
    DoubleDeserializer, DurationDeserializer, FloatDeserializer, InetDeserializer,
    IntegerDeserializer, TextDeserializer, TimeDeserializer, TimestampDeserializer,
    UuidDeserializer, VarintDeserializer,
};
pub use registry::{TypeDeserializer, TypeRegistry};
pub use value::CellValue;
