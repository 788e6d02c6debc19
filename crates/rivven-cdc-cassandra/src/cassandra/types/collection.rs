//! Collection and tuple deserializers.
//!
//! Collections use the native protocol v4 layout: an `i32` element count,
//! then each element as an `i32` length followed by its bytes. A negative
//! length is a null element. Tuples have no count; components follow one
//! another until the buffer ends.

use super::cql_type::CqlType;
use super::registry::{TypeDeserializer, TypeRegistry};
use super::value::CellValue;
use crate::common::{CdcError, Result};
use serde_json::{json, Value};

struct ElementReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ElementReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn read_i32(&mut self) -> Result<i32> {
        if self.bytes.len() < 4 {
            return Err(CdcError::decode("truncated collection"));
        }
        let (head, rest) = self.bytes.split_at(4);
        self.bytes = rest;
        Ok(i32::from_be_bytes([head[0], head[1], head[2], head[3]]))
    }

    /// Next length-prefixed element; `None` for a null element.
    fn read_element(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        if self.bytes.len() < len {
            return Err(CdcError::decode(format!(
                "collection element of {} bytes exceeds remaining {}",
                len,
                self.bytes.len()
            )));
        }
        let (element, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(Some(element))
    }

    fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| CdcError::decode(format!("negative collection size {}", count)))
    }

    fn finish(&self) -> Result<()> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(CdcError::decode(format!(
                "{} trailing bytes after collection",
                self.bytes.len()
            )))
        }
    }
}

fn decode_element(
    registry: &TypeRegistry,
    ty: &CqlType,
    element: Option<&[u8]>,
) -> Result<CellValue> {
    match element {
        Some(bytes) => registry.deserialize(ty, bytes),
        None => Ok(CellValue::Null),
    }
}

fn decode_sequence(
    registry: &TypeRegistry,
    element_type: &CqlType,
    bytes: &[u8],
) -> Result<Vec<CellValue>> {
    let mut reader = ElementReader::new(bytes);
    let count = reader.read_count()?;
    // Cap preallocation; a corrupt count must not allocate unbounded memory
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(decode_element(registry, element_type, reader.read_element()?)?);
    }
    reader.finish()?;
    Ok(items)
}

fn mismatch(expected: &str, ty: &CqlType) -> CdcError {
    CdcError::invalid_state(format!("{} deserializer given type {}", expected, ty))
}

pub struct ListDeserializer;

impl TypeDeserializer for ListDeserializer {
    fn deserialize(&self, registry: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let CqlType::List(element_type) = ty else {
            return Err(mismatch("list", ty));
        };
        if bytes.is_empty() {
            return Ok(CellValue::List(Vec::new()));
        }
        Ok(CellValue::List(decode_sequence(registry, element_type, bytes)?))
    }

    fn schema(&self, registry: &TypeRegistry, ty: &CqlType) -> Result<Value> {
        let CqlType::List(element_type) = ty else {
            return Err(mismatch("list", ty));
        };
        Ok(json!({"type": "array", "items": registry.schema(element_type)?}))
    }
}

pub struct SetDeserializer;

impl TypeDeserializer for SetDeserializer {
    fn deserialize(&self, registry: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let CqlType::Set(element_type) = ty else {
            return Err(mismatch("set", ty));
        };
        if bytes.is_empty() {
            return Ok(CellValue::Set(Vec::new()));
        }
        Ok(CellValue::Set(decode_sequence(registry, element_type, bytes)?))
    }

    fn schema(&self, registry: &TypeRegistry, ty: &CqlType) -> Result<Value> {
        let CqlType::Set(element_type) = ty else {
            return Err(mismatch("set", ty));
        };
        Ok(json!({"type": "array", "items": registry.schema(element_type)?}))
    }
}

pub struct MapDeserializer;

impl TypeDeserializer for MapDeserializer {
    fn deserialize(&self, registry: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let CqlType::Map(key_type, value_type) = ty else {
            return Err(mismatch("map", ty));
        };
        if bytes.is_empty() {
            return Ok(CellValue::Map(Vec::new()));
        }

        let mut reader = ElementReader::new(bytes);
        let count = reader.read_count()?;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = decode_element(registry, key_type, reader.read_element()?)?;
            let value = decode_element(registry, value_type, reader.read_element()?)?;
            entries.push((key, value));
        }
        reader.finish()?;
        Ok(CellValue::Map(entries))
    }

    // Map keys are always rendered as JSON object keys
    fn schema(&self, registry: &TypeRegistry, ty: &CqlType) -> Result<Value> {
        let CqlType::Map(_, value_type) = ty else {
            return Err(mismatch("map", ty));
        };
        Ok(json!({"type": "map", "values": registry.schema(value_type)?}))
    }
}

pub struct TupleDeserializer;

impl TypeDeserializer for TupleDeserializer {
    fn deserialize(&self, registry: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let CqlType::Tuple(component_types) = ty else {
            return Err(mismatch("tuple", ty));
        };
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }

        // Missing trailing components are null
        let mut reader = ElementReader::new(bytes);
        let mut components = Vec::with_capacity(component_types.len());
        for component_type in component_types {
            if reader.is_empty() {
                components.push(CellValue::Null);
                continue;
            }
            components.push(decode_element(registry, component_type, reader.read_element()?)?);
        }
        reader.finish()?;
        Ok(CellValue::Tuple(components))
    }

    fn schema(&self, registry: &TypeRegistry, ty: &CqlType) -> Result<Value> {
        let CqlType::Tuple(component_types) = ty else {
            return Err(mismatch("tuple", ty));
        };
        let fields = component_types
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Ok(json!({
                    "name": format!("field{}", i + 1),
                    "type": ["null", registry.schema(t)?],
                    "default": null
                }))
            })
            .collect::<Result<Vec<Value>>>()?;
        Ok(json!({"type": "record", "name": "tuple", "fields": fields}))
    }
}
