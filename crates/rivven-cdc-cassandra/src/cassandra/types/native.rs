//! Native (scalar) CQL type deserializers.
//!
//! Cells use Cassandra's big-endian value encoding. An empty buffer for a
//! fixed-width type is an empty value and decodes to [`CellValue::Null`].

use super::cql_type::CqlType;
use super::registry::{TypeDeserializer, TypeRegistry};
use super::value::CellValue;
use crate::common::{CdcError, Result};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;
/// CQL `date` stores days as an unsigned int centered on the epoch.
const DATE_EPOCH_OFFSET: i64 = 1 << 31;

fn fixed<const N: usize>(ty: &CqlType, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        CdcError::decode(format!(
            "{} expects {} bytes, got {}",
            ty,
            N,
            bytes.len()
        ))
    })
}

pub struct BooleanDeserializer;

impl TypeDeserializer for BooleanDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        let [b] = fixed::<1>(ty, bytes)?;
        Ok(CellValue::Boolean(b != 0))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "boolean"}))
    }
}

/// Signed big-endian integer of a fixed width (tinyint .. bigint, counter).
pub struct IntegerDeserializer {
    width: usize,
}

impl IntegerDeserializer {
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl TypeDeserializer for IntegerDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        let value = match self.width {
            1 => i8::from_be_bytes(fixed(ty, bytes)?) as i64,
            2 => i16::from_be_bytes(fixed(ty, bytes)?) as i64,
            4 => i32::from_be_bytes(fixed(ty, bytes)?) as i64,
            8 => i64::from_be_bytes(fixed(ty, bytes)?),
            other => {
                return Err(CdcError::invalid_state(format!(
                    "Unsupported integer width {}",
                    other
                )))
            }
        };
        Ok(CellValue::Int(value))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(if self.width > 4 {
            json!({"type": "long"})
        } else {
            json!({"type": "int"})
        })
    }
}

pub struct FloatDeserializer;

impl TypeDeserializer for FloatDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        Ok(CellValue::Float(f32::from_be_bytes(fixed(ty, bytes)?) as f64))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "float"}))
    }
}

pub struct DoubleDeserializer;

impl TypeDeserializer for DoubleDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        Ok(CellValue::Float(f64::from_be_bytes(fixed(ty, bytes)?)))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "double"}))
    }
}

/// `text`/`varchar` (UTF-8) and `ascii`.
pub struct TextDeserializer {
    ascii_only: bool,
}

impl TextDeserializer {
    pub fn utf8() -> Self {
        Self { ascii_only: false }
    }

    pub fn ascii() -> Self {
        Self { ascii_only: true }
    }
}

impl TypeDeserializer for TextDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if self.ascii_only && !bytes.is_ascii() {
            return Err(CdcError::decode(format!("{} value is not ASCII", ty)));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CdcError::decode(format!("{} value is not UTF-8: {}", ty, e)))?;
        Ok(CellValue::Text(text.to_string()))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string"}))
    }
}

pub struct BlobDeserializer;

impl TypeDeserializer for BlobDeserializer {
    fn deserialize(&self, _: &TypeRegistry, _: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        Ok(CellValue::Blob(bytes.to_vec()))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "bytes"}))
    }
}

/// `varint`: two's complement big-endian integer of any length.
pub struct VarintDeserializer;

impl TypeDeserializer for VarintDeserializer {
    fn deserialize(&self, _: &TypeRegistry, _: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        Ok(CellValue::Varint(varint_to_string(bytes)))
    }

    // Rendered as a string to preserve precision
    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string"}))
    }
}

/// `decimal`: 4-byte scale followed by a varint unscaled value.
pub struct DecimalDeserializer;

impl TypeDeserializer for DecimalDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        if bytes.len() < 5 {
            return Err(CdcError::decode(format!(
                "{} expects at least 5 bytes, got {}",
                ty,
                bytes.len()
            )));
        }
        let scale = i32::from_be_bytes(fixed(ty, &bytes[..4])?);
        let unscaled = varint_to_string(&bytes[4..]);
        Ok(CellValue::Decimal(apply_scale(&unscaled, scale)))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string"}))
    }
}

/// `date`: unsigned days with the epoch at 2^31.
pub struct DateDeserializer;

impl TypeDeserializer for DateDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        let raw = u32::from_be_bytes(fixed(ty, bytes)?) as i64;
        let days_from_ce = raw - DATE_EPOCH_OFFSET + UNIX_EPOCH_DAYS_FROM_CE;
        let date = i32::try_from(days_from_ce)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .ok_or_else(|| CdcError::decode(format!("date out of range: {}", raw)))?;
        Ok(CellValue::Date(date))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string", "format": "date"}))
    }
}

/// `time`: nanoseconds since midnight.
pub struct TimeDeserializer;

impl TypeDeserializer for TimeDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        Ok(CellValue::Time(i64::from_be_bytes(fixed(ty, bytes)?)))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "long"}))
    }
}

/// `timestamp`: milliseconds since the epoch.
pub struct TimestampDeserializer;

impl TypeDeserializer for TimestampDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        Ok(CellValue::Timestamp(i64::from_be_bytes(fixed(ty, bytes)?)))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "long", "logicalType": "timestamp-millis"}))
    }
}

pub struct InetDeserializer;

impl TypeDeserializer for InetDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let addr = match bytes.len() {
            0 => return Ok(CellValue::Null),
            4 => IpAddr::V4(Ipv4Addr::from(fixed::<4>(ty, bytes)?)),
            16 => IpAddr::V6(Ipv6Addr::from(fixed::<16>(ty, bytes)?)),
            n => {
                return Err(CdcError::decode(format!(
                    "inet expects 4 or 16 bytes, got {}",
                    n
                )))
            }
        };
        Ok(CellValue::Inet(addr))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string"}))
    }
}

/// `duration`: three zig-zag vints (months, days, nanoseconds).
pub struct DurationDeserializer;

impl TypeDeserializer for DurationDeserializer {
    fn deserialize(&self, _: &TypeRegistry, _: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        if bytes.is_empty() {
            return Ok(CellValue::Null);
        }
        let mut cursor = bytes;
        let months = read_signed_vint(&mut cursor)?;
        let days = read_signed_vint(&mut cursor)?;
        let nanos = read_signed_vint(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CdcError::decode(format!(
                "duration has {} trailing bytes",
                cursor.len()
            )));
        }

        let months = i32::try_from(months)
            .map_err(|_| CdcError::decode(format!("duration months out of range: {}", months)))?;
        let days = i32::try_from(days)
            .map_err(|_| CdcError::decode(format!("duration days out of range: {}", days)))?;
        Ok(CellValue::Duration {
            months,
            days,
            nanos,
        })
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({
            "type": "record",
            "name": "duration",
            "fields": [
                {"name": "months", "type": "int"},
                {"name": "days", "type": "int"},
                {"name": "nanoseconds", "type": "long"}
            ]
        }))
    }
}

/// Native UUID decoding: 16 raw bytes, or the textual layout
/// (hyphenated or simple hex) as ASCII.
pub struct UuidDeserializer;

impl TypeDeserializer for UuidDeserializer {
    fn deserialize(&self, _: &TypeRegistry, ty: &CqlType, bytes: &[u8]) -> Result<CellValue> {
        let uuid = match bytes.len() {
            0 => return Ok(CellValue::Null),
            16 => Uuid::from_slice(bytes)
                .map_err(|e| CdcError::decode(format!("{}: {}", ty, e)))?,
            _ => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| CdcError::decode(format!("{} is neither binary nor text", ty)))?;
                Uuid::parse_str(text.trim())
                    .map_err(|e| CdcError::decode(format!("{}: {}", ty, e)))?
            }
        };
        Ok(CellValue::Uuid(uuid))
    }

    fn schema(&self, _: &TypeRegistry, _: &CqlType) -> Result<Value> {
        Ok(json!({"type": "string", "logicalType": "uuid"}))
    }
}

/// Render a two's complement big-endian integer as a decimal string.
pub(crate) fn varint_to_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let negative = bytes[0] & 0x80 != 0;
    let mut magnitude = bytes.to_vec();
    if negative {
        for b in magnitude.iter_mut() {
            *b = !*b;
        }
        for b in magnitude.iter_mut().rev() {
            let (sum, overflow) = b.overflowing_add(1);
            *b = sum;
            if !overflow {
                break;
            }
        }
    }

    let mut digits = Vec::new();
    while magnitude.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for b in magnitude.iter_mut() {
            let current = (remainder << 8) | *b as u32;
            *b = (current / 10) as u8;
            remainder = current % 10;
        }
        digits.push(b'0' + remainder as u8);
    }
    if digits.is_empty() {
        digits.push(b'0');
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Largest scale magnitude rendered in plain notation.
const MAX_PLAIN_SCALE: u32 = 1_000;

/// Place the decimal point of `unscaled * 10^-scale`.
///
/// Scales past [`MAX_PLAIN_SCALE`] in either direction are rendered as
/// `<unscaled>E<exponent>`, so output size never depends on the scale.
fn apply_scale(unscaled: &str, scale: i32) -> String {
    let (sign, digits) = match unscaled.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", unscaled),
    };

    if scale.unsigned_abs() > MAX_PLAIN_SCALE {
        return format!("{}{}E{:+}", sign, digits, -i64::from(scale));
    }

    if scale <= 0 {
        if digits == "0" {
            return "0".to_string();
        }
        let zeros = "0".repeat(scale.unsigned_abs() as usize);
        return format!("{}{}{}", sign, digits, zeros);
    }

    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
    } else {
        digits.to_string()
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, int_part, frac_part)
}

/// Cassandra unsigned vint: the count of leading one bits in the first byte
/// is the number of extra bytes that follow.
fn read_unsigned_vint(cursor: &mut &[u8]) -> Result<u64> {
    let (&first, rest) = cursor
        .split_first()
        .ok_or_else(|| CdcError::decode("truncated vint"))?;
    let extra = first.leading_ones() as usize;
    if rest.len() < extra {
        return Err(CdcError::decode("truncated vint"));
    }

    let mut value = if extra >= 8 {
        0
    } else {
        (first & (0xFF >> extra)) as u64
    };
    for &b in &rest[..extra] {
        value = (value << 8) | b as u64;
    }
    *cursor = &rest[extra..];
    Ok(value)
}

fn read_signed_vint(cursor: &mut &[u8]) -> Result<i64> {
    let n = read_unsigned_vint(cursor)?;
    Ok((n >> 1) as i64 ^ -((n & 1) as i64))
}
