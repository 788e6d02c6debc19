//! CQL column types and their registry tags.

use crate::common::{CdcError, Result};
use std::fmt;
use std::str::FromStr;

/// A CQL column type as declared in the table schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Date,
    Decimal,
    Double,
    Duration,
    Float,
    Inet,
    Int,
    Smallint,
    Text,
    Time,
    Timestamp,
    Timeuuid,
    Tinyint,
    Uuid,
    Varint,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Tuple(Vec<CqlType>),
    /// Custom marshal classes and user-defined types, kept by name.
    Custom(String),
}

/// Registry key: the base kind of a [`CqlType`], without type parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Date,
    Decimal,
    Double,
    Duration,
    Float,
    Inet,
    Int,
    Smallint,
    Text,
    Time,
    Timestamp,
    Timeuuid,
    Tinyint,
    Uuid,
    Varint,
    List,
    Set,
    Map,
    Tuple,
    Custom(String),
}

impl CqlType {
    /// The registry tag for this type.
    pub fn tag(&self) -> TypeTag {
        match self {
            CqlType::Ascii => TypeTag::Ascii,
            CqlType::Bigint => TypeTag::Bigint,
            CqlType::Blob => TypeTag::Blob,
            CqlType::Boolean => TypeTag::Boolean,
            CqlType::Counter => TypeTag::Counter,
            CqlType::Date => TypeTag::Date,
            CqlType::Decimal => TypeTag::Decimal,
            CqlType::Double => TypeTag::Double,
            CqlType::Duration => TypeTag::Duration,
            CqlType::Float => TypeTag::Float,
            CqlType::Inet => TypeTag::Inet,
            CqlType::Int => TypeTag::Int,
            CqlType::Smallint => TypeTag::Smallint,
            CqlType::Text => TypeTag::Text,
            CqlType::Time => TypeTag::Time,
            CqlType::Timestamp => TypeTag::Timestamp,
            CqlType::Timeuuid => TypeTag::Timeuuid,
            CqlType::Tinyint => TypeTag::Tinyint,
            CqlType::Uuid => TypeTag::Uuid,
            CqlType::Varint => TypeTag::Varint,
            CqlType::List(_) => TypeTag::List,
            CqlType::Set(_) => TypeTag::Set,
            CqlType::Map(_, _) => TypeTag::Map,
            CqlType::Tuple(_) => TypeTag::Tuple,
            CqlType::Custom(name) => TypeTag::Custom(name.clone()),
        }
    }

    /// True for list, set, map and tuple.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            CqlType::List(_) | CqlType::Set(_) | CqlType::Map(_, _) | CqlType::Tuple(_)
        )
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Ascii => f.write_str("ascii"),
            CqlType::Bigint => f.write_str("bigint"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::Counter => f.write_str("counter"),
            CqlType::Date => f.write_str("date"),
            CqlType::Decimal => f.write_str("decimal"),
            CqlType::Double => f.write_str("double"),
            CqlType::Duration => f.write_str("duration"),
            CqlType::Float => f.write_str("float"),
            CqlType::Inet => f.write_str("inet"),
            CqlType::Int => f.write_str("int"),
            CqlType::Smallint => f.write_str("smallint"),
            CqlType::Text => f.write_str("text"),
            CqlType::Time => f.write_str("time"),
            CqlType::Timestamp => f.write_str("timestamp"),
            CqlType::Timeuuid => f.write_str("timeuuid"),
            CqlType::Tinyint => f.write_str("tinyint"),
            CqlType::Uuid => f.write_str("uuid"),
            CqlType::Varint => f.write_str("varint"),
            CqlType::List(inner) => write!(f, "list<{}>", inner),
            CqlType::Set(inner) => write!(f, "set<{}>", inner),
            CqlType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            CqlType::Tuple(items) => {
                f.write_str("tuple<")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(">")
            }
            CqlType::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for CqlType {
    type Err = CdcError;

    /// Parse a CQL type declaration such as `map<text, frozen<list<int>>>`.
    ///
    /// `frozen<...>` is transparent. Unknown names become [`CqlType::Custom`]
    /// rather than errors; the registry decides whether they are supported.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CdcError::schema("Empty CQL type"));
        }

        if let Some((name, args)) = split_generic(s)? {
            let arity_error = |expected: &str| {
                CdcError::schema(format!("{} expects {} type argument(s): {}", name, expected, s))
            };
            return match name.to_ascii_lowercase().as_str() {
                "frozen" => match args.as_slice() {
                    [inner] => inner.parse(),
                    _ => Err(arity_error("1")),
                },
                "list" => match args.as_slice() {
                    [inner] => Ok(CqlType::List(Box::new(inner.parse()?))),
                    _ => Err(arity_error("1")),
                },
                "set" => match args.as_slice() {
                    [inner] => Ok(CqlType::Set(Box::new(inner.parse()?))),
                    _ => Err(arity_error("1")),
                },
                "map" => match args.as_slice() {
                    [k, v] => Ok(CqlType::Map(Box::new(k.parse()?), Box::new(v.parse()?))),
                    _ => Err(arity_error("2")),
                },
                "tuple" => {
                    if args.is_empty() {
                        return Err(arity_error("at least 1"));
                    }
                    let items = args
                        .iter()
                        .map(|a| a.parse())
                        .collect::<Result<Vec<CqlType>>>()?;
                    Ok(CqlType::Tuple(items))
                }
                _ => Ok(CqlType::Custom(s.to_string())),
            };
        }

        Ok(match s.to_ascii_lowercase().as_str() {
            "ascii" => CqlType::Ascii,
            "bigint" => CqlType::Bigint,
            "blob" => CqlType::Blob,
            "boolean" => CqlType::Boolean,
            "counter" => CqlType::Counter,
            "date" => CqlType::Date,
            "decimal" => CqlType::Decimal,
            "double" => CqlType::Double,
            "duration" => CqlType::Duration,
            "float" => CqlType::Float,
            "inet" => CqlType::Inet,
            "int" => CqlType::Int,
            "smallint" => CqlType::Smallint,
            "text" | "varchar" => CqlType::Text,
            "time" => CqlType::Time,
            "timestamp" => CqlType::Timestamp,
            "timeuuid" => CqlType::Timeuuid,
            "tinyint" => CqlType::Tinyint,
            "uuid" => CqlType::Uuid,
            "varint" => CqlType::Varint,
            _ => CqlType::Custom(s.to_string()),
        })
    }
}

/// Split `name<a, b<c, d>>` into `("name", ["a", "b<c, d>"])`.
fn split_generic(s: &str) -> Result<Option<(&str, Vec<&str>)>> {
    let Some(open) = s.find('<') else {
        return Ok(None);
    };
    if !s.ends_with('>') {
        return Err(CdcError::schema(format!("Unbalanced type declaration: {}", s)));
    }

    let name = s[..open].trim();
    let inner = &s[open + 1..s.len() - 1];

    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        if depth < 0 {
            return Err(CdcError::schema(format!("Unbalanced type declaration: {}", s)));
        }
    }
    if depth != 0 {
        return Err(CdcError::schema(format!("Unbalanced type declaration: {}", s)));
    }

    let last = inner[start..].trim();
    if !last.is_empty() {
        args.push(last);
    }
    if args.iter().any(|a| a.is_empty()) {
        return Err(CdcError::schema(format!("Empty type argument in: {}", s)));
    }

    Ok(Some((name, args)))
}
