//! Canonical value representation shared by criteria, insert/update payloads,
//! bound parameters, and result rows.
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Ordered string-keyed map used for criteria objects and data payloads.
pub type ValueMap = IndexMap<String, Value>;

/// Typed value tagged with explicit type information so the wire format remains
/// unambiguous when criteria are persisted or logged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload represented as bytes.
    Bytes(Vec<u8>),
    /// Nanoseconds since Unix epoch in UTC.
    #[serde(deserialize_with = "serde_datetime::deserialize")]
    DateTime(i128),
    /// Regular expression pattern with its flags.
    Regex(RegexPattern),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Ordered map of values. Criteria objects and data payloads use this shape.
    Object(ValueMap),
    /// Reference to a persisted entity, identified by its primary key.
    Entity(EntityRef),
    /// Raw SQL fragment inlined verbatim instead of being bound as a parameter.
    Raw(String),
}

/// Regular expression literal as supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexPattern {
    /// Pattern source without delimiters.
    pub source: String,
    /// Flag characters such as `i`.
    #[serde(default)]
    pub flags: String,
}

impl RegexPattern {
    /// Creates a pattern without flags.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: String::new(),
        }
    }

    /// Attaches flag characters to the pattern.
    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }
}

/// Entity instance reduced to the parts the compiler needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity name as registered in metadata.
    pub entity: String,
    /// Primary key values in primary-key declaration order.
    pub pk: Vec<Value>,
}

impl EntityRef {
    /// Reference with a single-column primary key.
    pub fn new(entity: impl Into<String>, pk: impl Into<Value>) -> Self {
        Self {
            entity: entity.into(),
            pk: vec![pk.into()],
        }
    }

    /// Reference with a composite primary key.
    pub fn composite<I, V>(entity: impl Into<String>, pk: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            entity: entity.into(),
            pk: pk.into_iter().map(Into::into).collect(),
        }
    }

    /// Scalar primary key, or a tuple for composite keys.
    pub fn pk_value(&self) -> Value {
        match self.pk.as_slice() {
            [single] => single.clone(),
            many => Value::Array(many.to_vec()),
        }
    }
}

impl Value {
    /// Returns true for values that can stand in for a primary key.
    pub fn is_primary_key_like(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Bytes(_)
        )
    }

    /// Returns true when the value is neither a list nor a map.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Returns true for non-empty arrays whose items are all primary-key shaped.
    pub fn is_key_tuple(&self) -> bool {
        match self {
            Value::Array(items) => {
                !items.is_empty() && items.iter().all(|v| v.is_primary_key_like())
            }
            _ => false,
        }
    }

    /// Returns true when every key of the map is a comparison operator.
    ///
    /// Non-object values and empty maps return false.
    pub fn is_operator_object(&self) -> bool {
        match self {
            Value::Object(map) => {
                !map.is_empty() && map.keys().all(|k| super::operator::is_comparison_key(k))
            }
            _ => false,
        }
    }

    /// Borrows the inner map.
    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Borrows the inner list.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrows the inner string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bool value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Builds an object from key/value pairs.
    pub fn object<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds an array from anything convertible into values.
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Wraps a raw SQL fragment.
    pub fn raw(sql: impl Into<String>) -> Self {
        Value::Raw(sql.into())
    }

    /// Formats a datetime value as RFC 3339, if this is one and it is in range.
    pub fn datetime_rfc3339(&self) -> Option<String> {
        let Value::DateTime(nanos) = self else {
            return None;
        };
        OffsetDateTime::from_unix_timestamp_nanos(*nanos)
            .ok()
            .and_then(|dt| dt.format(&Rfc3339).ok())
    }

    /// Converts the value into JSON. Datetimes become RFC 3339 strings and
    /// entity references collapse to their primary key.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) | Value::Raw(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::DateTime(nanos) => self
                .datetime_rfc3339()
                .map(Json::String)
                .unwrap_or_else(|| Json::String(nanos.to_string())),
            Value::Regex(re) => Json::String(re.source.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Entity(entity) => entity.pk_value().to_json(),
        }
    }
}

/// Renders the value as an inline SQL literal. Used for debug output only.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(true) => f.write_str("TRUE"),
            Value::Bool(false) => f.write_str("FALSE"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(bytes) => {
                f.write_str("X'")?;
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str("'")
            }
            Value::DateTime(nanos) => match self.datetime_rfc3339() {
                Some(text) => write!(f, "'{text}'"),
                None => write!(f, "{nanos}"),
            },
            Value::Regex(re) => write!(f, "'{}'", re.source.replace('\'', "''")),
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "'{}'", self.to_json().to_string().replace('\'', "''")),
            Value::Entity(entity) => write!(f, "{}", entity.pk_value()),
            Value::Raw(sql) => f.write_str(sql),
        }
    }
}

mod serde_datetime {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i128, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DateTimeVisitor;

        impl<'de> Visitor<'de> for DateTimeVisitor {
            type Value = i128;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("nanoseconds since Unix epoch or an RFC 3339 timestamp")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value as i128)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value as i128)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if let Ok(nanos) = value.parse::<i128>() {
                    return Ok(nanos);
                }
                super::parse_rfc3339(value)
                    .ok_or_else(|| E::custom(format!("invalid datetime literal '{value}'")))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(DateTimeVisitor)
    }
}

fn parse_rfc3339(text: &str) -> Option<i128> {
    OffsetDateTime::parse(text, &Rfc3339)
        .ok()
        .map(OffsetDateTime::unix_timestamp_nanos)
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<RegexPattern> for Value {
    fn from(value: RegexPattern) -> Self {
        Value::Regex(value)
    }
}

impl From<EntityRef> for Value {
    fn from(value: EntityRef) -> Self {
        Value::Entity(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::DateTime(value.unix_timestamp_nanos())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<ValueMap> for Value {
    fn from(value: ValueMap) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// JSON criteria map onto values structurally. Integral numbers become
/// [`Value::Int`], other numbers [`Value::Float`].
impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        Value::from(value.clone())
    }
}
