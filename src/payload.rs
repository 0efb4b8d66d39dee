//! Payload values carried by triggered events.
//!
//! A payload is an owned, property-list-compatible snapshot of application
//! data taken at trigger time. It never aliases live state, so it can be
//! buffered while an observation is paused and written to the durable store
//! for reliable delivery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Possible values an event payload can hold.
///
/// # Examples
///
/// ```
/// use watchpost::Payload;
///
/// let count = Payload::from(3);
/// let label = Payload::from("ready");
///
/// assert_eq!(count.as_int(), Some(3));
/// assert_eq!(label.as_string(), Some("ready"));
/// assert!(Payload::default().is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Data(Vec<u8>),
    Date(DateTime<Utc>),
    Array(Vec<Payload>),
    Dictionary(BTreeMap<String, Payload>),
}

impl Payload {
    /// Snapshot any serializable value as a payload.
    ///
    /// # Errors
    /// Returns the serializer error when `value` has no JSON-compatible
    /// form (for example a map with non-string keys).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::from)
    }

    /// True for [`Payload::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value if this is a bool.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value if this is an int.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value if this is a float; ints widen to `f64`.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The value if this is a string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The bytes if this is a data payload.
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(v) => Some(v),
            _ => None,
        }
    }

    /// The value if this is a date.
    pub const fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// The elements if this is an array.
    pub fn as_array(&self) -> Option<&[Payload]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// The entries if this is a dictionary.
    pub const fn as_dictionary(&self) -> Option<&BTreeMap<String, Payload>> {
        match self {
            Self::Dictionary(v) => Some(v),
            _ => None,
        }
    }

    /// True if the payload survives a trip through the durable store.
    ///
    /// JSON has no form for NaN or infinity, so a payload holding a
    /// non-finite float anywhere inside it is not storable.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            Self::Array(items) => items.iter().all(Self::is_storable),
            Self::Dictionary(map) => map.values().all(Self::is_storable),
            _ => true,
        }
    }

    /// Look up a key when this payload is a dictionary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_dictionary().and_then(|d| d.get(key))
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Data(_) => "data",
            Self::Date(_) => "date",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
        }
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Data(v) => write!(f, "data[{}]", v.len()),
            Self::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Array(v) => write!(f, "array[{}]", v.len()),
            Self::Dictionary(v) => write!(f, "dictionary[{}]", v.len()),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(v),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Dictionary(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Payload {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Data(v)
    }
}

impl From<DateTime<Utc>> for Payload {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(v: Vec<Payload>) -> Self {
        Self::Array(v)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
