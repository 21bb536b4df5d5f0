use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the store-assigned unique identifier
pub const FIELD_ID: &str = "id";
/// Field holding the email of the identity that created the record
pub const FIELD_CREATED_BY: &str = "created_by";
/// Server-assigned creation timestamp
pub const FIELD_CREATED_DATE: &str = "created_date";
/// Server-assigned last modification timestamp
pub const FIELD_UPDATED_DATE: &str = "updated_date";

/// An entity record, a flat mapping of field names to values.
///
/// Records are opaque to this layer: nested arrays and objects (e.g. a list
/// of line items) are passed through as they are, without any validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the record identifier in its textual form.
    ///
    /// Numeric identifiers (e.g. `bigserial` primary keys) are rendered as
    /// strings, any other type is considered a missing id.
    pub fn id(&self) -> Option<String> {
        match self.0.get(FIELD_ID)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Builder-style variant of [`Record::insert`]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Overwrites every field of `self` with the fields found in `patch`.
    pub fn merge(&mut self, patch: Record) {
        for (k, v) in patch.0 {
            self.0.insert(k, v);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Object(value.0)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    /// Only JSON objects can be turned into records, the rejected value is
    /// handed back on failure.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
