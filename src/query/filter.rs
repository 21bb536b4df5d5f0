//! # Filter and Sort Primitives
//!
//! -   _Field_: a validated column identifier ([`Field`]). Only plain identifiers
//!     are accepted since field names end up quoted inside generated SQL.
//!
//! -   _Value_: the unit of data ([`Value`]), a scalar that can be compared for equality.
//!
//! -   _Filter_: a [`FilterSpec`], field-equals-value constraints implicitly AND-combined.
//!     Null values are kept out of the spec: they are skipped, never turned into an
//!     `IS NULL` predicate.
//!
//! -   _Sort_: a [`SortSpec`], a single field with a direction, encoded as `field`
//!     (ascending) or `-field` (descending).

use std::collections::BTreeMap;
use std::str::FromStr;

use super::Error;

/// Integer value type alias
pub type Integer = i64;
/// Floating point value type alias
pub type Float = f64;
/// Literal type alias
pub type Text = String;

const DESCENDING_PREFIX: char = '-';

/// A scalar value usable in an equality predicate.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Value {
    Integer(Integer),
    Float(Float),
    Text(Text),
    Boolean(bool),
}

impl Value {
    /// Converts a JSON value into a filter value.
    ///
    /// Returns `Ok(None)` for `null` (the entry must be skipped) and an error for
    /// arrays and objects.
    pub fn try_from_json(field: &str, v: serde_json::Value) -> Result<Option<Self>, Error> {
        let value = match v {
            serde_json::Value::Null => return Ok(None),
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(Error::NonScalarValue {
                        field: field.to_owned(),
                    });
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                return Err(Error::NonScalarValue {
                    field: field.to_owned(),
                });
            }
        };
        Ok(Some(value))
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Text(v) => serde_json::Value::from(v.as_str()),
            Self::Boolean(v) => serde_json::Value::from(*v),
        }
    }

    /// Returns true if the JSON value `other` is equal to this value.
    ///
    /// Numbers are compared numerically so that `1` matches `1.0`.
    pub fn matches(&self, other: &serde_json::Value) -> bool {
        match (self, other) {
            (Self::Integer(a), serde_json::Value::Number(b)) => b
                .as_i64()
                .map(|b| *a == b)
                .unwrap_or_else(|| b.as_f64() == Some(*a as f64)),
            (Self::Float(a), serde_json::Value::Number(b)) => b.as_f64() == Some(*a),
            (Self::Text(a), serde_json::Value::String(b)) => a == b,
            (Self::Boolean(a), serde_json::Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// A column identifier, guaranteed to match `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Field(String);

impl Field {
    pub fn try_new(v: impl Into<String>) -> Result<Self, Error> {
        let v = v.into();
        let mut chars = v.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };

        if !valid {
            return Err(Error::BadField { field: v });
        }
        Ok(Self(v))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Equality constraints, AND-combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec(BTreeMap<Field, Value>);

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality constraint on `field`, a [`None`] value is skipped.
    pub fn equals<V: Into<Value>>(mut self, field: &str, value: Option<V>) -> Result<Self, Error> {
        let field = Field::try_new(field)?;
        if let Some(value) = value {
            self.0.insert(field, value.into());
        }
        Ok(self)
    }

    /// Builds a filter spec from a JSON object, skipping `null` entries.
    pub fn from_json(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, Error> {
        let mut spec = Self::new();
        for (k, v) in map {
            let field = Field::try_new(k)?;
            if let Some(value) = Value::try_from_json(field.name(), v)? {
                spec.0.insert(field, value);
            }
        }
        Ok(spec)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.0.iter()
    }
}

impl IntoIterator for FilterSpec {
    type Item = (Field, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Field, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Single-key ordering.
///
/// Rows sharing the same sort key value come back in an unspecified order,
/// there is no implicit tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: Field,
    pub descending: bool,
}

impl SortSpec {
    pub fn asc(field: &str) -> Result<Self, Error> {
        Ok(Self {
            field: Field::try_new(field)?,
            descending: false,
        })
    }

    pub fn desc(field: &str) -> Result<Self, Error> {
        Ok(Self {
            field: Field::try_new(field)?,
            descending: true,
        })
    }
}

impl FromStr for SortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(DESCENDING_PREFIX) {
            Some(field) => Self::desc(field),
            None => Self::asc(s),
        }
    }
}

impl std::fmt::Display for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.descending {
            write!(f, "{}{}", DESCENDING_PREFIX, self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_spec_parsing() {
        let s: SortSpec = "-created_date".parse().unwrap();
        assert_eq!(s.field.name(), "created_date");
        assert!(s.descending);

        let s: SortSpec = "title".parse().unwrap();
        assert_eq!(s.field.name(), "title");
        assert!(!s.descending);

        assert_eq!(s.to_string(), "title");
        assert_eq!(SortSpec::desc("due").unwrap().to_string(), "-due");

        // a single prefix is stripped, anything else is not an identifier
        assert!("--title".parse::<SortSpec>().is_err());
        assert!("".parse::<SortSpec>().is_err());
        assert!("-".parse::<SortSpec>().is_err());
    }

    #[test]
    fn field_validation() {
        assert!(Field::try_new("created_by").is_ok());
        assert!(Field::try_new("_x1").is_ok());
        assert!(Field::try_new("1x").is_err());
        assert!(Field::try_new("title\"; drop table tasks; --").is_err());
        assert!(Field::try_new("a.b").is_err());
    }

    #[test]
    fn nulls_are_skipped() {
        let raw = json!({"status": "open", "assignee": null, "priority": 2});
        let spec = FilterSpec::from_json(raw.as_object().unwrap().clone()).unwrap();

        assert_eq!(spec.len(), 2);
        let fields: Vec<&str> = spec.iter().map(|(f, _)| f.name()).collect();
        assert_eq!(fields, vec!["priority", "status"]);

        let spec = FilterSpec::new()
            .equals("status", Some("open"))
            .unwrap()
            .equals::<&str>("assignee", None)
            .unwrap();
        assert_eq!(spec.len(), 1);
    }

    #[test]
    fn non_scalar_filters_rejected() {
        let raw = json!({"tags": ["a"]});
        let err = FilterSpec::from_json(raw.as_object().unwrap().clone()).unwrap_err();
        assert!(matches!(err, Error::NonScalarValue { .. }));
    }

    #[test]
    fn value_matching() {
        assert!(Value::Integer(1).matches(&json!(1)));
        assert!(Value::Integer(1).matches(&json!(1.0)));
        assert!(Value::Float(2.5).matches(&json!(2.5)));
        assert!(Value::from("a").matches(&json!("a")));
        assert!(!Value::from("1").matches(&json!(1)));
        assert!(Value::Boolean(false).matches(&json!(false)));
        assert!(!Value::Boolean(false).matches(&json!(null)));
    }
}
