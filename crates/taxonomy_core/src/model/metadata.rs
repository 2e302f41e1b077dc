//! Typed metadata attached to taxonomies, categories and classifications.
//!
//! Values are a closed set of tagged scalars and every namespace declares
//! which keys may appear, with which kind, through a [`MetadataSchema`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static METADATA_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid metadata key regex"));

/// Kind tag of one metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Text,
    Integer,
    Float,
    Boolean,
}

impl MetadataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &MetadataValue) -> bool {
        matches!(
            (self, value),
            (Self::Text, MetadataValue::Text(_))
                | (Self::Integer, MetadataValue::Integer(_))
                | (Self::Float, MetadataValue::Float(_))
                | (Self::Float, MetadataValue::Integer(_))
                | (Self::Boolean, MetadataValue::Boolean(_))
        )
    }
}

/// One tagged metadata value, serialized as `{"type": ..., "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl MetadataValue {
    pub fn kind(&self) -> MetadataKind {
        match self {
            Self::Text(_) => MetadataKind::Text,
            Self::Integer(_) => MetadataKind::Integer,
            Self::Float(_) => MetadataKind::Float,
            Self::Boolean(_) => MetadataKind::Boolean,
        }
    }
}

/// Metadata validation and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    InvalidKey(String),
    UnknownField(String),
    KindMismatch {
        field: String,
        expected: MetadataKind,
        actual: MetadataKind,
    },
    MissingRequired(String),
    Malformed(String),
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid metadata key `{key}`"),
            Self::UnknownField(key) => write!(f, "metadata field `{key}` is not declared"),
            Self::KindMismatch {
                field,
                expected,
                actual,
            } => write!(
                f,
                "metadata field `{field}` expects {}, got {}",
                expected.as_str(),
                actual.as_str()
            ),
            Self::MissingRequired(key) => write!(f, "metadata field `{key}` is required"),
            Self::Malformed(message) => write!(f, "malformed metadata: {message}"),
        }
    }
}

impl Error for MetadataError {}

fn check_key(key: &str) -> Result<(), MetadataError> {
    if METADATA_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(MetadataError::InvalidKey(key.to_string()))
    }
}

/// Key/value metadata map with deterministic key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one value, rejecting malformed keys.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: MetadataValue,
    ) -> Result<Option<MetadataValue>, MetadataError> {
        let key = key.into();
        check_key(&key)?;
        Ok(self.0.insert(key, value))
    }

    /// Builder form of [`Metadata::insert`].
    pub fn with(mut self, key: &str, value: MetadataValue) -> Result<Self, MetadataError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Result<String, MetadataError> {
        serde_json::to_string(self).map_err(|err| MetadataError::Malformed(err.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, MetadataError> {
        let parsed: Self =
            serde_json::from_str(raw).map_err(|err| MetadataError::Malformed(err.to_string()))?;
        for key in parsed.0.keys() {
            check_key(key)?;
        }
        Ok(parsed)
    }
}

/// Declaration of one metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFieldSpec {
    pub kind: MetadataKind,
    #[serde(default)]
    pub required: bool,
}

/// Namespace-level schema for metadata maps.
///
/// An empty schema admits only empty metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataSchema(BTreeMap<String, MetadataFieldSpec>);

impl MetadataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(
        mut self,
        key: &str,
        kind: MetadataKind,
        required: bool,
    ) -> Result<Self, MetadataError> {
        check_key(key)?;
        self.0
            .insert(key.to_string(), MetadataFieldSpec { kind, required });
        Ok(self)
    }

    pub fn field(&self, key: &str) -> Option<&MetadataFieldSpec> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks declared keys, kinds and required fields.
    pub fn validate(&self, metadata: &Metadata) -> Result<(), MetadataError> {
        for (key, value) in metadata.iter() {
            let spec = self
                .0
                .get(key)
                .ok_or_else(|| MetadataError::UnknownField(key.clone()))?;
            if !spec.kind.accepts(value) {
                return Err(MetadataError::KindMismatch {
                    field: key.clone(),
                    expected: spec.kind,
                    actual: value.kind(),
                });
            }
        }
        for (key, spec) in &self.0 {
            if spec.required && metadata.get(key).is_none() {
                return Err(MetadataError::MissingRequired(key.clone()));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, MetadataError> {
        serde_json::to_string(self).map_err(|err| MetadataError::Malformed(err.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, MetadataError> {
        let parsed: Self =
            serde_json::from_str(raw).map_err(|err| MetadataError::Malformed(err.to_string()))?;
        for key in parsed.0.keys() {
            check_key(key)?;
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::{Metadata, MetadataError, MetadataKind, MetadataSchema, MetadataValue};

    fn venue_schema() -> MetadataSchema {
        MetadataSchema::new()
            .with_field("capacity", MetadataKind::Integer, true)
            .unwrap()
            .with_field("rating", MetadataKind::Float, false)
            .unwrap()
    }

    #[test]
    fn values_use_tagged_wire_shape() {
        let metadata = Metadata::new()
            .with("capacity", MetadataValue::Integer(1200))
            .unwrap();
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["capacity"]["type"], "integer");
        assert_eq!(json["capacity"]["value"], 1200);
    }

    #[test]
    fn rejects_uppercase_keys() {
        let err = Metadata::new()
            .with("Capacity", MetadataValue::Integer(1))
            .unwrap_err();
        assert_eq!(err, MetadataError::InvalidKey("Capacity".to_string()));
    }

    #[test]
    fn schema_rejects_undeclared_field() {
        let metadata = Metadata::new()
            .with("capacity", MetadataValue::Integer(10))
            .unwrap()
            .with("color", MetadataValue::Text("red".to_string()))
            .unwrap();
        let err = venue_schema().validate(&metadata).unwrap_err();
        assert_eq!(err, MetadataError::UnknownField("color".to_string()));
    }

    #[test]
    fn schema_requires_mandatory_field() {
        let err = venue_schema().validate(&Metadata::new()).unwrap_err();
        assert_eq!(err, MetadataError::MissingRequired("capacity".to_string()));
    }

    #[test]
    fn float_fields_accept_integers_but_not_text() {
        let schema = venue_schema();
        let ok = Metadata::new()
            .with("capacity", MetadataValue::Integer(10))
            .unwrap()
            .with("rating", MetadataValue::Integer(4))
            .unwrap();
        assert!(schema.validate(&ok).is_ok());

        let bad = Metadata::new()
            .with("capacity", MetadataValue::Text("ten".to_string()))
            .unwrap();
        assert!(matches!(
            schema.validate(&bad),
            Err(MetadataError::KindMismatch { .. })
        ));
    }

    #[test]
    fn from_json_rejects_invalid_keys() {
        let err = Metadata::from_json(r#"{"Bad Key":{"type":"boolean","value":true}}"#)
            .unwrap_err();
        assert_eq!(err, MetadataError::InvalidKey("Bad Key".to_string()));
    }
}
