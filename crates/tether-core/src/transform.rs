//! # Attribute Transforms
//!
//! Attribute values cross the wire boundary through a `Transform` looked up
//! by the attribute's declared kind. The registry is supplied by the
//! embedding application; the core owns no primitive implementations.

use crate::TetherError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A bidirectional value transform.
pub trait Transform {
    /// Local value -> wire value.
    fn serialize(&self, value: &Value, options: &Map<String, Value>) -> Result<Value, TetherError>;

    /// Wire value -> local value.
    fn deserialize(&self, value: &Value, options: &Map<String, Value>)
    -> Result<Value, TetherError>;
}

/// Leaves values untouched in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn serialize(&self, value: &Value, _options: &Map<String, Value>) -> Result<Value, TetherError> {
        Ok(value.clone())
    }

    fn deserialize(
        &self,
        value: &Value,
        _options: &Map<String, Value>,
    ) -> Result<Value, TetherError> {
        Ok(value.clone())
    }
}

/// Explicit kind -> transform registry.
#[derive(Clone, Default)]
pub struct Transforms {
    by_kind: BTreeMap<String, Arc<dyn Transform>>,
}

impl fmt::Debug for Transforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transforms")
            .field("kinds", &self.by_kind.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Transforms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform for a kind, replacing any previous one.
    #[must_use]
    pub fn register(mut self, kind: impl Into<String>, transform: impl Transform + 'static) -> Self {
        self.by_kind.insert(kind.into(), Arc::new(transform));
        self
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    fn lookup(&self, kind: &str) -> Result<&Arc<dyn Transform>, TetherError> {
        self.by_kind.get(kind).ok_or_else(|| TetherError::Transform {
            kind: kind.to_string(),
            message: "no transform registered for this kind".to_string(),
        })
    }

    /// Serialize through `kind`, or pass through when the attribute has none.
    pub fn serialize(
        &self,
        kind: Option<&str>,
        value: &Value,
        options: &Map<String, Value>,
    ) -> Result<Value, TetherError> {
        match kind {
            Some(kind) => self.lookup(kind)?.serialize(value, options),
            None => Ok(value.clone()),
        }
    }

    /// Deserialize through `kind`, or pass through when the attribute has none.
    pub fn deserialize(
        &self,
        kind: Option<&str>,
        value: &Value,
        options: &Map<String, Value>,
    ) -> Result<Value, TetherError> {
        match kind {
            Some(kind) => self.lookup(kind)?.deserialize(value, options),
            None => Ok(value.clone()),
        }
    }
}
