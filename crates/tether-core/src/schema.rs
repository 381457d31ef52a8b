//! # Definition Layer
//!
//! Declarative metadata describing each entity type: its attributes and its
//! relationships (kind, target type, inverse, async flag, polymorphism).
//!
//! Definitions come from an external `DefinitionSource` and are resolved
//! once per type, validated, and cached by the `Schema`. Inverse pairing
//! is computed on demand from the cached definitions.

use crate::TetherError;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// RELATIONSHIP METADATA
// =============================================================================

/// The two relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
}

impl RelationshipKind {
    /// Wire-style name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongsTo",
            Self::HasMany => "hasMany",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a relationship finds its inverse on the related type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Inverse {
    /// Look for the unique relationship on the target type pointing back.
    #[default]
    Inferred,
    /// Explicitly one-way.
    None,
    /// Explicit inverse key on the target type.
    Named(String),
}

/// Cardinality of a relationship combined with its inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    OneToNone,
    ManyToNone,
}

/// Definition of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    /// Local attribute name.
    pub name: String,
    /// Transform kind; `None` means values pass through untouched.
    pub kind: Option<String>,
    /// Options forwarded to the transform on every call.
    pub options: Map<String, Value>,
}

impl AttributeDef {
    /// Create an attribute without a transform kind.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            options: Map::new(),
        }
    }

    /// Set the transform kind.
    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Add a transform option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Definition of a single relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    /// Local relationship key.
    pub name: String,
    pub kind: RelationshipKind,
    /// Declared related type (the base type when polymorphic).
    pub target_type: String,
    pub inverse: Inverse,
    /// Async relationships fetch on access; sync ones error when unloaded.
    pub is_async: bool,
    /// The concrete related type is resolved per reference at runtime.
    pub is_polymorphic: bool,
}

impl RelationshipDef {
    /// A belongsTo whose target type is inferred from the key.
    #[must_use]
    pub fn belongs_to(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            target_type: name.clone(),
            name,
            kind: RelationshipKind::BelongsTo,
            inverse: Inverse::Inferred,
            is_async: true,
            is_polymorphic: false,
        }
    }

    /// A hasMany whose target type is the singularized key.
    #[must_use]
    pub fn has_many(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            target_type: singularize(&name),
            name,
            kind: RelationshipKind::HasMany,
            inverse: Inverse::Inferred,
            is_async: true,
            is_polymorphic: false,
        }
    }

    /// Set the related type explicitly.
    #[must_use]
    pub fn target(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self
    }

    /// Name the inverse key on the related type.
    #[must_use]
    pub fn inverse(mut self, key: impl Into<String>) -> Self {
        self.inverse = Inverse::Named(key.into());
        self
    }

    /// Declare the relationship one-way.
    #[must_use]
    pub fn no_inverse(mut self) -> Self {
        self.inverse = Inverse::None;
        self
    }

    /// Make the relationship synchronous.
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.is_async = false;
        self
    }

    /// Mark the relationship polymorphic.
    #[must_use]
    pub fn polymorphic(mut self) -> Self {
        self.is_polymorphic = true;
        self
    }
}

fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if name.ends_with("ss") {
        return name.to_string();
    }
    name.strip_suffix('s').unwrap_or(name).to_string()
}

// =============================================================================
// TYPE DEFINITION
// =============================================================================

/// All attributes and relationships of one entity type, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeDef {
    pub name: String,
    pub attributes: Vec<AttributeDef>,
    pub relationships: Vec<RelationshipDef>,
}

impl TypeDef {
    /// Create an empty type definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add an attribute definition.
    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add a pass-through attribute by name.
    #[must_use]
    pub fn attr(self, name: impl Into<String>) -> Self {
        self.attribute(AttributeDef::new(name))
    }

    /// Add a relationship definition.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Find an attribute by local name.
    #[must_use]
    pub fn attribute_named(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Find a relationship by local key.
    #[must_use]
    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Whether any attribute or relationship uses this name.
    #[must_use]
    pub fn has_member(&self, name: &str) -> bool {
        self.attribute_named(name).is_some() || self.relationship_named(name).is_some()
    }

    /// Check member names are unique and do not shadow the id.
    pub fn validate(&self) -> Result<(), TetherError> {
        let mut seen = std::collections::BTreeSet::new();
        let names = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.relationships.iter().map(|r| r.name.as_str()));
        for name in names {
            if name == "id" {
                return Err(TetherError::Schema(format!(
                    "'id' is reserved and cannot be declared as a member of '{}'",
                    self.name
                )));
            }
            if !seen.insert(name) {
                return Err(TetherError::Schema(format!(
                    "'{}' declares '{}' more than once",
                    self.name, name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// DEFINITION SOURCES
// =============================================================================

/// External lookup of type definitions by name.
pub trait DefinitionSource {
    /// Resolve a type definition, or `None` if the type is unknown.
    fn resolve(&self, type_name: &str) -> Option<TypeDef>;
}

impl DefinitionSource for BTreeMap<String, TypeDef> {
    fn resolve(&self, type_name: &str) -> Option<TypeDef> {
        self.get(type_name).cloned()
    }
}

/// In-memory collection of type definitions.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    types: BTreeMap<String, TypeDef>,
}

impl Definitions {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type definition, replacing any previous one with the same name.
    #[must_use]
    pub fn define(mut self, type_def: TypeDef) -> Self {
        self.insert(type_def);
        self
    }

    /// Add a type definition in place.
    pub fn insert(&mut self, type_def: TypeDef) {
        self.types.insert(type_def.name.clone(), type_def);
    }

    /// Names of all defined types in order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl DefinitionSource for Definitions {
    fn resolve(&self, type_name: &str) -> Option<TypeDef> {
        self.types.get(type_name).cloned()
    }
}

// =============================================================================
// SCHEMA (cached resolution)
// =============================================================================

/// The inverse side of a relationship on a concrete related type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverseRef {
    pub type_name: String,
    pub key: String,
    pub kind: RelationshipKind,
}

/// Cached, validated view over a `DefinitionSource`.
pub struct Schema {
    source: Box<dyn DefinitionSource>,
    cache: RefCell<BTreeMap<String, Arc<TypeDef>>>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("cached", &self.cache.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Schema {
    /// Wrap a definition source.
    pub fn new(source: impl DefinitionSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    /// Resolve a type definition, validating it on first use.
    pub fn type_def(&self, type_name: &str) -> Result<Arc<TypeDef>, TetherError> {
        if let Some(cached) = self.cache.borrow().get(type_name) {
            return Ok(Arc::clone(cached));
        }
        let resolved = self
            .source
            .resolve(type_name)
            .ok_or_else(|| TetherError::UnknownType(type_name.to_string()))?;
        resolved.validate()?;
        let resolved = Arc::new(resolved);
        self.cache
            .borrow_mut()
            .insert(type_name.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Look up a relationship definition.
    pub fn relationship(&self, type_name: &str, key: &str) -> Result<RelationshipDef, TetherError> {
        self.type_def(type_name)?
            .relationship_named(key)
            .cloned()
            .ok_or_else(|| TetherError::UnknownRelationship {
                type_name: type_name.to_string(),
                key: key.to_string(),
            })
    }

    /// Inverse of `type_name.key` on its declared target type.
    pub fn inverse_for(&self, type_name: &str, key: &str) -> Result<Option<InverseRef>, TetherError> {
        let def = self.relationship(type_name, key)?;
        self.inverse_on(type_name, &def, &def.target_type)
    }

    /// Inverse of `def` (declared on `source_type`) on a concrete related type.
    ///
    /// Polymorphic references may point at a type other than the declared
    /// target, so inverse pairing is resolved against the actual related type.
    pub fn inverse_on(
        &self,
        source_type: &str,
        def: &RelationshipDef,
        related_type: &str,
    ) -> Result<Option<InverseRef>, TetherError> {
        match &def.inverse {
            Inverse::None => Ok(None),
            Inverse::Named(key) => {
                let related = self.type_def(related_type)?;
                let inverse = related.relationship_named(key).ok_or_else(|| {
                    TetherError::Schema(format!(
                        "inverse '{}' declared on {}.{} does not exist on '{}'",
                        key, source_type, def.name, related_type
                    ))
                })?;
                Ok(Some(InverseRef {
                    type_name: related_type.to_string(),
                    key: inverse.name.clone(),
                    kind: inverse.kind,
                }))
            }
            Inverse::Inferred => {
                let related = self.type_def(related_type)?;
                let mut candidates = related.relationships.iter().filter(|r| {
                    r.target_type == source_type
                        && !(related_type == source_type && r.name == def.name)
                        && match &r.inverse {
                            Inverse::Inferred => true,
                            Inverse::None => false,
                            Inverse::Named(back) => *back == def.name,
                        }
                });
                let first = candidates.next();
                if candidates.next().is_some() {
                    tracing::debug!(
                        source = source_type,
                        key = %def.name,
                        related = related_type,
                        "ambiguous inverse, treating relationship as one-way"
                    );
                    return Ok(None);
                }
                Ok(first.map(|r| InverseRef {
                    type_name: related_type.to_string(),
                    key: r.name.clone(),
                    kind: r.kind,
                }))
            }
        }
    }

    /// Cardinality of `type_name.key` combined with its inverse.
    pub fn relationship_type(&self, type_name: &str, key: &str) -> Result<RelationshipType, TetherError> {
        let def = self.relationship(type_name, key)?;
        let inverse = self.inverse_on(type_name, &def, &def.target_type)?;
        Ok(match (def.kind, inverse.map(|i| i.kind)) {
            (RelationshipKind::BelongsTo, None) => RelationshipType::OneToNone,
            (RelationshipKind::HasMany, None) => RelationshipType::ManyToNone,
            (RelationshipKind::BelongsTo, Some(RelationshipKind::BelongsTo)) => {
                RelationshipType::OneToOne
            }
            (RelationshipKind::HasMany, Some(RelationshipKind::BelongsTo)) => {
                RelationshipType::ManyToOne
            }
            (RelationshipKind::BelongsTo, Some(RelationshipKind::HasMany)) => {
                RelationshipType::OneToMany
            }
            (RelationshipKind::HasMany, Some(RelationshipKind::HasMany)) => {
                RelationshipType::ManyToMany
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> Schema {
        Schema::new(
            Definitions::new()
                .define(
                    TypeDef::new("post")
                        .attr("title")
                        .relationship(RelationshipDef::has_many("comments")),
                )
                .define(
                    TypeDef::new("comment")
                        .attr("body")
                        .relationship(RelationshipDef::belongs_to("post")),
                )
                .define(
                    TypeDef::new("tag").relationship(RelationshipDef::has_many("tags").no_inverse()),
                ),
        )
    }

    #[test]
    fn has_many_target_is_singularized() {
        assert_eq!(RelationshipDef::has_many("comments").target_type, "comment");
        assert_eq!(RelationshipDef::has_many("categories").target_type, "category");
        assert_eq!(RelationshipDef::has_many("address").target_type, "address");
        assert_eq!(RelationshipDef::belongs_to("post").target_type, "post");
    }

    #[test]
    fn relationships_default_async_with_inferred_inverse() {
        let def = RelationshipDef::belongs_to("post");
        assert!(def.is_async);
        assert!(!def.is_polymorphic);
        assert_eq!(def.inverse, Inverse::Inferred);
        assert!(!def.sync().is_async);
    }

    #[test]
    fn inferred_inverse_pairs_both_sides() {
        let schema = blog();
        let inverse = schema.inverse_for("comment", "post").expect("resolve");
        assert_eq!(
            inverse,
            Some(InverseRef {
                type_name: "post".to_string(),
                key: "comments".to_string(),
                kind: RelationshipKind::HasMany,
            })
        );
        let back = schema.inverse_for("post", "comments").expect("resolve");
        assert_eq!(back.map(|i| i.key), Some("post".to_string()));
    }

    #[test]
    fn explicit_none_disables_pairing() {
        let schema = Schema::new(
            Definitions::new()
                .define(
                    TypeDef::new("post")
                        .relationship(RelationshipDef::has_many("comments").no_inverse()),
                )
                .define(TypeDef::new("comment").relationship(RelationshipDef::belongs_to("post"))),
        );
        assert_eq!(schema.inverse_for("post", "comments").expect("resolve"), None);
        // The other side cannot pair with a relationship that opted out.
        assert_eq!(schema.inverse_for("comment", "post").expect("resolve"), None);
    }

    #[test]
    fn self_referential_relationship_does_not_pair_with_itself() {
        let schema = blog();
        assert_eq!(schema.inverse_for("tag", "tags").expect("resolve"), None);
    }

    #[test]
    fn named_inverse_must_exist() {
        let schema = Schema::new(
            Definitions::new()
                .define(TypeDef::new("post").relationship(RelationshipDef::has_many("comments").inverse("article")))
                .define(TypeDef::new("comment")),
        );
        assert!(matches!(
            schema.inverse_for("post", "comments"),
            Err(TetherError::Schema(_))
        ));
    }

    #[test]
    fn relationship_types_follow_inverse_kind() {
        let schema = blog();
        assert_eq!(
            schema.relationship_type("post", "comments").expect("type"),
            RelationshipType::ManyToOne
        );
        assert_eq!(
            schema.relationship_type("comment", "post").expect("type"),
            RelationshipType::OneToMany
        );
        assert_eq!(
            schema.relationship_type("tag", "tags").expect("type"),
            RelationshipType::ManyToNone
        );
    }

    #[test]
    fn reserved_and_duplicate_members_rejected() {
        let schema = Schema::new(
            Definitions::new()
                .define(TypeDef::new("bad").attr("id"))
                .define(TypeDef::new("twice").attr("name").attr("name")),
        );
        assert!(matches!(schema.type_def("bad"), Err(TetherError::Schema(_))));
        assert!(matches!(schema.type_def("twice"), Err(TetherError::Schema(_))));
        assert!(matches!(
            schema.type_def("missing"),
            Err(TetherError::UnknownType(_))
        ));
    }

    #[test]
    fn type_defs_are_cached() {
        let schema = blog();
        let a = schema.type_def("post").expect("post");
        let b = schema.type_def("post").expect("post");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
