//! # Configuration
//!
//! The CLI reads its schema and wire mapping from a TOML file.
//!
//! ```toml
//! fixtures = "fixtures"
//!
//! [types.post.attributes]
//! title = "string"
//! published_at = { kind = "date", options = { format = "iso" } }
//!
//! [types.post.relationships]
//! comments = { kind = "hasMany", inverse = "post" }
//! author = { kind = "belongsTo", type = "user", sync = true }
//!
//! [serializers.application]
//! key_style = "underscore"
//!
//! [serializers.post]
//! primary_key = "_id"
//! attrs = { title = "post_title", comments = { embedded = "always" } }
//! ```
//!
//! `[serializers.application]` is the default; per-type serializers layer
//! their settings over it.

use crate::error::AppError;
use heck::{ToLowerCamelCase, ToShoutySnakeCase, ToSnakeCase};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tether_core::{
    Adapter, AttrsMap, AttributeDef, Definitions, IdentityTransform, KeyMethod, RelationshipDef,
    RelationshipKind, Serializer, Serializers, StoreConfig, Transforms, TypeDef,
};

/// Name of the serializer every other serializer inherits from.
pub const APPLICATION_SERIALIZER: &str = "application";

/// Fixture directory used when the config does not name one.
pub const DEFAULT_FIXTURES: &str = "fixtures";

// =============================================================================
// RAW CONFIG
// =============================================================================

/// Parsed `tether.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    /// Fixture root, relative to the config file.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
    #[serde(default)]
    pub types: IndexMap<String, TypeConfig>,
    #[serde(default)]
    pub serializers: BTreeMap<String, SerializerConfig>,
    /// Directory the config was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// `[types.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeConfig>,
    #[serde(default)]
    pub relationships: IndexMap<String, RelationshipConfig>,
}

/// An attribute is either its transform kind or a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttributeConfig {
    Kind(String),
    Table {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        options: Map<String, Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KindConfig {
    BelongsTo,
    HasMany,
}

/// `inverse = "key"` names it; `inverse = false` makes the relationship one-way.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum InverseConfig {
    Named(String),
    Enabled(bool),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipConfig {
    pub kind: KindConfig,
    /// Related type; inferred from the key when absent.
    #[serde(default, rename = "type")]
    pub target: Option<String>,
    #[serde(default)]
    pub inverse: Option<InverseConfig>,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub polymorphic: bool,
}

/// Wire key casing applied by the key hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStyle {
    /// Keys are the local names.
    Identity,
    /// `firstName` -> `first_name`
    Underscore,
    /// `first_name` -> `firstName`
    Camel,
    /// `firstName` -> `FIRST_NAME`
    Upper,
}

impl KeyStyle {
    #[must_use]
    pub fn apply(self, name: &str) -> String {
        match self {
            Self::Identity => name.to_string(),
            Self::Underscore => name.to_snake_case(),
            Self::Camel => name.to_lower_camel_case(),
            Self::Upper => name.to_shouty_snake_case(),
        }
    }
}

/// `[serializers.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerializerConfig {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub key_style: Option<KeyStyle>,
    #[serde(default)]
    pub attrs: AttrsMap,
}

// =============================================================================
// LOADING
// =============================================================================

impl TetherConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let mut config = Self::parse(&text)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::debug!(path = %path.display(), types = config.types.len(), "loaded config");
        Ok(config)
    }

    /// Parse config text; relative paths resolve against the working directory.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let config: Self = toml::from_str(text)?;
        config.check_serializer_names()?;
        Ok(config)
    }

    fn check_serializer_names(&self) -> Result<(), AppError> {
        for name in self.serializers.keys() {
            if name != APPLICATION_SERIALIZER && !self.types.contains_key(name) {
                return Err(AppError::Config(format!(
                    "serializer '{}' does not match any declared type",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Fixture root resolved against the config's directory.
    #[must_use]
    pub fn fixtures_dir(&self) -> PathBuf {
        let dir = self
            .fixtures
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURES));
        if dir.is_absolute() {
            dir
        } else {
            self.base_dir.join(dir)
        }
    }

    // ===== DEFINITIONS =====

    /// Build validated type definitions.
    pub fn definitions(&self) -> Result<Definitions, AppError> {
        let mut definitions = Definitions::new();
        for (name, type_config) in &self.types {
            let type_def = type_config.to_type_def(name);
            type_def.validate()?;
            definitions.insert(type_def);
        }
        self.check_targets(&definitions)?;
        Ok(definitions)
    }

    fn check_targets(&self, definitions: &Definitions) -> Result<(), AppError> {
        let known: Vec<&str> = definitions.type_names().collect();
        for (name, type_config) in &self.types {
            for (key, relationship) in &type_config.relationships {
                let target = relationship.to_def(key).target_type;
                if !relationship.polymorphic && !known.contains(&target.as_str()) {
                    return Err(AppError::Config(format!(
                        "{}.{} points at undeclared type '{}'",
                        name, key, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the serializer registry, layering each type over `application`.
    pub fn serializers(&self) -> Serializers {
        let default_config = self.serializers.get(APPLICATION_SERIALIZER);
        let default = default_config
            .map(|config| config.apply(Serializer::new()))
            .unwrap_or_default();

        let mut serializers = Serializers::new(default.clone());
        for (name, config) in &self.serializers {
            if name == APPLICATION_SERIALIZER {
                continue;
            }
            serializers = serializers.register(name.clone(), config.apply(default.clone()));
        }
        serializers
    }

    /// Pass-through transforms for every declared attribute kind.
    pub fn transforms(&self) -> Transforms {
        let kinds: std::collections::BTreeSet<&str> = self
            .types
            .values()
            .flat_map(|t| t.attributes.values())
            .filter_map(AttributeConfig::kind)
            .collect();
        kinds
            .into_iter()
            .fold(Transforms::new(), |transforms, kind| {
                transforms.register(kind, IdentityTransform)
            })
    }

    /// Everything a `Store` needs, wired to `adapter`.
    pub fn store_config(&self, adapter: impl Adapter + 'static) -> Result<StoreConfig, AppError> {
        Ok(StoreConfig::new(self.definitions()?, adapter)
            .serializers(self.serializers())
            .transforms(self.transforms()))
    }
}

impl TypeConfig {
    fn to_type_def(&self, name: &str) -> TypeDef {
        let with_attributes = self
            .attributes
            .iter()
            .fold(TypeDef::new(name), |type_def, (attr, config)| {
                type_def.attribute(config.to_def(attr))
            });
        self.relationships
            .iter()
            .fold(with_attributes, |type_def, (key, config)| {
                type_def.relationship(config.to_def(key))
            })
    }
}

impl AttributeConfig {
    fn kind(&self) -> Option<&str> {
        match self {
            Self::Kind(kind) => Some(kind.as_str()),
            Self::Table { kind, .. } => kind.as_deref(),
        }
    }

    fn to_def(&self, name: &str) -> AttributeDef {
        let def = AttributeDef::new(name);
        let def = match self.kind() {
            Some(kind) => def.kind(kind),
            None => def,
        };
        match self {
            Self::Kind(_) => def,
            Self::Table { options, .. } => options
                .iter()
                .fold(def, |def, (key, value)| def.option(key.clone(), value.clone())),
        }
    }
}

impl RelationshipConfig {
    fn to_def(&self, key: &str) -> RelationshipDef {
        let mut def = match self.kind {
            KindConfig::BelongsTo => RelationshipDef::belongs_to(key),
            KindConfig::HasMany => RelationshipDef::has_many(key),
        };
        if let Some(target) = &self.target {
            def = def.target(target.clone());
        }
        match &self.inverse {
            Some(InverseConfig::Named(inverse)) => def = def.inverse(inverse.clone()),
            Some(InverseConfig::Enabled(false)) => def = def.no_inverse(),
            Some(InverseConfig::Enabled(true)) | None => {}
        }
        if self.sync {
            def = def.sync();
        }
        if self.polymorphic {
            def = def.polymorphic();
        }
        def
    }
}

impl SerializerConfig {
    /// Layer this config over `base`.
    fn apply(&self, base: Serializer) -> Serializer {
        let mut serializer = base.with_attrs(self.attrs.clone());
        if let Some(primary_key) = &self.primary_key {
            serializer = serializer.primary_key(primary_key.clone());
        }
        if let Some(style) = self.key_style {
            serializer = serializer
                .key_for_attribute(move |name: &str, _: KeyMethod| style.apply(name))
                .key_for_relationship(move |name: &str, _: RelationshipKind, _: KeyMethod| {
                    style.apply(name)
                });
        }
        serializer
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::DefinitionSource;

    const BLOG: &str = r#"
        [types.post.attributes]
        title = "string"
        published_at = { kind = "date", options = { format = "iso" } }

        [types.post.relationships]
        comments = { kind = "hasMany" }
        author = { kind = "belongsTo", type = "user", inverse = false, sync = true }

        [types.comment.attributes]
        body = {}

        [types.comment.relationships]
        post = { kind = "belongsTo" }

        [types.user.attributes]
        name = "string"

        [serializers.application]
        key_style = "underscore"

        [serializers.post]
        primary_key = "_id"
        attrs = { title = "post_title" }
    "#;

    #[test]
    fn builds_definitions_in_declaration_order() {
        let config = TetherConfig::parse(BLOG).expect("parse");
        let definitions = config.definitions().expect("definitions");
        let post = definitions.resolve("post").expect("post");

        let attrs: Vec<&str> = post.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(attrs, vec!["title", "published_at"]);
        assert_eq!(post.attributes[1].kind.as_deref(), Some("date"));
        assert_eq!(post.attributes[1].options.get("format"), Some(&Value::from("iso")));

        let author = post.relationship_named("author").expect("author");
        assert_eq!(author.kind, RelationshipKind::BelongsTo);
        assert_eq!(author.target_type, "user");
        assert!(!author.is_async);
        assert_eq!(author.inverse, tether_core::Inverse::None);

        let comments = post.relationship_named("comments").expect("comments");
        assert_eq!(comments.target_type, "comment");
        assert!(comments.is_async);
    }

    #[test]
    fn type_serializers_inherit_application() {
        let config = TetherConfig::parse(BLOG).expect("parse");
        let serializers = config.serializers();

        let post = serializers.serializer_for("post");
        assert_eq!(post.primary_key, "_id");
        assert_eq!(post.attribute_key("title", KeyMethod::Serialize), "post_title");
        assert_eq!(post.attribute_key("publishedAt", KeyMethod::Serialize), "published_at");

        let comment = serializers.serializer_for("comment");
        assert_eq!(comment.primary_key, "id");
    }

    #[test]
    fn key_styles() {
        assert_eq!(KeyStyle::Identity.apply("firstName"), "firstName");
        assert_eq!(KeyStyle::Underscore.apply("firstName"), "first_name");
        assert_eq!(KeyStyle::Camel.apply("first_name"), "firstName");
        assert_eq!(KeyStyle::Upper.apply("firstName"), "FIRST_NAME");
    }

    #[test]
    fn registers_declared_kinds() {
        let config = TetherConfig::parse(BLOG).expect("parse");
        let transforms = config.transforms();
        assert!(transforms.contains("string"));
        assert!(transforms.contains("date"));
        assert!(!transforms.contains("number"));
    }

    #[test]
    fn rejects_serializer_for_unknown_type() {
        let err = TetherConfig::parse("[serializers.ghost]\nprimary_key = \"_id\"\n")
            .expect_err("unknown type");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn rejects_undeclared_target() {
        let config = TetherConfig::parse(
            "[types.post.relationships]\nauthor = { kind = \"belongsTo\" }\n",
        )
        .expect("parse");
        assert!(matches!(config.definitions(), Err(AppError::Config(_))));
    }

    #[test]
    fn rejects_reserved_id_member() {
        let config = TetherConfig::parse("[types.post.attributes]\nid = \"string\"\n").expect("parse");
        assert!(matches!(config.definitions(), Err(AppError::Core(_))));
    }

    #[test]
    fn fixtures_resolve_against_config_dir() {
        let mut config = TetherConfig::parse("fixtures = \"data\"\n").expect("parse");
        config.base_dir = PathBuf::from("/srv/app");
        assert_eq!(config.fixtures_dir(), PathBuf::from("/srv/app/data"));
    }
}
