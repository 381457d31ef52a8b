//! Per-member overrides: the `attrs` table.
//!
//! Accepted entry forms:
//!
//! ```text
//! "wire_key"                                   rename
//! { key = "wire_key" }                         rename
//! { serialize = false }                        never emit
//! { serialize = true }                         always emit (hasMany)
//! { embedded = "always" }                      embed both directions
//! { serialize = "records", deserialize = "ids" }
//! ```
//!
//! The same forms deserialize from JSON and TOML.

use serde::Deserialize;
use std::collections::BTreeMap;

/// How nested relationship data is treated on one side of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    /// References only.
    Ids,
    /// Full nested records.
    Records,
}

/// Serialization policy for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializePolicy {
    /// `serialize: false`
    Never,
    /// `serialize: true`
    Always,
    /// `serialize: "ids"`
    Ids,
    /// `serialize: "records"` or `embedded: "always"`
    Records,
}

/// One parsed `attrs` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawAttrOption")]
pub struct AttrOption {
    /// Wire key override.
    pub key: Option<String>,
    pub serialize: Option<SerializePolicy>,
    pub deserialize: Option<EmbedMode>,
}

impl AttrOption {
    /// Rename on the wire.
    #[must_use]
    pub fn rename(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// `{ embedded: "always" }`
    #[must_use]
    pub fn embedded_always() -> Self {
        Self {
            serialize: Some(SerializePolicy::Records),
            deserialize: Some(EmbedMode::Records),
            ..Self::default()
        }
    }

    /// `{ serialize: false }`
    #[must_use]
    pub fn never_serialize() -> Self {
        Self {
            serialize: Some(SerializePolicy::Never),
            ..Self::default()
        }
    }

    /// `{ serialize: true }`
    #[must_use]
    pub fn always_serialize() -> Self {
        Self {
            serialize: Some(SerializePolicy::Always),
            ..Self::default()
        }
    }

    /// Keep the policy, change the wire key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Nested payloads are normalized as separate records.
    #[must_use]
    pub fn embeds_on_normalize(&self) -> bool {
        self.deserialize == Some(EmbedMode::Records)
    }

    /// Nested records are emitted on serialize.
    #[must_use]
    pub fn embeds_on_serialize(&self) -> bool {
        self.serialize == Some(SerializePolicy::Records)
    }
}

// ===== RAW FORMS =====

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAttrOption {
    Rename(String),
    Table(RawTable),
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    serialize: Option<RawSerialize>,
    #[serde(default)]
    deserialize: Option<EmbedMode>,
    #[serde(default)]
    embedded: Option<EmbeddedFlag>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSerialize {
    Flag(bool),
    Mode(EmbedMode),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum EmbeddedFlag {
    Always,
}

impl From<RawAttrOption> for AttrOption {
    fn from(raw: RawAttrOption) -> Self {
        match raw {
            RawAttrOption::Rename(key) => Self::rename(key),
            RawAttrOption::Table(table) => {
                let mut option = match table.embedded {
                    Some(EmbeddedFlag::Always) => Self::embedded_always(),
                    None => Self::default(),
                };
                option.key = table.key;
                if let Some(serialize) = table.serialize {
                    option.serialize = Some(match serialize {
                        RawSerialize::Flag(false) => SerializePolicy::Never,
                        RawSerialize::Flag(true) => SerializePolicy::Always,
                        RawSerialize::Mode(EmbedMode::Ids) => SerializePolicy::Ids,
                        RawSerialize::Mode(EmbedMode::Records) => SerializePolicy::Records,
                    });
                }
                if table.deserialize.is_some() {
                    option.deserialize = table.deserialize;
                }
                option
            }
        }
    }
}

// =============================================================================
// ATTRS MAP
// =============================================================================

/// Local member name -> override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AttrsMap(BTreeMap<String, AttrOption>);

impl AttrsMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous one for the member.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, option: AttrOption) -> Self {
        self.0.insert(name.into(), option);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrOption> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrOption)> {
        self.0.iter().map(|(name, option)| (name.as_str(), option))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer `self` over `base`: entries in `self` win per member.
    #[must_use]
    pub fn merged_over(&self, base: &AttrsMap) -> AttrsMap {
        let mut merged = base.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        AttrsMap(merged)
    }
}
