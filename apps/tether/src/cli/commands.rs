//! # CLI Command Implementations
//!
//! Each command returns the JSON it would print, so commands can be
//! driven directly from tests.

use crate::config::TetherConfig;
use crate::error::AppError;
use crate::fixtures::FixtureAdapter;
use futures::future::try_join_all;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use tether_core::{
    Record, RelationshipKind, RequestKind, Schema, SerializeOptions, Store, TetherError,
};

// =============================================================================
// PAYLOAD FILES
// =============================================================================

/// Maximum payload file size (16 MB).
pub const MAX_PAYLOAD_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Resolve a payload path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, AppError> {
    let canonical = path.canonicalize().map_err(|e| {
        AppError::Config(format!("invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(AppError::Config(format!(
            "path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Read a JSON payload file.
pub fn read_payload(path: &Path) -> Result<Value, AppError> {
    let canonical = validate_file_path(path)?;
    let size = std::fs::metadata(&canonical)?.len();
    if size > MAX_PAYLOAD_FILE_SIZE {
        return Err(AppError::Config(format!(
            "payload size {} bytes exceeds maximum allowed {} bytes",
            size, MAX_PAYLOAD_FILE_SIZE
        )));
    }
    let text = std::fs::read_to_string(&canonical)?;
    Ok(serde_json::from_str(&text)?)
}

/// A fresh store over the config's schema and fixture directory.
pub fn open_store(config: &TetherConfig) -> Result<Store, AppError> {
    let adapter = FixtureAdapter::new(config.fixtures_dir());
    Ok(Store::new(config.store_config(adapter)?))
}

fn render(record: &Record) -> Result<Value, AppError> {
    Ok(Value::Object(record.serialize(SerializeOptions::with_id())?))
}

// =============================================================================
// NORMALIZE COMMAND
// =============================================================================

/// Normalize a response without applying it; warnings are logged and listed
/// under `warnings`.
pub fn cmd_normalize(
    config: &TetherConfig,
    type_name: &str,
    payload: &Value,
    kind: RequestKind,
) -> Result<Value, AppError> {
    let store = open_store(config)?;
    let document = store.normalize_response(type_name, payload, kind)?;

    for warning in &document.warnings {
        tracing::warn!(type_name = %warning.type_name, key = %warning.key, "{}", warning.message);
    }

    let mut output = document.to_value();
    if let Value::Object(map) = &mut output {
        map.insert("warnings".to_string(), serde_json::to_value(&document.warnings)?);
    }
    Ok(output)
}

// =============================================================================
// SERIALIZE COMMAND
// =============================================================================

/// Push a single-resource payload, then serialize the primary record.
pub fn cmd_serialize(
    config: &TetherConfig,
    type_name: &str,
    payload: &Value,
    include_id: bool,
) -> Result<Value, AppError> {
    let store = open_store(config)?;
    let record = store
        .push_payload(type_name, payload, RequestKind::FindRecord)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            TetherError::InvalidPayload(format!("payload has no primary '{}' record", type_name))
        })?;
    Ok(Value::Object(record.serialize(SerializeOptions { include_id })?))
}

// =============================================================================
// ERRORS COMMAND
// =============================================================================

pub fn cmd_errors(config: &TetherConfig, type_name: &str, payload: &Value) -> Result<Value, AppError> {
    let store = open_store(config)?;
    Ok(Value::Object(store.extract_errors(type_name, payload)?))
}

// =============================================================================
// FETCH COMMAND
// =============================================================================

async fn load_included(record: &Record, key: &str) -> Result<(String, Vec<Record>), AppError> {
    let def = record.store().schema().relationship(record.type_name(), key)?;
    let related = match def.kind {
        RelationshipKind::BelongsTo => record.belongs_to_async(key).await?.into_iter().collect(),
        RelationshipKind::HasMany => record.has_many_async(key).await?,
    };
    Ok((key.to_string(), related))
}

/// Find a record and resolve the named relationships concurrently.
pub async fn cmd_fetch(
    config: &TetherConfig,
    type_name: &str,
    id: &str,
    include: &[String],
) -> Result<Value, AppError> {
    let store = open_store(config)?;
    let record = store.find_record(type_name, id).await?;
    let loaded = try_join_all(include.iter().map(|key| load_included(&record, key))).await?;

    let mut included = Map::new();
    for (key, related) in loaded {
        let rendered = related.iter().map(render).collect::<Result<Vec<_>, _>>()?;
        included.insert(key, Value::Array(rendered));
    }

    tracing::info!(type_name, id, included = included.len(), "fetched record");
    Ok(json!({
        "data": render(&record)?,
        "included": included,
    }))
}

// =============================================================================
// SCHEMA COMMAND
// =============================================================================

/// Describe every declared type with inverse pairing and cardinality.
pub fn cmd_schema(config: &TetherConfig) -> Result<Value, AppError> {
    let definitions = config.definitions()?;
    let names: Vec<String> = definitions.type_names().map(str::to_string).collect();
    let schema = Schema::new(definitions);

    let mut types = Map::new();
    for name in names {
        let type_def = schema.type_def(&name)?;
        let attributes: Vec<Value> = type_def
            .attributes
            .iter()
            .map(|attr| json!({ "name": attr.name, "kind": attr.kind }))
            .collect();

        let mut relationships = Vec::with_capacity(type_def.relationships.len());
        for def in &type_def.relationships {
            let inverse = schema.inverse_for(&name, &def.name)?;
            let cardinality = schema.relationship_type(&name, &def.name)?;
            relationships.push(json!({
                "name": def.name,
                "kind": def.kind.as_str(),
                "type": def.target_type,
                "async": def.is_async,
                "polymorphic": def.is_polymorphic,
                "inverse": inverse.map(|i| i.key),
                "cardinality": format!("{:?}", cardinality),
            }));
        }

        types.insert(
            name,
            json!({ "attributes": attributes, "relationships": relationships }),
        );
    }
    Ok(Value::Object(types))
}
