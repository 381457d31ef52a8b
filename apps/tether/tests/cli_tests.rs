//! Integration tests for the Tether CLI commands.
//!
//! Each test writes a config and a fixture tree into a temp directory and
//! drives the command functions directly.

use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tether::cli::{cmd_errors, cmd_fetch, cmd_normalize, cmd_schema, cmd_serialize, read_payload};
use tether::{AppError, TetherConfig};
use tether_core::{RequestKind, TetherError};

const CONFIG: &str = r#"
fixtures = "fixtures"

[types.post.attributes]
title = "string"
publishedAt = "date"

[types.post.relationships]
comments = { kind = "hasMany" }
author = { kind = "belongsTo", type = "user", inverse = false }

[types.comment.attributes]
body = "string"

[types.comment.relationships]
post = { kind = "belongsTo" }

[types.user.attributes]
name = "string"

[serializers.application]
key_style = "underscore"

[serializers.post]
attrs = { title = "headline" }
"#;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

/// A project directory with `tether.toml` and a small blog fixture tree.
fn project() -> (TempDir, TetherConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    write(root, "tether.toml", CONFIG);
    write(
        root,
        "fixtures/post/1.json",
        r#"{ "id": "1", "headline": "Hello", "published_at": "2024-01-01", "author": "7", "comments": ["10", "11"] }"#,
    );
    write(root, "fixtures/user/7.json", r#"{ "id": "7", "name": "Ann" }"#);
    write(
        root,
        "fixtures/comment/10.json",
        r#"{ "id": "10", "body": "first", "post": "1" }"#,
    );
    write(
        root,
        "fixtures/comment/11.json",
        r#"{ "id": "11", "body": "second", "post": "1" }"#,
    );
    let config = TetherConfig::load(&root.join("tether.toml")).expect("load config");
    (dir, config)
}

// =============================================================================
// CONFIG
// =============================================================================

#[test]
fn fixtures_resolve_next_to_config() {
    let (dir, config) = project();
    assert_eq!(config.fixtures_dir(), dir.path().join("fixtures"));
}

#[test]
fn missing_config_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = TetherConfig::load(&dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn malformed_config_is_a_toml_error() {
    let err = TetherConfig::parse("[types.post\n").expect_err("malformed");
    assert!(matches!(err, AppError::Toml(_)));
}

// =============================================================================
// NORMALIZE / SERIALIZE / ERRORS
// =============================================================================

#[test]
fn normalize_maps_wire_keys_and_reports_unknown_ones() {
    let (_dir, config) = project();
    let output = cmd_normalize(
        &config,
        "post",
        &json!({ "id": "2", "headline": "x", "subtitle": "?" }),
        RequestKind::FindRecord,
    )
    .expect("normalize");

    assert_eq!(output["data"]["id"], "2");
    assert_eq!(output["data"]["attributes"]["title"], "x");
    assert_eq!(output["warnings"][0]["key"], "subtitle");
}

#[test]
fn normalize_collection() {
    let (_dir, config) = project();
    let output = cmd_normalize(
        &config,
        "comment",
        &json!([{ "id": "1" }, { "id": "2" }]),
        RequestKind::FindAll,
    )
    .expect("normalize");

    let ids: Vec<&str> = output["data"]
        .as_array()
        .expect("collection")
        .iter()
        .filter_map(|resource| resource["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(output["warnings"], json!([]));
}

#[test]
fn serialize_round_trips_through_the_store() {
    let (_dir, config) = project();
    let payload = json!({ "id": "3", "headline": "Hi", "published_at": "2024-02-02" });

    let without_id = cmd_serialize(&config, "post", &payload, false).expect("serialize");
    assert_eq!(
        without_id,
        json!({ "headline": "Hi", "published_at": "2024-02-02", "author": null })
    );

    let with_id = cmd_serialize(&config, "post", &payload, true).expect("serialize");
    assert_eq!(with_id["id"], "3");
}

#[test]
fn errors_map_to_local_names() {
    let (_dir, config) = project();
    let output = cmd_errors(
        &config,
        "post",
        &json!({ "errors": [
            { "source": { "pointer": "/data/attributes/published_at" }, "detail": "is invalid" },
            { "source": { "pointer": "/data/attributes/headline" }, "detail": "can't be blank" }
        ] }),
    )
    .expect("errors");

    assert_eq!(
        output,
        json!({ "publishedAt": ["is invalid"], "title": ["can't be blank"] })
    );
}

#[test]
fn payload_must_be_a_file() {
    let (dir, _config) = project();
    let err = read_payload(dir.path()).expect_err("directory");
    assert!(matches!(err, AppError::Config(_)));

    write(dir.path(), "bad.json", "{ not json");
    let err = read_payload(&dir.path().join("bad.json")).expect_err("invalid json");
    assert!(matches!(err, AppError::Json(_)));
}

// =============================================================================
// FETCH
// =============================================================================

#[tokio::test]
async fn fetch_resolves_includes_from_fixtures() {
    let (_dir, config) = project();
    let output = cmd_fetch(
        &config,
        "post",
        "1",
        &["comments".to_string(), "author".to_string()],
    )
    .await
    .expect("fetch");

    assert_eq!(
        output["data"],
        json!({ "id": "1", "headline": "Hello", "published_at": "2024-01-01", "author": "7" })
    );
    assert_eq!(
        output["included"]["comments"],
        json!([
            { "id": "10", "body": "first", "post": "1" },
            { "id": "11", "body": "second", "post": "1" }
        ])
    );
    assert_eq!(output["included"]["author"], json!([{ "id": "7", "name": "Ann" }]));
}

#[tokio::test]
async fn fetch_without_fixture_fails_with_adapter_error() {
    let (_dir, config) = project();
    let err = cmd_fetch(&config, "post", "404", &[]).await.expect_err("missing");
    assert!(matches!(err, AppError::Core(TetherError::Adapter(_))));
}

#[tokio::test]
async fn fetch_rejects_unknown_include() {
    let (_dir, config) = project();
    let err = cmd_fetch(&config, "post", "1", &["likes".to_string()])
        .await
        .expect_err("unknown relationship");
    assert!(matches!(
        err,
        AppError::Core(TetherError::UnknownRelationship { .. })
    ));
}

// =============================================================================
// SCHEMA
// =============================================================================

#[test]
fn schema_reports_inverses_and_cardinality() {
    let (_dir, config) = project();
    let output = cmd_schema(&config).expect("schema");

    let relationships = &output["post"]["relationships"];
    assert_eq!(relationships[0]["name"], "comments");
    assert_eq!(relationships[0]["type"], "comment");
    assert_eq!(relationships[0]["inverse"], "post");
    assert_eq!(relationships[0]["cardinality"], "ManyToOne");
    assert_eq!(relationships[1]["name"], "author");
    assert_eq!(relationships[1]["inverse"], Value::Null);
    assert_eq!(relationships[1]["cardinality"], "OneToNone");

    assert_eq!(output["post"]["attributes"][1], json!({ "name": "publishedAt", "kind": "date" }));
}
