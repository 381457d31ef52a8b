//! # Fixture Adapter
//!
//! Serves payloads from a directory tree:
//!
//! ```text
//! <root>/<type>/<id>.json     one resource hash
//! <root>/<link>[.json]        related links, relative to the root
//! ```
//!
//! `find_all` and `query` read every `.json` file under `<root>/<type>/`
//! in file name order and answer with an array. A query keeps the
//! resources whose top-level fields equal every field of the query
//! object. Writes are not supported.

use futures::future::{self, FutureExt};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tether_core::{Adapter, AdapterFuture, TetherError};

/// Read-only adapter over JSON files.
#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    root: PathBuf,
}

impl FixtureAdapter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, type_name: &str) -> Result<PathBuf, TetherError> {
        Ok(self.root.join(segment(type_name)?))
    }

    fn record_path(&self, type_name: &str, id: &str) -> Result<PathBuf, TetherError> {
        Ok(self.type_dir(type_name)?.join(format!("{}.json", segment(id)?)))
    }

    /// Links may be absolute URL paths; they are always read below the root.
    fn link_path(&self, link: &str) -> Result<PathBuf, TetherError> {
        let relative = Path::new(link.trim_start_matches('/'));
        let mut components = relative.components().peekable();
        if components.peek().is_none()
            || !components.all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(TetherError::Adapter(format!(
                "link '{}' does not resolve inside the fixture root",
                link
            )));
        }
        let mut path = self.root.join(relative);
        if path.extension().is_none() {
            path.set_extension("json");
        }
        Ok(path)
    }
}

/// A single path segment taken from a type name or id.
fn segment(value: &str) -> Result<&str, TetherError> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(TetherError::Adapter(format!(
            "'{}' cannot be used as a fixture path segment",
            value
        )));
    }
    Ok(value)
}

fn failed(error: TetherError) -> AdapterFuture {
    future::ready(Err(error)).boxed_local()
}

async fn read_json(path: PathBuf) -> Result<Value, TetherError> {
    tracing::debug!(path = %path.display(), "reading fixture");
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        TetherError::Adapter(format!("cannot read fixture '{}': {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        TetherError::Adapter(format!("fixture '{}' is not valid JSON: {}", path.display(), e))
    })
}

async fn read_collection(dir: PathBuf) -> Result<Vec<Value>, TetherError> {
    let listing_error = |e: std::io::Error| {
        TetherError::Adapter(format!("cannot list fixtures in '{}': {}", dir.display(), e))
    };
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(listing_error)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut resources = Vec::with_capacity(paths.len());
    for path in paths {
        resources.push(read_json(path).await?);
    }
    Ok(resources)
}

fn matches_query(resource: &Value, query: &Value) -> bool {
    match query.as_object() {
        Some(fields) => fields
            .iter()
            .all(|(key, expected)| resource.get(key) == Some(expected)),
        None => true,
    }
}

impl Adapter for FixtureAdapter {
    fn find_record(&self, type_name: &str, id: &str) -> AdapterFuture {
        match self.record_path(type_name, id) {
            Ok(path) => read_json(path).boxed_local(),
            Err(error) => failed(error),
        }
    }

    fn find_all(&self, type_name: &str) -> AdapterFuture {
        match self.type_dir(type_name) {
            Ok(dir) => async move { Ok::<_, TetherError>(Value::Array(read_collection(dir).await?)) }
                .boxed_local(),
            Err(error) => failed(error),
        }
    }

    fn query(&self, type_name: &str, query: &Value) -> AdapterFuture {
        let dir = match self.type_dir(type_name) {
            Ok(dir) => dir,
            Err(error) => return failed(error),
        };
        let query = query.clone();
        async move {
            let resources = read_collection(dir).await?;
            Ok::<_, TetherError>(Value::Array(
                resources
                    .into_iter()
                    .filter(|resource| matches_query(resource, &query))
                    .collect(),
            ))
        }
        .boxed_local()
    }

    fn find_belongs_to(&self, link: &str) -> AdapterFuture {
        match self.link_path(link) {
            Ok(path) => read_json(path).boxed_local(),
            Err(error) => failed(error),
        }
    }

    fn find_has_many(&self, link: &str) -> AdapterFuture {
        match self.link_path(link) {
            Ok(path) => read_json(path).boxed_local(),
            Err(error) => failed(error),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(root: &Path, relative: &str, value: &Value) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, value.to_string()).expect("write");
    }

    #[tokio::test]
    async fn reads_one_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "post/1.json", &json!({ "id": "1", "title": "Hi" }));
        let adapter = FixtureAdapter::new(dir.path());

        let payload = adapter.find_record("post", "1").await.expect("read");
        assert_eq!(payload["title"], "Hi");
    }

    #[tokio::test]
    async fn missing_record_is_an_adapter_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = FixtureAdapter::new(dir.path());
        let err = adapter.find_record("post", "9").await.expect_err("missing");
        assert!(matches!(err, TetherError::Adapter(_)));
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = FixtureAdapter::new(dir.path());
        assert!(adapter.find_record("post", "..").await.is_err());
        assert!(adapter.find_record("../post", "1").await.is_err());
        assert!(adapter.find_has_many("/posts/../../etc").await.is_err());
    }

    #[tokio::test]
    async fn collections_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "post/2.json", &json!({ "id": "2", "draft": true }));
        write(dir.path(), "post/1.json", &json!({ "id": "1", "draft": false }));
        write(dir.path(), "post/notes.txt", &json!("ignored"));
        let adapter = FixtureAdapter::new(dir.path());

        let all = adapter.find_all("post").await.expect("all");
        assert_eq!(all, json!([{ "id": "1", "draft": false }, { "id": "2", "draft": true }]));

        let drafts = adapter.query("post", &json!({ "draft": true })).await.expect("query");
        assert_eq!(drafts, json!([{ "id": "2", "draft": true }]));
    }

    #[tokio::test]
    async fn links_resolve_below_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "posts/1/comments.json", &json!([{ "id": "5" }]));
        let adapter = FixtureAdapter::new(dir.path());

        let payload = adapter.find_has_many("/posts/1/comments").await.expect("link");
        assert_eq!(payload, json!([{ "id": "5" }]));
    }
}
