//! Session-scoped cache of raw file content.
//!
//! Content is keyed by [`path_key`] so lookups are insensitive to case and to `.`/`..` segments.
//! Files whose extension is in [`UTF8_EXTENSIONS`] are stored as text; everything else is stored
//! base64-encoded. Every JSON document (or array of documents) that declares a
//! [`RECORD_SOURCE_KEY`] is also indexed so the defining file of a source key can be found.
//!
//! The store is append-only: each path is written once while the session initializes.

use crate::{
    error::BuildError,
    paths::{normalize_path, path_key, FileLookup},
    properties::RECORD_SOURCE_KEY,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::future::try_join_all;
use serde_json::Value;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

pub const UTF8_EXTENSIONS: &[&str] = &["css", "json", "yaml", "scss", "html", "js", "xml"];

#[derive(Debug, Clone, Default)]
pub struct ContentStore {
    files: HashMap<String, String>,
    source_keys: HashMap<String, PathBuf>,
}

/// True when files with this name are cached as text rather than base64.
pub fn is_text_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| UTF8_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every file directly inside `dir` and cache it.
    ///
    /// Reads are issued concurrently and joined before any of them is cached.
    pub async fn load_files_at_path(
        &mut self,
        lookup: &dyn FileLookup,
        dir: &Path,
    ) -> Result<usize, BuildError> {
        let filenames = lookup.files(dir)?;
        let reads = filenames.iter().map(|filename| {
            let path = normalize_path(&dir.join(filename));
            let text = is_text_file(filename);
            async move {
                let bytes = tokio::fs::read(&path).await?;
                let content = if text {
                    String::from_utf8_lossy(&bytes).into_owned()
                } else {
                    BASE64.encode(&bytes)
                };
                Ok::<_, BuildError>((path, content))
            }
        });

        let loaded = try_join_all(reads).await?;
        let count = loaded.len();
        for (path, content) in loaded {
            self.insert(&path, content);
        }
        tracing::debug!("[ContentStore] Loaded {} files from {:?}", count, dir);
        Ok(count)
    }

    /// Cache `content` under `path`, indexing any source keys it declares. Existing entries win.
    pub fn insert(&mut self, path: &Path, content: String) {
        let key = path_key(path);
        if self.files.contains_key(&key) {
            return;
        }

        if let Ok(document) = serde_json::from_str::<Value>(&content) {
            let path = normalize_path(path);
            let documents = match &document {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            };
            for item in documents {
                if let Some(source_key) = item.get(RECORD_SOURCE_KEY).and_then(Value::as_str) {
                    self.source_keys
                        .insert(source_key.to_string(), path.clone());
                }
            }
        }

        self.files.insert(key, content);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(&path_key(path.as_ref())).map(String::as_str)
    }

    /// Content of `filename` inside `dir`.
    pub fn get_in(&self, dir: &Path, filename: &str) -> Option<&str> {
        self.get(dir.join(filename))
    }

    /// Path of the file that defines `source_key`.
    pub fn source_key_path(&self, source_key: &str) -> Option<&Path> {
        self.source_keys.get(source_key).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
