//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use async_trait::async_trait;
use datapack_builder::{codec::CompileOptions, BuildError, StyleCompiler};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write `<root>/<data_pack_type>/<name>/<name>_DataPack.json` (and `_ParentKeys.json` when
/// `parents` is non-empty). The document gets `VlocityRecordSObjectType` and
/// `VlocityDataPackType` defaults. Returns the record directory.
#[allow(dead_code)]
pub fn write_data_pack(
    root: &Path,
    data_pack_type: &str,
    name: &str,
    mut document: Value,
    parents: &[&str],
) -> PathBuf {
    let dir = root.join(data_pack_type).join(name);
    std::fs::create_dir_all(&dir).unwrap();
    if let Some(map) = document.as_object_mut() {
        map.entry("VlocityRecordSObjectType")
            .or_insert_with(|| json!(data_pack_type));
        map.entry("VlocityDataPackType")
            .or_insert_with(|| json!("SObject"));
    }
    std::fs::write(
        dir.join(format!("{name}_DataPack.json")),
        serde_json::to_string_pretty(&document).unwrap(),
    )
    .unwrap();
    if !parents.is_empty() {
        std::fs::write(
            dir.join(format!("{name}_ParentKeys.json")),
            serde_json::to_string(parents).unwrap(),
        )
        .unwrap();
    }
    dir
}

/// Write a UI template record whose `SassStyle` field names a sibling `.scss` file.
#[allow(dead_code)]
pub fn write_template(root: &Path, name: &str, scss: &str) -> PathBuf {
    let dir = write_data_pack(
        root,
        "VlocityUITemplate",
        name,
        json!({ "Name": name, "SassStyle": format!("{name}.scss") }),
        &[],
    );
    std::fs::write(dir.join(format!("{name}.scss")), scss).unwrap();
    dir
}

/// Type settings for [`write_template`] records.
#[allow(dead_code)]
pub const TEMPLATE_TYPES: &str = r#"
[types.VlocityUITemplate.expanded.VlocityUITemplate.SassStyle]
file_type = "scss"
compiled_field = "CustomCSS"
"#;

/// Compiler that rejects any source containing `!error` and echoes everything else.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct EchoCompiler;

#[async_trait]
impl StyleCompiler for EchoCompiler {
    async fn compile(
        &self,
        language: &str,
        source: &str,
        _options: &CompileOptions,
    ) -> Result<String, BuildError> {
        if source.contains("!error") {
            return Err(BuildError::Compile(format!("{language}: {source}")));
        }
        Ok(format!(".compiled {{ {source} }}"))
    }
}

/// Compiler whose output is `size` bytes whatever the source.
#[allow(dead_code)]
#[derive(Debug)]
pub struct InflatingCompiler {
    pub size: usize,
}

#[async_trait]
impl StyleCompiler for InflatingCompiler {
    async fn compile(
        &self,
        _language: &str,
        _source: &str,
        _options: &CompileOptions,
    ) -> Result<String, BuildError> {
        Ok("x".repeat(self.size))
    }
}

/// Record-typed child documents, for filling arrays that should paginate.
#[allow(dead_code)]
pub fn entries(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!({ "VlocityDataPackType": "SObject", "Name": format!("Entry {i}") }))
        .collect()
}
