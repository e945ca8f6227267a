//! Shared test utilities for building DataPack trees and observing compilation

use crate::{
    codec::compile_queue::{CompileOptions, StyleCompiler},
    error::BuildError,
    properties::{DATA_PACK_SUFFIX, DATA_PACK_TYPE, PARENT_KEYS_SUFFIX, RECORD_SOBJECT_TYPE},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write a record directory `<root>/<data_pack_type>/<name>` holding `<name>_DataPack.json` and,
/// when `parents` is non-empty, `<name>_ParentKeys.json`. Returns the record directory.
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
        map.entry(RECORD_SOBJECT_TYPE)
            .or_insert_with(|| Value::String(data_pack_type.to_string()));
        map.entry(DATA_PACK_TYPE)
            .or_insert_with(|| Value::String("SObject".to_string()));
    }
    std::fs::write(
        dir.join(format!("{name}{DATA_PACK_SUFFIX}")),
        serde_json::to_string_pretty(&document).unwrap(),
    )
    .unwrap();

    if !parents.is_empty() {
        std::fs::write(
            dir.join(format!("{name}{PARENT_KEYS_SUFFIX}")),
            serde_json::to_string(parents).unwrap(),
        )
        .unwrap();
    }
    dir
}

/// Compiler that records every source it is handed and how many compilations overlapped.
#[derive(Debug, Default)]
pub struct RecordingCompiler {
    sources: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_on: Option<String>,
}

impl RecordingCompiler {
    pub fn failing_on(source: &str) -> Self {
        RecordingCompiler {
            fail_on: Some(source.to_string()),
            ..Default::default()
        }
    }

    /// Sources in the order they were compiled.
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StyleCompiler for RecordingCompiler {
    async fn compile(
        &self,
        language: &str,
        source: &str,
        _options: &CompileOptions,
    ) -> Result<String, BuildError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.sources.lock().push(source.to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.as_deref() == Some(source) {
            return Err(BuildError::Compile(format!("Invalid CSS after \"{source}\"")));
        }
        Ok(format!("/* {language} */{source}"))
    }
}
