//! Status Initializer.
//!
//! Walks `<root>/<Type>/<Name...>` once per session. Every directory holding a
//! `<Label>_DataPack.json` is a record: its files are cached, its key is derived from the primary
//! document, and, when the manifest admits it, it enters the status table as `Ready`.

use super::DataPackBuilder;
use crate::{
    codec::diagnostic::{BuildDiagnostic, DiagnosticKind},
    error::BuildError,
    job::ImportJob,
    paths::data_pack_label,
    properties::{RecordKey, RecordStatus, DATA_PACK_SUFFIX, RECORD_SOBJECT_TYPE, RECORD_SOURCE_KEY},
    store::ContentStore,
};
use serde_json::{Map, Value};
use std::path::Path;

impl DataPackBuilder {
    pub(super) async fn initialize_import_status(
        &self,
        import_path: &Path,
        job: &mut ImportJob,
    ) -> Result<ContentStore, BuildError> {
        let mut store = ContentStore::new();

        if !self.files.file_exists(import_path) {
            tracing::error!("[Initialize] No Data At Path {:?}", import_path);
            return Ok(store);
        }

        let import_types = self
            .files
            .directories(import_path, false)?
            .into_iter()
            .filter(|data_pack_type| {
                job.options
                    .allowed_types
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(data_pack_type))
            })
            .collect::<Vec<String>>();
        tracing::debug!("[Initialize] Found import paths {:?}", import_types);

        let mut candidates = Vec::with_capacity(import_types.len());
        for data_pack_type in import_types {
            let names = self
                .files
                .directories(&import_path.join(&data_pack_type), true)?;
            tracing::debug!(
                "[Initialize] Found datapack candidates {} {}",
                data_pack_type,
                names.len()
            );
            candidates.push((data_pack_type, names));
        }

        for (data_pack_type, names) in &candidates {
            let type_dir = import_path.join(data_pack_type);
            for name in names {
                self.initialize_type_at_path(&type_dir, name, data_pack_type, job, &mut store)
                    .await;
            }
        }

        for key in job.missing_manifest_keys(self.types()) {
            job.record(BuildDiagnostic::new(
                DiagnosticKind::ManifestKeyMissing,
                RecordKey::from(key),
                "not found",
            ));
        }

        tracing::debug!(
            "[Initialize] {} records, {} files cached",
            job.current_status.len(),
            store.len()
        );
        Ok(store)
    }

    /// Initialize the record stored in `<type_dir>/<name>`, if it is one. Failures mark the
    /// directory's key as `Error`.
    async fn initialize_type_at_path(
        &self,
        type_dir: &Path,
        name: &str,
        data_pack_type: &str,
        job: &mut ImportJob,
        store: &mut ContentStore,
    ) {
        let record_dir = type_dir.join(name);
        let Some(label) = data_pack_label(self.files.as_ref(), &record_dir) else {
            return;
        };
        let metadata_path = record_dir.join(format!("{label}{DATA_PACK_SUFFIX}"));
        if !self.files.file_exists(&metadata_path) {
            return;
        }

        let directory_key = RecordKey::new(data_pack_type, name);
        if let Err(e) = self
            .load_record(&record_dir, &metadata_path, name, data_pack_type, job, store)
            .await
        {
            job.set_status(&directory_key, RecordStatus::Error);
            job.record(BuildDiagnostic::new(
                DiagnosticKind::LoadFailure,
                directory_key,
                e.to_string(),
            ));
        }
    }

    async fn load_record(
        &self,
        record_dir: &Path,
        metadata_path: &Path,
        name: &str,
        data_pack_type: &str,
        job: &mut ImportJob,
        store: &mut ContentStore,
    ) -> Result<(), BuildError> {
        store
            .load_files_at_path(self.files.as_ref(), record_dir)
            .await?;
        let content = store
            .get(metadata_path)
            .ok_or_else(|| BuildError::NotFound(format!("{metadata_path:?}")))?;
        let document: Value = serde_json::from_str(content)?;

        let record_type = document
            .get(RECORD_SOBJECT_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let folder = self
            .types
            .folder_name(data_pack_type, record_type, &document)?;
        let key = RecordKey::new(data_pack_type, &folder);

        job.keys_to_directories
            .insert(key.clone(), format!("{data_pack_type}/{name}"));

        if !job.is_in_manifest(self.types(), data_pack_type, &key, name) {
            return Ok(());
        }

        job.current_status.set_if_absent(&key, RecordStatus::Ready);

        if let Some(display) = document.get("Name").and_then(Value::as_str) {
            job.generated_keys_to_names
                .insert(key.clone(), display.to_string());
        }
        // Summaries are recorded for exactly the keys in `all_parents`.
        if !job.all_data_summary.contains_key(&key) {
            job.all_parents.push(key.clone());
        }

        let mut summary = Map::new();
        for field in self.types.summary_fields(record_type) {
            let value = document.get(&field).cloned().unwrap_or(Value::Null);
            summary.insert(field, value);
        }
        let source_key = document.get(RECORD_SOURCE_KEY).cloned().unwrap_or(Value::Null);
        summary.insert(RECORD_SOURCE_KEY.to_string(), source_key.clone());
        job.pre_deploy_data_summary.push(summary.clone());
        job.all_data_summary.insert(key.clone(), summary);

        if let Value::String(source_key) = source_key {
            job.source_key_to_primary_key.insert(source_key, key);
        }
        Ok(())
    }
}
