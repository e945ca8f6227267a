//! Import Driver.
//!
//! [`DataPackBuilder`] turns an on-disk DataPack tree into a sequence of deployable batches. Each
//! call to [`DataPackBuilder::build_import`] produces the next batch for an [`ImportJob`] session:
//!
//! 1. On the first call of a session the tree is walked once (`initialize`), caching every file
//!    in a [`ContentStore`] held by the job and populating the job's status table.
//! 2. The scheduler (`schedule`) is called repeatedly. Each call returns the records that are
//!    eligible right now, with their statuses advanced, until the batch reaches its byte or count
//!    budget or nothing more is eligible.
//! 3. A record holding more nested records than its type's pagination size is split into pages
//!    (see [`crate::paginate`]) and closes the batch.
//! 4. Queued style-sheet compilations are drained. If any failed, the whole batch is rejected:
//!    failed records become `Error`, the rest go back to `Ready`, and no batch is returned.
//!    Compiled text is written back, and trailing records that no longer fit the byte budget go
//!    back to `Ready`.
//!
//! Every cache of a session lives in its [`ImportJob`]. The builder itself holds only its
//! collaborators, so one builder can serve any number of jobs, concurrently or in turn.
//!
//! ## Example
//!
//! ```rust,no_run
//! use datapack_builder::{BuildOptions, DataPackBuilder, ImportJob, RecordStatus, TypeRegistry};
//! use std::{path::Path, sync::Arc};
//!
//! # async fn run() -> Result<(), datapack_builder::BuildError> {
//! let builder = DataPackBuilder::new(Arc::new(TypeRegistry::default()));
//! let mut job = ImportJob::new(BuildOptions::default());
//!
//! while let Some(batch) = builder.build_import(Path::new("./vlocity"), &mut job).await? {
//!     for record in &batch.data_packs {
//!         // ship the batch, then report the outcome back into the session
//!         job.set_status(&record.key, RecordStatus::Success);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod initialize;
mod schedule;

use crate::{
    codec::{
        compile_queue::{StyleCompiler, UnsupportedCompiler},
        diagnostic::{BuildDiagnostic, DiagnosticKind},
    },
    error::BuildError,
    job::ImportJob,
    paginate::{needs_pagination, paginate},
    paths::{FileLookup, LocalFileLookup},
    properties::{RecordKey, RecordStatus},
    record::{DataPackImport, Record},
    store::ContentStore,
    types::DataPackTypes,
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

pub struct DataPackBuilder {
    types: Arc<dyn DataPackTypes>,
    files: Arc<dyn FileLookup>,
    compiler: Arc<dyn StyleCompiler>,
}

impl DataPackBuilder {
    /// Builder over the local filesystem with no style compiler.
    pub fn new(types: Arc<dyn DataPackTypes>) -> Self {
        Self::with_collaborators(
            types,
            Arc::new(LocalFileLookup),
            Arc::new(UnsupportedCompiler),
        )
    }

    pub fn with_collaborators(
        types: Arc<dyn DataPackTypes>,
        files: Arc<dyn FileLookup>,
        compiler: Arc<dyn StyleCompiler>,
    ) -> Self {
        DataPackBuilder {
            types,
            files,
            compiler,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn StyleCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn types(&self) -> &dyn DataPackTypes {
        self.types.as_ref()
    }

    /// The job's cached content, walking the tree on first use.
    async fn content_store(
        &self,
        import_path: &Path,
        job: &mut ImportJob,
    ) -> Result<Arc<ContentStore>, BuildError> {
        if let Some(store) = &job.cache.store {
            return Ok(store.clone());
        }
        let store = Arc::new(self.initialize_import_status(import_path, job).await?);
        job.cache.store = Some(store.clone());
        Ok(store)
    }

    fn needs_pagination(&self, record: &Record, job: &mut ImportJob) -> bool {
        let disable_pagination = job.options.disable_pagination;
        *job.cache
            .needs_pagination
            .entry(record.key.clone())
            .or_insert_with(|| needs_pagination(self.types.as_ref(), record, disable_pagination))
    }

    /// Build the next batch of the session, or `None` when nothing is eligible.
    pub async fn build_import(
        &self,
        root: &Path,
        job: &mut ImportJob,
    ) -> Result<Option<DataPackImport>, BuildError> {
        if !self.files.file_exists(root) {
            tracing::warn!("[DataPackBuilder] Import path does not exist: {:?}", root);
            return Ok(None);
        }

        let import_path: PathBuf = match &job.options.expansion_path {
            Some(sub_path) => root.join(sub_path),
            None => root.to_path_buf(),
        };

        if job.options.reset_file_data {
            job.reset_file_data();
            job.options.reset_file_data = false;
        }

        let store = self.content_store(&import_path, job).await?;
        // Left behind by a call that failed part way.
        job.cache.compile_queue.clear();

        let single_file = job.options.single_file;
        let max_import_size = job.options.max_import_size;
        let max_count = job.options.effective_max_count();

        let mut import = DataPackImport::default();
        let mut keys_in_batch = HashSet::<RecordKey>::new();
        let mut import_len = import.serialized_len()?;
        let mut should_break = false;

        loop {
            let current_len = if single_file { 0 } else { import_len };
            let next = self.select_next(&import_path, job, &store, &mut keys_in_batch, current_len);
            let selected = next.len();

            for record in next {
                if should_break {
                    tracing::debug!("[DataPackBuilder] Deferring {} to the next batch", record.key);
                    job.cache
                        .compile_queue
                        .discard(&HashSet::from([record.key.clone()]));
                    job.set_status(&record.key, RecordStatus::Ready);
                    continue;
                }

                // Separator between records in the serialized batch.
                import_len += record.serialized_len()? + 1;
                let data_pack_type = record.data_pack_type.clone();
                let separate = record.separate;

                if !single_file && self.needs_pagination(&record, job) {
                    if let Some(bulk) = self.types.extract_bulk_records(&record) {
                        tracing::debug!("[DataPackBuilder] Saved bulk records for {}", record.key);
                        job.cache
                            .saved_bulk_records
                            .insert(record.key.clone(), bulk);
                        import.data_packs.push(record);
                    } else {
                        let mut pages = paginate(self.types.as_ref(), &record);
                        if pages.is_empty() {
                            pages = vec![record];
                        }
                        import.data_packs.extend(pages);
                        should_break = true;
                    }
                } else {
                    import.data_packs.push(record);
                }

                let type_full = self
                    .types
                    .max_deploy(&data_pack_type)
                    .is_some_and(|max| import.len() >= max);
                if !single_file && (type_full || separate) {
                    should_break = true;
                }
            }

            let keep_going = selected > 0
                && !single_file
                && import_len < max_import_size
                && import.len() < max_count
                && !should_break;
            if !keep_going {
                break;
            }
        }

        if !import.is_empty() {
            tracing::info!(
                "[DataPackBuilder] {} {} Items",
                if single_file { "File" } else { "Deploy" },
                import.len()
            );
        }

        let outcome = job
            .cache
            .compile_queue
            .drain_all(self.compiler.as_ref())
            .await;

        if outcome.has_compile_error() && !single_file {
            for failure in &outcome.errors {
                tracing::warn!("[DataPackBuilder] Removing From Deploy {}", failure.key);
                job.set_status(&failure.key, RecordStatus::Error);
                job.current_errors.insert(
                    failure.key.clone(),
                    format!("Compilation Error {}", failure.message),
                );
                job.record(BuildDiagnostic::new(
                    DiagnosticKind::CompileFailure,
                    failure.key.clone(),
                    failure.message.clone(),
                ));
            }
            for record in import.data_packs.iter().filter(|r| !r.key.is_page()) {
                if job.status(record.key.as_str()) != Some(RecordStatus::Error) {
                    tracing::warn!("[DataPackBuilder] Setting Back to Ready {}", record.key);
                    job.set_status(&record.key, RecordStatus::Ready);
                }
            }
            return Ok(None);
        }

        let mut compiled = HashSet::<RecordKey>::new();
        for output in &outcome.outputs {
            let owner = &output.job.owning_record;
            let applied = import
                .data_packs
                .iter_mut()
                .filter(|r| r.key.page_owner() == *owner)
                .fold(false, |applied, record| output.apply(record) || applied);
            if applied {
                compiled.insert(owner.clone());
            } else {
                tracing::warn!(
                    "[DataPackBuilder] Compiled output for {} has no target {}",
                    owner,
                    output.job.document_pointer
                );
            }
        }

        if !single_file && !compiled.is_empty() {
            self.fit_compiled_import(job, &mut import, &compiled, max_import_size)?;
        }

        Ok((!import.is_empty()).then_some(import))
    }

    /// Compiled text is only known after selection. Remeasure the records that received some and
    /// send trailing records back to `Ready` until the batch fits or a single record is left.
    fn fit_compiled_import(
        &self,
        job: &mut ImportJob,
        import: &mut DataPackImport,
        compiled: &HashSet<RecordKey>,
        max_import_size: usize,
    ) -> Result<(), BuildError> {
        for record in &import.data_packs {
            let paginated = import
                .data_packs
                .iter()
                .any(|r| r.key.is_page() && r.key.page_owner() == record.key);
            if compiled.contains(&record.key) && !paginated {
                // Separator between records in the serialized batch.
                let size = record.serialized_len()? + 1;
                job.cache.sizes.insert(record.key.clone(), size);
            }
        }

        while import.serialized_len()? > max_import_size {
            let Some(last) = import.data_packs.last() else {
                break;
            };
            let owner = last.key.page_owner();
            let owned = import
                .data_packs
                .iter()
                .filter(|r| r.key.page_owner() == owner)
                .count();
            if owned == import.len() {
                break;
            }
            tracing::debug!(
                "[DataPackBuilder] Deferring {} to the next batch, compiled size over budget",
                owner
            );
            import.data_packs.retain(|r| r.key.page_owner() != owner);
            job.set_status(&owner, RecordStatus::Ready);
        }
        Ok(())
    }

    /// Whether a batch could be built right now. Records the trial build selected are put back to
    /// `Ready`.
    pub async fn has_valid_imports(
        &self,
        root: &Path,
        job: &mut ImportJob,
    ) -> Result<bool, BuildError> {
        tracing::debug!("[DataPackBuilder] Checking Valid Imports Start");
        let Some(import) = self.build_import(root, job).await? else {
            return Ok(false);
        };
        tracing::debug!("[DataPackBuilder] Checking Valid Imports Found {}", import.len());
        for key in import.keys() {
            if job.status(key.as_str()).is_some_and(|s| s.is_added()) {
                job.set_status(key, RecordStatus::Ready);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BuildOptions,
        tests::helpers::{init_logging, write_data_pack, RecordingCompiler},
        types::TypeRegistry,
    };
    use serde_json::{json, Value};

    fn builder(registry: &str) -> DataPackBuilder {
        DataPackBuilder::new(Arc::new(TypeRegistry::from_toml_str(registry).unwrap()))
    }

    #[tokio::test]
    async fn test_missing_root_returns_none() {
        init_logging();
        let builder = builder("");
        let mut job = ImportJob::default();
        let result = builder
            .build_import(Path::new("/definitely/not/here"), &mut job)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(job.current_status.is_empty());
    }

    #[tokio::test]
    async fn test_single_record_is_added() {
        init_logging();
        let root = tempfile::tempdir().unwrap();
        write_data_pack(root.path(), "DataRaptor", "Load", json!({ "Name": "Load" }), &[]);

        let builder = builder("");
        let mut job = ImportJob::default();
        let batch = builder
            .build_import(root.path(), &mut job)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.data_packs[0].key.as_str(), "DataRaptor/Load");
        assert_eq!(job.status("DataRaptor/Load"), Some(RecordStatus::Added));
        assert_eq!(
            job.display_labels[&RecordKey::from("DataRaptor/Load")],
            "Load (DataRaptor/Load)"
        );

        let again = builder.build_import(root.path(), &mut job).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_has_valid_imports_reverts_selection() {
        init_logging();
        let root = tempfile::tempdir().unwrap();
        write_data_pack(root.path(), "DataRaptor", "Load", json!({ "Name": "Load" }), &[]);

        let builder = builder("");
        let mut job = ImportJob::default();
        assert!(builder.has_valid_imports(root.path(), &mut job).await.unwrap());
        assert_eq!(job.status("DataRaptor/Load"), Some(RecordStatus::Ready));

        job.set_status(&RecordKey::from("DataRaptor/Load"), RecordStatus::Success);
        assert!(!builder.has_valid_imports(root.path(), &mut job).await.unwrap());
    }

    #[tokio::test]
    async fn test_compiled_output_written_back() {
        init_logging();
        let root = tempfile::tempdir().unwrap();
        let dir = write_data_pack(
            root.path(),
            "VlocityUITemplate",
            "cardHeader",
            json!({ "Name": "cardHeader", "SassStyle": "cardHeader.scss" }),
            &[],
        );
        std::fs::write(dir.join("cardHeader.scss"), "$c: red;").unwrap();

        let builder = builder(
            r#"
[types.VlocityUITemplate.expanded.VlocityUITemplate.SassStyle]
file_type = "scss"
compiled_field = "CustomCSS"
"#,
        )
        .with_compiler(Arc::new(RecordingCompiler::default()));

        let mut job = ImportJob::new(BuildOptions {
            compile_on_build: true,
            ..Default::default()
        });
        let batch = builder
            .build_import(root.path(), &mut job)
            .await
            .unwrap()
            .unwrap();

        let primary = batch.data_packs[0].primary_document().unwrap();
        assert_eq!(primary["SassStyle"], json!("$c: red;"));
        assert_eq!(primary["CustomCSS"], json!("/* scss */$c: red;"));
    }

    #[tokio::test]
    async fn test_reset_file_data_rereads_tree() {
        init_logging();
        let root = tempfile::tempdir().unwrap();
        write_data_pack(root.path(), "DataRaptor", "Load", json!({ "Name": "Load" }), &[]);

        let builder = builder("");
        let mut job = ImportJob::default();
        builder.build_import(root.path(), &mut job).await.unwrap();

        write_data_pack(root.path(), "DataRaptor", "Save", json!({ "Name": "Save" }), &[]);
        assert!(builder
            .build_import(root.path(), &mut job)
            .await
            .unwrap()
            .is_none());

        job.options.reset_file_data = true;
        let batch = builder
            .build_import(root.path(), &mut job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.data_packs[0].key.as_str(), "DataRaptor/Save");
        assert!(!job.options.reset_file_data);
    }

    #[tokio::test]
    async fn test_reset_file_data_remeasures_records() {
        init_logging();
        let root = tempfile::tempdir().unwrap();
        let entries = |count: usize| {
            (0..count)
                .map(|i| json!({ "VlocityDataPackType": "SObject", "Name": format!("Entry {i}") }))
                .collect::<Vec<Value>>()
        };
        write_data_pack(
            root.path(),
            "Catalog",
            "Main",
            json!({ "Name": "Main", "Entries": entries(50) }),
            &[],
        );

        let builder = builder(
            r#"
[types.Catalog]
pagination_size = 100
"#,
        );
        let mut job = ImportJob::default();
        let batch = builder
            .build_import(root.path(), &mut job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        let small = job.cache.sizes[&RecordKey::from("Catalog/Main")];

        // Redeploy after the record grew on disk.
        write_data_pack(
            root.path(),
            "Catalog",
            "Main",
            json!({ "Name": "Main", "Entries": entries(250) }),
            &[],
        );
        job.set_status(&RecordKey::from("Catalog/Main"), RecordStatus::Ready);
        job.options.reset_file_data = true;
        let batch = builder
            .build_import(root.path(), &mut job)
            .await
            .unwrap()
            .unwrap();

        let keys: Vec<&str> = batch.keys().map(RecordKey::as_str).collect();
        assert_eq!(
            keys,
            vec!["Catalog/Main", "Catalog/Main|Page|1", "Catalog/Main|Page|2"]
        );
        assert!(job.cache.sizes[&RecordKey::from("Catalog/Main")] > small);
    }

    #[tokio::test]
    async fn test_builder_serves_independent_jobs() {
        init_logging();
        let root = tempfile::tempdir().unwrap();
        write_data_pack(root.path(), "DataRaptor", "Load", json!({ "Name": "Load" }), &[]);

        let builder = builder("");
        let mut first = ImportJob::default();
        let mut second = ImportJob::default();

        let batch = builder.build_import(root.path(), &mut first).await.unwrap();
        assert_eq!(batch.map(|b| b.len()), Some(1));

        let batch = builder.build_import(root.path(), &mut second).await.unwrap();
        assert_eq!(batch.map(|b| b.len()), Some(1));
        assert_eq!(second.status("DataRaptor/Load"), Some(RecordStatus::Added));
        assert_eq!(first.status("DataRaptor/Load"), Some(RecordStatus::Added));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_keep_their_compile_output() {
        init_logging();
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        for (root, source) in [(&left, "$left: 1;"), (&right, "$right: 2;")] {
            let dir = write_data_pack(
                root.path(),
                "VlocityUITemplate",
                "card",
                json!({ "Name": "card", "SassStyle": "card.scss" }),
                &[],
            );
            std::fs::write(dir.join("card.scss"), source).unwrap();
        }

        let builder = builder(
            r#"
[types.VlocityUITemplate.expanded.VlocityUITemplate.SassStyle]
file_type = "scss"
compiled_field = "CustomCSS"
"#,
        )
        .with_compiler(Arc::new(RecordingCompiler::default()));
        let options = BuildOptions {
            compile_on_build: true,
            ..Default::default()
        };
        let mut left_job = ImportJob::new(options.clone());
        let mut right_job = ImportJob::new(options);

        let (left_batch, right_batch) = tokio::join!(
            builder.build_import(left.path(), &mut left_job),
            builder.build_import(right.path(), &mut right_job)
        );

        let left_batch = left_batch.unwrap().unwrap();
        let right_batch = right_batch.unwrap().unwrap();
        assert_eq!(
            left_batch.data_packs[0].primary_document().unwrap()["CustomCSS"],
            json!("/* scss */$left: 1;")
        );
        assert_eq!(
            right_batch.data_packs[0].primary_document().unwrap()["CustomCSS"],
            json!("/* scss */$right: 2;")
        );
        assert!(!left_job.has_error);
        assert!(!right_job.has_error);
    }
}
