//! Batch Scheduler.
//!
//! [`DataPackBuilder::select_next`] walks the status table in insertion order and returns every
//! record that may join the current batch right now. Gates are applied in this order: directory
//! resolution, per-type batch count, header eligibility, per-type parallelism, parent readiness,
//! header-only references, and the byte budget. Accepted records have their status advanced
//! before they are returned, so a record is never selected twice.

use super::DataPackBuilder;
use crate::{
    codec::{
        assembler::{Assembly, RecordAssembler},
        diagnostic::{BuildDiagnostic, DiagnosticKind},
    },
    config::BuildOptions,
    error::BuildError,
    job::ImportJob,
    paths::data_pack_label,
    properties::{
        normalize_type, HeaderSupport, RecordKey, RecordStatus, DATA_PACK_SUFFIX,
        DATA_PACK_TYPE, LOOKUP_RECORD_SOURCE_KEY, PARENT_KEYS_SUFFIX, RECORD_SOBJECT_TYPE,
        SOBJECT, SOBJECT_PREFIX,
    },
    record::{pointer_token, Record},
    store::ContentStore,
    types::max_deploy_or_default,
};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

/// The session options the gates consult.
#[derive(Debug, Clone, Copy)]
struct Gates {
    single_file: bool,
    headers_only: bool,
    force_deploy: bool,
    ignore_all_parents: bool,
    compile_on_build: bool,
    max_import_size: usize,
}

impl From<&BuildOptions> for Gates {
    fn from(options: &BuildOptions) -> Self {
        Gates {
            single_file: options.single_file,
            headers_only: options.headers_only,
            force_deploy: options.force_deploy,
            ignore_all_parents: options.ignore_all_parents,
            compile_on_build: options.compile_on_build,
            max_import_size: options.max_import_size,
        }
    }
}

/// Per-call scheduling state.
struct Selection<'s> {
    import_path: &'s Path,
    store: &'s ContentStore,
    keys_in_batch: &'s mut HashSet<RecordKey>,
    current_len: usize,
    gates: Gates,
    /// Type → whether a sibling of that type is already in flight.
    parallel_status: HashMap<String, bool>,
}

impl DataPackBuilder {
    /// Records eligible to join the batch, with their statuses advanced.
    ///
    /// `keys_in_batch` holds the keys already in the batch and is extended with every record
    /// returned. `current_len` is the serialized length of the batch so far.
    pub(crate) fn select_next(
        &self,
        import_path: &Path,
        job: &mut ImportJob,
        store: &ContentStore,
        keys_in_batch: &mut HashSet<RecordKey>,
        current_len: usize,
    ) -> Vec<Record> {
        let gates = Gates::from(&job.options);
        let single_file = gates.single_file;
        let keys = job.current_status.keys().cloned().collect::<Vec<RecordKey>>();
        let mut selection = Selection {
            import_path,
            store,
            keys_in_batch,
            current_len,
            gates,
            parallel_status: HashMap::new(),
        };
        let mut next_imports = Vec::new();

        for key in keys {
            if single_file && !next_imports.is_empty() {
                break;
            }
            let Some(status) = job.status(key.as_str()) else {
                continue;
            };
            let batch_empty = selection.keys_in_batch.is_empty();
            let selectable = match status {
                RecordStatus::Ready => true,
                RecordStatus::ReadySeparate => batch_empty,
                RecordStatus::Header => !gates.headers_only && batch_empty,
                _ => false,
            };
            if !selectable {
                continue;
            }

            match self.try_select(&mut selection, job, &key, status) {
                Ok(Some(record)) => {
                    selection.keys_in_batch.insert(key);
                    next_imports.push(record);
                }
                Ok(None) => {}
                Err(e) => {
                    job.record(BuildDiagnostic::new(
                        DiagnosticKind::FormatFailure,
                        key.clone(),
                        e.to_string(),
                    ));
                    job.set_status(&key, RecordStatus::Error);
                }
            }
        }
        next_imports
    }

    fn try_select(
        &self,
        selection: &mut Selection<'_>,
        job: &mut ImportJob,
        key: &RecordKey,
        status: RecordStatus,
    ) -> Result<Option<Record>, BuildError> {
        let options = selection.gates;
        let single_file = options.single_file;
        let store = selection.store;

        let Some(directory) = job.keys_to_directories.get(key).cloned() else {
            if key.is_page() {
                job.current_status.remove(key.as_str());
            }
            return Ok(None);
        };
        let full_dir = selection.import_path.join(&directory);

        let Some(label) = data_pack_label(self.files.as_ref(), &full_dir) else {
            tracing::debug!("[Scheduler] {} no longer on disk", key);
            job.current_status.remove(key.as_str());
            return Ok(None);
        };
        let Some(file_data) = store.get_in(&full_dir, &format!("{label}{DATA_PACK_SUFFIX}"))
        else {
            job.current_status.remove(key.as_str());
            return Ok(None);
        };
        let metadata: Value = serde_json::from_str(file_data)?;

        let key_type = key.data_pack_type();
        let data_pack_type = normalize_type(key_type);

        if !single_file
            && selection.keys_in_batch.len() >= max_deploy_or_default(self.types(), key_type)
        {
            return Ok(None);
        }

        let headers_type = self.types.headers_only(data_pack_type);
        let mut parent_text = None;
        if !options.headers_only && !options.force_deploy {
            parent_text = store.get_in(&full_dir, &format!("{label}{PARENT_KEYS_SUFFIX}"));
        } else if headers_type == HeaderSupport::None && !options.force_deploy {
            return Ok(None);
        }

        if !single_file && !self.types.allow_parallel(data_pack_type, &metadata) {
            let in_flight = *selection
                .parallel_status
                .entry(key_type.to_string())
                .or_insert_with(|| {
                    job.current_status
                        .iter()
                        .any(|(k, s)| k.data_pack_type() == key_type && s.is_added())
                });
            if in_flight {
                tracing::debug!("[Scheduler] {} waits for a sibling of its type", key);
                return Ok(None);
            }
        }

        if options.force_deploy && options.ignore_all_parents {
            parent_text = None;
        }

        let parents = match parent_text {
            Some(text) => {
                let parents = self.parent_keys(job, key, text)?;
                if !single_file && self.needs_parents(job, &*selection.keys_in_batch, &parents) {
                    tracing::debug!("[Scheduler] {} waits for its parents", key);
                    return Ok(None);
                }
                Some(parents)
            }
            None => None,
        };

        let mut record = Record::new(key.clone(), data_pack_type, parents);
        record.separate = matches!(status, RecordStatus::ReadySeparate | RecordStatus::Header);

        let mut data_field = metadata
            .get(RECORD_SOBJECT_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let assembly = RecordAssembler::new(
            self.types(),
            store,
            self.files.as_ref(),
            key,
            &full_dir,
            data_pack_type,
        )
        .compile_on_build(options.compile_on_build)
        .assemble(metadata, &data_field)?;

        let corrupt = assembly.is_corrupt();
        let Assembly {
            mut documents,
            diagnostics,
            compile_jobs,
        } = assembly;
        for diagnostic in diagnostics {
            job.record(diagnostic);
        }
        if corrupt {
            job.set_status(key, RecordStatus::Error);
            return Ok(None);
        }

        if let Some(Value::Object(primary)) = documents.first_mut() {
            let is_sobject_family = primary
                .get(DATA_PACK_TYPE)
                .and_then(Value::as_str)
                .is_some_and(|t| t.starts_with(SOBJECT_PREFIX));
            if is_sobject_family {
                if let Some(record_type) = primary.get(RECORD_SOBJECT_TYPE).and_then(Value::as_str)
                {
                    data_field = record_type.to_string();
                }
                primary.insert(DATA_PACK_TYPE.to_string(), Value::String(SOBJECT.to_string()));
            }

            if options.headers_only
                && headers_type != HeaderSupport::All
                && strip_to_header(primary, job)
            {
                tracing::debug!("[Scheduler] {} references a record not yet deployed", key);
                return Ok(None);
            }
        }

        let display_name = documents
            .first()
            .map(|primary| self.types.display_name(primary))
            .unwrap_or_default();
        record.set_documents(&data_field, documents);
        job.display_labels
            .insert(key.clone(), format!("{display_name} ({key})"));

        if !single_file {
            let size = record_size(job, &record)?;
            // The first record of a batch always fits.
            if !selection.keys_in_batch.is_empty()
                && size + selection.current_len > options.max_import_size
            {
                tracing::debug!("[Scheduler] {} does not fit the remaining budget", key);
                return Ok(None);
            }
            selection.current_len += size;
        }

        let next_status = if options.headers_only {
            if headers_type == HeaderSupport::Identical {
                RecordStatus::Added
            } else {
                RecordStatus::Header
            }
        } else if status == RecordStatus::Header {
            RecordStatus::AddedHeader
        } else {
            RecordStatus::Added
        };
        job.set_status(key, next_status);
        selection
            .parallel_status
            .insert(key_type.to_string(), true);

        let data_field_pointer = format!("/{}", pointer_token(&data_field));
        for mut compile_job in compile_jobs {
            compile_job.document_pointer =
                format!("{data_field_pointer}{}", compile_job.document_pointer);
            job.cache.compile_queue.push(compile_job);
        }

        tracing::info!(
            "[Scheduler] Adding to {} {} - {}{}{}",
            if single_file { "File" } else { "Deploy" },
            key,
            label,
            if options.headers_only { " - Headers Only" } else { "" },
            if options.force_deploy { " - Force Deploy" } else { "" },
        );

        Ok(Some(record))
    }

    /// Parents of `key` from its `_ParentKeys.json` content, cached for the session.
    fn parent_keys(
        &self,
        job: &mut ImportJob,
        key: &RecordKey,
        text: &str,
    ) -> Result<Vec<RecordKey>, BuildError> {
        if let Some(cached) = job.cache.parent_data.get(key) {
            return Ok(cached.clone());
        }
        let parents = serde_json::from_str::<Vec<String>>(text)
            .map_err(|e| {
                BuildError::Serialization(format!("Error Loading Parent Keys {key}: {e}"))
            })?
            .into_iter()
            .filter(|parent| parent != key.as_str())
            .filter(|parent| !self.types.is_guaranteed_parent_key(parent))
            .map(RecordKey::from)
            .collect::<Vec<RecordKey>>();
        job.cache.parent_data.insert(key.clone(), parents.clone());
        Ok(parents)
    }

    /// Whether any parent is known to the session, not yet deployed, and not in this batch.
    fn needs_parents(
        &self,
        job: &ImportJob,
        keys_in_batch: &HashSet<RecordKey>,
        parents: &[RecordKey],
    ) -> bool {
        parents.iter().any(|parent| {
            job.status(parent.as_str())
                .is_some_and(|s| !s.satisfies_dependents())
                && !keys_in_batch.contains(parent)
        })
    }
}

fn record_size(job: &mut ImportJob, record: &Record) -> Result<usize, BuildError> {
    if let Some(size) = job.cache.sizes.get(&record.key) {
        return Ok(*size);
    }
    // Separator between records in the serialized batch.
    let size = record.serialized_len()? + 1;
    job.cache.sizes.insert(record.key.clone(), size);
    Ok(size)
}

/// Empty the child collections of a header stub. Returns true when a lookup field points at a
/// record of the session that has not been deployed yet.
fn strip_to_header(primary: &mut serde_json::Map<String, Value>, job: &ImportJob) -> bool {
    let mut has_reference = false;
    for value in primary.values_mut() {
        match value {
            Value::Array(items) => items.clear(),
            Value::Object(lookup) => {
                let pending = lookup
                    .get(LOOKUP_RECORD_SOURCE_KEY)
                    .and_then(Value::as_str)
                    .and_then(|source_key| job.source_key_to_primary_key.get(source_key))
                    .and_then(|referenced| job.status(referenced.as_str()))
                    .is_some_and(|s| !matches!(s, RecordStatus::Success | RecordStatus::Header));
                has_reference |= pending;
            }
            _ => {}
        }
    }
    has_reference
}
