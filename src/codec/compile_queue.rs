use crate::{error::BuildError, properties::RecordKey, record::Record};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

/// Options handed to the style compiler with each job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Directories probed, in order, for imported sources.
    pub include_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompileStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

/// One queued compilation of a style-sheet field.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub filename: PathBuf,
    pub language: String,
    pub source: String,
    pub options: CompileOptions,
    /// Field of the owning document receiving the compiled text.
    pub result_field: String,
    pub owning_record: RecordKey,
    /// JSON pointer, within the owning record's `data`, of the owning document.
    pub document_pointer: String,
    pub status: CompileStatus,
}

/// External compiler. Implementations are only ever driven with one job in flight.
#[async_trait]
pub trait StyleCompiler: Send + Sync {
    async fn compile(
        &self,
        language: &str,
        source: &str,
        options: &CompileOptions,
    ) -> Result<String, BuildError>;
}

/// Compiler used when none is configured: every language is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedCompiler;

#[async_trait]
impl StyleCompiler for UnsupportedCompiler {
    async fn compile(
        &self,
        language: &str,
        _source: &str,
        _options: &CompileOptions,
    ) -> Result<String, BuildError> {
        Err(BuildError::Compile(format!("Unknown language: {language}")))
    }
}

/// Content of the first `<dir>/<name>.scss` that can be read from `include_paths`.
///
/// For [`StyleCompiler`] implementations resolving `@import`s: every job carries the sibling
/// record directories of its record in [`CompileOptions::include_paths`], in probe order.
pub async fn resolve_include(name: &str, include_paths: &[PathBuf]) -> Result<String, BuildError> {
    for dir in include_paths {
        let candidate = dir.join(format!("{name}.scss"));
        if let Ok(content) = tokio::fs::read_to_string(&candidate).await {
            return Ok(content);
        }
    }
    Err(BuildError::NotFound(format!(
        "Requested file not found: {name}"
    )))
}

#[derive(Debug, Clone)]
pub struct CompiledOutput {
    pub job: CompileJob,
    pub compiled: String,
}

impl CompiledOutput {
    /// Write the compiled text into the owning document of `record`.
    pub fn apply(&self, record: &mut Record) -> bool {
        match record
            .data
            .pointer_mut(&self.job.document_pointer)
            .and_then(Value::as_object_mut)
        {
            Some(document) => {
                document.insert(
                    self.job.result_field.clone(),
                    Value::String(self.compiled.clone()),
                );
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub key: RecordKey,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutcome {
    pub compile_count: usize,
    pub outputs: Vec<CompiledOutput>,
    pub errors: Vec<CompileFailure>,
}

impl CompileOutcome {
    pub fn has_compile_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Strictly serialized compile pipeline.
///
/// Enqueueing never blocks. [`CompileQueue::drain_all`] pops jobs last-in-first-out and awaits
/// each compilation before starting the next; concurrent drains wait for each other.
#[derive(Debug, Default)]
pub struct CompileQueue {
    jobs: Mutex<Vec<CompileJob>>,
    drain_guard: tokio::sync::Mutex<()>,
}

impl CompileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mut job: CompileJob) {
        job.status = CompileStatus::Queued;
        self.jobs.lock().push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Discard every queued job.
    pub fn clear(&self) {
        self.jobs.lock().clear();
    }

    /// Discard queued jobs belonging to `keys`.
    pub fn discard(&self, keys: &HashSet<RecordKey>) {
        self.jobs
            .lock()
            .retain(|job| !keys.contains(&job.owning_record));
    }

    pub async fn drain_all(&self, compiler: &dyn StyleCompiler) -> CompileOutcome {
        let _guard = self.drain_guard.lock().await;
        let mut outcome = CompileOutcome::default();
        let mut failed_keys = HashSet::<RecordKey>::new();

        loop {
            let next = self.jobs.lock().pop();
            let Some(mut job) = next else {
                break;
            };

            if failed_keys.contains(&job.owning_record) {
                tracing::debug!(
                    "[CompileQueue] Skipping {:?}, {} already failed",
                    job.filename,
                    job.owning_record
                );
                continue;
            }

            job.status = CompileStatus::Running;
            tracing::debug!("[CompileQueue] Start compilation {:?}", job.filename);

            match compiler
                .compile(&job.language, &job.source, &job.options)
                .await
            {
                Ok(compiled) => {
                    job.status = CompileStatus::Completed;
                    outcome.compile_count += 1;
                    outcome.outputs.push(CompiledOutput { job, compiled });
                }
                Err(e) => {
                    job.status = CompileStatus::Failed;
                    let message = format!(
                        "Failed to compile {}: {} {}",
                        job.language.to_uppercase(),
                        display_path(&job.filename),
                        e
                    );
                    tracing::error!("Compilation Error {} {}", job.owning_record, message);
                    failed_keys.insert(job.owning_record.clone());
                    outcome.errors.push(CompileFailure {
                        key: job.owning_record,
                        message,
                    });
                }
            }
        }

        if outcome.compile_count > 0 || !outcome.errors.is_empty() {
            tracing::debug!(
                "[CompileQueue] Compiled {} files with {} errors.",
                outcome.compile_count,
                outcome.errors.len()
            );
        }
        outcome
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
