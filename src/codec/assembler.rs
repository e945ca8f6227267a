//! Record Assembler: turns a primary document whose fields reference sibling files into the fully
//! expanded document tree that is shipped.
//!
//! A field holding a list of filenames is replaced by the list of (recursively assembled)
//! documents those files contain. A field holding a single filename is replaced by the file's
//! content: a typed document (or list of typed documents) is assembled in turn, a compiled source
//! is queued for compilation, and anything else is stored as text. Fields the type declares as
//! JSON are canonicalized, and absent build-only fields are filled in.
//!
//! Assembly never touches the session status table. Problems are reported in
//! [`Assembly::diagnostics`] and the scheduler decides what becomes of the record.

use crate::{
    codec::{
        canonical::canonicalize_field,
        compile_queue::{CompileJob, CompileOptions, CompileStatus},
        diagnostic::{BuildDiagnostic, DiagnosticKind},
    },
    error::BuildError,
    paths::{normalize_path, slash_path, FileLookup},
    properties::{
        BuildOnlyDirective, RecordKey, DATA_PACK_TYPE, IS_INCLUDED, RECORD_SOBJECT_TYPE,
        RECORD_SOURCE_KEY, SOBJECT,
    },
    record::pointer_join,
    store::ContentStore,
    types::DataPackTypes,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What a referenced file turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentKind {
    /// A typed document, or a list whose first element is one.
    Documents(Value),
    /// JSON without a record type.
    Json(Value),
    Text,
}

pub fn classify_content(content: &str) -> ContentKind {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => {
            let typed = match &value {
                Value::Array(items) => items
                    .first()
                    .is_some_and(|first| first.get(RECORD_SOBJECT_TYPE).is_some()),
                Value::Object(map) => map.contains_key(RECORD_SOBJECT_TYPE),
                _ => false,
            };
            if typed {
                ContentKind::Documents(value)
            } else {
                ContentKind::Json(value)
            }
        }
        Err(_) => ContentKind::Text,
    }
}

fn into_documents(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Output of assembling one record.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub documents: Vec<Value>,
    pub diagnostics: Vec<BuildDiagnostic>,
    /// Jobs whose `document_pointer` is relative to `documents`.
    pub compile_jobs: Vec<CompileJob>,
}

impl Assembly {
    /// Whether a referenced file failed to parse.
    pub fn is_corrupt(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::CorruptDocument)
    }

    pub fn primary(&self) -> Option<&Value> {
        self.documents.first()
    }
}

pub struct RecordAssembler<'a> {
    types: &'a dyn DataPackTypes,
    store: &'a ContentStore,
    files: &'a dyn FileLookup,
    key: &'a RecordKey,
    dir: &'a Path,
    data_pack_type: &'a str,
    compile_on_build: bool,
    assembly: Assembly,
}

impl<'a> RecordAssembler<'a> {
    pub fn new(
        types: &'a dyn DataPackTypes,
        store: &'a ContentStore,
        files: &'a dyn FileLookup,
        key: &'a RecordKey,
        dir: &'a Path,
        data_pack_type: &'a str,
    ) -> Self {
        RecordAssembler {
            types,
            store,
            files,
            key,
            dir,
            data_pack_type,
            compile_on_build: false,
            assembly: Assembly::default(),
        }
    }

    pub fn compile_on_build(mut self, compile_on_build: bool) -> Self {
        self.compile_on_build = compile_on_build;
        self
    }

    /// Assemble the record's primary document(s) under `data_field`.
    pub fn assemble(mut self, raw: Value, data_field: &str) -> Result<Assembly, BuildError> {
        let documents = self.build_from_files(into_documents(raw), data_field, "")?;
        self.assembly.documents = documents;
        Ok(self.assembly)
    }

    fn build_from_files(
        &mut self,
        mut documents: Vec<Value>,
        current_data_field: &str,
        pointer: &str,
    ) -> Result<Vec<Value>, BuildError> {
        for (index, document) in documents.iter_mut().enumerate() {
            let Value::Object(map) = document else {
                continue;
            };
            let document_pointer = format!("{pointer}/{index}");
            self.mark_included(map, index);

            let fields = map.keys().cloned().collect::<Vec<String>>();
            for field in fields.iter().filter(|f| f.as_str() != "Name") {
                let Some(value) = map.get(field) else {
                    continue;
                };
                match value {
                    Value::Array(names) if names.first().is_some_and(Value::is_string) => {
                        let names = names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect::<Vec<String>>();
                        let loaded = self.load_documents(&names);
                        if !loaded.is_empty() {
                            let child_pointer = pointer_join(&document_pointer, field);
                            let built = self.build_from_files(loaded, field, &child_pointer)?;
                            map.insert(field.clone(), Value::Array(built));
                        }
                    }
                    Value::String(filename) => {
                        let filename = filename.clone();
                        self.resolve_file_field(
                            map,
                            field,
                            &filename,
                            current_data_field,
                            &document_pointer,
                        )?;
                    }
                    _ => {}
                }
            }

            for json_field in self.types.json_fields(self.data_pack_type, current_data_field) {
                if let Some(value) = map.get_mut(&json_field) {
                    canonicalize_field(value)?;
                }
            }

            self.fill_build_only_fields(map, index);
        }
        Ok(documents)
    }

    fn mark_included(&self, map: &mut Map<String, Value>, index: usize) {
        if !map.contains_key(DATA_PACK_TYPE) {
            return;
        }
        map.insert(IS_INCLUDED.to_string(), Value::Bool(true));

        let is_sobject = map.get(DATA_PACK_TYPE).and_then(Value::as_str) == Some(SOBJECT);
        if is_sobject && !map.contains_key(RECORD_SOURCE_KEY) {
            let record_type = map
                .get(RECORD_SOBJECT_TYPE)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let source_key = format!("{}/{}/{}", self.key, record_type, index);
            map.insert(RECORD_SOURCE_KEY.to_string(), Value::String(source_key));
        }
    }

    /// Parse every listed file. Missing and corrupt files are reported and skipped.
    fn load_documents(&mut self, names: &[String]) -> Vec<Value> {
        let mut loaded = Vec::new();
        for name in names {
            let path = self.dir.join(name);
            let store = self.store;
            match store.get(&path) {
                Some(content) => match serde_json::from_str::<Value>(content) {
                    Ok(value) => loaded.push(value),
                    Err(e) => {
                        tracing::debug!("[RecordAssembler] {} does not parse: {}", name, e);
                        self.assembly.diagnostics.push(BuildDiagnostic::corrupt_document(
                            self.key,
                            slash_path(&path),
                        ));
                    }
                },
                None => self
                    .assembly
                    .diagnostics
                    .push(BuildDiagnostic::missing_file(self.key, slash_path(&path))),
            }
        }
        loaded
    }

    fn resolve_file_field(
        &mut self,
        map: &mut Map<String, Value>,
        field: &str,
        filename: &str,
        current_data_field: &str,
        document_pointer: &str,
    ) -> Result<(), BuildError> {
        let path = self.dir.join(filename);
        let store = self.store;
        let Some(content) = store.get(&path) else {
            return Ok(());
        };

        match classify_content(content) {
            ContentKind::Documents(value) => {
                let child_pointer = pointer_join(document_pointer, field);
                let built = self.build_from_files(into_documents(value), field, &child_pointer)?;
                map.insert(field.to_string(), Value::Array(built));
            }
            parsed => {
                let expanded = self
                    .types
                    .expanded_definition(self.data_pack_type, current_data_field, field);
                match expanded {
                    Some(definition)
                        if self.compile_on_build && definition.compiled_field.is_some() =>
                    {
                        let result_field = definition.compiled_field.unwrap_or_default();
                        self.assembly.compile_jobs.push(CompileJob {
                            filename: path.clone(),
                            language: definition.file_type,
                            source: content.to_string(),
                            options: CompileOptions {
                                include_paths: self.include_paths()?,
                            },
                            result_field,
                            owning_record: self.key.clone(),
                            document_pointer: document_pointer.to_string(),
                            status: CompileStatus::Queued,
                        });
                        // The source ships alongside the compiled output.
                        map.insert(field.to_string(), Value::String(content.to_string()));
                    }
                    _ => {
                        if self.compile_on_build
                            && self.types.is_compiled_field(
                                self.data_pack_type,
                                current_data_field,
                                field,
                            )
                        {
                            return Ok(());
                        }
                        let text = match parsed {
                            ContentKind::Json(value) => serde_json::to_string(&value)?,
                            _ => content.to_string(),
                        };
                        map.insert(field.to_string(), Value::String(text));
                    }
                }
            }
        }
        Ok(())
    }

    /// Sibling directories of the record directory, probed for style-sheet imports.
    fn include_paths(&self) -> Result<Vec<PathBuf>, BuildError> {
        let parent = self.dir.join("..");
        Ok(self
            .files
            .directories(&parent, false)?
            .into_iter()
            .map(|dir| normalize_path(&parent.join(dir)))
            .collect())
    }

    fn fill_build_only_fields(&self, map: &mut Map<String, Value>, index: usize) {
        let record_type = map
            .get(RECORD_SOBJECT_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        for (field, directive) in self.types.build_only_fields(self.data_pack_type, &record_type) {
            if map.get(&field).is_some_and(|v| !v.is_null()) {
                continue;
            }
            let value = match directive {
                BuildOnlyDirective::Index => Value::from(index + 1),
                BuildOnlyDirective::Guid => Value::String(Uuid::new_v4().to_string()),
                BuildOnlyDirective::Value(value) => value,
            };
            map.insert(field, value);
        }
    }
}
