// Type metadata for DataPack types
//
// The builder consults a `DataPackTypes` implementation for everything that varies per DataPack
// type: batch limits, pagination policy, header support, which fields hold JSON text, which
// fields are compiled, and how folders are named. `TypeRegistry` is the table-driven
// implementation, loadable from TOML.

use crate::{
    config::{get_content, DEFAULT_MAX_DEPLOY_COUNT},
    error::BuildError,
    properties::{
        BuildOnlyDirective, HeaderSupport, PaginationActions, RECORD_SOURCE_KEY,
    },
    record::Record,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, path::Path};

pub const DEFAULT_PAGINATION_SIZE: usize = 1000;

static UNSAFE_KEY_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9/_\-]+").expect("static regex"));

/// Marks a field whose file content is compiled and where the compiled text goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedDefinition {
    /// Source language handed to the compiler, e.g. `scss`.
    pub file_type: String,
    /// Sibling field receiving the compiled output.
    pub compiled_field: Option<String>,
}

pub trait DataPackTypes: Send + Sync {
    /// Field of the record's data object holding its primary documents.
    fn data_field(&self, record: &Record) -> Option<String> {
        record.data_field().map(str::to_string)
    }

    /// Per-type cap on records in one batch.
    fn max_deploy(&self, data_pack_type: &str) -> Option<usize>;

    fn pagination_size(&self, data_pack_type: &str) -> usize;

    fn pagination_actions(&self, data_pack_type: &str) -> BTreeMap<String, PaginationActions>;

    /// Whether several records of this type may be in flight at once.
    fn allow_parallel(&self, data_pack_type: &str, document: &Value) -> bool;

    fn headers_only(&self, data_pack_type: &str) -> HeaderSupport;

    /// Parents that are always considered deployed.
    fn is_guaranteed_parent_key(&self, key: &str) -> bool;

    /// Fields rewritten to canonical JSON text.
    fn json_fields(&self, data_pack_type: &str, data_field: &str) -> Vec<String>;

    fn build_only_fields(
        &self,
        data_pack_type: &str,
        record_type: &str,
    ) -> BTreeMap<String, BuildOnlyDirective>;

    /// Fields copied into the pre-flight summary for documents of `record_type`.
    fn summary_fields(&self, record_type: &str) -> Vec<String>;

    fn expanded_definition(
        &self,
        data_pack_type: &str,
        data_field: &str,
        field: &str,
    ) -> Option<ExpandedDefinition>;

    /// Whether `field` receives compiled output for this type.
    fn is_compiled_field(&self, data_pack_type: &str, data_field: &str, field: &str) -> bool;

    fn display_name(&self, document: &Value) -> String {
        document
            .get("Name")
            .or_else(|| document.get(RECORD_SOURCE_KEY))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn sanitize_key(&self, key: &str) -> String {
        UNSAFE_KEY_CHARS.replace_all(key.trim(), "-").into_owned()
    }

    /// Folder name (and so key name) of a primary document.
    fn folder_name(
        &self,
        data_pack_type: &str,
        record_type: &str,
        document: &Value,
    ) -> Result<String, BuildError>;

    /// Records that ship separately from an oversized record instead of paginating it.
    fn extract_bulk_records(&self, _record: &Record) -> Option<Value> {
        None
    }
}

/// Settings for one DataPack type. Unset values fall back to the registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeDefinition {
    pub max_deploy: Option<usize>,
    pub pagination_size: Option<usize>,
    /// Field → actions applied to continuation pages.
    pub pagination_actions: BTreeMap<String, PaginationActions>,
    pub allow_parallel: Option<bool>,
    pub headers_only: Option<HeaderSupport>,
    /// Data field → JSON-canonicalized fields.
    pub json_fields: BTreeMap<String, Vec<String>>,
    /// Record type → field → directive.
    pub build_only_fields: BTreeMap<String, BTreeMap<String, BuildOnlyDirective>>,
    /// Data field → field → compile definition.
    pub expanded: BTreeMap<String, BTreeMap<String, ExpandedDefinition>>,
    /// Document fields joined with `_` to name the record's folder.
    pub folder_name: Vec<String>,
}

/// Table-driven [`DataPackTypes`].
///
/// ```toml
/// guaranteed_parent_keys = ["RecordType/*"]
///
/// [summary_fields]
/// "%vlocity_namespace%__OmniScript__c" = ["Name", "%vlocity_namespace%__Type__c"]
///
/// [types.OmniScript]
/// allow_parallel = false
/// pagination_size = 200
/// headers_only = "Fields"
/// folder_name = ["Type", "SubType", "Language"]
///
/// [types.OmniScript.pagination_actions]
/// Elements = ["AddLookupRelationships"]
///
/// [types.VlocityUITemplate.expanded.Template.SassStyle]
/// file_type = "scss"
/// compiled_field = "CustomCSS"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeRegistry {
    pub defaults: TypeDefinition,
    pub types: BTreeMap<String, TypeDefinition>,
    /// Exact keys, or `Type/*` to guarantee every key of a type.
    pub guaranteed_parent_keys: Vec<String>,
    pub summary_fields: BTreeMap<String, Vec<String>>,
}

impl TypeRegistry {
    pub fn from_toml_str(content: &str) -> Result<Self, BuildError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, BuildError> {
        tracing::debug!("Reading type registry from: {:?}", path.as_ref());
        Self::from_toml_str(&get_content(path)?)
    }

    /// Register a type definition, replacing any previous one.
    pub fn register(&mut self, data_pack_type: &str, definition: TypeDefinition) {
        if self
            .types
            .insert(data_pack_type.to_string(), definition)
            .is_some()
        {
            tracing::info!(
                "[TypeRegistry::register] Overwriting existing definition: {}",
                data_pack_type
            );
        }
    }

    pub fn get(&self, data_pack_type: &str) -> Option<&TypeDefinition> {
        self.types.get(data_pack_type)
    }

    fn setting<T>(
        &self,
        data_pack_type: &str,
        pick: impl Fn(&TypeDefinition) -> Option<T>,
    ) -> Option<T> {
        self.get(data_pack_type)
            .and_then(&pick)
            .or_else(|| pick(&self.defaults))
    }
}

impl DataPackTypes for TypeRegistry {
    fn max_deploy(&self, data_pack_type: &str) -> Option<usize> {
        self.setting(data_pack_type, |d| d.max_deploy)
    }

    fn pagination_size(&self, data_pack_type: &str) -> usize {
        self.setting(data_pack_type, |d| d.pagination_size)
            .unwrap_or(DEFAULT_PAGINATION_SIZE)
    }

    fn pagination_actions(&self, data_pack_type: &str) -> BTreeMap<String, PaginationActions> {
        self.setting(data_pack_type, |d| {
            (!d.pagination_actions.is_empty()).then(|| d.pagination_actions.clone())
        })
        .unwrap_or_default()
    }

    fn allow_parallel(&self, data_pack_type: &str, _document: &Value) -> bool {
        self.setting(data_pack_type, |d| d.allow_parallel)
            .unwrap_or(true)
    }

    fn headers_only(&self, data_pack_type: &str) -> HeaderSupport {
        self.setting(data_pack_type, |d| d.headers_only)
            .unwrap_or_default()
    }

    fn is_guaranteed_parent_key(&self, key: &str) -> bool {
        self.guaranteed_parent_keys.iter().any(|guaranteed| {
            match guaranteed.strip_suffix('*') {
                Some(prefix) => key.starts_with(prefix),
                None => guaranteed == key,
            }
        })
    }

    fn json_fields(&self, data_pack_type: &str, data_field: &str) -> Vec<String> {
        self.setting(data_pack_type, |d| d.json_fields.get(data_field).cloned())
            .unwrap_or_default()
    }

    fn build_only_fields(
        &self,
        data_pack_type: &str,
        record_type: &str,
    ) -> BTreeMap<String, BuildOnlyDirective> {
        self.setting(data_pack_type, |d| d.build_only_fields.get(record_type).cloned())
            .unwrap_or_default()
    }

    fn summary_fields(&self, record_type: &str) -> Vec<String> {
        self.summary_fields
            .get(record_type)
            .cloned()
            .unwrap_or_default()
    }

    fn expanded_definition(
        &self,
        data_pack_type: &str,
        data_field: &str,
        field: &str,
    ) -> Option<ExpandedDefinition> {
        self.setting(data_pack_type, |d| {
            d.expanded.get(data_field).and_then(|f| f.get(field)).cloned()
        })
    }

    fn is_compiled_field(&self, data_pack_type: &str, data_field: &str, field: &str) -> bool {
        let compiles_into = |d: &TypeDefinition| {
            d.expanded.get(data_field).is_some_and(|fields| {
                fields
                    .values()
                    .any(|def| def.compiled_field.as_deref() == Some(field))
            })
        };
        self.get(data_pack_type).is_some_and(compiles_into) || compiles_into(&self.defaults)
    }

    fn folder_name(
        &self,
        data_pack_type: &str,
        _record_type: &str,
        document: &Value,
    ) -> Result<String, BuildError> {
        let fields = self
            .setting(data_pack_type, |d| {
                (!d.folder_name.is_empty()).then(|| d.folder_name.clone())
            })
            .unwrap_or_else(|| vec!["Name".to_string()]);

        let parts = fields
            .iter()
            .filter_map(|field| match document.get(field) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::Bool(b)) => Some(b.to_string()),
                _ => None,
            })
            .collect::<Vec<String>>();

        if parts.is_empty() {
            return Err(BuildError::NotFound(format!(
                "No folder name fields {fields:?} present for {data_pack_type}"
            )));
        }
        Ok(self.sanitize_key(&parts.join("_")))
    }
}

/// Fallback max deploy count when a type sets none.
pub fn max_deploy_or_default(types: &dyn DataPackTypes, data_pack_type: &str) -> usize {
    types
        .max_deploy(data_pack_type)
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_MAX_DEPLOY_COUNT)
}
