//! Session state of one import.
//!
//! An [`ImportJob`] is created by the caller, handed to every
//! [`DataPackBuilder::build_import`](crate::builder::DataPackBuilder::build_import) call of the
//! session, and updated in place. The external deploy step moves statuses on to `Success` (or back
//! to `Ready`/`Error`) between calls.

use crate::{
    codec::{compile_queue::CompileQueue, diagnostic::BuildDiagnostic},
    config::BuildOptions,
    properties::{RecordKey, RecordStatus},
    store::ContentStore,
    types::DataPackTypes,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub key: RecordKey,
    pub status: RecordStatus,
}

/// Record statuses, iterated in insertion order.
///
/// Removal leaves a tombstone in the order list; tombstones are compacted once they outnumber
/// live keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<StatusEntry>", into = "Vec<StatusEntry>")]
pub struct StatusTable {
    order: Vec<Option<RecordKey>>,
    /// Key → (position in `order`, status).
    statuses: HashMap<RecordKey, (usize, RecordStatus)>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<RecordStatus> {
        self.statuses.get(key).map(|(_, status)| *status)
    }

    /// Set the status of `key`. New keys are appended to the iteration order.
    pub fn set(&mut self, key: &RecordKey, status: RecordStatus) {
        match self.statuses.get_mut(key.as_str()) {
            Some(entry) => entry.1 = status,
            None => {
                self.statuses
                    .insert(key.clone(), (self.order.len(), status));
                self.order.push(Some(key.clone()));
            }
        }
    }

    /// Set `key` to `status` only when it has no status yet.
    pub fn set_if_absent(&mut self, key: &RecordKey, status: RecordStatus) {
        if !self.statuses.contains_key(key.as_str()) {
            self.set(key, status);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<RecordStatus> {
        let (position, status) = self.statuses.remove(key)?;
        self.order[position] = None;
        if self.order.len() > 2 * self.statuses.len() + 16 {
            self.compact();
        }
        Some(status)
    }

    fn compact(&mut self) {
        self.order.retain(Option::is_some);
        for (position, key) in self.order.iter().flatten().enumerate() {
            if let Some(entry) = self.statuses.get_mut(key) {
                entry.0 = position;
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.statuses.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.order.iter().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, RecordStatus)> {
        self.keys()
            .filter_map(|k| self.statuses.get(k).map(|(_, s)| (k, *s)))
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.statuses.values().filter(|(_, s)| *s == status).count()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

impl PartialEq for StatusTable {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl From<Vec<StatusEntry>> for StatusTable {
    fn from(entries: Vec<StatusEntry>) -> Self {
        let mut table = StatusTable::new();
        for entry in entries {
            table.set(&entry.key, entry.status);
        }
        table
    }
}

impl From<StatusTable> for Vec<StatusEntry> {
    fn from(table: StatusTable) -> Self {
        table
            .iter()
            .map(|(key, status)| StatusEntry {
                key: key.clone(),
                status,
            })
            .collect()
    }
}

/// Memoized work of one session. Never serialized: a deserialized job walks the tree again on its
/// next build.
#[derive(Debug, Default)]
pub(crate) struct SessionCache {
    /// Cached file content, present once the tree has been walked.
    pub(crate) store: Option<Arc<ContentStore>>,
    /// Parsed `_ParentKeys.json` content, without self references or guaranteed parents.
    pub(crate) parent_data: HashMap<RecordKey, Vec<RecordKey>>,
    /// Serialized length of each record, as last measured.
    pub(crate) sizes: HashMap<RecordKey, usize>,
    pub(crate) needs_pagination: HashMap<RecordKey, bool>,
    pub(crate) saved_bulk_records: HashMap<RecordKey, Value>,
    pub(crate) compile_queue: CompileQueue,
}

impl SessionCache {
    /// Forget everything derived from file content.
    fn clear(&mut self) {
        self.store = None;
        self.parent_data.clear();
        self.sizes.clear();
        self.needs_pagination.clear();
        self.saved_bulk_records.clear();
        self.compile_queue.clear();
    }
}

/// Clones share the cached content. Queued compilations belong to the build call in progress and
/// are not copied.
impl Clone for SessionCache {
    fn clone(&self) -> Self {
        SessionCache {
            store: self.store.clone(),
            parent_data: self.parent_data.clone(),
            sizes: self.sizes.clone(),
            needs_pagination: self.needs_pagination.clone(),
            saved_bulk_records: self.saved_bulk_records.clone(),
            compile_queue: CompileQueue::new(),
        }
    }
}

/// Mutable state shared by every build call of one import session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportJob {
    pub options: BuildOptions,
    pub current_status: StatusTable,
    /// Generated key → `<Type>/<Name>` directory relative to the import root.
    pub keys_to_directories: HashMap<RecordKey, String>,
    pub generated_keys_to_names: HashMap<RecordKey, String>,
    /// Every key admitted into the session, in discovery order.
    pub all_parents: Vec<RecordKey>,
    pub pre_deploy_data_summary: Vec<Map<String, Value>>,
    pub all_data_summary: HashMap<RecordKey, Map<String, Value>>,
    /// Source key of a record's primary document → the record's key.
    pub source_key_to_primary_key: HashMap<String, RecordKey>,
    pub display_labels: HashMap<RecordKey, String>,
    /// Manifest entries matched during initialization.
    pub manifest_found: HashSet<String>,
    pub current_errors: HashMap<RecordKey, String>,
    pub diagnostics: Vec<BuildDiagnostic>,
    pub has_error: bool,
    #[serde(skip)]
    pub(crate) cache: SessionCache,
}

impl ImportJob {
    pub fn new(options: BuildOptions) -> Self {
        ImportJob {
            options,
            ..Default::default()
        }
    }

    pub fn status(&self, key: &str) -> Option<RecordStatus> {
        self.current_status.get(key)
    }

    pub fn set_status(&mut self, key: &RecordKey, status: RecordStatus) {
        self.current_status.set(key, status);
    }

    /// Discard cached file content and everything measured from it. The next build walks the
    /// tree again; statuses are kept.
    pub fn reset_file_data(&mut self) {
        tracing::debug!("[ImportJob] Resetting file data");
        self.cache.clear();
    }

    /// Bulk records extracted from `key` instead of paginating it.
    pub fn saved_bulk_records(&self, key: &str) -> Option<&Value> {
        self.cache.saved_bulk_records.get(key)
    }

    /// Record a diagnostic. Error kinds flag the session.
    pub fn record(&mut self, diagnostic: BuildDiagnostic) {
        if diagnostic.is_error() {
            tracing::error!("{}", diagnostic);
            self.has_error = true;
        } else {
            tracing::warn!("{}", diagnostic);
        }
        self.diagnostics.push(diagnostic);
    }

    /// Rendered error diagnostics, in the order they were recorded.
    pub fn errors(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(ToString::to_string)
            .collect()
    }

    /// Whether the record is admitted by the manifest filters. Matches are remembered in
    /// [`ImportJob::manifest_found`].
    pub fn is_in_manifest(
        &mut self,
        types: &dyn DataPackTypes,
        data_pack_type: &str,
        key: &RecordKey,
        name: &str,
    ) -> bool {
        let keys = self.options.manifest_keys.as_deref();
        let objects = self.options.manifest_objects.as_ref();

        if keys.is_none() && objects.is_none() {
            return true;
        }

        if let Some(keys) = keys {
            let sanitized = types.sanitize_key(key.as_str());
            if keys.iter().any(|k| k == key.as_str() || *k == sanitized) {
                self.manifest_found.insert(key.to_string());
                self.manifest_found.insert(sanitized);
                return true;
            }
            if keys.iter().any(|k| k == data_pack_type) {
                self.manifest_found.insert(key.to_string());
                return true;
            }
        }

        if objects
            .and_then(|objects| objects.get(data_pack_type))
            .is_some_and(|names| names.iter().any(|n| n == name))
        {
            self.manifest_found.insert(key.to_string());
            return true;
        }

        false
    }

    /// Explicit manifest keys that matched nothing. Bare type names are never reported.
    pub fn missing_manifest_keys(&self, types: &dyn DataPackTypes) -> Vec<String> {
        self.options
            .manifest_keys
            .iter()
            .flatten()
            .filter(|key| key.contains('/'))
            .filter(|key| {
                !(self.manifest_found.contains(key.as_str())
                    || self.manifest_found.contains(&types.sanitize_key(key)))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::diagnostic::DiagnosticKind, types::TypeRegistry};
    use std::collections::BTreeMap;

    #[test]
    fn test_status_table_keeps_insertion_order() {
        let mut table = StatusTable::new();
        table.set(&RecordKey::from("B/1"), RecordStatus::Ready);
        table.set(&RecordKey::from("A/1"), RecordStatus::Ready);
        table.set(&RecordKey::from("B/1"), RecordStatus::Added);
        table.set_if_absent(&RecordKey::from("A/1"), RecordStatus::Error);

        let keys: Vec<&str> = table.keys().map(RecordKey::as_str).collect();
        assert_eq!(keys, vec!["B/1", "A/1"]);
        assert_eq!(table.get("B/1"), Some(RecordStatus::Added));
        assert_eq!(table.get("A/1"), Some(RecordStatus::Ready));

        table.remove("B/1");
        assert_eq!(table.len(), 1);
        assert!(!table.contains("B/1"));
    }

    #[test]
    fn test_status_table_reinsert_after_remove_goes_last() {
        let mut table = StatusTable::new();
        for i in 0..100 {
            table.set(&RecordKey::new("A", &i.to_string()), RecordStatus::Ready);
        }
        for i in 0..90 {
            assert_eq!(
                table.remove(&format!("A/{i}")),
                Some(RecordStatus::Ready)
            );
        }
        assert_eq!(table.remove("A/0"), None);
        table.set(&RecordKey::from("A/5"), RecordStatus::Header);
        table.set(&RecordKey::from("A/95"), RecordStatus::Added);

        let keys: Vec<&str> = table.keys().map(RecordKey::as_str).collect();
        assert_eq!(
            keys,
            vec!["A/90", "A/91", "A/92", "A/93", "A/94", "A/95", "A/96", "A/97", "A/98", "A/99", "A/5"]
        );
        assert_eq!(table.len(), 11);
        assert_eq!(table.count(RecordStatus::Ready), 9);
        assert_eq!(table.get("A/95"), Some(RecordStatus::Added));

        let rebuilt: StatusTable = Vec::<StatusEntry>::from(table.clone()).into();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn test_status_table_serializes_as_ordered_entries() {
        let mut table = StatusTable::new();
        table.set(&RecordKey::from("Z/1"), RecordStatus::Success);
        table.set(&RecordKey::from("A/1"), RecordStatus::Header);

        let text = serde_json::to_string(&table).unwrap();
        assert_eq!(
            text,
            r#"[{"key":"Z/1","status":"Success"},{"key":"A/1","status":"Header"}]"#
        );
        let back: StatusTable = serde_json::from_str(&text).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_manifest_matching() {
        let registry = TypeRegistry::default();
        let mut job = ImportJob::new(BuildOptions {
            manifest_keys: Some(vec![
                "DataRaptor/Load Accounts".to_string(),
                "OmniScript".to_string(),
                "Product2/Missing".to_string(),
            ]),
            manifest_objects: Some(BTreeMap::from([(
                "VlocityUITemplate".to_string(),
                vec!["cardHeader".to_string()],
            )])),
            ..Default::default()
        });

        let key = RecordKey::from("DataRaptor/Load-Accounts");
        assert!(!job.is_in_manifest(&registry, "DataRaptor", &key, "Load-Accounts"));

        let key = RecordKey::from("DataRaptor/Load Accounts");
        assert!(job.is_in_manifest(&registry, "DataRaptor", &key, "Load Accounts"));
        assert!(job.manifest_found.contains("DataRaptor/Load-Accounts"));

        let key = RecordKey::from("OmniScript/Sales_Quote_English");
        assert!(job.is_in_manifest(&registry, "OmniScript", &key, "Sales_Quote_English"));

        let key = RecordKey::from("VlocityUITemplate/cardHeader");
        assert!(job.is_in_manifest(&registry, "VlocityUITemplate", &key, "cardHeader"));

        let key = RecordKey::from("VlocityUITemplate/cardFooter");
        assert!(!job.is_in_manifest(&registry, "VlocityUITemplate", &key, "cardFooter"));

        assert_eq!(
            job.missing_manifest_keys(&registry),
            vec!["Product2/Missing".to_string()]
        );
    }

    #[test]
    fn test_no_manifest_admits_everything() {
        let mut job = ImportJob::default();
        assert!(job.is_in_manifest(
            &TypeRegistry::default(),
            "Any",
            &RecordKey::from("Any/Thing"),
            "Thing"
        ));
        assert!(job.manifest_found.is_empty());
    }

    #[test]
    fn test_record_sets_has_error_for_errors_only() {
        let mut job = ImportJob::default();
        job.record(BuildDiagnostic::missing_file(&RecordKey::from("A/1"), "a.json"));
        assert!(!job.has_error);
        job.record(BuildDiagnostic::new(
            DiagnosticKind::LoadFailure,
            RecordKey::from("A/2"),
            "bad",
        ));
        assert!(job.has_error);
        assert_eq!(job.errors(), vec!["Error Loading >> A/2 - bad".to_string()]);
    }
}
