pub use enumset::EnumSet;
/// [crate::properties] contains the basic building blocks shared by the builder: record keys,
/// record statuses, and the per-type policy flags consulted while scheduling and paginating.
use enumset::*;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    fmt::{Display, Formatter},
};

/// Discriminator carried by every typed document in a DataPack tree.
pub const DATA_PACK_TYPE: &str = "VlocityDataPackType";
/// Names the record-type (sub-type) of a typed document. Doubles as the data field name.
pub const RECORD_SOBJECT_TYPE: &str = "VlocityRecordSObjectType";
/// Globally unique source identifier of a typed document.
pub const RECORD_SOURCE_KEY: &str = "VlocityRecordSourceKey";
/// Reference from one document to another document's source identifier.
pub const LOOKUP_RECORD_SOURCE_KEY: &str = "VlocityLookupRecordSourceKey";
pub const IS_INCLUDED: &str = "VlocityDataPackIsIncluded";
pub const DATA_PACK_KEY: &str = "VlocityDataPackKey";
pub const PREVIOUS_PAGE_KEY: &str = "VlocityPreviousPageKey";
pub const RELATIONSHIP_TYPE: &str = "VlocityDataPackRelationshipType";
pub const MATCHING_KEY_OBJECT: &str = "VlocityMatchingKeyObject";
pub const LOOKUP_MATCHING_KEY_OBJECT: &str = "VlocityLookupMatchingKeyObject";
/// Canonical type for every `SObject_*` sub-type and the document type counted as one record.
pub const SOBJECT: &str = "SObject";
pub const SOBJECT_PREFIX: &str = "SObject_";

pub const DATA_PACK_SUFFIX: &str = "_DataPack.json";
pub const PARENT_KEYS_SUFFIX: &str = "_ParentKeys.json";
pub const PAGE_SEPARATOR: &str = "|Page|";

/// Collapse the `SObject_*` family of types into [`SOBJECT`].
pub fn normalize_type(data_pack_type: &str) -> &str {
    if data_pack_type.starts_with(SOBJECT_PREFIX) {
        SOBJECT
    } else {
        data_pack_type
    }
}

/// `"<Type>/<Name>"` identifier of one record within an import session.
///
/// The type prefix is whatever the on-disk directory was called, so it stays stable even when the
/// emitted record type is normalized (see [`normalize_type`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(data_pack_type: &str, name: &str) -> Self {
        RecordKey(format!("{data_pack_type}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the first `/`.
    pub fn data_pack_type(&self) -> &str {
        self.0.split_once('/').map(|(t, _)| t).unwrap_or(&self.0)
    }

    /// Everything after the first `/`. Names may themselves contain `/`.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or("")
    }

    /// Key of the `index`th continuation page of this record.
    pub fn page(&self, index: usize) -> RecordKey {
        RecordKey(format!("{}{PAGE_SEPARATOR}{index}", self.0))
    }

    pub fn is_page(&self) -> bool {
        self.0.contains(PAGE_SEPARATOR)
    }

    /// The record a page belongs to. A key that is not a page owns itself.
    pub fn page_owner(&self) -> RecordKey {
        match self.0.split_once(PAGE_SEPARATOR) {
            Some((owner, _)) => RecordKey(owner.to_string()),
            None => self.clone(),
        }
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for RecordKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        RecordKey(value)
    }
}

/// Lifecycle of one record within an import session.
///
/// `Ready` (or `ReadySeparate`/`Header`) records are selectable. Selection moves them to
/// `Added`/`AddedHeader`/`Header`; the external deploy step moves them on to `Success`, or back
/// to `Ready`/`Error`. `Error` is terminal for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    #[default]
    Ready,
    /// Selectable only as the first record of an otherwise empty batch.
    ReadySeparate,
    /// Header stub deployed; the full body still has to ship.
    Header,
    Added,
    AddedHeader,
    Success,
    Error,
}

impl RecordStatus {
    /// Parent statuses that satisfy a child's dependency gate.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(
            self,
            RecordStatus::Success | RecordStatus::Header | RecordStatus::AddedHeader
        )
    }

    /// Statuses that count as "in flight" for the parallelism gate.
    pub fn is_added(&self) -> bool {
        matches!(self, RecordStatus::Added | RecordStatus::AddedHeader)
    }
}

impl Display for RecordStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How a continuation page treats a pagination-governed field.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum PaginationAction {
    /// Drop the field from every page after the first.
    Remove,
    /// Start the split with an empty chunk so the initial page carries none of the elements.
    RemoveFromInitial,
    /// Rewrite embedded matching-key objects into lookups on every page after the first.
    AddLookupRelationships,
}

impl Display for PaginationAction {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type PaginationActions = EnumSet<PaginationAction>;

/// Whether (and how) a type can be shipped as a header-only stub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderSupport {
    /// Not header eligible; skipped entirely during a headers-only pass.
    #[default]
    None,
    /// Header eligible; child collections are stripped from the stub.
    Fields,
    /// The full record is the header.
    All,
    /// The header is identical to the full record, so it is deployed as a normal add.
    Identical,
}

/// Value injected into an absent build-only field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOnlyDirective {
    /// 1-based position of the document within its collection.
    Index,
    /// A freshly generated unique identifier.
    Guid,
    /// A fixed constant.
    Value(serde_json::Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    #[default]
    Primary,
    Pagination,
}
