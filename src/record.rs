use crate::{
    error::BuildError,
    properties::{
        normalize_type, RecordKey, RelationshipType, DATA_PACK_KEY, DATA_PACK_TYPE, IS_INCLUDED,
        PREVIOUS_PAGE_KEY, RELATIONSHIP_TYPE, SOBJECT,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Keys of a record's data object that never name its data field.
const RESERVED_DATA_KEYS: &[&str] = &[
    DATA_PACK_KEY,
    DATA_PACK_TYPE,
    IS_INCLUDED,
    PREVIOUS_PAGE_KEY,
    RELATIONSHIP_TYPE,
];

pub const STATUS_SUCCESS: &str = "Success";

/// One assembled DataPack, ready to be shipped in a [`DataPackImport`].
///
/// `data` is the document tree: an object holding the bookkeeping keys plus one data field whose
/// value is the list of assembled primary documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "VlocityDataPackKey")]
    pub key: RecordKey,
    #[serde(rename = "VlocityDataPackType")]
    pub data_pack_type: String,
    #[serde(
        rename = "VlocityDataPackParents",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parents: Option<Vec<RecordKey>>,
    #[serde(rename = "VlocityDataPackStatus")]
    pub status: String,
    #[serde(rename = "VlocityDataPackIsIncluded")]
    pub is_included: bool,
    #[serde(rename = "VlocityDataPackName")]
    pub name: String,
    #[serde(rename = "VlocityDataPackData")]
    pub data: Value,
    #[serde(rename = "VlocityDataPackRelationshipType")]
    pub relationship_type: RelationshipType,
    #[serde(
        rename = "VlocityPreviousPageKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_page_key: Option<RecordKey>,
    /// Name of the data field, once known.
    #[serde(skip)]
    pub data_field: String,
    /// Selected from `ReadySeparate`/`Header`; the batch closes after it.
    #[serde(skip)]
    pub separate: bool,
}

impl Record {
    pub fn new(key: RecordKey, data_pack_type: &str, parents: Option<Vec<RecordKey>>) -> Self {
        let name = key.name().to_string();
        let data = json!({
            DATA_PACK_KEY: key.as_str(),
            DATA_PACK_TYPE: data_pack_type,
            IS_INCLUDED: true,
        });
        Record {
            key,
            data_pack_type: data_pack_type.to_string(),
            parents,
            status: STATUS_SUCCESS.to_string(),
            is_included: true,
            name,
            data,
            relationship_type: RelationshipType::Primary,
            previous_page_key: None,
            data_field: String::new(),
            separate: false,
        }
    }

    /// The data field: the cached name, or else the first non-bookkeeping key of `data`.
    pub fn data_field(&self) -> Option<&str> {
        if !self.data_field.is_empty() {
            return Some(&self.data_field);
        }
        self.data.as_object().and_then(|data| {
            data.keys()
                .map(String::as_str)
                .find(|k| !RESERVED_DATA_KEYS.contains(k))
        })
    }

    pub fn set_documents(&mut self, data_field: &str, documents: Vec<Value>) {
        if let Some(data) = self.data.as_object_mut() {
            data.insert(data_field.to_string(), Value::Array(documents));
        }
        self.data_field = data_field.to_string();
    }

    /// First document of the data field.
    pub fn primary_document(&self) -> Option<&Value> {
        let field = self.data_field()?;
        self.data.get(field)?.get(0)
    }

    pub fn primary_document_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let field = self.data_field()?.to_string();
        self.data
            .get_mut(&field)?
            .get_mut(0)?
            .as_object_mut()
    }

    /// Records counted under the primary document. See [`count_records`].
    pub fn record_count(&self) -> usize {
        self.primary_document().map(count_records).unwrap_or(0)
    }

    /// Length of the serialized record, as counted against the batch byte budget.
    pub fn serialized_len(&self) -> Result<usize, BuildError> {
        Ok(serde_json::to_string(self)?.len())
    }

    /// Mark this record as page `index` of `original`, linked to `previous`.
    pub fn link_page(&mut self, original: &RecordKey, index: usize) {
        let previous = if index == 1 {
            original.clone()
        } else {
            original.page(index - 1)
        };
        self.key = original.page(index);
        self.previous_page_key = Some(previous.clone());
        self.relationship_type = RelationshipType::Pagination;
        if let Some(data) = self.data.as_object_mut() {
            data.insert(PREVIOUS_PAGE_KEY.to_string(), json!(previous.as_str()));
            data.insert(DATA_PACK_KEY.to_string(), json!(self.key.as_str()));
            data.insert(
                RELATIONSHIP_TYPE.to_string(),
                serde_json::to_value(RelationshipType::Pagination).unwrap_or(Value::Null),
            );
        }
    }
}

/// Count record-typed (`SObject`) documents anywhere under `value`, each counting once.
pub fn count_records(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(count_records).sum(),
        Value::Object(map) => {
            let own = map
                .get(DATA_PACK_TYPE)
                .and_then(Value::as_str)
                .map(|t| usize::from(normalize_type(t) == SOBJECT))
                .unwrap_or(0);
            own + map.values().map(count_records).sum::<usize>()
        }
        _ => 0,
    }
}

/// The batch document handed to the deploy step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPackImport {
    #[serde(rename = "dataPacks")]
    pub data_packs: Vec<Record>,
}

impl DataPackImport {
    pub fn serialized_len(&self) -> Result<usize, BuildError> {
        Ok(serde_json::to_string(self)?.len())
    }

    pub fn len(&self) -> usize {
        self.data_packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_packs.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.data_packs.iter().map(|r| &r.key)
    }
}

/// Escape one JSON pointer reference token (RFC 6901).
pub fn pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn pointer_join(base: &str, token: &str) -> String {
    format!("{base}/{}", pointer_token(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sobject(children: Vec<Value>) -> Value {
        json!({ "VlocityDataPackType": "SObject", "Children": children })
    }

    #[test]
    fn test_count_records_nested() {
        let tree = sobject(vec![sobject(vec![]), sobject(vec![sobject(vec![])])]);
        assert_eq!(count_records(&tree), 4);
        assert_eq!(count_records(&json!({ "Plain": [1, 2, 3] })), 0);
    }

    #[test]
    fn test_record_data_field_and_count() {
        let mut record = Record::new(RecordKey::from("Product2/Widget"), "SObject", None);
        assert_eq!(record.data_field(), None);
        record.set_documents("Product2", vec![sobject(vec![sobject(vec![])])]);
        assert_eq!(record.data_field(), Some("Product2"));
        assert_eq!(record.record_count(), 2);
        assert_eq!(record.name, "Widget");
    }

    #[test]
    fn test_serialization_uses_wire_names() {
        let record = Record::new(RecordKey::from("DataRaptor/Load"), "DataRaptor", None);
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.contains(r#""VlocityDataPackKey":"DataRaptor/Load""#));
        assert!(text.contains(r#""VlocityDataPackRelationshipType":"Primary""#));
        assert!(!text.contains("VlocityPreviousPageKey"));
        assert_eq!(record.serialized_len().unwrap(), text.len());
    }

    #[test]
    fn test_link_page() {
        let original = RecordKey::from("Catalog/Main");
        let mut page = Record::new(original.clone(), "Catalog", None);
        page.link_page(&original, 2);
        assert_eq!(page.key.as_str(), "Catalog/Main|Page|2");
        assert_eq!(
            page.previous_page_key.as_ref().map(RecordKey::as_str),
            Some("Catalog/Main|Page|1")
        );
        assert_eq!(page.data[DATA_PACK_KEY], json!("Catalog/Main|Page|2"));
        assert_eq!(page.data[RELATIONSHIP_TYPE], json!("Pagination"));
    }

    #[test]
    fn test_pointer_escaping() {
        assert_eq!(pointer_join("/a", "b/c~d"), "/a/b~1c~0d");
    }
}
