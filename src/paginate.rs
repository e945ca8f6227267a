//! Pagination Engine.
//!
//! A record whose nested record count exceeds its type's pagination size is split into an initial
//! page plus a chain of continuation pages. The first array (depth-first, in key order) that holds
//! records and is longer than the limit is chunked; every page is a deep copy of the record with
//! that array replaced by one chunk. Continuation pages are keyed `<key>|Page|<i>` and link back to
//! their predecessor.

use crate::{
    properties::{
        PaginationAction, PaginationActions, DATA_PACK_TYPE, LOOKUP_MATCHING_KEY_OBJECT,
        MATCHING_KEY_OBJECT,
    },
    record::{count_records, pointer_join, pointer_token, Record},
    types::DataPackTypes,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Whether `record` holds more records than its type's pagination size allows.
pub fn needs_pagination(types: &dyn DataPackTypes, record: &Record, disabled: bool) -> bool {
    !disabled && record.record_count() > types.pagination_size(&record.data_pack_type)
}

/// The array to split: its JSON pointer within the record data and its field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPoint {
    pub pointer: String,
    pub field: String,
}

/// Find the first record-holding array longer than `limit`.
pub fn find_split_point(value: &Value, pointer: &str, limit: usize) -> Option<SplitPoint> {
    let map = value.as_object()?;
    for (field, child) in map {
        let Value::Array(items) = child else {
            continue;
        };
        if count_records(child) == 0 {
            continue;
        }
        let child_pointer = pointer_join(pointer, field);
        if items.len() > limit {
            return Some(SplitPoint {
                pointer: child_pointer,
                field: field.clone(),
            });
        }
        for (index, item) in items.iter().enumerate() {
            let item_pointer = format!("{child_pointer}/{index}");
            if let Some(split) = find_split_point(item, &item_pointer, limit) {
                return Some(split);
            }
        }
    }
    None
}

/// Split `record` into pages. Returns no pages when nothing needs splitting.
pub fn paginate(types: &dyn DataPackTypes, record: &Record) -> Vec<Record> {
    let Some(data_field) = types.data_field(record) else {
        return Vec::new();
    };
    let limit = types.pagination_size(&record.data_pack_type).max(1);
    let actions = types.pagination_actions(&record.data_pack_type);

    let primary_pointer = format!("/{}/0", pointer_token(&data_field));
    let Some(split) = record
        .data
        .pointer(&primary_pointer)
        .and_then(|primary| find_split_point(primary, &primary_pointer, limit))
    else {
        return Vec::new();
    };
    let Some(Value::Array(items)) = record.data.pointer(&split.pointer) else {
        return Vec::new();
    };

    let mut chunks: Vec<Vec<Value>> = Vec::new();
    if actions
        .get(&split.field)
        .is_some_and(|a| a.contains(PaginationAction::RemoveFromInitial))
    {
        chunks.push(Vec::new());
    }
    chunks.extend(items.chunks(limit).map(<[Value]>::to_vec));

    let mut base = record.clone();
    if base.parents.is_none() {
        base.parents = Some(Vec::new());
    }

    let mut pages = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.into_iter().enumerate() {
        let mut page = base.clone();
        if let Some(target) = page.data.pointer_mut(&split.pointer) {
            *target = Value::Array(chunk);
        }
        if index > 0 {
            apply_page_actions(&mut page, &actions, &split.field);
            page.link_page(&record.key, index);
        }
        tracing::debug!("[Paginate] Paginating {}", page.key);
        pages.push(page);
    }
    pages
}

fn apply_page_actions(
    page: &mut Record,
    actions: &BTreeMap<String, PaginationActions>,
    split_field: &str,
) {
    for (field, field_actions) in actions {
        if field_actions.contains(PaginationAction::Remove) && field != split_field {
            if let Some(primary) = page.primary_document_mut() {
                primary.remove(field);
            }
        } else if field_actions.contains(PaginationAction::AddLookupRelationships) {
            add_lookup_relationships(page, field);
        }
    }
}

/// Turn matching-key objects embedded in the items of `field` into lookups.
pub fn add_lookup_relationships(page: &mut Record, field: &str) {
    let Some(Value::Array(items)) = page
        .primary_document_mut()
        .and_then(|primary| primary.get_mut(field))
    else {
        return;
    };
    for item in items.iter_mut().filter_map(Value::as_object_mut) {
        for value in item.values_mut().filter_map(Value::as_object_mut) {
            if value.get(DATA_PACK_TYPE).and_then(Value::as_str) == Some(MATCHING_KEY_OBJECT) {
                value.insert(
                    DATA_PACK_TYPE.to_string(),
                    Value::String(LOOKUP_MATCHING_KEY_OBJECT.to_string()),
                );
            }
        }
    }
}
