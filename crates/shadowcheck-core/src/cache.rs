//! Content-keyed validation caches (C8).
//!
//! Canonicalization is key-sorted serialization of the declared shape: the
//! proto types already use `BTreeMap` for `colTypes`/`insertColumns`, so
//! `serde_json::to_string` over them is already key-sorted and
//! deterministic without any extra bookkeeping.

use shadowcheck_proto::{InsertAnswer, SelectAnswer};
use std::collections::HashMap;

/// `text + canonicalized(colTypes) -> SelectAnswer`.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<String, SelectAnswer>,
}

impl QueryCache {
    pub fn get(&self, key: &str) -> Option<&SelectAnswer> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, answer: SelectAnswer) {
        self.entries.insert(key, answer);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `queryKey + "tableName" + canonicalized(insertColumns) -> InsertAnswer`.
#[derive(Debug, Default)]
pub struct InsertCache {
    entries: HashMap<String, InsertAnswer>,
}

impl InsertCache {
    pub fn get(&self, key: &str) -> Option<&InsertAnswer> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, answer: InsertAnswer) {
        self.entries.insert(key, answer);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Build the query cache key: query text plus the key-sorted serialization
/// of the declared column shape.
pub fn query_cache_key(resolved: &shadowcheck_proto::ResolvedSelect) -> String {
    let canonical =
        serde_json::to_string(&resolved.col_types).expect("BTreeMap<String, _> always serializes");
    format!("{}\0{}", resolved.text, canonical)
}

/// Build the insert cache key: the select-shape key, the table name, and
/// the key-sorted serialization of the supplied insert columns.
pub fn insert_cache_key(resolved: &shadowcheck_proto::ResolvedInsert) -> String {
    let select_like = shadowcheck_proto::ResolvedSelect {
        text: resolved.text.clone(),
        col_types: resolved.col_types.clone(),
        file_name: resolved.file_name.clone(),
        file_contents: resolved.file_contents.clone(),
        source_map: resolved.source_map.clone(),
        col_type_span: resolved.col_type_span.clone(),
        query_method_name: resolved.query_method_name.clone(),
        indent_level: resolved.indent_level,
    };
    let query_key = query_cache_key(&select_like);
    let canonical = serde_json::to_string(&resolved.insert_columns)
        .expect("BTreeMap<String, _> always serializes");
    format!("{query_key}\0{}\0{canonical}", resolved.table_name)
}
