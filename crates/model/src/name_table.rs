use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Id → name mapping for one of the metadata tables (load modules, source
/// files or procedures).
///
/// Ids are kept in ascending order so that iteration and serialization are
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameTable {
    entries: BTreeMap<u32, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the name previously stored under `id`.
    pub fn insert(&mut self, id: u32, name: impl Into<String>) -> Option<String> {
        self.entries.insert(id, name.into())
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }
}

impl FromIterator<(u32, String)> for NameTable {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_displaced_name() {
        let mut table = NameTable::new();
        assert_eq!(table.insert(3, "main"), None);
        assert_eq!(table.insert(3, "other").as_deref(), Some("main"));
        assert_eq!(table.get(3), Some("other"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn iterates_in_id_order() {
        let table: NameTable = [(10, "b".to_string()), (2, "a".to_string())]
            .into_iter()
            .collect();
        let ids: Vec<u32> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 10]);
        assert!(!table.contains(5));
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut table = NameTable::new();
        table.insert(1, "cpi");
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"1":"cpi"}"#);
    }
}
