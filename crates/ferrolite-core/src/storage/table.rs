//! In-memory base table storage.

use std::collections::BTreeMap;

use crate::value::{Item, item_size};

/// Items of one table, ordered by encoded primary key.
#[derive(Debug, Default)]
pub struct TableData {
    items: BTreeMap<Vec<u8>, Item>,
    size_bytes: u64,
}

impl TableData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Item> {
        self.items.get(key)
    }

    /// Store `item` under `key`, returning the previous version.
    pub fn put(&mut self, key: Vec<u8>, item: Item) -> Option<Item> {
        self.size_bytes += item_size(&item) as u64;
        let old = self.items.insert(key, item);
        if let Some(old) = &old {
            self.size_bytes -= item_size(old) as u64;
        }
        old
    }

    pub fn delete(&mut self, key: &[u8]) -> Option<Item> {
        let old = self.items.remove(key);
        if let Some(old) = &old {
            self.size_bytes -= item_size(old) as u64;
        }
        old
    }

    pub fn entries(&self) -> &BTreeMap<Vec<u8>, Item> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttributeValue;

    fn item(v: &str) -> Item {
        Item::from([("id".to_string(), AttributeValue::s(v))])
    }

    #[test]
    fn test_put_replaces_and_tracks_size() {
        let mut data = TableData::new();
        assert!(data.put(b"k1".to_vec(), item("abc")).is_none());
        assert_eq!(data.size_bytes(), 5);

        let old = data.put(b"k1".to_vec(), item("abcdef")).unwrap();
        assert_eq!(old, item("abc"));
        assert_eq!(data.size_bytes(), 8);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_delete() {
        let mut data = TableData::new();
        data.put(b"k1".to_vec(), item("a"));
        assert_eq!(data.delete(b"k1"), Some(item("a")));
        assert_eq!(data.delete(b"k1"), None);
        assert!(data.is_empty());
        assert_eq!(data.size_bytes(), 0);
    }
}
