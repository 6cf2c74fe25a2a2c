//! Property-record interning
//!
//! Property names (strings and symbol descriptions) are interned once per
//! thread context into `PropertyRecord`s with stable numeric ids. The JIT
//! server mirrors this table via `UpdatePropertyRecordMap`, and the TTD log
//! persists it so replay resolves the same ids to the same names.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Stable numeric id of an interned property name
pub type PropertyId = u32;

/// First id handed out for dynamically interned properties. Ids below this
/// are reserved for engine built-ins.
pub const FIRST_DYNAMIC_PROPERTY_ID: PropertyId = 16;

/// One interned property name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Stable id
    pub id: PropertyId,
    /// Property name (or symbol description)
    pub name: String,
    /// True for symbol-keyed properties
    pub is_symbol: bool,
    /// True when the name parses as an array index
    pub is_numeric: bool,
}

/// Interning table mapping names to stable ids
#[derive(Debug, Default)]
pub struct PropertyTable {
    records: FxHashMap<PropertyId, PropertyRecord>,
    by_name: FxHashMap<String, PropertyId>,
    next_id: PropertyId,
}

impl PropertyTable {
    /// Create an empty table; dynamic ids start above the built-in range.
    pub fn new() -> Self {
        Self {
            records: FxHashMap::default(),
            by_name: FxHashMap::default(),
            next_id: FIRST_DYNAMIC_PROPERTY_ID,
        }
    }

    /// Intern a string-keyed property name, returning its stable id.
    /// Re-interning an existing name returns the original id.
    pub fn intern(&mut self, name: &str) -> PropertyId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        let record = PropertyRecord {
            id,
            name: name.to_string(),
            is_symbol: false,
            is_numeric: name.parse::<u32>().is_ok(),
        };
        self.by_name.insert(name.to_string(), id);
        self.records.insert(id, record);
        id
    }

    /// Intern a symbol with the given description. Every call creates a
    /// fresh record; symbols are never deduplicated by description.
    pub fn intern_symbol(&mut self, description: &str) -> PropertyId {
        let id = self.next_id;
        self.next_id += 1;
        let record = PropertyRecord {
            id,
            name: description.to_string(),
            is_symbol: true,
            is_numeric: false,
        };
        self.records.insert(id, record);
        id
    }

    /// Insert a record with an explicit id (mirroring and log inflate).
    /// Advances the allocation cursor past the inserted id.
    pub fn insert_record(&mut self, record: PropertyRecord) {
        if record.id >= self.next_id {
            self.next_id = record.id + 1;
        }
        if !record.is_symbol {
            self.by_name.insert(record.name.clone(), record.id);
        }
        self.records.insert(record.id, record);
    }

    /// Remove a record by id (GC reclaimed the property name client-side)
    pub fn remove(&mut self, id: PropertyId) -> Option<PropertyRecord> {
        let record = self.records.remove(&id)?;
        if !record.is_symbol {
            self.by_name.remove(&record.name);
        }
        Some(record)
    }

    /// Look up a record by id
    pub fn get(&self, id: PropertyId) -> Option<&PropertyRecord> {
        self.records.get(&id)
    }

    /// Look up the id for an already-interned name
    pub fn id_of(&self, name: &str) -> Option<PropertyId> {
        self.by_name.get(name).copied()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are interned
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in id order (persistence walks this)
    pub fn records_sorted(&self) -> Vec<&PropertyRecord> {
        let mut all: Vec<&PropertyRecord> = self.records.values().collect();
        all.sort_by_key(|r| r.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut table = PropertyTable::new();
        let a = table.intern("x");
        let b = table.intern("y");
        let a2 = table.intern("x");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.get(a).unwrap().name, "x");
    }

    #[test]
    fn test_symbols_never_deduplicate() {
        let mut table = PropertyTable::new();
        let s1 = table.intern_symbol("iterator");
        let s2 = table.intern_symbol("iterator");
        assert_ne!(s1, s2);
        assert!(table.get(s1).unwrap().is_symbol);
    }

    #[test]
    fn test_insert_record_advances_cursor() {
        let mut table = PropertyTable::new();
        table.insert_record(PropertyRecord {
            id: 100,
            name: "imported".to_string(),
            is_symbol: false,
            is_numeric: false,
        });
        let next = table.intern("fresh");
        assert!(next > 100);
        assert_eq!(table.id_of("imported"), Some(100));
    }

    #[test]
    fn test_remove_clears_name_mapping() {
        let mut table = PropertyTable::new();
        let id = table.intern("gone");
        table.remove(id);
        assert!(table.get(id).is_none());
        assert_eq!(table.id_of("gone"), None);
    }

    #[test]
    fn test_numeric_detection() {
        let mut table = PropertyTable::new();
        let idx = table.intern("42");
        let name = table.intern("length");
        assert!(table.get(idx).unwrap().is_numeric);
        assert!(!table.get(name).unwrap().is_numeric);
    }
}
