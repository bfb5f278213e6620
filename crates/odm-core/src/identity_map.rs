//! The identity map.

use std::collections::HashMap;

use odm_types::DocumentId;

use crate::document::Document;

/// One live instance per `(type, identifier)`.
#[derive(Debug, Default)]
pub struct IdentityMap {
    by_type: HashMap<String, HashMap<DocumentId, Document>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str, id: &DocumentId) -> Option<&Document> {
        self.by_type.get(type_name)?.get(id)
    }

    /// Map `(type, id)` to `doc`. Returns the instance already mapped to that
    /// identity, if any, without replacing it.
    pub fn insert(&mut self, type_name: &str, id: DocumentId, doc: &Document) -> Option<Document> {
        let slot = self.by_type.entry(type_name.to_string()).or_default();
        match slot.get(&id) {
            Some(existing) => Some(existing.clone()),
            None => {
                slot.insert(id, doc.clone());
                None
            }
        }
    }

    /// Unmap `(type, id)` if it is mapped to `doc`.
    pub fn remove(&mut self, type_name: &str, id: &DocumentId, doc: &Document) -> bool {
        let Some(slot) = self.by_type.get_mut(type_name) else {
            return false;
        };
        match slot.get(id) {
            Some(existing) if existing.same_instance(doc) => {
                slot.remove(id);
                if slot.is_empty() {
                    self.by_type.remove(type_name);
                }
                true
            }
            _ => false,
        }
    }

    /// Whether `doc` itself is the instance mapped to its identity.
    pub fn contains(&self, doc: &Document) -> bool {
        doc.id()
            .and_then(|id| self.get(doc.type_name(), &id).map(|d| d.same_instance(doc)))
            .unwrap_or(false)
    }

    /// Empty the map, or only the part for one type. Returns the unmapped instances.
    pub fn clear(&mut self, type_name: Option<&str>) -> Vec<Document> {
        match type_name {
            Some(name) => self
                .by_type
                .remove(name)
                .map(|slot| slot.into_values().collect())
                .unwrap_or_default(),
            None => self
                .by_type
                .drain()
                .flat_map(|(_, slot)| slot.into_values())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Number of mapped instances of one type.
    pub fn count_of(&self, type_name: &str) -> usize {
        self.by_type.get(type_name).map_or(0, HashMap::len)
    }
}
