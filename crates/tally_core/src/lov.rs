//! Lists of values backing option fields, and the per-session cache of them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreResult;

/// One selectable item of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LovItem {
    /// Stored value.
    pub id: String,
    /// Text shown to the user.
    pub label: String,
    /// Inactive items are rejected for new values.
    #[serde(default = "active_default")]
    pub active: bool,
}

fn active_default() -> bool {
    true
}

/// A named list of values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOfValues {
    /// List id.
    pub id: String,
    /// Entity whose rows the list was loaded from, if any.
    #[serde(default)]
    pub entity: Option<String>,
    /// Items in display order.
    #[serde(default)]
    pub items: Vec<LovItem>,
}

impl ListOfValues {
    /// Creates an empty list.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity: None,
            items: Vec::new(),
        }
    }

    /// Adds an active item.
    #[must_use]
    pub fn item(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.items.push(LovItem {
            id: id.into(),
            label: label.into(),
            active: true,
        });
        self
    }

    /// Adds an inactive item.
    #[must_use]
    pub fn inactive_item(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.items.push(LovItem {
            id: id.into(),
            label: label.into(),
            active: false,
        });
        self
    }

    /// Finds an item by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LovItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Lists loaded on behalf of one session.
///
/// Entity-backed lists are dropped whenever a transaction of the session
/// saves rows of that entity.
#[derive(Debug, Default)]
pub struct LovCache {
    lists: Mutex<HashMap<String, Arc<ListOfValues>>>,
}

impl LovCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached list.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ListOfValues>> {
        self.lists.lock().get(id).cloned()
    }

    /// Returns the cached list, loading and caching it on a miss.
    pub fn get_or_load<F>(&self, id: &str, load: F) -> CoreResult<Option<Arc<ListOfValues>>>
    where
        F: FnOnce() -> CoreResult<Option<ListOfValues>>,
    {
        if let Some(list) = self.get(id) {
            return Ok(Some(list));
        }
        let Some(list) = load()? else {
            return Ok(None);
        };
        let list = Arc::new(list);
        self.lists.lock().insert(id.to_string(), Arc::clone(&list));
        Ok(Some(list))
    }

    /// Caches a list, replacing any list with the same id.
    pub fn insert(&self, list: ListOfValues) {
        self.lists.lock().insert(list.id.clone(), Arc::new(list));
    }

    /// Drops one list.
    pub fn invalidate(&self, id: &str) {
        self.lists.lock().remove(id);
    }

    /// Drops every list loaded from the entity's rows.
    pub fn invalidate_entity(&self, entity: &str) {
        self.lists
            .lock()
            .retain(|_, list| list.entity.as_deref() != Some(entity));
    }

    /// Returns the number of cached lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_once() {
        let cache = LovCache::new();
        let mut loads = 0;
        for _ in 0..2 {
            let list = cache
                .get_or_load("colour", || {
                    loads += 1;
                    Ok(Some(ListOfValues::new("colour").item("red", "Red")))
                })
                .unwrap()
                .unwrap();
            assert_eq!(list.get("red").unwrap().label, "Red");
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn missing_list_is_not_cached() {
        let cache = LovCache::new();
        assert!(cache.get_or_load("none", || Ok(None)).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_by_entity() {
        let cache = LovCache::new();
        let mut customers = ListOfValues::new("customer");
        customers.entity = Some("customer".into());
        cache.insert(customers);
        cache.insert(ListOfValues::new("colour"));

        cache.invalidate_entity("customer");
        assert!(cache.get("customer").is_none());
        assert!(cache.get("colour").is_some());
    }
}
