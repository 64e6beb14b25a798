//! The transaction's row cache and its validation context.

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_sql::{Connection, ConnectionPool, Statement};

use crate::entity::EntityDef;
use crate::error::CoreResult;
use crate::field::ValidationContext;
use crate::key::KEY_COLUMN;
use crate::lov::{ListOfValues, LovItem};
use crate::registry::TypeRegistry;
use crate::session::Session;
use crate::types::RowId;

/// Rows by identity: full-key rows by (entity, key), partial-key rows in
/// creation order.
#[derive(Debug, Default)]
pub(crate) struct RowCache {
    full: BTreeMap<String, BTreeMap<String, RowId>>,
    partial: Vec<RowId>,
}

impl RowCache {
    pub(crate) fn lookup(&self, entity: &str, key: &str) -> Option<RowId> {
        self.full.get(entity).and_then(|rows| rows.get(key)).copied()
    }

    pub(crate) fn insert(&mut self, entity: &str, key: &str, id: RowId) {
        self.full
            .entry(entity.to_string())
            .or_default()
            .insert(key.to_string(), id);
    }

    pub(crate) fn remove_key(&mut self, entity: &str, key: &str) {
        if let Some(rows) = self.full.get_mut(entity) {
            rows.remove(key);
        }
    }

    pub(crate) fn push_partial(&mut self, id: RowId) {
        self.partial.push(id);
    }

    pub(crate) fn remove_partial(&mut self, id: RowId) -> bool {
        let before = self.partial.len();
        self.partial.retain(|r| *r != id);
        before != self.partial.len()
    }

    /// Removes the row wherever it is cached.
    pub(crate) fn remove_row(&mut self, id: RowId) {
        if self.remove_partial(id) {
            return;
        }
        for rows in self.full.values_mut() {
            rows.retain(|_, r| *r != id);
        }
    }

    /// Full-key rows ordered by entity, then key.
    pub(crate) fn full_rows(&self) -> Vec<RowId> {
        self.full.values().flat_map(|rows| rows.values().copied()).collect()
    }

    /// Full-key rows of one entity, ordered by key.
    pub(crate) fn entity_rows(&self, entity: &str) -> Vec<RowId> {
        self.full
            .get(entity)
            .map(|rows| rows.values().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn partial_rows(&self) -> &[RowId] {
        &self.partial
    }

    pub(crate) fn contains(&self, id: RowId) -> bool {
        self.partial.contains(&id) || self.full.values().any(|rows| rows.values().any(|r| *r == id))
    }
}

/// Lookups for validating the fields of a row inside its transaction.
///
/// References resolve against the transaction's own rows first, then the
/// session's entity lists, then storage through the transaction connection.
pub(crate) struct TxContext<'a> {
    pub(crate) registry: &'a TypeRegistry,
    pub(crate) pool: &'a dyn ConnectionPool,
    pub(crate) session: &'a Session,
    pub(crate) cache: &'a RowCache,
    pub(crate) connection: Option<&'a mut (dyn Connection + 'static)>,
}

impl ValidationContext for TxContext<'_> {
    fn list_of_values(&mut self, list_id: &str) -> CoreResult<Option<Arc<ListOfValues>>> {
        if let Some(list) = self.registry.list(list_id) {
            return Ok(Some(Arc::clone(list)));
        }
        let Ok(entity) = self.registry.entity(list_id) else {
            return Ok(None);
        };
        let pool = self.pool;
        self.session
            .lov_cache()
            .get_or_load(list_id, || load_entity_list(pool, entity).map(Some))
    }

    fn reference_exists(&mut self, entity_id: &str, key: &str) -> CoreResult<Option<bool>> {
        let entity = self.registry.entity(entity_id)?;
        if self.cache.lookup(entity_id, key).is_some() {
            return Ok(Some(true));
        }
        if !entity.key().is_complete(key) {
            return Ok(Some(false));
        }
        if let Some(list) = self.session.lov_cache().get(entity_id) {
            if list.get(key).is_some() {
                return Ok(Some(true));
            }
        }
        let Some(conn) = self.connection.as_deref_mut() else {
            return Ok(None);
        };
        let count = conn
            .execute_query(&Statement::count(entity.table()).filter(KEY_COLUMN, key))?
            .scalar_int()
            .unwrap_or(0);
        Ok(Some(count > 0))
    }
}

/// Loads an entity's committed rows as a list: key as id, title field as label.
fn load_entity_list(pool: &dyn ConnectionPool, entity: &EntityDef) -> CoreResult<ListOfValues> {
    let mut conn = pool.query_connection("lov")?;
    let result = conn.execute_query(&Statement::select(entity.table()));
    conn.finished();
    let title = entity.spec().title_field.as_deref();
    let items = result?
        .rows()
        .filter_map(|row| {
            let key = row.get(KEY_COLUMN)?;
            let label = title.and_then(|t| row.get(t)).unwrap_or(key);
            Some(LovItem {
                id: key.to_string(),
                label: label.to_string(),
                active: true,
            })
        })
        .collect();
    Ok(ListOfValues {
        id: entity.id().to_string(),
        entity: Some(entity.id().to_string()),
        items,
    })
}
