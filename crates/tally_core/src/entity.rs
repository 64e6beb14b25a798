//! Entity definitions and their hooks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreResult;
use crate::field::{FieldDef, FieldSpec};
use crate::key::{KeyAllocation, KeyDef};
use crate::row::Row;
use crate::transaction::RowMut;

/// Hook run on a row: after creation, after loading, on update.
pub type RowHook = Arc<dyn Fn(&mut RowMut<'_>) -> CoreResult<()> + Send + Sync>;

/// Hook run on a row as its transaction presaves, with the save outcome.
pub type PresaveHook = Arc<dyn Fn(&mut RowMut<'_>, Option<&str>) -> CoreResult<()> + Send + Sync>;

/// Observer that may reject a field change: `(row, field id, new value)`.
pub type FieldVeto = Arc<dyn Fn(&Row, &str, &str) -> CoreResult<()> + Send + Sync>;

/// Observer of a completed field change: `(row, field id, old value)`.
pub type FieldChangeHook = Arc<dyn Fn(&mut RowMut<'_>, &str, &str) -> CoreResult<()> + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct EntityHooks {
    pub(crate) init_create: Vec<RowHook>,
    pub(crate) init_update: Vec<RowHook>,
    pub(crate) load: Vec<RowHook>,
    pub(crate) update: Vec<RowHook>,
    pub(crate) presave: Vec<PresaveHook>,
    pub(crate) before_field_change: Vec<FieldVeto>,
    pub(crate) after_field_change: Vec<FieldChangeHook>,
}

/// Row lifecycle points that run [`RowHook`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowEvent {
    InitCreate,
    InitUpdate,
    Load,
    Update,
}

impl EntityHooks {
    pub(crate) fn row_hooks(&self, event: RowEvent) -> &[RowHook] {
        match event {
            RowEvent::InitCreate => &self.init_create,
            RowEvent::InitUpdate => &self.init_update,
            RowEvent::Load => &self.load,
            RowEvent::Update => &self.update,
        }
    }
}

impl fmt::Debug for EntityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHooks")
            .field("init_create", &self.init_create.len())
            .field("init_update", &self.init_update.len())
            .field("load", &self.load.len())
            .field("update", &self.update.len())
            .field("presave", &self.presave.len())
            .field("before_field_change", &self.before_field_change.len())
            .field("after_field_change", &self.after_field_change.len())
            .finish()
    }
}

/// Declarative description of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySpec {
    /// Entity id.
    pub id: String,
    /// Human-readable name.
    pub title: String,
    /// Storage table; the id when absent.
    pub table: Option<String>,
    /// Key field ids in key order.
    pub primary_key: Vec<String>,
    /// Field specs in display order.
    pub fields: Vec<FieldSpec>,
    /// Whether saves write the `_tx` column, history rows and audit rows.
    pub transactional: bool,
    /// Key allocation; the data store default when absent.
    pub key_allocation: Option<KeyAllocation>,
    /// Entity whose rows own rows of this entity.
    pub parent_entity: Option<String>,
    /// Field holding the parent row's key.
    pub link_field: Option<String>,
    /// Field whose value labels a row.
    pub title_field: Option<String>,
    /// Label template with `{field}` tokens.
    pub label_pattern: Option<String>,
}

/// Builder for entities, carrying the `EntitySpec` and its hooks.
#[derive(Debug, Clone, Default)]
pub struct EntityBuilder {
    pub(crate) spec: EntitySpec,
    pub(crate) hooks: EntityHooks,
}

impl EntityBuilder {
    /// Starts an entity.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            spec: EntitySpec {
                id: id.into(),
                title: title.into(),
                ..EntitySpec::default()
            },
            hooks: EntityHooks::default(),
        }
    }

    /// Starts an entity from a declarative spec.
    #[must_use]
    pub fn from_spec(spec: EntitySpec) -> Self {
        Self {
            spec,
            hooks: EntityHooks::default(),
        }
    }

    /// Sets the storage table.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.spec.table = Some(table.into());
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.spec.fields.push(field);
        self
    }

    /// Sets the key fields.
    #[must_use]
    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Makes saves of the entity write history and audit rows.
    #[must_use]
    pub fn transactional(mut self) -> Self {
        self.spec.transactional = true;
        self
    }

    /// Sets the key allocation.
    #[must_use]
    pub fn allocation(mut self, allocation: KeyAllocation) -> Self {
        self.spec.key_allocation = Some(allocation);
        self
    }

    /// Declares the parent entity and the field linking to it.
    #[must_use]
    pub fn parent(mut self, entity: impl Into<String>, link_field: impl Into<String>) -> Self {
        self.spec.parent_entity = Some(entity.into());
        self.spec.link_field = Some(link_field.into());
        self
    }

    /// Sets the field labelling rows.
    #[must_use]
    pub fn title_field(mut self, field: impl Into<String>) -> Self {
        self.spec.title_field = Some(field.into());
        self
    }

    /// Sets the label template.
    #[must_use]
    pub fn label_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.spec.label_pattern = Some(pattern.into());
        self
    }

    /// Runs after a new row is initialized.
    #[must_use]
    pub fn on_init_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RowMut<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.init_create.push(Arc::new(hook));
        self
    }

    /// Runs after an existing row joins a transaction.
    #[must_use]
    pub fn on_init_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RowMut<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.init_update.push(Arc::new(hook));
        self
    }

    /// Runs after a row is loaded from storage.
    #[must_use]
    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RowMut<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.load.push(Arc::new(hook));
        self
    }

    /// Runs when the transaction asks its rows to update.
    #[must_use]
    pub fn on_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RowMut<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.update.push(Arc::new(hook));
        self
    }

    /// Runs once per modified row as the transaction presaves.
    #[must_use]
    pub fn on_presave<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RowMut<'_>, Option<&str>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.presave.push(Arc::new(hook));
        self
    }

    /// Runs before a field change is stored and may reject it.
    #[must_use]
    pub fn on_before_field_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Row, &str, &str) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.before_field_change.push(Arc::new(hook));
        self
    }

    /// Runs after a field change is stored.
    #[must_use]
    pub fn on_after_field_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RowMut<'_>, &str, &str) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.hooks.after_field_change.push(Arc::new(hook));
        self
    }

    /// Returns the `EntitySpec` built so far.
    #[must_use]
    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }
}

/// A registered entity.
#[derive(Debug)]
pub struct EntityDef {
    pub(crate) spec: EntitySpec,
    pub(crate) table: String,
    pub(crate) fields: Vec<Arc<FieldDef>>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) key: KeyDef,
    pub(crate) hooks: EntityHooks,
    pub(crate) depth: usize,
}

impl EntityDef {
    /// Returns the entity id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Returns the title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.spec.title
    }

    /// Returns the storage table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the `EntitySpec` the entity was built from.
    #[must_use]
    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    /// Returns true if saves write history and audit rows.
    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.spec.transactional
    }

    /// Returns the declared key allocation.
    #[must_use]
    pub fn allocation(&self) -> Option<KeyAllocation> {
        self.spec.key_allocation
    }

    /// Returns the parent entity id.
    #[must_use]
    pub fn parent_entity(&self) -> Option<&str> {
        self.spec.parent_entity.as_deref()
    }

    /// Returns the field linking to the parent.
    #[must_use]
    pub fn link_field(&self) -> Option<&str> {
        self.spec.link_field.as_deref()
    }

    /// Returns the field definitions in order.
    #[must_use]
    pub fn field_defs(&self) -> &[Arc<FieldDef>] {
        &self.fields
    }

    /// Returns a field definition.
    #[must_use]
    pub fn field_def(&self, id: &str) -> Option<&Arc<FieldDef>> {
        self.index.get(id).map(|&i| &self.fields[i])
    }

    /// Returns the key layout.
    #[must_use]
    pub fn key(&self) -> &KeyDef {
        &self.key
    }

    /// Returns the save order rank: zero for entities referring to no other.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Builds a row label from the label pattern or the title field.
    pub(crate) fn label_for(&self, key: &str, value: impl Fn(&str) -> Option<String>) -> String {
        if let Some(pattern) = &self.spec.label_pattern {
            return expand_tokens(pattern, |token| {
                if token == "key" {
                    Some(key.to_string())
                } else {
                    value(token)
                }
            });
        }
        if let Some(title) = self.spec.title_field.as_deref().and_then(&value) {
            return title;
        }
        format!("(ERROR: no label defined for {})", self.spec.id)
    }
}

fn expand_tokens(pattern: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let token = &after[..end];
                match lookup(token) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
