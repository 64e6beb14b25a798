//! The registry of field types, lists of values and entities.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use tally_sql::TableSchema;

use crate::audit;
use crate::entity::{EntityBuilder, EntityDef};
use crate::error::{CoreError, CoreResult};
use crate::field::{builtin_types, FieldDef, FieldType, ValidationContext};
use crate::key::{self, KeyAllocation, KeyDef, KeyPart};
use crate::lov::ListOfValues;

/// Immutable registry shared by a data store and its transactions.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    field_types: HashMap<String, Arc<dyn FieldType>>,
    lists: HashMap<String, Arc<ListOfValues>>,
    entities: Vec<Arc<EntityDef>>,
    entity_index: HashMap<String, usize>,
    children: HashMap<String, Vec<String>>,
}

impl TypeRegistry {
    /// Starts a registry holding the built-in field types.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder {
            registry: Self::default(),
        };
        for field_type in builtin_types() {
            builder.add_field_type(field_type);
        }
        builder
    }

    /// Returns a field type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if not registered.
    pub fn field_type(&self, name: &str) -> CoreResult<Arc<dyn FieldType>> {
        self.field_types
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownType {
                type_name: name.to_string(),
            })
    }

    /// Returns a statically registered list.
    #[must_use]
    pub fn list(&self, id: &str) -> Option<&Arc<ListOfValues>> {
        self.lists.get(id)
    }

    /// Returns an entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] if not registered.
    pub fn entity(&self, id: &str) -> CoreResult<&Arc<EntityDef>> {
        self.entity_index
            .get(id)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| CoreError::UnknownEntity {
                entity: id.to_string(),
            })
    }

    /// Iterates over entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.iter()
    }

    /// Returns the ids of entities whose parent is this entity.
    #[must_use]
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map_or(&[], Vec::as_slice)
    }

    /// Returns every table the registered entities need, including the
    /// audit and key-allocation tables.
    #[must_use]
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        let mut schemas = audit::system_tables();
        for entity in &self.entities {
            schemas.push(key::table_schema(entity));
            if entity.is_transactional() {
                schemas.push(key::history_schema(entity));
            }
        }
        schemas
    }
}

/// Collects registrations, checking each entity against what precedes it.
#[derive(Debug)]
pub struct RegistryBuilder {
    registry: TypeRegistry,
}

impl RegistryBuilder {
    /// Registers a field type, replacing one with the same name.
    pub fn add_field_type(&mut self, field_type: Arc<dyn FieldType>) -> &mut Self {
        self.registry
            .field_types
            .insert(field_type.name().to_string(), field_type);
        self
    }

    /// Registers a list of values.
    pub fn add_list(&mut self, list: ListOfValues) -> &mut Self {
        self.registry
            .lists
            .insert(list.id.clone(), Arc::new(list));
        self
    }

    /// Registers an entity.
    ///
    /// Entities it refers to, by reference field or as parent, must already
    /// be registered.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateId`], [`CoreError::UnknownType`],
    /// [`CoreError::UnknownEntity`], [`CoreError::InvalidPattern`] or
    /// [`CoreError::InvalidDefinition`] if the entity is inconsistent.
    pub fn add_entity(&mut self, builder: EntityBuilder) -> CoreResult<&mut Self> {
        let EntityBuilder { spec, hooks } = builder;
        let registry = &mut self.registry;
        if registry.entity_index.contains_key(&spec.id) {
            return Err(CoreError::DuplicateId { id: spec.id });
        }
        if spec.primary_key.is_empty() {
            return Err(CoreError::invalid_definition(format!(
                "entity {} has no primary key",
                spec.id
            )));
        }

        let mut fields = Vec::with_capacity(spec.fields.len());
        let mut index = HashMap::new();
        let mut depth = 0;
        for field_spec in &spec.fields {
            if index.contains_key(&field_spec.id) {
                return Err(CoreError::DuplicateId {
                    id: format!("{}.{}", spec.id, field_spec.id),
                });
            }
            let field_type = registry.field_type(&field_spec.type_name)?;
            let mut def = FieldDef::new(field_spec.clone(), field_type)?;
            if def.is_reference() {
                if let Some(target) = field_spec.ref_entity.as_deref() {
                    let target = registry.entity(target)?;
                    depth = depth.max(target.depth + 1);
                    def = def.with_data_length(target.key.length);
                }
            }
            index.insert(field_spec.id.clone(), fields.len());
            fields.push(Arc::new(def));
        }

        let mut parts = Vec::with_capacity(spec.primary_key.len());
        let mut pieces = 0;
        let mut length = 0;
        for field_id in &spec.primary_key {
            let def = index.get(field_id).map(|&i| &fields[i]).ok_or_else(|| {
                CoreError::invalid_definition(format!(
                    "invalid field in primary key of {}: {field_id}",
                    spec.id
                ))
            })?;
            let part_pieces = match def.spec().ref_entity.as_deref() {
                Some(target) if def.is_reference() => registry.entity(target)?.key.pieces,
                _ => 1,
            };
            if !parts.is_empty() {
                length += 1;
            }
            length += def.data_length().unwrap_or(20);
            pieces += part_pieces;
            parts.push(KeyPart {
                field_id: field_id.clone(),
                pieces: part_pieces,
                auto_generate: def.spec().auto_generate,
            });
        }
        if parts.iter().filter(|p| p.auto_generate).count() > 1 {
            return Err(CoreError::invalid_definition(format!(
                "entity {} has more than one generated key field",
                spec.id
            )));
        }

        let auto_increment_column = if spec.key_allocation == Some(KeyAllocation::AutoIncrement) {
            match parts.as_slice() {
                [part] if part.auto_generate => Some(part.field_id.clone()),
                _ => {
                    return Err(CoreError::invalid_definition(format!(
                        "auto-increment entity {} needs a single generated key field",
                        spec.id
                    )))
                }
            }
        } else {
            None
        };

        if let Some(parent) = spec.parent_entity.as_deref() {
            depth = depth.max(registry.entity(parent)?.depth + 1);
            match spec.link_field.as_deref() {
                Some(link) if index.contains_key(link) => {}
                _ => {
                    return Err(CoreError::invalid_definition(format!(
                        "entity {} needs a link field to its parent {parent}",
                        spec.id
                    )))
                }
            }
            registry
                .children
                .entry(parent.to_string())
                .or_default()
                .push(spec.id.clone());
        }
        if let Some(title) = spec.title_field.as_deref() {
            if !index.contains_key(title) {
                return Err(CoreError::invalid_definition(format!(
                    "title field {title} is not a field of {}",
                    spec.id
                )));
            }
        }

        let entity = EntityDef {
            table: spec.table.clone().unwrap_or_else(|| spec.id.clone()),
            spec,
            fields,
            index,
            key: KeyDef {
                parts,
                pieces,
                length,
                auto_increment_column,
            },
            hooks,
            depth,
        };
        debug!(entity = entity.id(), table = entity.table(), depth, "entity registered");
        registry
            .entity_index
            .insert(entity.id().to_string(), registry.entities.len());
        registry.entities.push(Arc::new(entity));
        Ok(self)
    }

    /// Finishes the registry.
    #[must_use]
    pub fn build(self) -> Arc<TypeRegistry> {
        Arc::new(self.registry)
    }
}

/// Validation context serving the registry's static lists.
#[derive(Debug, Clone, Copy)]
pub struct RegistryContext<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> RegistryContext<'a> {
    /// Creates a context over a registry.
    #[must_use]
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }
}

impl ValidationContext for RegistryContext<'_> {
    fn list_of_values(&mut self, list_id: &str) -> CoreResult<Option<Arc<ListOfValues>>> {
        Ok(self.registry.list(list_id).cloned())
    }

    fn reference_exists(&mut self, _entity: &str, _key: &str) -> CoreResult<Option<bool>> {
        Ok(None)
    }
}
