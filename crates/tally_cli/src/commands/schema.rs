//! Schema and script files.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use tally_core::{
    Config, CoreError, EntityBuilder, EntitySpec, KeyAllocation, ListOfValues, TypeRegistry,
};
use tally_sql::SqlError;

/// Errors that stop a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid JSON for its purpose.
    #[error("cannot parse {path}: {source}")]
    Json {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Output could not be rendered.
    #[error("cannot render output: {0}")]
    Render(#[from] serde_json::Error),

    /// The schema does not describe a valid registry.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The in-memory database refused a table.
    #[error(transparent)]
    Sql(#[from] SqlError),
}

/// Data store settings a schema file may override.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Allocation for entities that do not choose one.
    pub key_allocation: Option<KeyAllocation>,
    /// Accept saves with nothing modified.
    pub allow_no_modifications: bool,
    /// Attempt the row lock on unchanged sets.
    pub relock_on_unchanged_set: bool,
    /// Name each row in outstanding messages.
    pub fully_identify_rows_in_messages: bool,
}

impl ConfigFile {
    /// Returns the data store configuration.
    pub fn to_config(&self) -> Config {
        let mut config = Config::default()
            .allow_no_modifications(self.allow_no_modifications)
            .relock_on_unchanged_set(self.relock_on_unchanged_set)
            .fully_identify_rows_in_messages(self.fully_identify_rows_in_messages);
        if let Some(allocation) = self.key_allocation {
            config = config.key_allocation(allocation);
        }
        config
    }
}

/// A schema file: lists of values and entity specs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaFile {
    /// Lists backing option fields.
    pub lists: Vec<ListOfValues>,
    /// Entities, parents before children.
    pub entities: Vec<EntitySpec>,
    /// Data store settings.
    pub config: ConfigFile,
}

impl SchemaFile {
    /// Reads a schema file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        read_json(path)
    }

    /// Builds the registry the schema describes.
    pub fn registry(&self) -> Result<Arc<TypeRegistry>, CliError> {
        let mut builder = TypeRegistry::builder();
        for list in &self.lists {
            builder.add_list(list.clone());
        }
        for spec in &self.entities {
            builder.add_entity(EntityBuilder::from_spec(spec.clone()))?;
        }
        Ok(builder.build())
    }
}

/// Reads and parses a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SHOP: &str = r#"{
        "lists": [
            { "id": "colour", "items": [ { "id": "red", "label": "Red" } ] }
        ],
        "entities": [
            {
                "id": "customer",
                "title": "Customer",
                "primary_key": ["code"],
                "transactional": true,
                "key_allocation": "maxscan",
                "fields": [
                    { "id": "code", "type": "text", "mandatory": true, "data_length": 10 },
                    { "id": "name", "type": "text", "label": "Name", "mandatory": true }
                ]
            },
            {
                "id": "order",
                "title": "Order",
                "table": "orders",
                "primary_key": ["customer", "seq"],
                "transactional": true,
                "fields": [
                    { "id": "customer", "type": "reference", "ref_entity": "customer", "mandatory": true },
                    { "id": "seq", "type": "number", "auto_generate": true },
                    { "id": "colour", "type": "option", "list_id": "colour" }
                ]
            }
        ]
    }"#;

    pub(crate) fn shop() -> SchemaFile {
        serde_json::from_str(SHOP).unwrap()
    }

    #[test]
    fn builds_registry_from_json() {
        let registry = shop().registry().unwrap();
        let order = registry.entity("order").unwrap();
        assert_eq!(order.table(), "orders");
        assert_eq!(order.key().pieces(), 2);
        assert_eq!(
            registry.entity("customer").unwrap().allocation(),
            Some(KeyAllocation::MaxScan)
        );
    }

    #[test]
    fn unknown_field_type_is_reported() {
        let mut schema = shop();
        schema.entities[0].fields[1].type_name = "colourwheel".to_string();
        assert!(matches!(
            schema.registry(),
            Err(CliError::Core(CoreError::UnknownType { .. }))
        ));
    }

    #[test]
    fn config_overrides_defaults() {
        let schema: SchemaFile = serde_json::from_str(
            r#"{ "config": { "key_allocation": "maxscan", "allow_no_modifications": true } }"#,
        )
        .unwrap();
        let config = schema.config.to_config();
        assert_eq!(config.key_allocation, KeyAllocation::MaxScan);
        assert!(config.allow_no_modifications);
        assert!(!config.relock_on_unchanged_set);
    }

    #[test]
    fn load_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SHOP.as_bytes()).unwrap();
        assert_eq!(SchemaFile::load(&path).unwrap().entities.len(), 2);

        let missing = dir.path().join("missing.json");
        let err = SchemaFile::load(&missing).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
        assert!(err.to_string().contains("missing.json"));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SchemaFile::load(&path), Err(CliError::Json { .. })));
    }
}
