//! Check command implementation.

use serde::Serialize;
use std::path::Path;

use tally_core::key::{history_schema, table_schema};
use tally_core::{EntityDef, TypeRegistry};
use tally_sql::TableSchema;

use super::schema::{CliError, SchemaFile};

/// Layout of one entity.
#[derive(Debug, Serialize)]
pub struct EntityReport {
    /// Entity id.
    pub id: String,
    /// Human-readable name.
    pub title: String,
    /// Nesting depth through reference keys.
    pub depth: usize,
    /// Parent entity, if rows are owned by a parent row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Key structure.
    pub key: KeyReport,
    /// Main table.
    pub table: TableReport,
    /// History table of transactional entities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<TableReport>,
}

/// Key structure of an entity.
#[derive(Debug, Serialize)]
pub struct KeyReport {
    /// Key fields with the pieces each contributes.
    pub parts: Vec<KeyPartReport>,
    /// Total pieces in a key string.
    pub pieces: usize,
    /// Maximum key string length.
    pub length: usize,
    /// Allocation of the generated field; `default` when the store decides.
    pub allocation: String,
}

/// One key field.
#[derive(Debug, Serialize)]
pub struct KeyPartReport {
    /// Field id.
    pub field: String,
    /// Pieces contributed.
    pub pieces: usize,
    /// Whether key generation fills it.
    pub generated: bool,
}

/// Shape of a table.
#[derive(Debug, Serialize)]
pub struct TableReport {
    /// Table name.
    pub name: String,
    /// `(column, type)` pairs.
    pub columns: Vec<(String, String)>,
    /// Unique column sets.
    pub unique: Vec<Vec<String>>,
}

impl From<TableSchema> for TableReport {
    fn from(schema: TableSchema) -> Self {
        Self {
            name: schema.name,
            columns: schema
                .columns
                .into_iter()
                .map(|c| (c.name, c.sql_type))
                .collect(),
            unique: schema.unique,
        }
    }
}

/// Runs the check command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let registry = SchemaFile::load(path)?.registry()?;
    let reports = inspect(&registry);
    tracing::debug!(entities = reports.len(), "schema checked");

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        _ => {
            print_text_output(&reports);
        }
    }
    Ok(())
}

/// Describes every entity of a registry, in registration order.
pub fn inspect(registry: &TypeRegistry) -> Vec<EntityReport> {
    registry.entities().map(|entity| report(entity)).collect()
}

fn report(entity: &EntityDef) -> EntityReport {
    let key = entity.key();
    EntityReport {
        id: entity.id().to_string(),
        title: entity.title().to_string(),
        depth: entity.depth(),
        parent: entity.parent_entity().map(str::to_string),
        key: KeyReport {
            parts: key
                .parts()
                .iter()
                .map(|p| KeyPartReport {
                    field: p.field_id.clone(),
                    pieces: p.pieces,
                    generated: p.auto_generate,
                })
                .collect(),
            pieces: key.pieces(),
            length: key.length(),
            allocation: entity
                .allocation()
                .map_or_else(|| "default".to_string(), |a| format!("{a:?}").to_lowercase()),
        },
        table: table_schema(entity).into(),
        history: entity
            .is_transactional()
            .then(|| history_schema(entity).into()),
    }
}

fn print_text_output(reports: &[EntityReport]) {
    println!("Tally Schema Check");
    println!("==================");
    for entity in reports {
        println!();
        println!("{} ({})", entity.id, entity.title);
        if let Some(parent) = &entity.parent {
            println!("  Parent:  {parent}");
        }
        let parts: Vec<String> = entity
            .key
            .parts
            .iter()
            .map(|p| {
                let mut part = format!("{}[{}]", p.field, p.pieces);
                if p.generated {
                    part.push('*');
                }
                part
            })
            .collect();
        println!(
            "  Key:     {} ({} pieces, max {} chars, {} allocation)",
            parts.join(" . "),
            entity.key.pieces,
            entity.key.length,
            entity.key.allocation
        );
        print_table("Table", &entity.table);
        if let Some(history) = &entity.history {
            print_table("History", history);
        }
    }
}

fn print_table(heading: &str, table: &TableReport) {
    println!("  {heading}: {}", table.name);
    for (name, sql_type) in &table.columns {
        println!("    {name:<20} {sql_type}");
    }
    for columns in &table.unique {
        println!("    unique ({})", columns.join(", "));
    }
}
