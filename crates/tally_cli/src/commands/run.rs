//! Run command implementation.
//!
//! A script is a list of steps run in order. The first step after a `save`
//! or `cancel` begins a new transaction, so a script can seed records and
//! then work on them. Row names given with `as` are local to the
//! transaction that created them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use tally_core::{
    Config, CoreError, DataStore, RowId, RowInit, Session, Transaction, TypeRegistry,
};
use tally_sql::{ConnectionPool, InMemoryDatabase};

use super::schema::{read_json, CliError, SchemaFile};

/// A script file.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// User the session runs as.
    #[serde(default = "default_user")]
    pub user: String,
    /// Steps in order.
    pub steps: Vec<Step>,
}

fn default_user() -> String {
    "tally".to_string()
}

/// One scripted operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Create a new row; values are applied in field-name order.
    Create {
        /// Entity id.
        entity: String,
        /// Initial values.
        #[serde(default)]
        values: BTreeMap<String, String>,
        /// Name of the parent row.
        #[serde(default)]
        parent: Option<String>,
        /// Name for later steps.
        #[serde(default, rename = "as")]
        name: Option<String>,
    },
    /// Load a stored row, or create it if `create` is set and it is missing.
    Get {
        /// Entity id.
        entity: String,
        /// Key string.
        key: String,
        /// Create a new row with this key when none is stored.
        #[serde(default)]
        create: bool,
        /// Name for later steps.
        #[serde(default, rename = "as")]
        name: Option<String>,
    },
    /// Change a field of a named row.
    Set {
        /// Row name.
        row: String,
        /// Field id.
        field: String,
        /// New value.
        value: String,
    },
    /// Mark a named row for deletion.
    Delete {
        /// Row name.
        row: String,
    },
    /// Save the transaction.
    Save {
        /// Outcome recorded with the commit.
        #[serde(default)]
        outcome: Option<String>,
    },
    /// Cancel the transaction.
    Cancel,
}

impl Step {
    fn op(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Save { .. } => "save",
            Self::Cancel => "cancel",
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    /// The step succeeded.
    Ok {
        /// Short description of the effect.
        detail: String,
    },
    /// The save was refused with outstanding messages.
    Invalid {
        /// Every outstanding error.
        messages: Vec<String>,
    },
    /// The step failed.
    Failed {
        /// Error class.
        class: String,
        /// Error text.
        error: String,
    },
}

/// Report line for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step number, from 1.
    pub step: usize,
    /// Operation name.
    pub op: String,
    /// Result.
    #[serde(flatten)]
    pub result: StepResult,
    /// Warnings on the row the step touched.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Outcome of a whole script.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// One line per step.
    pub steps: Vec<StepReport>,
    /// Committed rows per table afterwards.
    pub tables: BTreeMap<String, usize>,
}

impl RunReport {
    /// Returns the number of steps that did not succeed.
    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s.result, StepResult::Ok { .. }))
            .count()
    }
}

/// Runs the run command.
pub fn run(schema_path: &Path, script_path: &Path, format: &str) -> Result<(), CliError> {
    let schema = SchemaFile::load(schema_path)?;
    let registry = schema.registry()?;
    let script: Script = read_json(script_path)?;
    let report = execute(registry, schema.config.to_config(), &script)?;
    info!(steps = report.steps.len(), failures = report.failures(), "script finished");

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }
    Ok(())
}

/// Runs a script against a fresh in-memory database.
pub fn execute(
    registry: Arc<TypeRegistry>,
    config: Config,
    script: &Script,
) -> Result<RunReport, CliError> {
    let db = Arc::new(InMemoryDatabase::new());
    for table in registry.table_schemas() {
        db.create_table(table)?;
    }
    let pool: Arc<dyn ConnectionPool> = db.clone();
    let mut runner = Runner {
        store: DataStore::with_config(Arc::clone(&registry), pool, config),
        session: Arc::new(Session::new(script.user.clone())),
        tx: None,
        names: HashMap::new(),
    };

    let mut steps = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.iter().enumerate() {
        let (result, row) = match runner.step(step) {
            Ok((detail, row)) => (StepResult::Ok { detail }, row),
            Err(CoreError::Invalid { messages }) => (StepResult::Invalid { messages }, None),
            Err(e) => (
                StepResult::Failed {
                    class: format!("{:?}", e.class()),
                    error: e.to_string(),
                },
                None,
            ),
        };
        let warnings = row.map(|id| runner.warnings(id)).unwrap_or_default();
        debug!(step = index + 1, op = step.op(), ?result, "step run");
        steps.push(StepReport {
            step: index + 1,
            op: step.op().to_string(),
            result,
            warnings,
        });
    }
    if let Some(mut tx) = runner.tx.take() {
        if tx.is_active() {
            info!(tx = %tx.id(), "script ended with an open transaction, cancelling");
            tx.cancel()?;
        }
    }

    let mut tables = BTreeMap::new();
    for entity in registry.entities() {
        tables.insert(entity.table().to_string(), db.row_count(entity.table())?);
    }
    Ok(RunReport { steps, tables })
}

struct Runner {
    store: DataStore,
    session: Arc<Session>,
    tx: Option<Transaction>,
    names: HashMap<String, RowId>,
}

impl Runner {
    /// Returns the open transaction, beginning one if needed.
    fn tx(&mut self) -> Result<&mut Transaction, CoreError> {
        if !self.tx.as_ref().is_some_and(Transaction::is_active) {
            self.names.clear();
            self.tx = Some(self.store.begin(&self.session)?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("no open transaction"))
    }

    fn named(&self, name: &str) -> Result<RowId, CoreError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::invalid_operation(format!("no row named {name}")))
    }

    fn step(&mut self, step: &Step) -> Result<(String, Option<RowId>), CoreError> {
        match step {
            Step::Create {
                entity,
                values,
                parent,
                name,
            } => {
                let mut init = values
                    .iter()
                    .fold(RowInit::new(), |init, (field, value)| init.value(field, value));
                if let Some(parent) = parent {
                    init = init.parent(self.named(parent)?);
                }
                let tx = self.tx()?;
                let id = tx.create_new_row(entity, init)?;
                let described = tx.row(id)?.describe();
                self.remember(name.as_deref(), id);
                Ok((format!("created {described}"), Some(id)))
            }
            Step::Get {
                entity,
                key,
                create,
                name,
            } => {
                let tx = self.tx()?;
                let id = if *create {
                    tx.get_row(entity, key, RowInit::new())?
                } else {
                    tx.get_active_row(entity, key)?
                };
                let row = tx.row(id)?;
                let detail = format!(
                    "{} {}",
                    if row.action() == Some(tally_core::Action::Create) {
                        "created"
                    } else {
                        "loaded"
                    },
                    row.describe()
                );
                self.remember(name.as_deref(), id);
                Ok((detail, Some(id)))
            }
            Step::Set { row, field, value } => {
                let id = self.named(row)?;
                let tx = self.tx()?;
                let changed = tx.set(id, field, value)?;
                let row = tx.row(id)?;
                let detail = if changed {
                    format!("{}.{field} = {value}", row.describe())
                } else {
                    format!("{}.{field} unchanged", row.describe())
                };
                Ok((detail, Some(id)))
            }
            Step::Delete { row } => {
                let id = self.named(row)?;
                let tx = self.tx()?;
                tx.set_delete(id, true)?;
                Ok((format!("{} marked for deletion", tx.row(id)?.describe()), Some(id)))
            }
            Step::Save { outcome } => {
                let tx = self.tx()?;
                tx.save(outcome.as_deref())?;
                Ok((format!("{} committed", tx.id()), None))
            }
            Step::Cancel => {
                let tx = self.tx()?;
                tx.cancel()?;
                Ok((format!("{} cancelled", tx.id()), None))
            }
        }
    }

    fn remember(&mut self, name: Option<&str>, id: RowId) {
        if let Some(name) = name {
            self.names.insert(name.to_string(), id);
        }
    }

    fn warnings(&self, id: RowId) -> Vec<String> {
        let Some(row) = self.tx.as_ref().and_then(|tx| tx.row(id).ok()) else {
            return Vec::new();
        };
        row.messages()
            .iter()
            .filter(|m| m.kind == tally_core::MessageKind::Warning)
            .map(|m| m.text.clone())
            .collect()
    }
}

fn print_text_output(report: &RunReport) {
    println!("Tally Script Run");
    println!("================");
    println!();
    for step in &report.steps {
        match &step.result {
            StepResult::Ok { detail } => println!("  {:>3}. {:<7} ok: {detail}", step.step, step.op),
            StepResult::Invalid { messages } => {
                println!("  {:>3}. {:<7} invalid:", step.step, step.op);
                for message in messages {
                    println!("         - {message}");
                }
            }
            StepResult::Failed { class, error } => {
                println!("  {:>3}. {:<7} failed ({class}): {error}", step.step, step.op);
            }
        }
        for warning in &step.warnings {
            println!("         warning: {warning}");
        }
    }
    println!();
    println!("Tables:");
    for (table, rows) in &report.tables {
        println!("  {table:<20} {rows} rows");
    }
    println!();
    println!("{} steps, {} not ok", report.steps.len(), report.failures());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::schema::tests::shop;

    fn script(json: &str) -> Script {
        serde_json::from_str(json).unwrap()
    }

    fn execute_shop(json: &str) -> RunReport {
        let schema = shop();
        execute(schema.registry().unwrap(), schema.config.to_config(), &script(json)).unwrap()
    }

    #[test]
    fn parses_steps() {
        let parsed = script(
            r#"{ "steps": [
                { "op": "create", "entity": "customer", "values": { "code": "C1" }, "as": "c" },
                { "op": "set", "row": "c", "field": "name", "value": "Acme" },
                { "op": "save", "outcome": "seeded" },
                { "op": "cancel" }
            ] }"#,
        );
        assert_eq!(parsed.user, "tally");
        assert_eq!(parsed.steps.len(), 4);
        assert!(matches!(
            &parsed.steps[0],
            Step::Create { name: Some(name), .. } if name == "c"
        ));
        assert!(matches!(parsed.steps[3], Step::Cancel));
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Script>(r#"{ "steps": [ { "op": "explode" } ] }"#).is_err());
    }

    #[test]
    fn seeds_then_builds_on_stored_rows() {
        let report = execute_shop(
            r#"{ "steps": [
                { "op": "create", "entity": "customer", "values": { "code": "C1", "name": "Acme" } },
                { "op": "save" },
                { "op": "get", "entity": "customer", "key": "C1", "as": "c" },
                { "op": "create", "entity": "order", "values": { "customer": "C1", "colour": "red" }, "as": "o" },
                { "op": "save", "outcome": "ordered" }
            ] }"#,
        );
        assert_eq!(report.failures(), 0, "{report:?}");
        assert_eq!(
            report.steps[3].result,
            StepResult::Ok {
                detail: "created order:C1.1".to_string()
            }
        );
        assert_eq!(report.tables["customer"], 1);
        assert_eq!(report.tables["orders"], 1);
    }

    #[test]
    fn invalid_save_lists_messages() {
        let report = execute_shop(
            r#"{ "steps": [
                { "op": "create", "entity": "customer", "values": { "code": "C1" } },
                { "op": "save" }
            ] }"#,
        );
        assert_eq!(
            report.steps[1].result,
            StepResult::Invalid {
                messages: vec!["Name: mandatory".to_string()]
            }
        );
        assert_eq!(report.tables["customer"], 0);
    }

    #[test]
    fn failures_are_reported_and_the_script_continues() {
        let report = execute_shop(
            r#"{ "steps": [
                { "op": "set", "row": "nobody", "field": "name", "value": "x" },
                { "op": "get", "entity": "customer", "key": "C9" },
                { "op": "get", "entity": "customer", "key": "C9", "create": true, "as": "c" },
                { "op": "set", "row": "c", "field": "name", "value": "Zeta" },
                { "op": "save" }
            ] }"#,
        );
        assert!(matches!(
            &report.steps[0].result,
            StepResult::Failed { class, .. } if class == "InvariantViolation"
        ));
        assert!(matches!(
            &report.steps[1].result,
            StepResult::Failed { class, .. } if class == "NotFound"
        ));
        assert_eq!(report.failures(), 2);
        assert_eq!(report.tables["customer"], 1);
    }

    #[test]
    fn open_transaction_is_cancelled_at_end() {
        let report = execute_shop(
            r#"{ "steps": [
                { "op": "create", "entity": "customer", "values": { "code": "C1", "name": "Acme" } }
            ] }"#,
        );
        assert_eq!(report.failures(), 0);
        assert_eq!(report.tables["customer"], 0);
    }

    #[test]
    fn report_renders_as_json() {
        let report = execute_shop(r#"{ "steps": [ { "op": "save" } ] }"#);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["status"], "failed");
        assert_eq!(json["steps"][0]["class"], "Validation");
        assert_eq!(json["steps"][0]["op"], "save");
    }
}
