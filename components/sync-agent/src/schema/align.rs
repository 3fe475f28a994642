// Local crates
use crate::engine::ports::TargetSession;
use crate::schema::{
    models::{BRANCH_ID_COLUMN, BRANCH_ID_TYPE, DEFAULT_SCHEMA, TableSchema},
    types::sql_type_definition,
};
use crate::sql::identifiers::{quote_ident, quote_list};

// External crates
use tracing::instrument;

/// One DDL statement with a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStep {
    pub description: String,
    pub sql: String,
}

/// A column whose type or nullability differs between source and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDifference {
    pub column: String,
    pub source: String,
    pub target: String,
}

/// What it takes to make the consolidated table fit the source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentPlan {
    /// Target table is missing.
    Create(DdlStep),
    /// Target table exists; `steps` may be empty when nothing is missing.
    Alter {
        steps: Vec<DdlStep>,
        /// The branch column is among `steps` and existing rows need a backfill.
        adds_branch_column: bool,
        /// Differences that are only reported.
        differences: Vec<ColumnDifference>,
    },
    /// The table cannot be aligned automatically.
    Halt(String),
}

fn qualified(table: &str) -> String {
    format!("{}.{}", quote_ident(DEFAULT_SCHEMA), quote_ident(table))
}

/// Primary key of the consolidated table: branch column plus the source key.
#[must_use]
pub fn consolidated_key(source: &TableSchema) -> Vec<String> {
    std::iter::once(BRANCH_ID_COLUMN.to_string())
        .chain(source.primary_key.iter().cloned())
        .collect()
}

/// `CREATE TABLE` for the consolidated table: branch column first, source
/// columns in ordinal order, composite primary key when the source has one.
#[must_use]
pub fn create_table_sql(table: &str, source: &TableSchema) -> String {
    let mut definitions = vec![format!("{} {BRANCH_ID_TYPE} NOT NULL", quote_ident(BRANCH_ID_COLUMN))];
    definitions.extend(source.columns.iter().map(|c| {
        format!(
            "{} {} {}",
            quote_ident(&c.name),
            sql_type_definition(c),
            c.nullability()
        )
    }));

    if !source.primary_key.is_empty() {
        definitions.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&format!("PK_{table}_Composite")),
            quote_list(&consolidated_key(source))
        ));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n);",
        qualified(table),
        definitions.join(",\n    ")
    )
}

fn sorted_lowercase(names: &[String]) -> Vec<String> {
    let mut names: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    names.sort();
    names
}

/// Compare source and target and decide what to do. Pure; nothing runs here.
#[must_use]
pub fn plan_alignment(table: &str, source: &TableSchema, target: Option<&TableSchema>) -> AlignmentPlan {
    let Some(target) = target else {
        return AlignmentPlan::Create(DdlStep {
            description: format!("create consolidated table {table}"),
            sql: create_table_sql(table, source),
        });
    };

    if !source.primary_key.is_empty() {
        let expected = sorted_lowercase(&consolidated_key(source));
        let found = sorted_lowercase(&target.primary_key);
        if expected != found {
            return AlignmentPlan::Halt(format!(
                "primary key mismatch on consolidated table {table}: expected {expected:?}, found {found:?}; \
                 the old key has to be replaced by the composite key manually"
            ));
        }
    }

    let mut steps = Vec::new();
    let adds_branch_column = !target.has_column(BRANCH_ID_COLUMN);
    if adds_branch_column {
        steps.push(DdlStep {
            description: format!("add column {BRANCH_ID_COLUMN}"),
            sql: format!(
                "ALTER TABLE {} ADD {} {BRANCH_ID_TYPE} NULL",
                qualified(table),
                quote_ident(BRANCH_ID_COLUMN)
            ),
        });
    }

    let mut differences = Vec::new();
    for column in &source.columns {
        match target.column(&column.name) {
            None => steps.push(DdlStep {
                description: format!("add column {}", column.name),
                sql: format!(
                    "ALTER TABLE {} ADD {} {} {}",
                    qualified(table),
                    quote_ident(&column.name),
                    sql_type_definition(column),
                    column.nullability()
                ),
            }),
            Some(existing) => {
                let source_def = format!("{} {}", sql_type_definition(column), column.nullability());
                let target_def = format!("{} {}", sql_type_definition(existing), existing.nullability());
                if source_def != target_def {
                    differences.push(ColumnDifference {
                        column: column.name.clone(),
                        source: source_def,
                        target: target_def,
                    });
                }
            }
        }
    }

    AlignmentPlan::Alter {
        steps,
        adds_branch_column,
        differences,
    }
}

/// Bring the consolidated table in line with `source`. Returns `false` when
/// the table cannot be synced; the reason has been logged.
#[instrument(
    name = "agent_schema_align",
    target = "schema::align",
    level = "info",
    skip_all,
    fields(table = %table)
)]
pub async fn align_target<T>(target: &mut T, table: &str, source: Option<&TableSchema>) -> bool
where
    T: TargetSession + ?Sized,
{
    let Some(source) = source else {
        tracing::error!("Source table not found or has no columns, halting");
        return false;
    };

    let existing = match target.table_schema(table).await {
        Ok(existing) => existing,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read target schema, halting");
            return false;
        }
    };

    let steps = match plan_alignment(table, source, existing.as_ref()) {
        AlignmentPlan::Halt(reason) => {
            tracing::error!(reason = %reason, "Schema alignment halted, manual intervention required");
            return false;
        }
        AlignmentPlan::Create(step) => {
            tracing::info!("Target table does not exist, creating it with a composite key");
            vec![step]
        }
        AlignmentPlan::Alter {
            steps,
            adds_branch_column,
            differences,
        } => {
            for diff in &differences {
                tracing::warn!(
                    column = %diff.column,
                    source = %diff.source,
                    target = %diff.target,
                    "Column definition differs from source, manual check may be needed"
                );
            }
            if adds_branch_column {
                tracing::error!(
                    column = BRANCH_ID_COLUMN,
                    "Adding branch column as NULL; existing rows must be backfilled before it can become NOT NULL"
                );
            }
            if steps.is_empty() {
                tracing::info!("Schema is already aligned");
                return true;
            }
            steps
        }
    };

    match run_steps(target, &steps).await {
        Ok(()) => {
            tracing::info!(statements = steps.len(), "Schema changes committed");
            true
        }
        Err(failed) => {
            tracing::error!(ddl = %failed.sql, "Schema change failed, rolled back");
            if let Err(e) = target.rollback().await {
                tracing::error!(error = %e, "Rollback after failed schema change failed");
            }
            false
        }
    }
}

async fn run_steps<'s, T>(target: &mut T, steps: &'s [DdlStep]) -> Result<(), &'s DdlStep>
where
    T: TargetSession + ?Sized,
{
    let Some(first) = steps.first() else {
        return Ok(());
    };
    if let Err(e) = target.begin().await {
        tracing::error!(error = %e, "Failed to open schema transaction");
        return Err(first);
    }

    for step in steps {
        tracing::info!(ddl = %step.sql, "Executing DDL: {}", step.description);
        if let Err(e) = target.execute_ddl(&step.sql).await {
            tracing::error!(error = %e, "DDL failed: {}", step.description);
            return Err(step);
        }
        tracing::info!(target: sync_common::instrumentation::tracing::SUCCESS_TARGET, table_ddl = %step.description, "Executed DDL");
    }

    match target.commit().await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to commit schema changes");
            steps.last().map_or(Ok(()), Err)
        }
    }
}
