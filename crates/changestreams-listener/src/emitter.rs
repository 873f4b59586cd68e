//! Trigger DDL for the change emitter.
//!
//! Every tracked table gets an `AFTER INSERT OR UPDATE OR DELETE` row trigger
//! calling one shared function. The function receives
//! `(entity_name, key_column, channel)` as trigger arguments, so tables with
//! different primary-key names and types all publish the same payload shape.

use changestreams_core::config::TableConfig;
use sqlx::PgPool;
use tracing::info;

use crate::error::{ListenerError, Result};

/// Name of the shared PL/pgSQL trigger function.
pub const NOTIFY_FUNCTION: &str = "changestreams_notify";

/// Postgres truncates identifiers beyond this length.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Accept only plain identifiers: `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
///
/// Names are interpolated into DDL and trigger-argument literals, so anything
/// that would need escaping is rejected up front.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_BYTES {
        Ok(())
    } else {
        Err(ListenerError::InvalidIdentifier(name.to_string()))
    }
}

/// `CREATE OR REPLACE` for the shared notify function.
///
/// `entityId` coalesces the new and old row keys (DELETE has no new row).
/// A failing `pg_notify` is downgraded to a WARNING so the write still commits.
pub fn function_sql() -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {NOTIFY_FUNCTION}() RETURNS trigger AS $$
DECLARE
    row_id text;
BEGIN
    row_id := COALESCE(to_jsonb(NEW) ->> TG_ARGV[1], to_jsonb(OLD) ->> TG_ARGV[1]);
    BEGIN
        PERFORM pg_notify(TG_ARGV[2], json_build_object(
            'entityName', TG_ARGV[0],
            'operation',  TG_OP,
            'entityId',   row_id,
            'changedAt',  to_char(clock_timestamp() AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"')
        )::text);
    EXCEPTION WHEN OTHERS THEN
        RAISE WARNING '{NOTIFY_FUNCTION}: publish failed for %: %', TG_ARGV[0], SQLERRM;
    END;
    RETURN NULL;
END;
$$ LANGUAGE plpgsql"#
    )
}

/// Trigger name for a table: `changestreams_<table>`.
pub fn trigger_name(table: &str) -> String {
    format!("changestreams_{}", table)
}

/// Statements that (re)create the trigger for one table.
pub fn install_trigger_sql(table: &TableConfig, channel: &str) -> Result<Vec<String>> {
    validate_identifier(&table.table)?;
    validate_identifier(&table.key_column)?;
    validate_identifier(channel)?;
    let trigger = trigger_name(&table.table);
    validate_identifier(&trigger)?;

    Ok(vec![
        format!(r#"DROP TRIGGER IF EXISTS "{}" ON "{}""#, trigger, table.table),
        format!(
            r#"CREATE TRIGGER "{trigger}" AFTER INSERT OR UPDATE OR DELETE ON "{tbl}" FOR EACH ROW EXECUTE FUNCTION {NOTIFY_FUNCTION}('{entity}', '{key}', '{channel}')"#,
            tbl = table.table,
            entity = table.entity,
            key = table.key_column,
        ),
    ])
}

/// Statement that removes the trigger for one table.
pub fn uninstall_trigger_sql(table: &TableConfig) -> Result<String> {
    validate_identifier(&table.table)?;
    let trigger = trigger_name(&table.table);
    validate_identifier(&trigger)?;
    Ok(format!(
        r#"DROP TRIGGER IF EXISTS "{}" ON "{}""#,
        trigger, table.table
    ))
}

/// Full install script: the shared function followed by every table's trigger.
pub fn install_script(tables: &[TableConfig], channel: &str) -> Result<Vec<String>> {
    let mut statements = vec![function_sql()];
    for table in tables {
        statements.extend(install_trigger_sql(table, channel)?);
    }
    Ok(statements)
}

/// Install the function and all triggers in one transaction. Idempotent.
pub async fn install(pool: &PgPool, tables: &[TableConfig], channel: &str) -> Result<()> {
    let statements = install_script(tables, channel)?;
    let mut tx = pool.begin().await?;
    for stmt in &statements {
        sqlx::raw_sql(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!(tables = tables.len(), %channel, "change triggers installed");
    Ok(())
}

/// Drop every trigger and the shared function in one transaction.
pub async fn uninstall(pool: &PgPool, tables: &[TableConfig]) -> Result<()> {
    let mut statements = Vec::with_capacity(tables.len() + 1);
    for table in tables {
        statements.push(uninstall_trigger_sql(table)?);
    }
    statements.push(format!("DROP FUNCTION IF EXISTS {}()", NOTIFY_FUNCTION));

    let mut tx = pool.begin().await?;
    for stmt in &statements {
        sqlx::raw_sql(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!(tables = tables.len(), "change triggers removed");
    Ok(())
}
