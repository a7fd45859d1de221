//! Postgres store for the progress-billing ledger.
//!
//! Every command runs in one transaction: load the rows it needs, apply the
//! pure rule from `eda-ledger`, write the result back, commit. Statement
//! creation, validation, reopen and delete additionally take a per-scope
//! transactional advisory lock so the "latest statement" they read cannot
//! change under them.
//!
//! Rule violations surface as `anyhow::Error` whose root cause is an
//! [`eda_ledger::LedgerError`]; recover its kind with [`ledger_error_kind`].

use anyhow::{Context, Result};
use eda_ledger::{ErrorKind, LedgerError};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};

mod codec;
pub mod orders;
pub mod statements;

pub use orders::{
    add_order_line, create_order, fetch_order, lock_order, recompute_totals, remove_order_line,
    unlock_order, update_order_line,
};
pub use statements::{
    add_amendment, attach_photo, create_statement, delete_statement, fetch_statement,
    latest_statement, list_photos, list_statements, remove_amendment, reopen_statement,
    set_current_quantity, snapshot, validate_statement,
};

pub const ENV_DB_URL: &str = "EDA_DATABASE_URL";

/// Connect to Postgres using EDA_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_statements_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='progress_statements'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_statements_table: exists,
    })
}

/// The ledger rule violation carried by `err`, if any.
pub fn ledger_error(err: &anyhow::Error) -> Option<&LedgerError> {
    err.chain().find_map(|c| c.downcast_ref::<LedgerError>())
}

/// Stable kind of the ledger rule violation carried by `err`, if any.
/// `None` means an infrastructure failure (connection, SQL, decode).
pub fn ledger_error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    ledger_error(err).map(LedgerError::kind)
}

/// Serialize commands on one scope for the rest of the transaction.
pub(crate) async fn lock_scope(conn: &mut PgConnection, scope_key: &str) -> Result<()> {
    sqlx::query("select pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(scope_key)
        .execute(conn)
        .await
        .with_context(|| format!("scope lock failed: {scope_key}"))?;
    Ok(())
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn ledger_kind_survives_context() {
        let err = anyhow::Error::new(LedgerError::ImmutableStatement {
            statement_id: Uuid::nil(),
        })
        .context("set_current_quantity failed");
        assert_eq!(ledger_error_kind(&err), Some(ErrorKind::ImmutableStatement));

        let infra = anyhow::anyhow!("connection reset");
        assert_eq!(ledger_error_kind(&infra), None);
    }
}
