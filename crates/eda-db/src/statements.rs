//! Progress statement commands: sequencing, carry-forward edits,
//! finalize/reopen/delete, photos and the reporting snapshot.

use anyhow::{Context, Result};
use eda_ledger::{
    carry, finalize, reconcile, sequencer, LedgerError, NewAmendment, NewPhoto, NewStatement,
    Photo, ProgressItem, ProgressStatement, Qty, Scope, StatementSnapshot,
};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::codec;
use crate::orders::{load_order, RowLock};
use crate::{is_unique_constraint_violation, lock_scope};

const STATEMENT_COLUMNS: &str = r#"
    statement_id, order_id, chantier_id, subcontractor_id, number, statement_date,
    period_label, comments, finalized, client_statement_ref
"#;

const ITEM_COLUMNS: &str = r#"
    item_id, statement_id, kind, order_line_id, article, description, line_type, unit,
    unit_price_micros, quantity_milli,
    quantite_precedente_milli, quantite_actuelle_milli, quantite_totale_milli,
    montant_precedent_micros, montant_actuel_micros, montant_total_micros, carried
"#;

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Create the next draft statement of `scope`.
///
/// Runs under the scope's advisory lock: the latest statement read here is
/// still the latest at insert time. The unique (scope, number) constraint and
/// the one-draft-per-scope index backstop the lock; a violation of either is
/// reported as a retryable `DuplicateNumber` conflict.
pub async fn create_statement(
    pool: &PgPool,
    scope: Scope,
    new: NewStatement,
) -> Result<ProgressStatement> {
    let scope_key = scope.key();
    let mut tx = pool.begin().await.context("create_statement begin failed")?;
    lock_scope(&mut tx, &scope_key).await?;

    // The lock gate and the seeded lines must read the same order row.
    let order = load_order(&mut tx, scope.order_id(), RowLock::Share).await?;
    let latest = load_latest(&mut tx, &scope_key).await?;
    let stmt = sequencer::plan_statement(&scope, &order, latest.as_ref(), new, Uuid::new_v4)?;

    let res = sqlx::query(
        r#"
        insert into progress_statements (
          statement_id, order_id, chantier_id, subcontractor_id, scope_key, number,
          statement_date, period_label, comments, finalized, client_statement_ref
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
        )
        "#,
    )
    .bind(stmt.id)
    .bind(scope.order_id())
    .bind(scope.chantier_id())
    .bind(scope.subcontractor_id())
    .bind(&scope_key)
    .bind(codec::number_col(stmt.number)?)
    .bind(stmt.date)
    .bind(&stmt.period_label)
    .bind(&stmt.comments)
    .bind(stmt.finalized)
    .bind(stmt.client_statement_ref)
    .execute(&mut *tx)
    .await;

    if let Err(e) = res {
        if is_unique_constraint_violation(&e, "uq_statement_scope_number")
            || is_unique_constraint_violation(&e, "uq_statement_one_draft_per_scope")
        {
            return Err(LedgerError::DuplicateNumber {
                scope: scope_key,
                number: stmt.number,
            }
            .into());
        }
        return Err(anyhow::Error::new(e).context("create_statement insert failed"));
    }

    for (position, item) in stmt.lines.iter().enumerate() {
        insert_item(&mut tx, stmt.id, position, item).await?;
    }
    for (position, item) in stmt.amendments.iter().enumerate() {
        insert_item(&mut tx, stmt.id, position, item).await?;
    }

    tx.commit().await.context("create_statement commit failed")?;
    Ok(stmt)
}

pub async fn fetch_statement(pool: &PgPool, statement_id: Uuid) -> Result<ProgressStatement> {
    let mut conn = pool
        .acquire()
        .await
        .context("fetch_statement acquire failed")?;
    load_statement(&mut conn, statement_id, false).await
}

/// All statements of `scope`, by ascending number.
pub async fn list_statements(pool: &PgPool, scope: &Scope) -> Result<Vec<ProgressStatement>> {
    let sql = format!(
        "select {STATEMENT_COLUMNS} from progress_statements where scope_key = $1 order by number asc"
    );
    let rows = sqlx::query(&sql)
        .bind(scope.key())
        .fetch_all(pool)
        .await
        .context("list_statements failed")?;
    let mut out = rows
        .iter()
        .map(codec::statement_of)
        .collect::<Result<Vec<_>>>()?;

    let ids: Vec<Uuid> = out.iter().map(|s| s.id).collect();
    let sql = format!(
        "select {ITEM_COLUMNS} from progress_items where statement_id = any($1) order by position asc"
    );
    let rows = sqlx::query(&sql)
        .bind(ids)
        .fetch_all(pool)
        .await
        .context("list_statements items failed")?;
    for row in &rows {
        let (statement_id, item) = codec::item_of(row)?;
        if let Some(stmt) = out.iter_mut().find(|s| s.id == statement_id) {
            push_item(stmt, item);
        }
    }
    Ok(out)
}

pub async fn latest_statement(pool: &PgPool, scope: &Scope) -> Result<Option<ProgressStatement>> {
    let mut conn = pool
        .acquire()
        .await
        .context("latest_statement acquire failed")?;
    load_latest(&mut conn, &scope.key()).await
}

// ---------------------------------------------------------------------------
// Carry-forward edits
// ---------------------------------------------------------------------------

pub async fn set_current_quantity(
    pool: &PgPool,
    statement_id: Uuid,
    item_id: Uuid,
    quantite_actuelle: Qty,
) -> Result<ProgressItem> {
    let mut tx = pool
        .begin()
        .await
        .context("set_current_quantity begin failed")?;
    let mut stmt = load_statement(&mut tx, statement_id, true).await?;
    let item = carry::set_current_quantity(&mut stmt, item_id, quantite_actuelle)?;

    sqlx::query(
        r#"
        update progress_items
        set quantite_actuelle_milli = $2,
            quantite_totale_milli = $3,
            montant_actuel_micros = $4,
            montant_total_micros = $5
        where item_id = $1
        "#,
    )
    .bind(item.id)
    .bind(item.quantite_actuelle.raw())
    .bind(item.quantite_totale.raw())
    .bind(item.montant_actuel.raw())
    .bind(item.montant_total.raw())
    .execute(&mut *tx)
    .await
    .context("set_current_quantity update failed")?;

    touch(&mut tx, statement_id).await?;
    tx.commit()
        .await
        .context("set_current_quantity commit failed")?;
    Ok(item)
}

pub async fn add_amendment(
    pool: &PgPool,
    statement_id: Uuid,
    input: NewAmendment,
) -> Result<ProgressItem> {
    let mut tx = pool.begin().await.context("add_amendment begin failed")?;
    let mut stmt = load_statement(&mut tx, statement_id, true).await?;
    let item = stmt.add_amendment(Uuid::new_v4(), input)?;

    let (next_position,): (i32,) = sqlx::query_as::<_, (i32,)>(
        r#"
        select coalesce(max(position) + 1, 0)
        from progress_items
        where statement_id = $1 and kind = 'AMENDMENT'
        "#,
    )
    .bind(statement_id)
    .fetch_one(&mut *tx)
    .await
    .context("add_amendment position query failed")?;

    insert_item(&mut tx, statement_id, next_position as usize, &item).await?;
    touch(&mut tx, statement_id).await?;
    tx.commit().await.context("add_amendment commit failed")?;
    info!(%statement_id, item_id = %item.id, "amendment added");
    Ok(item)
}

pub async fn remove_amendment(
    pool: &PgPool,
    statement_id: Uuid,
    item_id: Uuid,
) -> Result<ProgressItem> {
    let mut tx = pool.begin().await.context("remove_amendment begin failed")?;
    let mut stmt = load_statement(&mut tx, statement_id, true).await?;
    let removed = stmt.remove_amendment(item_id)?;

    sqlx::query("delete from progress_items where item_id = $1 and statement_id = $2")
        .bind(item_id)
        .bind(statement_id)
        .execute(&mut *tx)
        .await
        .context("remove_amendment delete failed")?;

    touch(&mut tx, statement_id).await?;
    tx.commit().await.context("remove_amendment commit failed")?;
    info!(%statement_id, %item_id, "amendment removed");
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Draft → Finalized. `false` when already finalized.
pub async fn validate_statement(
    pool: &PgPool,
    statement_id: Uuid,
    comments: Option<String>,
    period_label: Option<String>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("validate begin failed")?;
    let scope_key = scope_key_of(&mut tx, statement_id).await?;
    lock_scope(&mut tx, &scope_key).await?;

    let mut stmt = load_statement(&mut tx, statement_id, true).await?;
    let changed = finalize::validate(&mut stmt, comments, period_label)?;
    if changed {
        write_state(&mut tx, &stmt).await?;
    }
    tx.commit().await.context("validate commit failed")?;

    if changed {
        info!(%statement_id, scope = %stmt.scope, number = stmt.number, "statement finalized");
    }
    Ok(changed)
}

/// Finalized → Draft, only for the latest statement of its scope.
pub async fn reopen_statement(pool: &PgPool, statement_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await.context("reopen begin failed")?;
    let scope_key = scope_key_of(&mut tx, statement_id).await?;
    lock_scope(&mut tx, &scope_key).await?;

    let mut stmt = load_statement(&mut tx, statement_id, true).await?;
    let (latest,): (i32,) = sqlx::query_as::<_, (i32,)>(
        "select coalesce(max(number), 0) from progress_statements where scope_key = $1",
    )
    .bind(&scope_key)
    .fetch_one(&mut *tx)
    .await
    .context("reopen latest query failed")?;
    let latest = u32::try_from(latest).context("bad latest statement number")?;

    let changed = finalize::reopen(&mut stmt, latest)?;
    if changed {
        write_state(&mut tx, &stmt).await?;
    }
    tx.commit().await.context("reopen commit failed")?;

    if changed {
        info!(%statement_id, scope = %stmt.scope, number = stmt.number, "statement reopened");
    }
    Ok(changed)
}

/// Delete a draft statement; its items and photos go with it.
pub async fn delete_statement(pool: &PgPool, statement_id: Uuid) -> Result<ProgressStatement> {
    let mut tx = pool.begin().await.context("delete begin failed")?;
    let scope_key = scope_key_of(&mut tx, statement_id).await?;
    lock_scope(&mut tx, &scope_key).await?;

    let stmt = load_statement(&mut tx, statement_id, true).await?;
    finalize::ensure_deletable(&stmt)?;

    sqlx::query("delete from progress_statements where statement_id = $1")
        .bind(statement_id)
        .execute(&mut *tx)
        .await
        .context("delete statement failed")?;
    tx.commit().await.context("delete commit failed")?;

    info!(%statement_id, scope = %stmt.scope, number = stmt.number, "statement deleted");
    Ok(stmt)
}

// ---------------------------------------------------------------------------
// Photos
// ---------------------------------------------------------------------------

pub async fn attach_photo(pool: &PgPool, statement_id: Uuid, photo: NewPhoto) -> Result<Photo> {
    if photo.storage_key.trim().is_empty() {
        return Err(LedgerError::Invalid {
            field: "storage_key",
            reason: "must not be empty".to_string(),
        }
        .into());
    }
    let mut tx = pool.begin().await.context("attach_photo begin failed")?;
    scope_key_of(&mut tx, statement_id).await?;

    let photo = Photo {
        id: Uuid::new_v4(),
        statement_id,
        storage_key: photo.storage_key,
        description: photo.description,
        taken_at: photo.taken_at,
    };
    sqlx::query(
        r#"
        insert into statement_photos (photo_id, statement_id, storage_key, description, taken_at_utc)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(photo.id)
    .bind(photo.statement_id)
    .bind(&photo.storage_key)
    .bind(&photo.description)
    .bind(photo.taken_at)
    .execute(&mut *tx)
    .await
    .context("attach_photo insert failed")?;
    tx.commit().await.context("attach_photo commit failed")?;
    Ok(photo)
}

/// Photos of a statement, oldest first.
pub async fn list_photos(pool: &PgPool, statement_id: Uuid) -> Result<Vec<Photo>> {
    let mut conn = pool.acquire().await.context("list_photos acquire failed")?;
    scope_key_of(&mut conn, statement_id).await?;
    let rows = sqlx::query(
        r#"
        select photo_id, statement_id, storage_key, description, taken_at_utc
        from statement_photos
        where statement_id = $1
        order by taken_at_utc asc, photo_id asc
        "#,
    )
    .bind(statement_id)
    .fetch_all(&mut *conn)
    .await
    .context("list_photos failed")?;
    rows.iter().map(codec::photo_of).collect()
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Statement plus reconciliation totals and VAT figures, read in one
/// transaction.
pub async fn snapshot(pool: &PgPool, statement_id: Uuid) -> Result<StatementSnapshot> {
    let mut tx = pool.begin().await.context("snapshot begin failed")?;
    let stmt = load_statement(&mut tx, statement_id, false).await?;
    let order = load_order(&mut tx, stmt.scope.order_id(), RowLock::None).await?;
    tx.commit().await.context("snapshot commit failed")?;
    Ok(reconcile::snapshot(&stmt, order.vat_rate)?)
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

async fn scope_key_of(conn: &mut PgConnection, statement_id: Uuid) -> Result<String> {
    let row: Option<(String,)> = sqlx::query_as::<_, (String,)>(
        "select scope_key from progress_statements where statement_id = $1",
    )
    .bind(statement_id)
    .fetch_optional(&mut *conn)
    .await
    .context("scope lookup failed")?;
    match row {
        Some((key,)) => Ok(key),
        None => Err(not_found(statement_id).into()),
    }
}

fn not_found(statement_id: Uuid) -> LedgerError {
    LedgerError::NotFound {
        entity: "statement",
        id: statement_id.to_string(),
    }
}

async fn load_statement(
    conn: &mut PgConnection,
    statement_id: Uuid,
    for_update: bool,
) -> Result<ProgressStatement> {
    let sql = format!(
        "select {STATEMENT_COLUMNS} from progress_statements where statement_id = $1{}",
        if for_update { " for update" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(statement_id)
        .fetch_optional(&mut *conn)
        .await
        .context("load_statement failed")?
        .ok_or_else(|| not_found(statement_id))?;
    let mut stmt = codec::statement_of(&row)?;
    load_items(conn, &mut stmt).await?;
    Ok(stmt)
}

async fn load_latest(conn: &mut PgConnection, scope_key: &str) -> Result<Option<ProgressStatement>> {
    let sql = format!(
        "select {STATEMENT_COLUMNS} from progress_statements where scope_key = $1 order by number desc limit 1"
    );
    let row = sqlx::query(&sql)
        .bind(scope_key)
        .fetch_optional(&mut *conn)
        .await
        .context("load_latest failed")?;
    match row {
        Some(row) => {
            let mut stmt = codec::statement_of(&row)?;
            load_items(conn, &mut stmt).await?;
            Ok(Some(stmt))
        }
        None => Ok(None),
    }
}

async fn load_items(conn: &mut PgConnection, stmt: &mut ProgressStatement) -> Result<()> {
    let sql = format!(
        "select {ITEM_COLUMNS} from progress_items where statement_id = $1 order by position asc"
    );
    let rows = sqlx::query(&sql)
        .bind(stmt.id)
        .fetch_all(&mut *conn)
        .await
        .context("load_items failed")?;
    for row in &rows {
        let (_, item) = codec::item_of(row)?;
        push_item(stmt, item);
    }
    Ok(())
}

fn push_item(stmt: &mut ProgressStatement, item: ProgressItem) {
    if item.is_amendment() {
        stmt.amendments.push(item);
    } else {
        stmt.lines.push(item);
    }
}

async fn insert_item(
    conn: &mut PgConnection,
    statement_id: Uuid,
    position: usize,
    item: &ProgressItem,
) -> Result<()> {
    let position = i32::try_from(position).context("item position out of range")?;
    sqlx::query(
        r#"
        insert into progress_items (
          item_id, statement_id, kind, position, order_line_id,
          article, description, line_type, unit,
          unit_price_micros, quantity_milli,
          quantite_precedente_milli, quantite_actuelle_milli, quantite_totale_milli,
          montant_precedent_micros, montant_actuel_micros, montant_total_micros, carried
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
        )
        "#,
    )
    .bind(item.id)
    .bind(statement_id)
    .bind(codec::kind_of(item))
    .bind(position)
    .bind(item.order_line_id())
    .bind(&item.label.article)
    .bind(&item.label.description)
    .bind(&item.label.line_type)
    .bind(&item.label.unit)
    .bind(item.unit_price.raw())
    .bind(item.quantity.raw())
    .bind(item.quantite_precedente.raw())
    .bind(item.quantite_actuelle.raw())
    .bind(item.quantite_totale.raw())
    .bind(item.montant_precedent.raw())
    .bind(item.montant_actuel.raw())
    .bind(item.montant_total.raw())
    .bind(item.carried)
    .execute(&mut *conn)
    .await
    .context("progress item insert failed")?;
    Ok(())
}

async fn write_state(conn: &mut PgConnection, stmt: &ProgressStatement) -> Result<()> {
    sqlx::query(
        r#"
        update progress_statements
        set finalized = $2,
            comments = $3,
            period_label = $4,
            updated_at_utc = now()
        where statement_id = $1
        "#,
    )
    .bind(stmt.id)
    .bind(stmt.finalized)
    .bind(&stmt.comments)
    .bind(&stmt.period_label)
    .execute(&mut *conn)
    .await
    .context("statement state update failed")?;
    Ok(())
}

async fn touch(conn: &mut PgConnection, statement_id: Uuid) -> Result<()> {
    sqlx::query("update progress_statements set updated_at_utc = now() where statement_id = $1")
        .bind(statement_id)
        .execute(&mut *conn)
        .await
        .context("statement touch failed")?;
    Ok(())
}
