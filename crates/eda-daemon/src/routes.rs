//! Axum router and all HTTP handlers for eda-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  Handlers translate JSON to backend calls, record the
//! committed command, and map ledger errors to stable HTTP statuses.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use eda_audit::LedgerEvent;
use eda_ledger::{ErrorKind, LedgerError, NewAmendment, NewOrderLine, NewPhoto, VatRate};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        ChangedResponse, CreateOrderRequest, CreateStatementRequest, ErrorResponse,
        HealthResponse, ScopeQuery, SetQuantityRequest, ValidateRequest,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/:order_id", get(get_order))
        .route("/v1/orders/:order_id/lines", post(add_order_line))
        .route(
            "/v1/orders/:order_id/lines/:line_id",
            put(update_order_line).delete(remove_order_line),
        )
        .route("/v1/orders/:order_id/recompute", post(recompute_totals))
        .route("/v1/orders/:order_id/lock", post(lock_order))
        .route("/v1/orders/:order_id/unlock", post(unlock_order))
        .route("/v1/scope/statements", get(list_statements))
        .route("/v1/scope/latest", get(latest_statement))
        .route("/v1/statements", post(create_statement))
        .route(
            "/v1/statements/:statement_id",
            get(get_statement).delete(delete_statement),
        )
        .route("/v1/statements/:statement_id/snapshot", get(get_snapshot))
        .route(
            "/v1/statements/:statement_id/items/:item_id/quantity",
            put(set_current_quantity),
        )
        .route("/v1/statements/:statement_id/amendments", post(add_amendment))
        .route(
            "/v1/statements/:statement_id/amendments/:item_id",
            delete(remove_amendment),
        )
        .route("/v1/statements/:statement_id/validate", post(validate_statement))
        .route("/v1/statements/:statement_id/reopen", post(reopen_statement))
        .route(
            "/v1/statements/:statement_id/photos",
            get(list_photos).post(attach_photo),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Any handler failure. Ledger rule violations keep their kind; everything
/// else is an INTERNAL 500.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(e)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e.into())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// HTTP status for a ledger rule violation.
pub fn status_for(err: &LedgerError) -> StatusCode {
    match err.kind() {
        // Incomplete content rather than wrong state.
        ErrorKind::Precondition if matches!(err, LedgerError::EmptyFirstStatement { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::Precondition
        | ErrorKind::Conflict
        | ErrorKind::ImmutableStatement
        | ErrorKind::OrderLocked => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = format!("{:#}", self.0);
        let (status, kind, retryable) = match eda_db::ledger_error(&self.0) {
            Some(le) => {
                warn!(kind = le.kind().as_str(), error = %le, "command refused");
                (status_for(le), le.kind().as_str(), le.is_retryable())
            }
            None => {
                error!(error = %message, "command failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", false)
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                kind: kind.to_string(),
                retryable,
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            backend: st.backend.name().to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<Response> {
    let vat_rate = match req.vat_bps {
        Some(bps) if !(0..=10_000).contains(&bps) => {
            return Err(LedgerError::Invalid {
                field: "vat_bps",
                reason: format!("{bps} outside 0..=10000"),
            }
            .into())
        }
        Some(bps) => VatRate::from_bps(bps),
        None => st.default_vat,
    };
    let order = st.backend.create_order(req.scope, vat_rate, req.lines).await?;
    st.committed(
        &order.scope.key(),
        LedgerEvent::OrderCreated,
        json!({"order_id": order.id, "vat_bps": order.vat_rate.bps(), "lines": order.lines.len()}),
    )
    .await;
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

pub(crate) async fn get_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    let order = st.backend.fetch_order(order_id).await?;
    Ok(Json(order).into_response())
}

pub(crate) async fn add_order_line(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(line): Json<NewOrderLine>,
) -> ApiResult<Response> {
    let added = st.backend.add_order_line(order_id, line).await?;
    let scope = order_scope(&st, order_id).await;
    st.committed(
        &scope,
        LedgerEvent::OrderLineAdded,
        json!({"order_id": order_id, "line_id": added.id, "line_total": added.line_total.to_string()}),
    )
    .await;
    Ok((StatusCode::CREATED, Json(added)).into_response())
}

pub(crate) async fn update_order_line(
    State(st): State<Arc<AppState>>,
    Path((order_id, line_id)): Path<(Uuid, Uuid)>,
    Json(line): Json<NewOrderLine>,
) -> ApiResult<Response> {
    let updated = st.backend.update_order_line(order_id, line_id, line).await?;
    let scope = order_scope(&st, order_id).await;
    st.committed(
        &scope,
        LedgerEvent::OrderLineUpdated,
        json!({"order_id": order_id, "line_id": line_id, "line_total": updated.line_total.to_string()}),
    )
    .await;
    Ok(Json(updated).into_response())
}

pub(crate) async fn remove_order_line(
    State(st): State<Arc<AppState>>,
    Path((order_id, line_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Response> {
    let removed = st.backend.remove_order_line(order_id, line_id).await?;
    let scope = order_scope(&st, order_id).await;
    st.committed(
        &scope,
        LedgerEvent::OrderLineRemoved,
        json!({"order_id": order_id, "line_id": line_id}),
    )
    .await;
    Ok(Json(removed).into_response())
}

pub(crate) async fn recompute_totals(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    let order = st.backend.recompute_totals(order_id).await?;
    Ok(Json(order).into_response())
}

pub(crate) async fn lock_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    let changed = st.backend.lock_order(order_id).await?;
    if changed {
        let scope = order_scope(&st, order_id).await;
        st.committed(&scope, LedgerEvent::OrderLocked, json!({"order_id": order_id}))
            .await;
    }
    Ok(Json(ChangedResponse {
        id: order_id,
        changed,
    })
    .into_response())
}

pub(crate) async fn unlock_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    let changed = st.backend.unlock_order(order_id).await?;
    if changed {
        let scope = order_scope(&st, order_id).await;
        st.committed(&scope, LedgerEvent::OrderUnlocked, json!({"order_id": order_id}))
            .await;
    }
    Ok(Json(ChangedResponse {
        id: order_id,
        changed,
    })
    .into_response())
}

/// Scope key for audit records; the order id if the order cannot be read back.
async fn order_scope(st: &AppState, order_id: Uuid) -> String {
    match st.backend.fetch_order(order_id).await {
        Ok(order) => order.scope.key(),
        Err(_) => order_id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

pub(crate) async fn list_statements(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ScopeQuery>,
) -> ApiResult<Response> {
    let all = st.backend.list_statements(q.scope()).await?;
    Ok(Json(all).into_response())
}

/// 200 with the latest statement, or 200 with `null` for an empty scope.
pub(crate) async fn latest_statement(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ScopeQuery>,
) -> ApiResult<Response> {
    let latest = st.backend.latest_statement(q.scope()).await?;
    Ok(Json(latest).into_response())
}

pub(crate) async fn create_statement(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateStatementRequest>,
) -> ApiResult<Response> {
    let stmt = st
        .backend
        .create_statement(req.scope, req.new_statement())
        .await?;
    info!(scope = %stmt.scope, number = stmt.number, "statement/create");
    st.committed(
        &stmt.scope.key(),
        LedgerEvent::StatementCreated,
        json!({"statement_id": stmt.id, "number": stmt.number, "date": stmt.date}),
    )
    .await;
    Ok((StatusCode::CREATED, Json(stmt)).into_response())
}

pub(crate) async fn get_statement(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
) -> ApiResult<Response> {
    let stmt = st.backend.fetch_statement(statement_id).await?;
    Ok(Json(stmt).into_response())
}

pub(crate) async fn get_snapshot(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
) -> ApiResult<Response> {
    let snap = st.backend.snapshot(statement_id).await?;
    Ok(Json(snap).into_response())
}

pub(crate) async fn set_current_quantity(
    State(st): State<Arc<AppState>>,
    Path((statement_id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetQuantityRequest>,
) -> ApiResult<Response> {
    let item = st
        .backend
        .set_current_quantity(statement_id, item_id, req.quantite_actuelle)
        .await?;
    let scope = statement_scope(&st, statement_id).await;
    st.committed(
        &scope,
        LedgerEvent::QuantitySet,
        json!({
            "statement_id": statement_id,
            "item_id": item_id,
            "quantite_actuelle": item.quantite_actuelle.to_string(),
        }),
    )
    .await;
    Ok(Json(item).into_response())
}

pub(crate) async fn add_amendment(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
    Json(input): Json<NewAmendment>,
) -> ApiResult<Response> {
    let item = st.backend.add_amendment(statement_id, input).await?;
    let scope = statement_scope(&st, statement_id).await;
    st.committed(
        &scope,
        LedgerEvent::AmendmentAdded,
        json!({"statement_id": statement_id, "item_id": item.id}),
    )
    .await;
    Ok((StatusCode::CREATED, Json(item)).into_response())
}

pub(crate) async fn remove_amendment(
    State(st): State<Arc<AppState>>,
    Path((statement_id, item_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Response> {
    let removed = st.backend.remove_amendment(statement_id, item_id).await?;
    let scope = statement_scope(&st, statement_id).await;
    st.committed(
        &scope,
        LedgerEvent::AmendmentRemoved,
        json!({"statement_id": statement_id, "item_id": item_id}),
    )
    .await;
    Ok(Json(removed).into_response())
}

/// Body is optional: no body validates without comments. A body that is
/// present must parse as a `ValidateRequest`.
pub(crate) async fn validate_statement(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Response> {
    let req = parse_optional_body::<ValidateRequest>(&body)?;
    let changed = st
        .backend
        .validate_statement(statement_id, req.comments, req.period_label)
        .await?;
    if changed {
        let scope = statement_scope(&st, statement_id).await;
        st.committed(
            &scope,
            LedgerEvent::StatementValidated,
            json!({"statement_id": statement_id}),
        )
        .await;
    }
    Ok(Json(ChangedResponse {
        id: statement_id,
        changed,
    })
    .into_response())
}

fn parse_optional_body<T>(body: &[u8]) -> ApiResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::from(LedgerError::Invalid {
            field: "body",
            reason: e.to_string(),
        })
    })
}

pub(crate) async fn reopen_statement(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
) -> ApiResult<Response> {
    let changed = st.backend.reopen_statement(statement_id).await?;
    if changed {
        let scope = statement_scope(&st, statement_id).await;
        st.committed(
            &scope,
            LedgerEvent::StatementReopened,
            json!({"statement_id": statement_id}),
        )
        .await;
    }
    Ok(Json(ChangedResponse {
        id: statement_id,
        changed,
    })
    .into_response())
}

pub(crate) async fn delete_statement(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
) -> ApiResult<Response> {
    let deleted = st.backend.delete_statement(statement_id).await?;
    st.committed(
        &deleted.scope.key(),
        LedgerEvent::StatementDeleted,
        json!({"statement_id": deleted.id, "number": deleted.number}),
    )
    .await;
    Ok(Json(deleted).into_response())
}

pub(crate) async fn attach_photo(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
    Json(photo): Json<NewPhoto>,
) -> ApiResult<Response> {
    let photo = st.backend.attach_photo(statement_id, photo).await?;
    let scope = statement_scope(&st, statement_id).await;
    st.committed(
        &scope,
        LedgerEvent::PhotoAttached,
        json!({"statement_id": statement_id, "photo_id": photo.id}),
    )
    .await;
    Ok((StatusCode::CREATED, Json(photo)).into_response())
}

pub(crate) async fn list_photos(
    State(st): State<Arc<AppState>>,
    Path(statement_id): Path<Uuid>,
) -> ApiResult<Response> {
    let photos = st.backend.list_photos(statement_id).await?;
    Ok(Json(photos).into_response())
}

async fn statement_scope(st: &AppState, statement_id: Uuid) -> String {
    match st.backend.fetch_statement(statement_id).await {
        Ok(stmt) => stmt.scope.key(),
        Err(_) => statement_id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Ledger(_) => "ledger",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
