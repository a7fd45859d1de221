//! In-process scenario tests for eda-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket,
//! backed by the in-memory ledger. Each call drives it via
//! `tower::ServiceExt::oneshot`, so no network I/O or database is needed.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use eda_daemon::{routes, state};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MICROS: i64 = 1_000_000;
const MILLI: i64 = 1_000;

struct Harness {
    router: axum::Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_state(state::AppState::in_memory())
    }

    fn with_state(st: state::AppState) -> Self {
        Self {
            router: routes::build_router(Arc::new(st)),
        }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.expect("oneshot failed");
        let status = resp.status();
        let bytes: Bytes = resp
            .into_body()
            .collect()
            .await
            .expect("body collect failed")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body is not valid JSON")
        };
        (status, json)
    }
}

struct Site {
    chantier: Uuid,
    order: Uuid,
}

impl Site {
    fn new() -> Self {
        Self {
            chantier: Uuid::new_v4(),
            order: Uuid::new_v4(),
        }
    }

    fn scope(&self) -> Value {
        json!({"side": "client", "chantier_id": self.chantier, "order_id": self.order})
    }

    fn scope_query(&self) -> String {
        format!("chantier_id={}&order_id={}", self.chantier, self.order)
    }
}

fn tiling_line() -> Value {
    json!({
        "article": "CARRELAGE",
        "description": "Carrelage sol 60x60",
        "type": "FOURNITURE_POSE",
        "unit": "m2",
        "unit_price": 10 * MICROS,
        "quantity": 100 * MILLI,
    })
}

/// Order with one line (100 m2 at 10.00), locked.
async fn locked_order(h: &Harness, site: &Site) {
    let (status, order) = h
        .call(
            "POST",
            "/v1/orders",
            Some(json!({"scope": site.scope(), "lines": [tiling_line()]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["subtotal"], 1_000 * MICROS);
    assert_eq!(order["vat_rate"], 2_000);

    let (status, _) = h
        .call("POST", &format!("/v1/orders/{}/lock", site.order), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn create_statement(h: &Harness, site: &Site, date: &str) -> (StatusCode, Value) {
    h.call(
        "POST",
        "/v1/statements",
        Some(json!({"scope": site.scope(), "date": date})),
    )
    .await
}

fn id_of(v: &Value) -> String {
    v["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_memory_backend() {
    let h = Harness::new();
    let (status, json) = h.call("GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "eda-daemon");
    assert_eq!(json["backend"], "memory");
}

// ---------------------------------------------------------------------------
// Gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn statement_on_unlocked_order_is_precondition_409() {
    let h = Harness::new();
    let site = Site::new();
    h.call(
        "POST",
        "/v1/orders",
        Some(json!({"scope": site.scope(), "lines": [tiling_line()]})),
    )
    .await;

    let (status, body) = create_statement(&h, &site, "2025-03-31").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "PRECONDITION");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn second_statement_while_draft_is_refused() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;

    let (status, first) = create_statement(&h, &site, "2025-03-31").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["number"], 1);

    let (status, body) = create_statement(&h, &site, "2025-04-30").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "PRECONDITION");

    let (_, listed) = h
        .call("GET", &format!("/v1/scope/statements?{}", site.scope_query()), None)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn locked_order_lines_are_frozen() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;

    let (status, body) = h
        .call(
            "POST",
            &format!("/v1/orders/{}/lines", site.order),
            Some(tiling_line()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "ORDER_LOCKED");

    // lock is idempotent
    let (status, body) = h
        .call("POST", &format!("/v1/orders/{}/lock", site.order), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn empty_first_statement_cannot_validate() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;
    let (_, stmt) = create_statement(&h, &site, "2025-03-31").await;

    let (status, body) = h
        .call(
            "POST",
            &format!("/v1/statements/{}/validate", id_of(&stmt)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "PRECONDITION");
}

// ---------------------------------------------------------------------------
// Carry-forward through HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_statements_carry_forward_and_snapshot_totals() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;

    let (_, s1) = create_statement(&h, &site, "2025-03-31").await;
    let s1_id = id_of(&s1);
    let item1 = id_of(&s1["lines"][0]);

    let (status, item) = h
        .call(
            "PUT",
            &format!("/v1/statements/{s1_id}/items/{item1}/quantity"),
            Some(json!({"quantite_actuelle": 40 * MILLI})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{item}");
    assert_eq!(item["montant_actuel"], 400 * MICROS);

    let (status, body) = h
        .call(
            "POST",
            &format!("/v1/statements/{s1_id}/validate"),
            Some(json!({"comments": "RAS", "period_label": "Mars 2025"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    // validate again: no-op
    let (_, body) = h
        .call("POST", &format!("/v1/statements/{s1_id}/validate"), None)
        .await;
    assert_eq!(body["changed"], false);

    let (status, s2) = create_statement(&h, &site, "2025-04-30").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(s2["number"], 2);
    assert_eq!(s2["lines"][0]["quantite_precedente"], 40 * MILLI);
    assert_eq!(s2["lines"][0]["montant_precedent"], 400 * MICROS);
    let s2_id = id_of(&s2);
    let item2 = id_of(&s2["lines"][0]);

    h.call(
        "PUT",
        &format!("/v1/statements/{s2_id}/items/{item2}/quantity"),
        Some(json!({"quantite_actuelle": 30 * MILLI})),
    )
    .await;

    let (status, snap) = h
        .call("GET", &format!("/v1/statements/{s2_id}/snapshot"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snap["number"], 2);
    assert_eq!(snap["finalized"], false);
    assert_eq!(snap["totals"]["total_general"]["precedent"], 400 * MICROS);
    assert_eq!(snap["totals"]["total_general"]["actuel"], 300 * MICROS);
    assert_eq!(snap["totals"]["total_general"]["total"], 700 * MICROS);

    // statement 1 is frozen and no longer the latest
    let (status, body) = h
        .call(
            "PUT",
            &format!("/v1/statements/{s1_id}/items/{item1}/quantity"),
            Some(json!({"quantite_actuelle": 50 * MILLI})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "IMMUTABLE_STATEMENT");

    let (status, body) = h
        .call("POST", &format!("/v1/statements/{s1_id}/reopen"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "CONFLICT");

    let (status, latest) = h
        .call("GET", &format!("/v1/scope/latest?{}", site.scope_query()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["number"], 2);
}

#[tokio::test]
async fn amendment_shows_in_amendment_and_general_totals() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;
    let (_, s1) = create_statement(&h, &site, "2025-03-31").await;
    let s1_id = id_of(&s1);

    let (status, amendment) = h
        .call(
            "POST",
            &format!("/v1/statements/{s1_id}/amendments"),
            Some(json!({
                "article": "AV-01",
                "description": "Ragréage supplémentaire",
                "type": "AVENANT",
                "unit": "u",
                "unit_price": 50 * MICROS,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{amendment}");
    let am_id = id_of(&amendment);

    h.call(
        "PUT",
        &format!("/v1/statements/{s1_id}/items/{am_id}/quantity"),
        Some(json!({"quantite_actuelle": 2 * MILLI})),
    )
    .await;

    let (_, snap) = h
        .call("GET", &format!("/v1/statements/{s1_id}/snapshot"), None)
        .await;
    assert_eq!(snap["totals"]["total_amendments"]["actuel"], 100 * MICROS);
    assert_eq!(snap["totals"]["total_original"]["actuel"], 0);
    assert_eq!(snap["totals"]["total_general"]["actuel"], 100 * MICROS);
}

// ---------------------------------------------------------------------------
// Validation / not found
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negative_quantity_is_validation_422() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;
    let (_, s1) = create_statement(&h, &site, "2025-03-31").await;

    let (status, body) = h
        .call(
            "PUT",
            &format!(
                "/v1/statements/{}/items/{}/quantity",
                id_of(&s1),
                id_of(&s1["lines"][0])
            ),
            Some(json!({"quantite_actuelle": -5 * MILLI})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "VALIDATION");
}

#[tokio::test]
async fn malformed_validate_body_is_422_and_leaves_draft() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;
    let (_, s1) = create_statement(&h, &site, "2025-03-31").await;
    let sid = id_of(&s1);
    let (status, _) = h
        .call(
            "PUT",
            &format!("/v1/statements/{}/items/{}/quantity", sid, id_of(&s1["lines"][0])),
            Some(json!({"quantite_actuelle": 5 * MILLI})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .call(
            "POST",
            &format!("/v1/statements/{sid}/validate"),
            Some(json!({"comments": 42, "period_label": ["bad"]})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["kind"], "VALIDATION");

    let (_, stmt) = h.call("GET", &format!("/v1/statements/{sid}"), None).await;
    assert_eq!(stmt["finalized"], false);

    let (status, body) = h
        .call(
            "POST",
            &format!("/v1/statements/{sid}/validate"),
            Some(json!({"comments": "RAS"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["changed"], true);
    let (_, stmt) = h.call("GET", &format!("/v1/statements/{sid}"), None).await;
    assert_eq!(stmt["finalized"], true);
    assert_eq!(stmt["comments"], "RAS");
}

#[tokio::test]
async fn unknown_statement_is_404() {
    let h = Harness::new();
    let (status, body) = h
        .call("GET", &format!("/v1/statements/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NOT_FOUND");
}

#[tokio::test]
async fn out_of_range_vat_is_rejected() {
    let h = Harness::new();
    let site = Site::new();
    let (status, body) = h
        .call(
            "POST",
            "/v1/orders",
            Some(json!({"scope": site.scope(), "vat_bps": 25_000})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "VALIDATION");
}

// ---------------------------------------------------------------------------
// Delete and photos
// ---------------------------------------------------------------------------

#[tokio::test]
async fn draft_delete_frees_number_and_photos_follow_statement() {
    let h = Harness::new();
    let site = Site::new();
    locked_order(&h, &site).await;
    let (_, s1) = create_statement(&h, &site, "2025-03-31").await;
    let s1_id = id_of(&s1);

    let (status, photo) = h
        .call(
            "POST",
            &format!("/v1/statements/{s1_id}/photos"),
            Some(json!({
                "storage_key": "chantiers/42/etat-1/sol.jpg",
                "description": "Sol pièce 1",
                "taken_at": "2025-03-30T09:15:00Z",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{photo}");

    let (_, photos) = h
        .call("GET", &format!("/v1/statements/{s1_id}/photos"), None)
        .await;
    assert_eq!(photos.as_array().unwrap().len(), 1);

    let (status, deleted) = h
        .call("DELETE", &format!("/v1/statements/{s1_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["number"], 1);

    let (status, _) = h
        .call("GET", &format!("/v1/statements/{s1_id}/photos"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, again) = create_statement(&h, &site, "2025-03-31").await;
    assert_eq!(again["number"], 1);
}
