//! HTTP surface of the test authoring service.
//!
//! Every `/api` route resolves the caller from a trusted identity header before touching
//! storage. Bodies are taken as raw bytes and parsed by [crate::payload] so that shape errors
//! come back as 400s carrying the JSON path of the problem.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::{request::Parts, HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::{future::Future, net::SocketAddr};
use tower_http::trace::TraceLayer;

use crate::{
    config::ServiceConfig,
    db::DbConnection,
    error::SyncError,
    payload::{NewTest, Snapshot, TestDetailsUpdate},
    properties::{NodeId, UserId},
};

#[derive(Clone)]
pub struct AppState {
    pub db: DbConnection,
    pub identity_header: HeaderName,
}

impl AppState {
    pub fn new(db: DbConnection, config: &ServiceConfig) -> Result<AppState, SyncError> {
        let identity_header = HeaderName::from_bytes(config.identity_header.as_bytes())
            .map_err(|e| SyncError::Config(format!("identity_header: {e}")))?;
        Ok(AppState {
            db,
            identity_header,
        })
    }
}

/// The authenticated author making the request.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = SyncError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&state.identity_header)
            .and_then(|value| value.to_str().ok())
            .ok_or(SyncError::Authentication)?;
        Ok(Caller(UserId::new(raw)?))
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[server] {self}");
        } else {
            tracing::warn!("[server] rejected request: {self}");
        }
        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}

/// A path id that is not a UUID can never name a stored Test.
fn test_id(raw: &str) -> Result<NodeId, SyncError> {
    NodeId::try_from(raw).map_err(|_| SyncError::Ownership(raw.to_string()))
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tests", get(list_tests))
        .route("/api/test", post(create_test))
        .route("/api/test/:id", get(get_test).put(update_test))
        .route("/api/test/:id/sections", put(sync_sections))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_tests(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> Result<Json<serde_json::Value>, SyncError> {
    let tests = state.db.list_tests(&actor).await?;
    Ok(Json(json!({ "tests": tests })))
}

async fn create_test(
    State(state): State<AppState>,
    Caller(actor): Caller,
    body: Bytes,
) -> Result<Response, SyncError> {
    let new_test = NewTest::from_json(&body)?;
    let tree = state.db.create_test(&actor, &new_test).await?;
    Ok((
        http::StatusCode::CREATED,
        Json(json!({ "message": "Test created successfully", "test": tree })),
    )
        .into_response())
}

async fn get_test(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, SyncError> {
    let tree = state.db.get_test_tree(&actor, test_id(&id)?).await?;
    Ok(Json(json!({ "test": tree })))
}

async fn update_test(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, SyncError> {
    let update = TestDetailsUpdate::from_json(&body)?;
    let tree = state.db.update_test(&actor, test_id(&id)?, &update).await?;
    Ok(Json(
        json!({ "message": "Test updated successfully", "test": tree }),
    ))
}

async fn sync_sections(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, SyncError> {
    let snapshot = Snapshot::from_json(&body)?;
    let outcome = state
        .db
        .sync_sections(&actor, test_id(&id)?, &snapshot)
        .await?;
    Ok(Json(json!({
        "message": "Sections synced successfully",
        "test": outcome.tree,
        "summary": outcome.summary,
    })))
}

/// The API server bound to one database.
pub struct ApiServer {
    config: ServiceConfig,
    db: DbConnection,
}

impl ApiServer {
    pub fn new(config: ServiceConfig, db: DbConnection) -> Self {
        Self { config, db }
    }

    /// Serve until `shutdown_signal` resolves.
    pub async fn serve(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), SyncError> {
        let addr: SocketAddr = self.config.socket_addr();
        let state = AppState::new(self.db.clone(), &self.config)?;
        let app = router(state, self.config.max_body_bytes);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("API server listening on http://{}", addr);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("API server stopped, closing database pool");
        self.db.0.close().await;
        Ok(())
    }
}
