//! HTTP surface
//!
//! - `POST /events`: one push delivery per staged object
//! - `GET /tables/:table_id/state`: a table's coordination record
//! - `GET /health`: liveness, plus database connectivity when configured

pub mod events;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::AppError;
use crate::ingest::{ChunkIngestor, TableIngestState};
use crate::middleware;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<ChunkIngestor>,
    /// Pool checked by `/health`; `None` for in-memory stores
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(ingestor: ChunkIngestor) -> Self {
        Self {
            ingestor: Arc::new(ingestor),
            db: None,
        }
    }

    pub fn with_db(mut self, db: PgPool) -> Self {
        self.db = Some(db);
        self
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(events::receive_event))
        .route("/tables/:table_id/state", get(table_state))
        .with_state(state)
        .layer(middleware::tracing_layer())
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let Some(db) = &state.db else {
        return Ok(Json(json!({ "status": "healthy" })).into_response());
    };

    match crate::db::health_check(db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

async fn table_state(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> Result<Json<TableIngestState>, AppError> {
    state
        .ingestor
        .coordinator()
        .state(&table_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no ingest state for table {table_id}")))
}
