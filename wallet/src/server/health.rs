//! Health checks.
//!
//! `/ping` reports both sides of the CQRS split: the command side (event
//! store database) and the query side (projection database).

use crate::server::state::AppState;
use async_trait::async_trait;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;

/// A dependency that can report whether it is reachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the dependency answers.
    async fn healthy(&self) -> bool;
}

/// Probe backed by a `SELECT 1` on a Postgres pool.
pub struct PgPoolProbe {
    pool: PgPool,
}

impl PgPoolProbe {
    /// Create a probe over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for PgPoolProbe {
    async fn healthy(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

/// Probe with a fixed answer (tests, stubbed dependencies).
pub struct StaticProbe(pub bool);

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn healthy(&self) -> bool {
        self.0
    }
}

/// `/ping` response body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    /// Command side (event store) status.
    pub command_service: String,
    /// Query side (projection store) status.
    pub query_service: String,
}

fn status(healthy: bool) -> String {
    if healthy { "ok" } else { "unavailable" }.to_string()
}

/// GET `/ping`.
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    let (command, query) = tokio::join!(
        state.command_probe.healthy(),
        state.query_probe.healthy()
    );

    Json(PingResponse {
        command_service: status(command),
        query_service: status(query),
    })
}
