use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::{json, Value};

use crate::state::AppState;

/// Reports whether the database answers and how much the assistant has loaded.
/// Responds 503 when the database is unreachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_ok = match state.pool.get() {
        Ok(mut conn) => sql_query("SELECT 1").execute(&mut conn).is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "health check could not get a database connection");
            false
        }
    };

    let assistant = &state.assistant;
    let body = json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "database": if database_ok { "ok" } else { "unavailable" },
        "assistant": {
            "faq_entries": assistant.faq().map(|faq| faq.len()).unwrap_or_default(),
            "documents": assistant.chain().retriever().store().len(),
        },
    });

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
