use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use crate::assistant::AssistantReply;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

/// Answers a question without recording it in any chat session.
pub async fn ask(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AskRequest>,
) -> AppResult<Json<AssistantReply>> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }

    let reply = state.assistant.answer(question).await;
    info!(
        user_id = %user.user_id,
        source = reply.source.as_str(),
        documents = reply.documents.len(),
        "assistant answered question"
    );
    Ok(Json(reply))
}
