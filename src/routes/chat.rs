use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assistant::faq::FaqMatch;
use crate::assistant::vector_store::ScoredDocument;
use crate::assistant::{AssistantReply, ReplySource};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, ChatSession, MessageRole, NewChatMessage, NewChatSession, SessionStatus,
};
use crate::schema::{businesses, chat_messages, chat_sessions};
use crate::state::AppState;

/// How the requester relates to a session. A user chatting with their own
/// business counts as the session user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    SessionUser,
    BusinessOwner,
    Staff,
}

impl Participant {
    pub fn resolve(user: &AuthenticatedUser, session: &ChatSession, owner_id: Uuid) -> Option<Self> {
        if session.user_id == user.user_id {
            Some(Self::SessionUser)
        } else if owner_id == user.user_id {
            Some(Self::BusinessOwner)
        } else if user.is_staff {
            Some(Self::Staff)
        } else {
            None
        }
    }

    pub fn default_role(self) -> MessageRole {
        match self {
            Self::SessionUser => MessageRole::User,
            Self::BusinessOwner => MessageRole::Business,
            Self::Staff => MessageRole::Admin,
        }
    }

    pub fn may_post_as(self, role: MessageRole) -> bool {
        match self {
            Self::SessionUser => role == MessageRole::User,
            Self::BusinessOwner => matches!(role, MessageRole::Business | MessageRole::Agent),
            Self::Staff => true,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub business_id: Uuid,
}

#[derive(Deserialize)]
pub struct UpdateSessionRequest {
    pub status: String,
}

#[derive(Deserialize, Default)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub message: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<ChatSession> for SessionResponse {
    fn from(session: ChatSession) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            business_id: session.business_id,
            status: session.status,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub role: String,
    pub message: String,
    pub payload: Option<Value>,
    pub is_bot: bool,
    pub created_at: NaiveDateTime,
}

impl From<ChatMessage> for MessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            sender_id: message.sender_id,
            role: message.role,
            message: message.message,
            payload: message.payload,
            is_bot: message.is_bot,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: MessageResponse,
    pub reply: MessageResponse,
    pub source: ReplySource,
    pub session_status: String,
}

#[derive(Serialize)]
struct BotPayload<'a> {
    source: ReplySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    faq: Option<&'a FaqMatch>,
    documents: &'a [ScoredDocument],
}

impl<'a> From<&'a AssistantReply> for BotPayload<'a> {
    fn from(reply: &'a AssistantReply) -> Self {
        Self {
            source: reply.source,
            faq: reply.faq.as_ref(),
            documents: &reply.documents,
        }
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListSessionsQuery>,
) -> AppResult<Json<Vec<SessionResponse>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let mut query = chat_sessions::table
        .order((chat_sessions::created_at.desc(), chat_sessions::id.desc()))
        .into_boxed();

    if !user.is_staff {
        let owned_businesses = businesses::table
            .filter(businesses::owner_id.eq(user.user_id))
            .select(businesses::id);
        query = query.filter(
            chat_sessions::user_id
                .eq(user.user_id)
                .or(chat_sessions::business_id.eq_any(owned_businesses)),
        );
    }
    if let Some(status) = status {
        query = query.filter(chat_sessions::status.eq(status.as_str()));
    }

    let sessions: Vec<ChatSession> = query.load(&mut conn)?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

pub async fn create_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<SessionResponse>)> {
    let mut conn = state.db()?;

    let business_exists = businesses::table
        .find(payload.business_id)
        .select(businesses::id)
        .first::<Uuid>(&mut conn)
        .optional()?
        .is_some();
    if !business_exists {
        return Err(AppError::not_found());
    }

    let new_session = NewChatSession {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        business_id: payload.business_id,
        status: SessionStatus::Open.as_str().to_string(),
    };
    diesel::insert_into(chat_sessions::table)
        .values(&new_session)
        .execute(&mut conn)?;

    let session: ChatSession = chat_sessions::table.find(new_session.id).first(&mut conn)?;
    info!(
        session_id = %session.id,
        business_id = %session.business_id,
        user_id = %session.user_id,
        "opened chat session"
    );
    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn get_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<SessionResponse>> {
    let mut conn = state.db()?;
    let (session, _) = load_for_participant(&mut conn, &user, session_id)?;
    Ok(Json(session.into()))
}

pub async fn update_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<UpdateSessionRequest>,
) -> AppResult<Json<SessionResponse>> {
    let next: SessionStatus = payload.status.parse().map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let (session, _) = load_for_participant(&mut conn, &user, session_id)?;
    let current = session_status(&session)?;

    if current == next {
        return Ok(Json(session.into()));
    }
    if !current.can_transition_to(next) {
        return Err(AppError::bad_request(format!(
            "cannot change session status from {current} to {next}"
        )));
    }

    let changed = transition_status(&mut conn, session_id, current, next)?;
    let updated: ChatSession = chat_sessions::table.find(session_id).first(&mut conn)?;
    if !changed {
        // Another request moved the session first.
        if session_status(&updated)? == next {
            return Ok(Json(updated.into()));
        }
        return Err(AppError::conflict(format!(
            "session status changed to {} before this update",
            updated.status
        )));
    }

    info!(session_id = %session_id, from = %current, to = %next, "changed session status");
    Ok(Json(updated.into()))
}

pub async fn delete_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (_, participant) = load_for_participant(&mut conn, &user, session_id)?;
    if participant == Participant::BusinessOwner {
        return Err(AppError::forbidden(
            "only the session user or staff can delete a session",
        ));
    }

    diesel::delete(chat_sessions::table.find(session_id)).execute(&mut conn)?;
    info!(session_id = %session_id, deleted_by = %user.user_id, "deleted chat session");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let mut conn = state.db()?;
    load_for_participant(&mut conn, &user, session_id)?;

    let messages: Vec<ChatMessage> = chat_messages::table
        .filter(chat_messages::session_id.eq(session_id))
        .order(chat_messages::seq.asc())
        .load(&mut conn)?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

pub async fn post_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let text = payload.message.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }

    let mut conn = state.db()?;
    let (_, participant) = load_for_participant(&mut conn, &user, session_id)?;

    let role = match payload.role.as_deref() {
        None => participant.default_role(),
        Some(raw) => {
            let role: MessageRole = raw.parse().map_err(AppError::bad_request)?;
            if !participant.may_post_as(role) {
                return Err(AppError::forbidden(format!("cannot post as {role}")));
            }
            role
        }
    };

    let new_message = NewChatMessage {
        id: Uuid::new_v4(),
        session_id,
        sender_id: user.user_id,
        role: role.as_str().to_string(),
        message: text.to_string(),
        payload: payload.payload.filter(|value| !value.is_null()),
        is_bot: false,
    };
    let message = conn.transaction::<_, AppError, _>(|conn| {
        if lock_session_status(conn, session_id)? == SessionStatus::Closed {
            return Err(AppError::bad_request("session is closed"));
        }
        insert_message(conn, new_message)
    })?;

    Ok((StatusCode::CREATED, Json(message.into())))
}

/// Lets the assistant answer a question and stores the question and the reply
/// in the same session. An escalation reply hands the session over to a human.
/// Nothing is stored when the session stopped being open while the assistant
/// was answering.
pub async fn ask_in_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<AskRequest>,
) -> AppResult<Json<AskResponse>> {
    let question_text = payload.question.trim().to_string();
    if question_text.is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }

    let owner_id = {
        let mut conn = state.db()?;
        let (session, participant) = load_for_participant(&mut conn, &user, session_id)?;
        if participant == Participant::BusinessOwner {
            return Err(AppError::forbidden(
                "only the session user can ask the assistant",
            ));
        }
        if session_status(&session)? != SessionStatus::Open {
            return Err(AppError::bad_request(
                "the assistant only answers in open sessions",
            ));
        }
        business_owner(&mut conn, session.business_id)?
    };

    let reply = state.assistant.answer(&question_text).await;
    if reply.source == ReplySource::Fallback {
        warn!(session_id = %session_id, "assistant fell back to the apology reply");
    }
    let bot_payload = serde_json::to_value(BotPayload::from(&reply))?;

    let mut conn = state.db()?;
    let escalate = reply.is_escalation();
    let (question, answer, status) = conn.transaction::<_, AppError, _>(|conn| {
        if lock_session_status(conn, session_id)? != SessionStatus::Open {
            return Err(AppError::conflict(
                "the session was closed or escalated while the assistant was answering",
            ));
        }

        let question = insert_message(
            conn,
            NewChatMessage {
                id: Uuid::new_v4(),
                session_id,
                sender_id: user.user_id,
                role: MessageRole::User.as_str().to_string(),
                message: question_text.clone(),
                payload: None,
                is_bot: false,
            },
        )?;
        let answer = insert_message(
            conn,
            NewChatMessage {
                id: Uuid::new_v4(),
                session_id,
                sender_id: owner_id,
                role: MessageRole::Agent.as_str().to_string(),
                message: reply.answer.clone(),
                payload: Some(bot_payload),
                is_bot: true,
            },
        )?;

        let status = if escalate {
            transition_status(conn, session_id, SessionStatus::Open, SessionStatus::Escalated)?;
            SessionStatus::Escalated
        } else {
            SessionStatus::Open
        };
        Ok((question, answer, status))
    })?;

    info!(
        session_id = %session_id,
        source = reply.source.as_str(),
        documents = reply.documents.len(),
        session_status = %status,
        "assistant replied in session"
    );

    Ok(Json(AskResponse {
        question: question.into(),
        reply: answer.into(),
        source: reply.source,
        session_status: status.as_str().to_string(),
    }))
}

/// Loads a session the requester takes part in. Sessions they cannot see are
/// reported as missing.
fn load_for_participant(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    session_id: Uuid,
) -> AppResult<(ChatSession, Participant)> {
    let (session, owner_id): (ChatSession, Uuid) = chat_sessions::table
        .inner_join(businesses::table)
        .filter(chat_sessions::id.eq(session_id))
        .select((chat_sessions::all_columns, businesses::owner_id))
        .first(conn)?;

    let participant =
        Participant::resolve(user, &session, owner_id).ok_or_else(AppError::not_found)?;
    Ok((session, participant))
}

fn business_owner(conn: &mut PgConnection, business_id: Uuid) -> AppResult<Uuid> {
    Ok(businesses::table
        .find(business_id)
        .select(businesses::owner_id)
        .first(conn)?)
}

fn session_status(session: &ChatSession) -> AppResult<SessionStatus> {
    session.status.parse().map_err(AppError::internal)
}

/// Locks the session row until the surrounding transaction ends.
fn lock_session_status(conn: &mut PgConnection, session_id: Uuid) -> AppResult<SessionStatus> {
    let status: String = chat_sessions::table
        .find(session_id)
        .select(chat_sessions::status)
        .for_update()
        .first(conn)?;
    status.parse().map_err(AppError::internal)
}

/// Moves the session to `to` only while it is still `from`. Returns whether
/// a row changed.
fn transition_status(
    conn: &mut PgConnection,
    session_id: Uuid,
    from: SessionStatus,
    to: SessionStatus,
) -> AppResult<bool> {
    let updated = diesel::update(
        chat_sessions::table
            .find(session_id)
            .filter(chat_sessions::status.eq(from.as_str())),
    )
    .set(chat_sessions::status.eq(to.as_str()))
    .execute(conn)?;
    Ok(updated == 1)
}

fn insert_message(conn: &mut PgConnection, message: NewChatMessage) -> AppResult<ChatMessage> {
    Ok(diesel::insert_into(chat_messages::table)
        .values(&message)
        .get_result(conn)?)
}
