use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub is_business: bool,
    pub is_staff: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub is_business: bool,
    pub is_staff: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = businesses)]
#[diesel(belongs_to(User, foreign_key = owner_id))]
pub struct Business {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub business_name: String,
    pub description: Option<String>,
    pub instagram_handle: Option<String>,
    pub website: Option<String>,
    pub niche: Option<String>,
    pub integrations: Option<serde_json::Value>,
    pub is_verified: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = businesses)]
pub struct NewBusiness {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub business_name: String,
    pub description: Option<String>,
    pub instagram_handle: Option<String>,
    pub website: Option<String>,
    pub niche: Option<String>,
    pub integrations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = chat_sessions)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Business))]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_sessions)]
pub struct NewChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = chat_messages)]
#[diesel(belongs_to(ChatSession, foreign_key = session_id))]
pub struct ChatMessage {
    pub id: Uuid,
    pub seq: i64,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub role: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub is_bot: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub role: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
    Escalated,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Escalated => "escalated",
        }
    }

    /// Only an open session moves, and only to `closed` or `escalated`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Closed) | (Self::Open, Self::Escalated)
        )
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "escalated" => Ok(Self::Escalated),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Business,
    Agent,
    Admin,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Business => "business",
            Self::Agent => "agent",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "business" => Ok(Self::Business),
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_sessions_close_or_escalate() {
        assert!(SessionStatus::Open.can_transition_to(SessionStatus::Closed));
        assert!(SessionStatus::Open.can_transition_to(SessionStatus::Escalated));
    }

    #[test]
    fn settled_sessions_do_not_move() {
        for from in [SessionStatus::Closed, SessionStatus::Escalated] {
            for to in [
                SessionStatus::Open,
                SessionStatus::Closed,
                SessionStatus::Escalated,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(!SessionStatus::Open.can_transition_to(SessionStatus::Open));
    }

    #[test]
    fn status_and_role_parse_their_own_labels() {
        for status in [
            SessionStatus::Open,
            SessionStatus::Closed,
            SessionStatus::Escalated,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>(), Ok(status));
        }
        assert!("pending".parse::<SessionStatus>().is_err());
        assert_eq!("agent".parse::<MessageRole>(), Ok(MessageRole::Agent));
        assert!("bot".parse::<MessageRole>().is_err());
    }
}
