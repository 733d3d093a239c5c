//! Conversation messages and the per-turn state manager.
//!
//! [`FromStr`] parses a role strictly and fails with
//! [`CoreError::InvalidRole`]. Persisted history is read through
//! [`Role::lenient`] (the `Deserialize` impl), where anything unknown
//! becomes [`Role::User`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }

    /// Parse a persisted role, defaulting to [`Role::User`].
    pub fn lenient(s: &str) -> Role {
        s.parse().unwrap_or(Role::User)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            "system" => Ok(Role::System),
            _ => Err(CoreError::InvalidRole(s.to_string())),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::lenient(&raw))
    }
}

/// One message of a conversation.
///
/// `id` is `None` when a client sent an empty identity; such messages are
/// dropped at the start of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(
        serialize_with = "serialize_id",
        deserialize_with = "deserialize_id",
        default
    )]
    pub id: Option<Uuid>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

fn serialize_id<S: Serializer>(
    id: &Option<Uuid>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match id {
        Some(id) => serializer.serialize_str(&id.to_string()),
        None => serializer.serialize_str(""),
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Uuid>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl ConversationMessage {
    /// A new message with a fresh id and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Render messages as `role: content` lines for summarizing prompts.
/// Tool messages are omitted.
pub fn transcript(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::Tool)
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ordered message state for a single chat turn.
///
/// Incoming messages are kept as-is (minus those without identity); every
/// message appended during the turn gets a fresh id and timestamp.
#[derive(Debug, Clone)]
pub struct Turn {
    messages: Vec<ConversationMessage>,
    incoming: usize,
    utterance: String,
}

impl Turn {
    /// Start a turn. The latest `user` message becomes the utterance.
    pub fn begin(incoming: Vec<ConversationMessage>) -> Result<Self> {
        let messages: Vec<ConversationMessage> =
            incoming.into_iter().filter(|m| m.id.is_some()).collect();
        let utterance = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim().to_string())
            .ok_or_else(|| CoreError::invalid_argument("no user message in conversation"))?;
        if utterance.is_empty() {
            return Err(CoreError::invalid_argument("user message is blank"));
        }
        Ok(Self {
            incoming: messages.len(),
            messages,
            utterance,
        })
    }

    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    pub fn push_tool(&mut self, content: impl Into<String>) {
        self.messages
            .push(ConversationMessage::new(Role::Tool, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages
            .push(ConversationMessage::new(Role::Assistant, content));
    }

    /// Messages appended during this turn.
    pub fn appended(&self) -> &[ConversationMessage] {
        &self.messages[self.incoming..]
    }

    pub fn into_messages(self) -> Vec<ConversationMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_and_lenient_roles() {
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        let err = "moderator".parse::<Role>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidRole(r) if r == "moderator"));
        assert_eq!(Role::lenient("moderator"), Role::User);
        assert_eq!(Role::lenient("SYSTEM"), Role::System);
    }

    #[test]
    fn test_persisted_unknown_role_reads_as_user() {
        let json = r#"{"id":"","role":"bot","content":"hi","timestamp":"2024-05-01T10:00:00Z"}"#;
        let msg: ConversationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.id, None);

        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["role"], "user");
        assert_eq!(out["id"], "");
    }

    #[test]
    fn test_begin_filters_empty_ids_and_picks_latest_user() {
        let mut anonymous = ConversationMessage::user("ignored");
        anonymous.id = None;
        let messages = vec![
            ConversationMessage::user("first"),
            ConversationMessage::new(Role::Assistant, "answer"),
            ConversationMessage::user("  second  "),
            anonymous,
        ];
        let mut turn = Turn::begin(messages).unwrap();
        assert_eq!(turn.utterance(), "second");

        turn.push_tool("{}");
        turn.push_assistant("done");
        assert_eq!(turn.appended().len(), 2);
        assert!(turn.appended().iter().all(|m| m.id.is_some()));

        let all = turn.into_messages();
        assert_eq!(all.len(), 5);
        assert_eq!(all[3].role, Role::Tool);
        assert_eq!(all[4].role, Role::Assistant);
    }

    #[test]
    fn test_begin_requires_user_message() {
        assert!(Turn::begin(Vec::new()).is_err());
        let only_system = vec![ConversationMessage::new(Role::System, "setup")];
        assert!(Turn::begin(only_system).is_err());
        let blank = vec![ConversationMessage::user("   ")];
        assert!(matches!(
            Turn::begin(blank).unwrap_err(),
            CoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_transcript_skips_tool_messages() {
        let messages = vec![
            ConversationMessage::user("avg nps?"),
            ConversationMessage::new(Role::Tool, "{\"tool\":\"embed\"}"),
            ConversationMessage::new(Role::Assistant, "8.5"),
        ];
        assert_eq!(transcript(&messages), "user: avg nps?\nassistant: 8.5");
    }
}
