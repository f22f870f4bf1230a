use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::engine::Route;
use crate::agent::intent::IntentJudgment;
use crate::memory::ConversationTurn;
use crate::models::ChatMessage;
use crate::responses::AgentResponse;
use crate::settings::SessionSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), role, content: content.into(), created_at: Utc::now() }
    }

    pub fn to_chat(&self) -> ChatMessage {
        match self.role {
            Role::User => ChatMessage::user(self.content.clone()),
            Role::Assistant => ChatMessage::assistant(self.content.clone()),
        }
    }
}

/// Everything one session carries between and during turns.
///
/// A run owns its `SessionState` by value; the caller only gets the updated
/// copy back once the turn reaches [`Route::End`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub user_input: String,
    pub intent: Option<IntentJudgment>,
    pub next_step: Route,
    pub conversation_history: Vec<ConversationTurn>,
    pub conversation_summary: String,
    /// How many of the oldest turns `conversation_summary` already covers.
    pub summarized_turns: usize,
    pub active_documents: BTreeSet<String>,
    pub current_response: Option<AgentResponse>,
    pub tools_used: Vec<String>,
    pub turn_id: Option<Uuid>,
    pub settings: SessionSettings,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(user_id: impl Into<String>, settings: SessionSettings) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            messages: Vec::new(),
            user_input: String::new(),
            intent: None,
            next_step: Route::Classify,
            conversation_history: Vec::new(),
            conversation_summary: String::new(),
            summarized_turns: 0,
            active_documents: BTreeSet::new(),
            current_response: None,
            tools_used: Vec::new(),
            turn_id: None,
            settings,
            created_at: Utc::now(),
        }
    }

    /// Clears per-turn fields and stamps a fresh turn id.
    pub fn begin_turn(&mut self, input: impl Into<String>) -> Uuid {
        let turn_id = Uuid::new_v4();
        self.user_input = input.into();
        self.intent = None;
        self.current_response = None;
        self.tools_used.clear();
        self.next_step = Route::Classify;
        self.turn_id = Some(turn_id);
        turn_id
    }

    pub fn clear_active_documents(&mut self) {
        self.active_documents.clear();
    }

    /// Last `n` entries of the message log, oldest first.
    pub fn recent_messages(&self, n: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..].iter().map(Message::to_chat).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            messages: self.messages.clone(),
            conversation_history: self.conversation_history.clone(),
            conversation_summary: self.conversation_summary.clone(),
            summarized_turns: self.summarized_turns,
            active_documents: self.active_documents.clone(),
            settings: self.settings.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds a resumable state; per-turn fields start empty.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let summarized_turns = snapshot.summarized_turns.min(snapshot.conversation_history.len());
        Self {
            session_id: snapshot.session_id,
            user_id: snapshot.user_id,
            messages: snapshot.messages,
            conversation_history: snapshot.conversation_history,
            conversation_summary: snapshot.conversation_summary,
            summarized_turns,
            active_documents: snapshot.active_documents,
            settings: snapshot.settings,
            created_at: snapshot.created_at,
            ..Self::new(String::new(), SessionSettings::default())
        }
    }
}

/// The durable part of a session, as handed to persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub conversation_history: Vec<ConversationTurn>,
    pub conversation_summary: String,
    #[serde(default)]
    pub summarized_turns: usize,
    pub active_documents: BTreeSet<String>,
    pub settings: SessionSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_turn_resets_turn_fields_only() {
        let mut state = SessionState::new("demo_user", SessionSettings::default());
        state.messages.push(Message::user("hi"));
        state.active_documents.insert("INV-001".into());
        state.tools_used.push("calculator".into());
        state.next_step = Route::End;

        let first = state.begin_turn("next question");
        assert_eq!(state.user_input, "next question");
        assert!(state.tools_used.is_empty());
        assert_eq!(state.next_step, Route::Classify);
        assert_eq!(state.messages.len(), 1);
        assert!(state.active_documents.contains("INV-001"));

        let second = state.begin_turn("again");
        assert_ne!(first, second);
    }

    #[test]
    fn snapshot_roundtrip_keeps_durable_fields() {
        let mut state = SessionState::new("u1", SessionSettings::default());
        state.messages.push(Message::user("hello"));
        state.messages.push(Message::assistant("hi there"));
        state.active_documents.insert("CON-001".into());
        state.conversation_summary = "greeted".into();
        state.begin_turn("in flight");

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        let restored = SessionState::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.session_id, state.session_id);
        assert_eq!(restored.user_id, "u1");
        assert_eq!(restored.messages, state.messages);
        assert_eq!(restored.active_documents, state.active_documents);
        assert_eq!(restored.conversation_summary, "greeted");
        assert!(restored.turn_id.is_none());
        assert!(restored.user_input.is_empty());
    }

    #[test]
    fn summary_coverage_survives_snapshot_and_is_clamped() {
        let mut state = SessionState::new("u1", SessionSettings::default());
        state.conversation_history.push(ConversationTurn::for_test("a", "b"));
        state.conversation_history.push(ConversationTurn::for_test("c", "d"));
        state.summarized_turns = 1;
        assert_eq!(SessionState::from_snapshot(state.snapshot()).summarized_turns, 1);

        let mut snapshot = state.snapshot();
        snapshot.summarized_turns = 9;
        assert_eq!(SessionState::from_snapshot(snapshot).summarized_turns, 2);

        // snapshots written before coverage was tracked
        let mut json = serde_json::to_value(state.snapshot()).unwrap();
        json.as_object_mut().unwrap().remove("summarized_turns");
        let old: SessionSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(old.summarized_turns, 0);
    }

    #[test]
    fn recent_messages_takes_tail() {
        let mut state = SessionState::new("u", SessionSettings::default());
        for i in 0..6 {
            state.messages.push(Message::user(format!("m{}", i)));
        }
        let recent = state.recent_messages(4);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(state.recent_messages(10).len(), 6);
    }
}
