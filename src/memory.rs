//! Conversation memory: the per-turn commit and the rolling summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::engine::Route;
use crate::agent::intent::IntentType;
use crate::models::{LanguageModel, ModelRequest};
use crate::prompts;
use crate::responses::{AgentResponse, StructuredResponse};
use crate::session::{Message, SessionState};
use crate::settings::EffectiveSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub intent_type: IntentType,
    pub user_input: String,
    pub response_text: String,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    pub tools_used: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
impl ConversationTurn {
    pub(crate) fn for_test(user_input: &str, response_text: &str) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            intent_type: IntentType::Qa,
            user_input: user_input.into(),
            response_text: response_text.into(),
            sources: Vec::new(),
            result: None,
            tools_used: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("turn {0} is already recorded")]
    TurnAlreadyRecorded(Uuid),
    #[error("no turn is in progress")]
    NoTurnInProgress,
}

/// Commits the finished turn into `state`.
///
/// All checks run before the first write, so on `Err` the state is exactly
/// as it was.
pub fn update_memory(state: &mut SessionState, response: &AgentResponse) -> Result<(), MemoryError> {
    let turn_id = state.turn_id.ok_or(MemoryError::NoTurnInProgress)?;
    if state.conversation_history.iter().any(|t| t.turn_id == turn_id) {
        return Err(MemoryError::TurnAlreadyRecorded(turn_id));
    }

    let rendered = response.render();
    let cited = response.cited_documents();
    let intent_type = state
        .intent
        .as_ref()
        .map(|j| j.intent_type)
        .unwrap_or_else(|| response.intent_type());

    let turn = ConversationTurn {
        turn_id,
        intent_type,
        user_input: state.user_input.clone(),
        response_text: rendered.clone(),
        sources: cited.clone(),
        result: response.result(),
        tools_used: state.tools_used.clone(),
        timestamp: Utc::now(),
    };

    state.conversation_history.push(turn);
    state.messages.push(Message::user(state.user_input.clone()));
    state.messages.push(Message::assistant(rendered));
    state.active_documents.extend(cited);
    state.current_response = Some(response.clone());
    state.next_step = Route::End;
    Ok(())
}

/// Formats the last `window` turns for a prompt. The rolling summary stands in
/// for turns that fell out of the window, or for everything when no turns exist.
pub fn format_recent_history(turns: &[ConversationTurn], window: usize, summary: &str) -> String {
    let summary = summary.trim();
    let mut parts = Vec::new();
    if !summary.is_empty() && (turns.is_empty() || turns.len() > window) {
        parts.push(format!("Conversation summary: {}", summary));
    }
    let start = turns.len().saturating_sub(window);
    for turn in &turns[start..] {
        parts.push(format!("User: {}\nAssistant: {}", turn.user_input, turn.response_text));
    }
    parts.join("\n\n")
}

/// Folds turns that fell out of the history window into the rolling summary.
///
/// Only turns not covered yet are sent, alongside the previous summary, so the
/// prompt stays bounded however long the session runs. Returns whether the
/// summary changed; failures keep the old one and retry on the next turn.
pub async fn refresh_summary(model: &dyn LanguageModel, settings: &EffectiveSettings, state: &mut SessionState) -> bool {
    let cutoff = state.conversation_history.len().saturating_sub(settings.history_window);
    let from = state.summarized_turns.min(cutoff);
    if from == cutoff {
        return false;
    }
    let transcript = format_recent_history(&state.conversation_history[from..cutoff], usize::MAX, "");
    let req = ModelRequest::new(settings, prompts::memory_summary_prompt(&state.conversation_summary, &transcript));
    match model.generate(req).await {
        Ok(resp) if !resp.content.trim().is_empty() => {
            state.conversation_summary = resp.content.trim().to_string();
            state.summarized_turns = cutoff;
            tracing::debug!(session_id = %state.session_id, folded = cutoff - from, "summary refreshed");
            true
        }
        Ok(_) => {
            tracing::warn!(session_id = %state.session_id, "summary generation returned nothing; keeping previous summary");
            false
        }
        Err(e) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "summary generation failed; keeping previous summary");
            false
        }
    }
}
