use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::agent::engine::Route;
use crate::memory::format_recent_history;
use crate::models::{fill, Fillable, LanguageModel, ModelRequest};
use crate::prompts;
use crate::responses::deserialize_confidence;
use crate::session::SessionState;
use crate::settings::EffectiveSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Qa,
    Summarization,
    Calculation,
    #[default]
    Unknown,
}

impl IntentType {
    /// Lenient parse; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "qa" => IntentType::Qa,
            "summarization" => IntentType::Summarization,
            "calculation" => IntentType::Calculation,
            _ => IntentType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Qa => "qa",
            IntentType::Summarization => "summarization",
            IntentType::Calculation => "calculation",
            IntentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IntentType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(de)?;
        Ok(raw.as_deref().map(IntentType::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntentJudgment {
    /// One of "qa", "summarization", "calculation" or "unknown".
    #[serde(default)]
    pub intent_type: IntentType,
    /// Between 0 and 1.
    #[serde(default, deserialize_with = "deserialize_confidence")]
    #[schemars(with = "f64")]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl IntentJudgment {
    pub fn unknown(reasoning: impl Into<String>) -> Self {
        Self { intent_type: IntentType::Unknown, confidence: 0.0, reasoning: reasoning.into() }
    }
}

impl Fillable for IntentJudgment {
    const SCHEMA_NAME: &'static str = "intent";
}

pub const ROUTING_TABLE: [(IntentType, Route); 3] = [
    (IntentType::Qa, Route::QaAgent),
    (IntentType::Summarization, Route::SummarizationAgent),
    (IntentType::Calculation, Route::CalculationAgent),
];

/// Looks the intent up in [`ROUTING_TABLE`]. Anything missing from the
/// table, `Unknown` included, goes to the QA agent.
pub fn route_for(intent: IntentType) -> Route {
    ROUTING_TABLE
        .iter()
        .find(|(ty, _)| *ty == intent)
        .map(|(_, route)| *route)
        .unwrap_or(Route::QaAgent)
}

pub async fn classify(
    model: &dyn LanguageModel,
    settings: &EffectiveSettings,
    state: &SessionState,
) -> (IntentJudgment, Route) {
    let history = format_recent_history(
        &state.conversation_history,
        settings.history_window,
        &state.conversation_summary,
    );
    let req = ModelRequest::new(settings, prompts::intent_prompt(&state.user_input, &history))
        .with_system(prompts::INTENT_SYSTEM);

    let judgment = match fill::<IntentJudgment>(model, req).await {
        Ok(j) => j,
        Err(e) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "intent classification failed");
            IntentJudgment::unknown(e.to_string())
        }
    };
    let route = route_for(judgment.intent_type);
    tracing::debug!(intent = %judgment.intent_type, confidence = judgment.confidence, ?route, "classified");
    (judgment, route)
}
