use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_HISTORY_WINDOW: usize = 5;
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 3;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

/// Knobs that shape how much context and how many tool rounds a turn gets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AgentPolicies {
    pub history_window: Option<usize>,
    pub max_tool_rounds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSettings {
    pub default_model: Option<String>,
    pub model_params: Option<ModelParams>,
    pub agent_policies: Option<AgentPolicies>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GlobalConfigDefaults {
    pub default_model: Option<String>,
    pub model_params: Option<ModelParams>,
    pub agent_policies: Option<AgentPolicies>,
    /// Upper bound on one generation-service call.
    pub request_timeout_secs: Option<u64>,
}

impl GlobalConfigDefaults {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds defaults from an arbitrary variable source. Unparseable values are ignored.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f32 = |key: &str| get(key).and_then(|v| v.trim().parse::<f32>().ok());
        let model_params = ModelParams {
            temperature: parse_f32("ASSISTANT_TEMPERATURE"),
            max_tokens: get("ASSISTANT_MAX_TOKENS").and_then(|v| v.trim().parse().ok()),
            top_p: parse_f32("ASSISTANT_TOP_P"),
        };
        let agent_policies = AgentPolicies {
            history_window: get("ASSISTANT_HISTORY_WINDOW").and_then(|v| v.trim().parse().ok()),
            max_tool_rounds: get("ASSISTANT_MAX_TOOL_ROUNDS").and_then(|v| v.trim().parse().ok()),
        };
        Self {
            default_model: get("ASSISTANT_MODEL").filter(|m| !m.trim().is_empty()),
            model_params: Some(model_params),
            agent_policies: Some(agent_policies),
            request_timeout_secs: get("ASSISTANT_REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RequestOverrides {
    pub model: Option<String>,
    pub model_params: Option<ModelParams>,
    pub agent_policies: Option<AgentPolicies>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveSettings {
    pub model: String,
    pub model_params: ModelParams,
    pub history_window: usize,
    pub max_tool_rounds: u32,
}

impl Default for EffectiveSettings {
    fn default() -> Self {
        resolve_effective_settings(
            &GlobalConfigDefaults::default(),
            &SessionSettings::default(),
            &RequestOverrides::default(),
        )
    }
}

pub fn resolve_effective_settings(
    global: &GlobalConfigDefaults,
    session: &SessionSettings,
    request: &RequestOverrides,
) -> EffectiveSettings {
    let model = request
        .model
        .clone()
        .or_else(|| session.default_model.clone())
        .or_else(|| global.default_model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let model_params = ModelParams {
        temperature: request
            .model_params
            .as_ref()
            .and_then(|p| p.temperature)
            .or_else(|| session.model_params.as_ref().and_then(|p| p.temperature))
            .or_else(|| global.model_params.as_ref().and_then(|p| p.temperature))
            .or(Some(DEFAULT_TEMPERATURE)),
        max_tokens: request
            .model_params
            .as_ref()
            .and_then(|p| p.max_tokens)
            .or_else(|| session.model_params.as_ref().and_then(|p| p.max_tokens))
            .or_else(|| global.model_params.as_ref().and_then(|p| p.max_tokens)),
        top_p: request
            .model_params
            .as_ref()
            .and_then(|p| p.top_p)
            .or_else(|| session.model_params.as_ref().and_then(|p| p.top_p))
            .or_else(|| global.model_params.as_ref().and_then(|p| p.top_p)),
    };

    let history_window = request
        .agent_policies
        .as_ref()
        .and_then(|p| p.history_window)
        .or_else(|| session.agent_policies.as_ref().and_then(|p| p.history_window))
        .or_else(|| global.agent_policies.as_ref().and_then(|p| p.history_window))
        .unwrap_or(DEFAULT_HISTORY_WINDOW);

    let max_tool_rounds = request
        .agent_policies
        .as_ref()
        .and_then(|p| p.max_tool_rounds)
        .or_else(|| session
            .agent_policies
            .as_ref()
            .and_then(|p| p.max_tool_rounds))
        .or_else(|| global
            .agent_policies
            .as_ref()
            .and_then(|p| p.max_tool_rounds))
        .unwrap_or(DEFAULT_MAX_TOOL_ROUNDS);

    EffectiveSettings {
        model,
        model_params,
        history_window,
        max_tool_rounds,
    }
}
