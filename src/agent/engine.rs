use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::handlers::{Handler, HandlerContext};
use crate::agent::intent::{self, IntentJudgment};
use crate::agent::tools::ToolRegistry;
use crate::memory::{self, MemoryError};
use crate::models::LanguageModel;
use crate::responses::{AgentResponse, StructuredResponse};
use crate::session::SessionState;
use crate::settings::{resolve_effective_settings, GlobalConfigDefaults, RequestOverrides};

/// Workflow stages. A turn always starts at `Classify` and only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Classify,
    QaAgent,
    SummarizationAgent,
    CalculationAgent,
    UpdateMemory,
    End,
}

impl Route {
    pub fn can_advance_to(self, next: Route) -> bool {
        use Route::*;
        matches!(
            (self, next),
            (Classify, QaAgent | SummarizationAgent | CalculationAgent)
                | (QaAgent | SummarizationAgent | CalculationAgent, UpdateMemory)
                | (UpdateMemory, End)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("input is empty")]
    EmptyInput,
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: Route, to: Route },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("agent stage finished without a response")]
    MissingResponse,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: SessionState,
    pub rendered: String,
    pub tools_used: Vec<String>,
    pub intent: IntentJudgment,
    pub response: AgentResponse,
}

pub struct Workflow {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    defaults: GlobalConfigDefaults,
}

impl Workflow {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, defaults: GlobalConfigDefaults) -> Self {
        Self { model, tools, defaults }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn run_turn(&self, state: SessionState, input: &str) -> Result<TurnOutcome, WorkflowError> {
        self.run_turn_with(state, input, &RequestOverrides::default()).await
    }

    /// Runs one turn to `End` and hands back the updated state. The caller's
    /// state is consumed; on `Err` nothing of the turn is kept.
    #[tracing::instrument(skip_all, fields(session_id = %state.session_id))]
    pub async fn run_turn_with(
        &self,
        mut state: SessionState,
        input: &str,
        overrides: &RequestOverrides,
    ) -> Result<TurnOutcome, WorkflowError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(WorkflowError::EmptyInput);
        }
        let settings = resolve_effective_settings(&self.defaults, &state.settings, overrides);
        let ctx = HandlerContext { model: self.model.as_ref(), tools: &self.tools, settings: &settings };
        state.begin_turn(input);

        let mut route = Route::Classify;
        loop {
            let next = match route {
                Route::Classify => {
                    let (judgment, target) = intent::classify(ctx.model, &settings, &state).await;
                    state.intent = Some(judgment);
                    target
                }
                Route::QaAgent | Route::SummarizationAgent | Route::CalculationAgent => {
                    let handler = Handler::for_route(route)
                        .ok_or(WorkflowError::InvalidTransition { from: route, to: Route::UpdateMemory })?;
                    let out = handler.run(ctx, &state).await;
                    state.tools_used = out.tools_used;
                    state.current_response = Some(out.response);
                    Route::UpdateMemory
                }
                Route::UpdateMemory => {
                    let response = state.current_response.clone().ok_or(WorkflowError::MissingResponse)?;
                    memory::update_memory(&mut state, &response)?;
                    memory::refresh_summary(ctx.model, &settings, &mut state).await;
                    Route::End
                }
                Route::End => break,
            };
            if !route.can_advance_to(next) {
                return Err(WorkflowError::InvalidTransition { from: route, to: next });
            }
            tracing::debug!(from = ?route, to = ?next, "advance");
            state.next_step = next;
            route = next;
        }

        let response = state.current_response.clone().ok_or(WorkflowError::MissingResponse)?;
        let intent = state.intent.clone().unwrap_or_else(|| IntentJudgment::unknown("not classified"));
        metrics::counter!("assistant_turns_total", "intent" => intent.intent_type.as_str()).increment(1);
        tracing::info!(
            intent = %intent.intent_type,
            tools = state.tools_used.len(),
            history = state.conversation_history.len(),
            "turn complete"
        );
        Ok(TurnOutcome {
            rendered: response.render(),
            tools_used: state.tools_used.clone(),
            intent,
            response,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::handlers::test_support::registry;
    use crate::agent::intent::IntentType;
    use crate::models::scripted::ScriptedModel;
    use crate::settings::SessionSettings;
    use serde_json::json;

    fn workflow(model: ScriptedModel) -> Workflow {
        Workflow::new(Arc::new(model), registry(), GlobalConfigDefaults::default())
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(Route::Classify.can_advance_to(Route::CalculationAgent));
        assert!(Route::QaAgent.can_advance_to(Route::UpdateMemory));
        assert!(Route::UpdateMemory.can_advance_to(Route::End));
        assert!(!Route::Classify.can_advance_to(Route::UpdateMemory));
        assert!(!Route::QaAgent.can_advance_to(Route::SummarizationAgent));
        assert!(!Route::UpdateMemory.can_advance_to(Route::Classify));
        assert!(!Route::End.can_advance_to(Route::Classify));
    }

    #[tokio::test]
    async fn invoice_question_cites_the_invoice() {
        let model = ScriptedModel::new()
            .with("intent", json!({"intent_type": "qa", "confidence": 0.9, "reasoning": "specific question"}))
            .with("tool_plan", json!({"calls": [{"tool": "document_search", "arguments": {"query": "INV-001"}}]}))
            .with("answer", json!({"answer": "The total amount in INV-001 is $22,000.00.", "sources": ["INV-001"], "confidence": 0.95}));
        let wf = workflow(model);
        let state = SessionState::new("demo_user", SessionSettings::default());

        let out = wf.run_turn(state, "What's the total amount in invoice INV-001?").await.unwrap();
        assert_eq!(out.intent.intent_type, IntentType::Qa);
        assert_eq!(out.response.cited_documents(), ["INV-001"]);
        assert_eq!(out.state.next_step, Route::End);
        assert_eq!(out.state.conversation_history.len(), 1);
        assert_eq!(out.state.conversation_history[0].intent_type, IntentType::Qa);
        assert!(out.state.active_documents.contains("INV-001"));
        assert!(out.rendered.contains("$22,000.00"));
    }

    #[tokio::test]
    async fn invoice_sum_is_calculated() {
        let model = ScriptedModel::new()
            .with("intent", json!({"intent_type": "calculation", "confidence": 0.9, "reasoning": "sum"}))
            .with("tool_plan", json!({"calls": [{"tool": "document_search", "arguments": {"query": "invoice", "search_type": "type"}}]}))
            .with("expression_plan", json!({"expression": "22000 + 69300 + 214500"}))
            .with("calculation", json!({"explanation": "Sum of the three invoice totals.", "units": "USD"}));
        let wf = workflow(model);
        let state = SessionState::new("demo_user", SessionSettings::default());

        let out = wf.run_turn(state, "Calculate the sum of all invoice totals").await.unwrap();
        let AgentResponse::Calculation(calc) = &out.response else { panic!("expected a calculation") };
        assert_eq!(calc.expression, "22000 + 69300 + 214500");
        assert_eq!(crate::agent::tools::calculator::format_number(calc.result), "305800");
        assert!(out.rendered.contains("305800"));
        assert_eq!(out.tools_used, ["document_search", "calculator"]);
        assert_eq!(out.state.conversation_history[0].result, Some(305800.0));

        let log = wf.tools().logger().snapshot(out.state.session_id).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].output.as_deref(), Some("305800"));
    }

    #[tokio::test]
    async fn unknown_intent_is_answered_by_qa() {
        let model = ScriptedModel::new()
            .with("intent", json!({"intent_type": "small_talk", "confidence": 0.3}))
            .with("answer", json!({"answer": "I can help with your documents.", "confidence": 0.5}));
        let wf = workflow(model);
        let out = wf
            .run_turn(SessionState::new("u", SessionSettings::default()), "Tell me about our performance")
            .await
            .unwrap();
        assert_eq!(out.intent.intent_type, IntentType::Unknown);
        assert!(matches!(out.response, AgentResponse::Answer(_)));
        assert_eq!(out.state.conversation_history[0].intent_type, IntentType::Unknown);
    }

    #[tokio::test]
    async fn service_outage_still_reaches_end() {
        let model = ScriptedModel::new().failing("intent").failing("tool_plan").failing("answer");
        let wf = workflow(model);
        let out = wf.run_turn(SessionState::new("u", SessionSettings::default()), "hello").await.unwrap();
        assert_eq!(out.state.next_step, Route::End);
        let AgentResponse::Answer(answer) = &out.response else { panic!("expected an answer") };
        assert_eq!(answer.confidence, 0.0);
        assert_eq!(out.state.messages.len(), 2);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_anything_runs() {
        let wf = workflow(ScriptedModel::new());
        let state = SessionState::new("u", SessionSettings::default());
        let err = wf.run_turn(state, "   ").await.unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyInput));
    }

    #[tokio::test]
    async fn turns_accumulate_in_order() {
        let mut model = ScriptedModel::new();
        for i in 0..3 {
            model = model
                .with("intent", json!({"intent_type": "qa", "confidence": 0.8}))
                .with("answer", json!({"answer": format!("reply {}", i), "confidence": 0.8}));
        }
        let wf = workflow(model);
        let mut state = SessionState::new("u", SessionSettings::default());
        for i in 0..3 {
            state = wf.run_turn(state, &format!("question {}", i)).await.unwrap().state;
        }
        let inputs: Vec<_> = state.conversation_history.iter().map(|t| t.user_input.as_str()).collect();
        assert_eq!(inputs, ["question 0", "question 1", "question 2"]);
        assert_eq!(state.messages.len(), 6);
        let ids: std::collections::HashSet<_> = state.conversation_history.iter().map(|t| t.turn_id).collect();
        assert_eq!(ids.len(), 3);
    }
}
