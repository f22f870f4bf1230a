//! The three agent variants and the tool-gathering loop they share.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::agent::engine::Route;
use crate::agent::intent::IntentType;
use crate::agent::tools::{DocumentRef, ToolInvocation, ToolRegistry};
use crate::models::{fill, ChatMessage, Fillable, LanguageModel, ModelRequest};
use crate::prompts;
use crate::responses::AgentResponse;
use crate::session::SessionState;
use crate::settings::EffectiveSettings;

pub mod calculation;
pub mod qa;
pub mod summarization;

/// Prior messages replayed to an agent.
const RECENT_MESSAGES: usize = 4;
const MAX_CALLS_PER_ROUND: usize = 5;
/// Search terms the calculation agent falls back to; they hit documents stating totals.
const FIGURES_QUERY: &str = "total amount sum calculate";

#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub model: &'a dyn LanguageModel,
    pub tools: &'a ToolRegistry,
    pub settings: &'a EffectiveSettings,
}

#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub response: AgentResponse,
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Qa,
    Summarization,
    Calculation,
}

impl Handler {
    pub fn for_route(route: Route) -> Option<Self> {
        match route {
            Route::QaAgent => Some(Handler::Qa),
            Route::SummarizationAgent => Some(Handler::Summarization),
            Route::CalculationAgent => Some(Handler::Calculation),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Handler::Qa => "qa_agent",
            Handler::Summarization => "summarization_agent",
            Handler::Calculation => "calculation_agent",
        }
    }

    pub fn intent_type(self) -> IntentType {
        match self {
            Handler::Qa => IntentType::Qa,
            Handler::Summarization => IntentType::Summarization,
            Handler::Calculation => IntentType::Calculation,
        }
    }

    /// Search query used when the model leaves `query` out.
    pub fn default_query(self, user_input: &str) -> String {
        match self {
            Handler::Summarization => user_input.split_whitespace().take(5).collect::<Vec<_>>().join(" "),
            Handler::Calculation => FIGURES_QUERY.to_string(),
            Handler::Qa => user_input.trim().to_string(),
        }
    }

    pub async fn run(self, ctx: HandlerContext<'_>, state: &SessionState) -> HandlerOutput {
        tracing::debug!(session_id = %state.session_id, handler = self.name(), "running agent");
        match self {
            Handler::Qa => qa::run(ctx, state).await,
            Handler::Summarization => summarization::run(ctx, state).await,
            Handler::Calculation => calculation::run(ctx, state).await,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlannedCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// The tool calls the model wants next; empty means it is done gathering.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolPlan {
    #[serde(default)]
    pub calls: Vec<PlannedCall>,
}

impl Fillable for ToolPlan {
    const SCHEMA_NAME: &'static str = "tool_plan";
}

/// One calculator call made during the run, in call order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CalculatorCall {
    pub expression: String,
    pub outcome: Result<f64, String>,
}

/// Working memory for one agent run: the transcript of tool results and
/// everything the calls touched.
pub(crate) struct Scratchpad<'a> {
    ctx: HandlerContext<'a>,
    handler: Handler,
    session_id: Uuid,
    user_input: String,
    system: String,
    transcript: Vec<ChatMessage>,
    pub tools_used: Vec<String>,
    pub touched: Vec<String>,
    /// Ids opened with `document_reader`, first-seen order.
    pub read: Vec<String>,
    pub figures: Vec<DocumentRef>,
    pub output_chars: usize,
    pub failures: Vec<String>,
    pub calculator_calls: Vec<CalculatorCall>,
}

impl<'a> Scratchpad<'a> {
    pub fn new(ctx: HandlerContext<'a>, handler: Handler, state: &SessionState) -> Self {
        Self {
            ctx,
            handler,
            session_id: state.session_id,
            user_input: state.user_input.clone(),
            system: prompts::agent_system(handler.intent_type(), &state.conversation_summary),
            transcript: state.recent_messages(RECENT_MESSAGES),
            tools_used: Vec::new(),
            touched: Vec::new(),
            read: Vec::new(),
            figures: Vec::new(),
            output_chars: 0,
            failures: Vec::new(),
            calculator_calls: Vec::new(),
        }
    }

    pub fn request(&self, prompt: String) -> ModelRequest {
        ModelRequest::new(self.ctx.settings, prompt)
            .with_system(self.system.clone())
            .with_history(self.transcript.clone())
    }

    pub async fn fill<T: Fillable>(&self, prompt: String) -> Result<T, crate::models::GenerationError> {
        fill::<T>(self.ctx.model, self.request(prompt)).await
    }

    fn with_default_query(&self, name: &str, args: Value) -> Value {
        if name != "document_search" {
            return args;
        }
        let mut args = match args {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        let by_amount = matches!(args.get("search_type").and_then(Value::as_str), Some("amount" | "amount_range"));
        let has_query = args.get("query").and_then(Value::as_str).is_some_and(|q| !q.trim().is_empty());
        if !by_amount && !has_query {
            args.insert("query".into(), json!(self.handler.default_query(&self.user_input)));
        }
        Value::Object(args)
    }

    /// Invokes a tool through the registry and folds its result into the transcript.
    pub async fn call(&mut self, name: &str, args: Value) -> ToolInvocation {
        let args = self.with_default_query(name, args);
        let requested = args.get("expression").and_then(Value::as_str).unwrap_or_default().to_string();
        let invocation = self.ctx.tools.invoke(self.session_id, name, args).await;
        self.tools_used.push(name.to_string());

        match &invocation.outcome {
            Ok(out) => {
                self.output_chars += out.content.chars().count();
                for doc in &out.documents {
                    if !self.touched.contains(&doc.id) {
                        self.touched.push(doc.id.clone());
                    }
                    if doc.amount.is_some() && !self.figures.iter().any(|f| f.id == doc.id) {
                        self.figures.push(doc.clone());
                    }
                    if name == "document_reader" && !self.read.contains(&doc.id) {
                        self.read.push(doc.id.clone());
                    }
                }
                if name == "calculator" {
                    let data = out.data.as_ref();
                    let expression = data.and_then(|d| d["expression"].as_str()).unwrap_or(requested.as_str()).to_string();
                    let outcome = data
                        .and_then(|d| d["result"].as_f64())
                        .ok_or_else(|| "calculator returned no result".to_string());
                    self.calculator_calls.push(CalculatorCall { expression, outcome });
                }
            }
            Err(e) => {
                self.failures.push(format!("{}: {}", name, e));
                if name == "calculator" {
                    self.calculator_calls.push(CalculatorCall { expression: requested, outcome: Err(e.to_string()) });
                }
            }
        }
        self.transcript
            .push(ChatMessage::user(format!("Tool result ({}): {}", name, invocation.render())));
        invocation
    }

    /// Runs planning rounds until the model stops asking for tools.
    pub async fn gather(&mut self) {
        let specs = serde_json::to_string_pretty(&self.ctx.tools.specs()).unwrap_or_default();
        let max_rounds = self.ctx.settings.max_tool_rounds;
        for round in 1..=max_rounds {
            let prompt = prompts::tool_plan_prompt(self.handler.intent_type(), &self.user_input, &specs, round, max_rounds);
            let plan = match self.fill::<ToolPlan>(prompt).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::debug!(handler = self.handler.name(), error = %e, "tool planning stopped");
                    break;
                }
            };
            if plan.calls.is_empty() {
                break;
            }
            for planned in plan.calls.into_iter().take(MAX_CALLS_PER_ROUND) {
                self.call(&planned.tool, planned.arguments).await;
            }
        }
    }

    /// Keeps the claimed ids that a tool actually returned, in the touched
    /// spelling. When none survive, falls back to the documents that were
    /// read, or to every touched id if nothing was read.
    pub fn cite(&self, claimed: &[String]) -> Vec<String> {
        let mut kept: Vec<String> = Vec::new();
        for id in claimed {
            let found = self.touched.iter().find(|t| t.eq_ignore_ascii_case(id.trim()));
            if let Some(t) = found {
                if !kept.contains(t) {
                    kept.push(t.clone());
                }
            }
        }
        if !kept.is_empty() {
            kept
        } else if !self.read.is_empty() {
            self.read.clone()
        } else {
            self.touched.clone()
        }
    }

    pub fn finish(self, response: AgentResponse) -> HandlerOutput {
        HandlerOutput { response, tools_used: self.tools_used }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::scripted::ScriptedModel;

    #[test]
    fn routes_map_to_handlers() {
        assert_eq!(Handler::for_route(Route::QaAgent), Some(Handler::Qa));
        assert_eq!(Handler::for_route(Route::CalculationAgent).map(Handler::name), Some("calculation_agent"));
        assert_eq!(Handler::for_route(Route::Classify), None);
        assert_eq!(Handler::for_route(Route::End), None);
    }

    #[test]
    fn default_queries() {
        let input = "Please summarize the consulting contract with Acme now";
        assert_eq!(Handler::Summarization.default_query(input), "Please summarize the consulting contract");
        assert_eq!(Handler::Qa.default_query(" What is INV-001? "), "What is INV-001?");
        assert_eq!(Handler::Calculation.default_query("add up the invoices"), "total amount sum calculate");
    }

    #[tokio::test]
    async fn gather_follows_plans_and_fills_missing_query() {
        let model = ScriptedModel::new()
            .with("tool_plan", json!({"calls": [{"tool": "document_search", "arguments": {}}]}))
            .with("tool_plan", json!({"calls": [
                {"tool": "document_reader", "arguments": {"doc_id": "INV-001"}},
                {"tool": "document_reader", "arguments": {"doc_id": "NOPE-9"}}
            ]}));
        let tools = registry();
        let settings = EffectiveSettings::default();
        let ctx = HandlerContext { model: &model, tools: &tools, settings: &settings };
        let state = state_with_input("INV-001 amount");

        let mut pad = Scratchpad::new(ctx, Handler::Qa, &state);
        pad.gather().await;

        assert_eq!(pad.tools_used, ["document_search", "document_reader", "document_reader"]);
        assert_eq!(pad.touched, ["INV-001"]);
        assert_eq!(pad.failures.len(), 1);
        // third round was unscripted, which reads as an empty plan
        assert_eq!(model.requests_for("tool_plan").len(), 3);

        let log = tools.logger().snapshot(state.session_id).await;
        assert_eq!(log[0].input["query"], "INV-001 amount");
    }

    #[tokio::test]
    async fn gather_stops_at_round_limit() {
        let plan = json!({"calls": [{"tool": "document_statistics"}]});
        let model = ScriptedModel::new()
            .with("tool_plan", plan.clone())
            .with("tool_plan", plan.clone())
            .with("tool_plan", plan);
        let tools = registry();
        let settings = EffectiveSettings { max_tool_rounds: 2, ..EffectiveSettings::default() };
        let ctx = HandlerContext { model: &model, tools: &tools, settings: &settings };
        let state = state_with_input("overview");

        let mut pad = Scratchpad::new(ctx, Handler::Qa, &state);
        pad.gather().await;
        assert_eq!(pad.tools_used.len(), 2);
    }

    #[test]
    fn cite_drops_ids_no_tool_returned() {
        let model = ScriptedModel::new();
        let tools = registry();
        let settings = EffectiveSettings::default();
        let ctx = HandlerContext { model: &model, tools: &tools, settings: &settings };
        let state = state_with_input("x");
        let mut pad = Scratchpad::new(ctx, Handler::Qa, &state);
        pad.touched = vec!["INV-001".into(), "INV-002".into()];

        assert_eq!(pad.cite(&["inv-002".into(), "INV-999".into()]), ["INV-002"]);
        assert_eq!(pad.cite(&["INV-999".into()]), ["INV-001", "INV-002"]);
        assert_eq!(pad.cite(&[]), ["INV-001", "INV-002"]);
    }

    #[tokio::test]
    async fn uncited_answers_fall_back_to_read_documents() {
        let model = ScriptedModel::new().with(
            "tool_plan",
            json!({"calls": [
                {"tool": "document_search", "arguments": {"query": "invoice", "search_type": "type"}},
                {"tool": "document_reader", "arguments": {"doc_id": "INV-002"}}
            ]}),
        );
        let tools = registry();
        let settings = EffectiveSettings::default();
        let ctx = HandlerContext { model: &model, tools: &tools, settings: &settings };
        let state = state_with_input("what does the TechStart invoice cover");

        let mut pad = Scratchpad::new(ctx, Handler::Qa, &state);
        pad.gather().await;
        assert_eq!(pad.touched, ["INV-001", "INV-002", "INV-003"]);
        assert_eq!(pad.cite(&[]), ["INV-002"]);
        assert_eq!(pad.cite(&["INV-003".into()]), ["INV-003"]);
    }

    #[tokio::test]
    async fn calculator_calls_record_failures_in_order() {
        let model = ScriptedModel::new()
            .with("tool_plan", json!({"calls": [{"tool": "calculator", "arguments": {"expression": "1 + 1"}}]}))
            .with("tool_plan", json!({"calls": [{"tool": "calculator", "arguments": {"expression": "1 / 0"}}]}));
        let tools = registry();
        let settings = EffectiveSettings::default();
        let ctx = HandlerContext { model: &model, tools: &tools, settings: &settings };
        let state = state_with_input("x");

        let mut pad = Scratchpad::new(ctx, Handler::Calculation, &state);
        pad.gather().await;
        assert_eq!(
            pad.calculator_calls,
            [
                CalculatorCall { expression: "1 + 1".into(), outcome: Ok(2.0) },
                CalculatorCall { expression: "1 / 0".into(), outcome: Err("division by zero".into()) },
            ]
        );
        assert_eq!(pad.failures, ["calculator: division by zero"]);
    }
}
