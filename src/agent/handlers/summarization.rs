use super::{Handler, HandlerContext, HandlerOutput, Scratchpad};
use crate::prompts;
use crate::responses::{AgentResponse, Answer, Summary};
use crate::session::SessionState;

pub async fn run(ctx: HandlerContext<'_>, state: &SessionState) -> HandlerOutput {
    let mut pad = Scratchpad::new(ctx, Handler::Summarization, state);
    pad.gather().await;

    let prompt = prompts::final_summary_prompt(&state.user_input, &pad.failures);
    let response = match pad.fill::<Summary>(prompt).await {
        Ok(mut summary) => {
            summary.document_ids = pad.cite(&summary.document_ids);
            if summary.original_length == 0 {
                summary.original_length = pad.output_chars;
            }
            AgentResponse::Summary(summary)
        }
        Err(e) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "summary could not be generated");
            AgentResponse::Answer(Answer::fallback(&state.user_input, &e.to_string()))
        }
    };
    pad.finish(response)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::scripted::ScriptedModel;
    use crate::settings::EffectiveSettings;
    use serde_json::json;

    #[tokio::test]
    async fn summary_cites_read_documents_and_measures_length() {
        let model = ScriptedModel::new()
            .with("tool_plan", json!({"calls": [{"tool": "document_search", "arguments": {"query": "contract", "search_type": "type"}}]}))
            .with("tool_plan", json!({"calls": [{"tool": "document_reader", "arguments": {"doc_id": "CON-001"}}]}))
            .with("summary", json!({
                "summary": "A twelve month services agreement.",
                "key_points": ["$180,000 total", "60 days notice"],
                "document_ids": []
            }));
        let tools = registry();
        let settings = EffectiveSettings::default();
        let state = state_with_input("Summarize all contracts");
        let out = run(HandlerContext { model: &model, tools: &tools, settings: &settings }, &state).await;

        let AgentResponse::Summary(summary) = &out.response else { panic!("expected a summary") };
        assert_eq!(summary.document_ids, ["CON-001"]);
        assert!(summary.original_length > 0);
        assert_eq!(summary.key_points.len(), 2);
        assert_eq!(out.tools_used, ["document_search", "document_reader"]);
    }

    #[tokio::test]
    async fn default_query_is_first_five_words() {
        let model = ScriptedModel::new()
            .with("tool_plan", json!({"calls": [{"tool": "document_search"}]}))
            .with("summary", json!({"summary": "s", "original_length": 42}));
        let tools = registry();
        let settings = EffectiveSettings::default();
        let state = state_with_input("summarize the claim for patient John Doe");
        let out = run(HandlerContext { model: &model, tools: &tools, settings: &settings }, &state).await;

        let log = tools.logger().snapshot(state.session_id).await;
        assert_eq!(log[0].input["query"], "summarize the claim for patient");
        let AgentResponse::Summary(summary) = &out.response else { panic!("expected a summary") };
        assert_eq!(summary.original_length, 42);
    }
}
