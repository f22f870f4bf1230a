use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{CalculatorCall, Handler, HandlerContext, HandlerOutput, Scratchpad};
use crate::agent::tools::calculator::{self, format_number};
use crate::models::Fillable;
use crate::prompts;
use crate::responses::{AgentResponse, Answer, Calculation};
use crate::session::SessionState;

/// The model's proposal for what to evaluate.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExpressionPlan {
    /// Arithmetic over the gathered figures, e.g. "22000 + 69300".
    #[serde(default)]
    pub expression: String,
}

impl Fillable for ExpressionPlan {
    const SCHEMA_NAME: &'static str = "expression_plan";
}

/// Sum of the distinct document amounts gathered so far.
fn sum_of_figures(pad: &Scratchpad<'_>) -> Option<String> {
    if pad.figures.is_empty() {
        return None;
    }
    let terms: Vec<String> = pad.figures.iter().filter_map(|f| f.amount).map(format_number).collect();
    Some(terms.join(" + "))
}

async fn plan_expression(pad: &Scratchpad<'_>, user_input: &str) -> Option<String> {
    match pad.fill::<ExpressionPlan>(prompts::expression_plan_prompt(user_input)).await {
        Ok(plan) => {
            let expression = plan.expression.trim().to_string();
            match calculator::validate(&expression) {
                Ok(()) => return Some(expression),
                Err(e) => tracing::debug!(%expression, error = %e, "planned expression rejected"),
            }
        }
        Err(e) => tracing::debug!(error = %e, "no expression plan"),
    }
    sum_of_figures(pad)
}

/// Appends tool failures from this run that the text does not already mention.
fn with_failures(explanation: String, failures: &[String]) -> String {
    let missing: Vec<&str> = failures
        .iter()
        .map(String::as_str)
        .filter(|f| !explanation.contains(*f))
        .collect();
    if missing.is_empty() {
        explanation
    } else {
        format!("{}\n\nSome steps failed: {}", explanation.trim(), missing.join("; "))
    }
}

pub async fn run(ctx: HandlerContext<'_>, state: &SessionState) -> HandlerOutput {
    let mut pad = Scratchpad::new(ctx, Handler::Calculation, state);
    pad.gather().await;

    // A gathered result only stands if it was the last calculator call of the turn.
    let last = pad.calculator_calls.last().cloned();
    let CalculatorCall { expression, outcome } = match last {
        Some(call) if call.outcome.is_ok() => call,
        failed => match plan_expression(&pad, &state.user_input).await {
            Some(expression) => {
                pad.call("calculator", json!({ "expression": expression })).await;
                pad.calculator_calls.last().cloned().unwrap_or(CalculatorCall {
                    expression,
                    outcome: Err("calculator was not called".to_string()),
                })
            }
            None => failed.unwrap_or(CalculatorCall {
                expression: String::new(),
                outcome: Err("no figures were found to calculate with".to_string()),
            }),
        },
    };

    let rendered = outcome.clone().map(format_number);
    let prompt = prompts::final_calculation_prompt(
        &state.user_input,
        &expression,
        rendered.as_deref().map_err(String::as_str),
        &pad.failures,
    );
    let sources = pad.touched.clone();

    let response = match (pad.fill::<Calculation>(prompt).await, &outcome) {
        (Ok(mut calc), _) => {
            calc.expression = expression;
            calc.sources = sources;
            match &outcome {
                Ok(value) => {
                    calc.result = *value;
                    calc.error = None;
                }
                Err(error) => {
                    calc.result = 0.0;
                    if !calc.explanation.contains(error.as_str()) {
                        calc.explanation = format!("{} ({})", calc.explanation.trim(), error);
                    }
                    calc.error = Some(error.clone());
                }
            }
            AgentResponse::Calculation(calc)
        }
        (Err(e), Ok(value)) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "calculation explanation failed; using calculator result");
            let mut calc = Calculation::from_result(expression, *value, sources);
            calc.explanation = with_failures(calc.explanation, &pad.failures);
            AgentResponse::Calculation(calc)
        }
        (Err(e), Err(error)) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "calculation could not be completed");
            AgentResponse::Answer(Answer::fallback(&state.user_input, error))
        }
    };
    pad.finish(response)
}
