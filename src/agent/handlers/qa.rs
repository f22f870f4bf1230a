use super::{Handler, HandlerContext, HandlerOutput, Scratchpad};
use crate::prompts;
use crate::responses::{AgentResponse, Answer};
use crate::session::SessionState;

pub async fn run(ctx: HandlerContext<'_>, state: &SessionState) -> HandlerOutput {
    let mut pad = Scratchpad::new(ctx, Handler::Qa, state);
    pad.gather().await;

    let prompt = prompts::final_answer_prompt(&state.user_input, &pad.failures);
    let answer = match pad.fill::<Answer>(prompt).await {
        Ok(mut answer) => {
            answer.question = state.user_input.clone();
            answer.sources = pad.cite(&answer.sources);
            answer
        }
        Err(e) => {
            tracing::warn!(session_id = %state.session_id, error = %e, "qa answer could not be generated");
            Answer::fallback(&state.user_input, &e.to_string())
        }
    };
    pad.finish(AgentResponse::Answer(answer))
}
