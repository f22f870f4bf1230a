//! Prompt text sent to the generation service.

use crate::agent::intent::IntentType;

pub const MEMORY_SUMMARY_MAX_WORDS: usize = 150;

pub const INTENT_SYSTEM: &str = "You classify requests for a document assistant that works over \
financial and healthcare documents (invoices, contracts, claims).";

pub fn intent_prompt(user_input: &str, history: &str) -> String {
    let history = if history.trim().is_empty() { "(none)" } else { history };
    format!(
        "Classify the user's request as one of: qa, summarization, calculation, unknown.

Return intent_type, a confidence between 0 and 1, and a one-sentence reasoning.

- qa: a specific question answered from the documents.
- summarization: a request to summarize one or more documents.
- calculation: a request to total, add, subtract, multiply, divide, average or otherwise compute figures.
- unknown: anything else, or too ambiguous to tell.

Examples:
\"What's the total amount in invoice INV-001?\" -> qa (0.85)
\"Summarize all contracts\" -> summarization (0.9)
\"Calculate the sum of all invoice totals\" -> calculation (0.9)
\"Tell me about our performance\" -> unknown (0.4)

Conversation history:
{history}

User input:
{user_input}"
    )
}

const QA_SYSTEM: &str = "You are a document assistant answering questions about financial and healthcare documents.

Guidelines:
1. Search for relevant documents before answering.
2. Cite the document ids your answer relies on.
3. If the information is not in the documents, say so plainly.
4. Be exact with numbers and dates.";

const SUMMARIZATION_SYSTEM: &str = "You are a document summarizer for financial and healthcare documents.

Guidelines:
1. Search for and read the relevant documents first.
2. Pull out the parties, amounts, dates and obligations.
3. Keep the summary short and list the key points separately.
4. Mention the document ids you summarized.";

const CALCULATION_SYSTEM: &str = "You are a careful calculation assistant for document figures.

Guidelines:
1. Find the figures you need in the documents; never invent them.
2. Every computation goes through the calculator tool.
3. Explain the steps and give units where they apply.";

/// System prompt for an agent, with the rolling summary appended when there is one.
pub fn agent_system(intent: IntentType, conversation_summary: &str) -> String {
    let base = match intent {
        IntentType::Summarization => SUMMARIZATION_SYSTEM,
        IntentType::Calculation => CALCULATION_SYSTEM,
        IntentType::Qa | IntentType::Unknown => QA_SYSTEM,
    };
    let summary = conversation_summary.trim();
    if summary.is_empty() {
        base.to_string()
    } else {
        format!("{}\n\nConversation so far:\n{}", base, summary)
    }
}

fn tool_instructions(intent: IntentType) -> &'static str {
    match intent {
        IntentType::Summarization => {
            "Find the documents to summarize with document_search, then read each one with document_reader."
        }
        IntentType::Calculation => {
            "Find the documents holding the figures (document_search with search_type \"type\" or an amount \
             search works well), read them if the amounts are unclear, and use calculator for arithmetic."
        }
        IntentType::Qa | IntentType::Unknown => {
            "Search for the documents the question is about; read a document when the search line is not enough."
        }
    }
}

pub fn tool_plan_prompt(intent: IntentType, user_input: &str, tool_specs: &str, round: u32, max_rounds: u32) -> String {
    format!(
        "Decide which tools to call next for this request (round {round} of {max_rounds}).

Request: {user_input}

{instructions}

Available tools (JSON schema of each tool's arguments):
{tool_specs}

Return calls as a list of {{\"tool\": name, \"arguments\": {{...}}}}. Tool results so far are in the conversation above. \
Return an empty list when you have what you need.",
        instructions = tool_instructions(intent),
    )
}

fn failures_note(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nSome tool calls failed; tell the user what could not be done:\n- {}",
            failures.join("\n- ")
        )
    }
}

pub fn final_answer_prompt(user_input: &str, failures: &[String]) -> String {
    format!(
        "Answer the question using only the tool results above.

Question: {user_input}

Put the ids of the documents you used in sources and rate your confidence between 0 and 1.{}",
        failures_note(failures)
    )
}

pub fn final_summary_prompt(user_input: &str, failures: &[String]) -> String {
    format!(
        "Summarize the documents in the tool results above for this request: {user_input}

Give a short summary, the key points as a list, and the ids of the documents summarized.{}",
        failures_note(failures)
    )
}

pub fn expression_plan_prompt(user_input: &str) -> String {
    format!(
        "Write the arithmetic expression that answers this request, using the figures from the tool results above.

Request: {user_input}

Use only digits, decimal points, parentheses and + - * / % ** (no currency symbols or thousands separators). \
Return an empty expression if the figures are not available."
    )
}

pub fn final_calculation_prompt(
    user_input: &str,
    expression: &str,
    outcome: Result<&str, &str>,
    failures: &[String],
) -> String {
    let outcome = match outcome {
        Ok(result) => format!("The calculator evaluated it to {result}. Report exactly this result."),
        Err(error) => format!("The calculator failed: {error}. Explain the failure to the user."),
    };
    format!(
        "Explain this calculation step by step.

Request: {user_input}
Expression: {expression}
{outcome}

Reproduce the expression and the numeric result, and give units if they apply.{}",
        failures_note(failures)
    )
}

pub fn memory_summary_prompt(previous_summary: &str, conversation: &str) -> String {
    let previous = if previous_summary.trim().is_empty() { "(none)" } else { previous_summary.trim() };
    format!(
        "Summarize this conversation in at most {MEMORY_SUMMARY_MAX_WORDS} words.

Previous summary: {previous}

{conversation}

Cover the topics discussed, the documents referenced, any figures or calculations, and open questions."
    )
}
