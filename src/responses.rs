//! Structured responses produced by the agent handlers.
//!
//! Each variant is requested from the generation service as a structured
//! fill, then post-processed by its handler before it reaches memory.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::agent::intent::IntentType;
use crate::agent::tools::calculator::format_number;
use crate::models::Fillable;

/// Clamps into `[0, 1]`; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

pub(crate) fn deserialize_confidence<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    let raw = Option::<f64>::deserialize(de)?;
    Ok(raw.map(clamp_unit).unwrap_or(0.0))
}

pub trait StructuredResponse {
    fn intent_type(&self) -> IntentType;
    /// User-facing text.
    fn render(&self) -> String;
    fn cited_documents(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Answer {
    /// The question being answered.
    #[serde(default)]
    pub question: String,
    pub answer: String,
    /// Ids of the documents the answer relies on.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Between 0 and 1.
    #[serde(default, deserialize_with = "deserialize_confidence")]
    #[schemars(with = "f64")]
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    #[schemars(skip)]
    pub produced_at: DateTime<Utc>,
}

impl Answer {
    pub fn fallback(question: &str, reason: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: format!("I'm sorry, I couldn't complete that request ({}). Please try rephrasing it.", reason),
            sources: Vec::new(),
            confidence: 0.0,
            produced_at: Utc::now(),
        }
    }
}

impl Fillable for Answer {
    const SCHEMA_NAME: &'static str = "answer";
}

impl StructuredResponse for Answer {
    fn intent_type(&self) -> IntentType {
        IntentType::Qa
    }

    fn render(&self) -> String {
        let mut out = self.answer.trim().to_string();
        if !self.sources.is_empty() {
            out.push_str(&format!("\n\nSources: {}", self.sources.join(", ")));
        }
        out
    }

    fn cited_documents(&self) -> Vec<String> {
        self.sources.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Summary {
    /// Number of characters that were summarized.
    #[serde(default)]
    pub original_length: usize,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Ids of the summarized documents.
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default = "Utc::now")]
    #[schemars(skip)]
    pub produced_at: DateTime<Utc>,
}

impl Fillable for Summary {
    const SCHEMA_NAME: &'static str = "summary";
}

impl StructuredResponse for Summary {
    fn intent_type(&self) -> IntentType {
        IntentType::Summarization
    }

    fn render(&self) -> String {
        let mut out = self.summary.trim().to_string();
        if !self.key_points.is_empty() {
            out.push_str("\n\nKey points:");
            for point in &self.key_points {
                out.push_str(&format!("\n- {}", point));
            }
        }
        if !self.document_ids.is_empty() {
            out.push_str(&format!("\n\nDocuments: {}", self.document_ids.join(", ")));
        }
        out
    }

    fn cited_documents(&self) -> Vec<String> {
        self.document_ids.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Calculation {
    /// The arithmetic expression that was evaluated.
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub result: f64,
    pub explanation: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub error: Option<String>,
    #[serde(default)]
    #[schemars(skip)]
    pub sources: Vec<String>,
    #[serde(default = "Utc::now")]
    #[schemars(skip)]
    pub produced_at: DateTime<Utc>,
}

impl Calculation {
    /// A calculation built straight from the calculator output.
    pub fn from_result(expression: String, result: f64, sources: Vec<String>) -> Self {
        Self {
            explanation: format!("{} = {}", expression, format_number(result)),
            expression,
            result,
            units: None,
            error: None,
            sources,
            produced_at: Utc::now(),
        }
    }
}

impl Fillable for Calculation {
    const SCHEMA_NAME: &'static str = "calculation";
}

impl StructuredResponse for Calculation {
    fn intent_type(&self) -> IntentType {
        IntentType::Calculation
    }

    fn render(&self) -> String {
        let mut out = self.explanation.trim().to_string();
        if let Some(error) = &self.error {
            out.push_str(&format!("\n\nThe calculation could not be completed: {}", error));
            return out;
        }
        if !self.expression.is_empty() {
            out.push_str(&format!("\n\nExpression: {}", self.expression));
        }
        out.push_str(&format!("\nResult: {}", format_number(self.result)));
        if let Some(units) = self.units.as_deref().filter(|u| !u.trim().is_empty()) {
            out.push_str(&format!(" {}", units.trim()));
        }
        out
    }

    fn cited_documents(&self) -> Vec<String> {
        self.sources.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentResponse {
    Answer(Answer),
    Summary(Summary),
    Calculation(Calculation),
}

impl AgentResponse {
    fn inner(&self) -> &dyn StructuredResponse {
        match self {
            AgentResponse::Answer(a) => a,
            AgentResponse::Summary(s) => s,
            AgentResponse::Calculation(c) => c,
        }
    }

    /// Numeric result, for calculations that produced one.
    pub fn result(&self) -> Option<f64> {
        match self {
            AgentResponse::Calculation(c) if c.error.is_none() => Some(c.result),
            _ => None,
        }
    }
}

impl StructuredResponse for AgentResponse {
    fn intent_type(&self) -> IntentType {
        self.inner().intent_type()
    }

    fn render(&self) -> String {
        self.inner().render()
    }

    fn cited_documents(&self) -> Vec<String> {
        self.inner().cited_documents()
    }
}
