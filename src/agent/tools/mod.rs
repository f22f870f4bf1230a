use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::documents::DocumentStore;

pub mod calculator;
pub mod document_tools;
pub mod logger;

pub use calculator::CalcError;
pub use logger::{ToolInvocationRecord, ToolLogger};

pub struct ToolContext<'a> {
    pub store: &'a dyn DocumentStore,
    pub session_id: Uuid,
}

/// A document a tool call surfaced, with its amount when it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), documents: Vec::new(), data: None }
    }

    pub fn with_documents(mut self, documents: Vec<DocumentRef>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error(transparent)]
    Calculation(#[from] CalcError),
    #[error("document {0} not found")]
    DocumentNotFound(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn run(&self, ctx: ToolContext<'_>, args: Value) -> Result<ToolOutput, ToolError>;
}

pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments { tool: tool.to_string(), reason: e.to_string() })
}

/// Outcome of one registry call: the tool's payload or a typed failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: Value,
    pub outcome: Result<ToolOutput, ToolError>,
}

impl ToolInvocation {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn documents(&self) -> &[DocumentRef] {
        match &self.outcome {
            Ok(out) => &out.documents,
            Err(_) => &[],
        }
    }

    /// The string form handed to the model and the log.
    pub fn render(&self) -> String {
        match &self.outcome {
            Ok(out) => out.content.clone(),
            Err(e) => format!("Error: {}", e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    store: Arc<dyn DocumentStore>,
    logger: ToolLogger,
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, logger: ToolLogger) -> Self {
        Self { tools: Vec::new(), store, logger }
    }

    pub fn with_default_tools(store: Arc<dyn DocumentStore>, logger: ToolLogger) -> Self {
        let mut r = Self::new(store, logger);
        r.register(Box::new(calculator::CalculatorTool));
        r.register(Box::new(document_tools::SearchTool));
        r.register(Box::new(document_tools::ReaderTool));
        r.register(Box::new(document_tools::StatisticsTool));
        r
    }

    pub fn register(&mut self, t: Box<dyn Tool>) { self.tools.push(t); }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().map(|b| b.as_ref()).find(|t| t.name() == name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec { name: t.name(), description: t.description(), parameters: t.parameters() })
            .collect()
    }

    pub fn logger(&self) -> &ToolLogger {
        &self.logger
    }

    /// Runs a tool and logs the call. Failures come back as values, never as `Err`.
    pub async fn invoke(&self, session_id: Uuid, name: &str, args: Value) -> ToolInvocation {
        let outcome = match self.get(name) {
            Some(tool) => {
                let ctx = ToolContext { store: self.store.as_ref(), session_id };
                tool.run(ctx, args.clone()).await
            }
            None => Err(ToolError::UnknownTool(name.to_string())),
        };
        let invocation = ToolInvocation { tool: name.to_string(), input: args, outcome };

        let status = if invocation.is_success() { "ok" } else { "error" };
        tracing::debug!(%session_id, tool = name, status, "tool invoked");
        metrics::counter!("assistant_tool_invocations_total", "tool" => name.to_string(), "status" => status)
            .increment(1);

        self.logger.log(ToolInvocationRecord::from_invocation(session_id, &invocation)).await;
        invocation
    }
}
