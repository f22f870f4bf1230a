use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::EffectiveSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// One request to the generation service: an optional system prompt, prior
/// history, then the prompt itself as the final user message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRequest {
    pub model: String,
    pub system: Option<String>,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

impl ModelRequest {
    pub fn new(settings: &EffectiveSettings, prompt: impl Into<String>) -> Self {
        Self {
            model: settings.model.clone(),
            system: None,
            history: Vec::new(),
            prompt: prompt.into(),
            temperature: settings.model_params.temperature,
            max_tokens: settings.model_params.max_tokens,
            top_p: settings.model_params.top_p,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = &self.system {
            out.push(ChatMessage::system(system.clone()));
        }
        out.extend(self.history.iter().cloned());
        out.push(ChatMessage::user(self.prompt.clone()));
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
}

/// Target shape for a structured fill.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl OutputSchema {
    pub fn of<T: JsonSchema>(name: &'static str) -> Self {
        let mut schema = schemars::schema_for!(T).to_value();
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
        }
        Self { name, schema }
    }
}

/// A type the generation service can be asked to populate.
pub trait Fillable: DeserializeOwned + JsonSchema {
    const SCHEMA_NAME: &'static str;

    fn output_schema() -> OutputSchema {
        OutputSchema::of::<Self>(Self::SCHEMA_NAME)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generation service returned status {0}")]
    Status(u16),
    #[error("generation service returned no content")]
    Empty,
    #[error("structured output for `{schema}` was malformed: {reason}")]
    Malformed { schema: &'static str, reason: String },
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, GenerationError>;

    /// Best-effort fill of `schema`. Callers validate the shape with [`fill`].
    async fn generate_structured(&self, req: ModelRequest, schema: &OutputSchema) -> Result<Value, GenerationError>;
}

pub async fn fill<T: Fillable>(model: &dyn LanguageModel, req: ModelRequest) -> Result<T, GenerationError> {
    let schema = T::output_schema();
    let value = model.generate_structured(req, &schema).await?;
    serde_json::from_value(value).map_err(|e| GenerationError::Malformed {
        schema: T::SCHEMA_NAME,
        reason: e.to_string(),
    })
}

#[derive(Clone)]
pub struct OpenAICompatible {
    pub base_url: String,
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAICompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into(), api_key, client })
    }

    pub fn from_env(timeout: Duration) -> Result<Self, GenerationError> {
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        Self::new(base_url, api_key, timeout)
    }

    async fn chat(&self, body: OaiChatRequest<'_>) -> Result<ModelResponse, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut rb = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            return Err(GenerationError::Status(resp.status().as_u16()));
        }
        let v: OaiChatResponse = resp.json().await?;
        let content = v
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(GenerationError::Empty)?;
        Ok(ModelResponse { content, model: v.model })
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")] temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")] max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")] top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")] response_format: Option<Value>,
}

impl<'a> OaiChatRequest<'a> {
    fn from_request(req: &'a ModelRequest) -> Self {
        Self {
            model: &req.model,
            messages: req.messages(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            top_p: req.top_p,
            response_format: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct OaiChoice { message: OaiMessage }

#[derive(Debug, Deserialize)]
struct OaiMessage { content: Option<String> }

#[async_trait]
impl LanguageModel for OpenAICompatible {
    async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, GenerationError> {
        self.chat(OaiChatRequest::from_request(&req)).await
    }

    async fn generate_structured(&self, req: ModelRequest, schema: &OutputSchema) -> Result<Value, GenerationError> {
        let mut body = OaiChatRequest::from_request(&req);
        body.response_format = Some(serde_json::json!({
            "type": "json_schema",
            "json_schema": { "name": schema.name, "schema": schema.schema, "strict": false },
        }));
        let resp = self.chat(body).await?;
        parse_json_content(&resp.content).ok_or_else(|| GenerationError::Malformed {
            schema: schema.name,
            reason: "response was not a JSON object".into(),
        })
    }
}

/// Accepts bare JSON or JSON wrapped in a markdown code fence.
fn parse_json_content(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str::<Value>(unfenced.trim()).ok().filter(Value::is_object)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Sample {
        value: u32,
    }

    impl Fillable for Sample {
        const SCHEMA_NAME: &'static str = "sample";
    }

    #[test]
    fn messages_put_system_first_and_prompt_last() {
        let req = ModelRequest::new(&EffectiveSettings::default(), "question")
            .with_system("be brief")
            .with_history(vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")]);
        let roles: Vec<_> = req.messages().into_iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(req.messages().last().unwrap().content, "question");
    }

    #[test]
    fn schema_drops_meta_key() {
        let schema = Sample::output_schema();
        assert_eq!(schema.name, "sample");
        assert!(schema.schema.get("$schema").is_none());
        assert!(schema.schema["properties"].get("value").is_some());
    }

    #[test]
    fn fenced_json_is_accepted() {
        assert_eq!(parse_json_content("```json\n{\"a\": 1}\n```"), Some(json!({"a": 1})));
        assert_eq!(parse_json_content(" {\"a\": 2} "), Some(json!({"a": 2})));
        assert_eq!(parse_json_content("the answer is 3"), None);
        assert_eq!(parse_json_content("[1, 2]"), None);
    }

    #[tokio::test]
    async fn fill_reports_malformed_shape() {
        let model = scripted::ScriptedModel::new().with("sample", json!({"value": "nope"}));
        let req = ModelRequest::new(&EffectiveSettings::default(), "x");
        let err = fill::<Sample>(&model, req).await.unwrap_err();
        assert!(matches!(err, GenerationError::Malformed { schema: "sample", .. }));
    }

    #[tokio::test]
    async fn openai_client_requests_json_schema_and_parses_content() {
        use axum::{routing::post, Json, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let kind = body["response_format"]["json_schema"]["name"].as_str().unwrap_or("").to_string();
                let content = if kind == "sample" { "{\"value\": 7}".to_string() } else { "plain".to_string() };
                Json(json!({ "model": "mock", "choices": [{ "message": { "content": content } }] }))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = OpenAICompatible::new(format!("http://{}/v1/", addr), None, Duration::from_secs(5)).unwrap();
        let req = ModelRequest::new(&EffectiveSettings::default(), "fill it");
        let sample = fill::<Sample>(&client, req.clone()).await.unwrap();
        assert_eq!(sample.value, 7);

        let text = client.generate(req).await.unwrap();
        assert_eq!(text.content, "plain");
        assert_eq!(text.model, "mock");
    }
}
