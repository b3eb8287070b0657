use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use zeroize::Zeroize;

use super::{ChatEngine, ProviderError, ProviderErrorKind};
use crate::conversation::{AssistantTurn, ContentPart, Conversation, ToolCall, Turn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Named row of engine features, used to reject invalid requests before
/// transmission.
#[derive(Debug, Clone, Copy)]
pub struct EngineCapabilities {
    pub name: &'static str,
    pub context_window: u32,
    pub has_json_mode: bool,
    pub multimodal: bool,
    pub function_calling: bool,
}

static ENGINE_TABLE: [EngineCapabilities; 3] = [
    EngineCapabilities {
        name: "gpt-3.5-turbo",
        context_window: 16_385,
        has_json_mode: true,
        multimodal: false,
        function_calling: true,
    },
    EngineCapabilities {
        name: "gpt-4o",
        context_window: 128_000,
        has_json_mode: true,
        multimodal: true,
        function_calling: true,
    },
    EngineCapabilities {
        name: "gpt-4-turbo",
        context_window: 128_000,
        has_json_mode: true,
        multimodal: true,
        function_calling: true,
    },
];

fn lookup_engine(name: &str) -> Option<&'static EngineCapabilities> {
    ENGINE_TABLE.iter().find(|engine| engine.name == name)
}

fn engine_options() -> String {
    ENGINE_TABLE
        .iter()
        .map(|engine| engine.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Engine-specific settings from the `llmConfig.settings` mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub name: String,
    pub parameters: Value,
}

/// Request tunables. Everything optional is omitted from the wire when
/// unset, except `tool_choice` which the endpoint always receives.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub frequency_penalty: Option<f32>,
    pub logit_bias: Option<HashMap<String, i32>>,
    pub log_probs: Option<bool>,
    pub top_logprobs: Option<u8>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub response_format: Option<HashMap<String, String>>,
    pub seed: Option<i64>,
    pub stop: Option<Value>,
    pub stream: Option<bool>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<Value>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a Conversation,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<&'a HashMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_probs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    n: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Vec<Tool>>,
    tool_choice: &'a Option<Value>,
}

/// The chat-completion envelope the endpoint returns on 200.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub created: i64,
    pub choices: Vec<Choice>,
    pub model: String,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    pub object: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<String>,
    pub index: i32,
    pub message: ChoiceMessage,
    #[serde(default)]
    pub logprobs: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatCompletion {
    /// Convert the first choice into an assistant turn, copying content and
    /// tool calls through.
    pub fn into_assistant(mut self) -> Option<AssistantTurn> {
        if self.choices.is_empty() {
            return None;
        }
        let choice = self.choices.remove(0);

        Some(AssistantTurn {
            role: "assistant".to_string(),
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            name: None,
        })
    }
}

fn in_range(value: f32, low: f32, high: f32) -> bool {
    value >= low && value <= high
}

/// Chat-completions adapter for OpenAI-style endpoints.
pub struct OpenAiEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    pub params: ChatParams,
}

impl Drop for OpenAiEngine {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl OpenAiEngine {
    pub fn new(settings: OpenAiSettings, max_tokens: u16) -> anyhow::Result<Self> {
        let api_key = settings
            .api_key
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|key| !key.is_empty()));

        let api_key = match api_key {
            Some(key) => key,
            None => anyhow::bail!("openai settings received an empty api key"),
        };

        if settings.model.is_empty() {
            anyhow::bail!("openai settings received an empty model name");
        }

        if lookup_engine(&settings.model).is_none() {
            anyhow::bail!(
                "no integrated engine named {}, available options are {}",
                settings.model,
                engine_options()
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build http client: {}", err))?;

        let base_url = settings
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            model: settings.model,
            params: ChatParams {
                max_tokens: Some(u32::from(max_tokens).max(1)),
                temperature: settings.temperature,
                ..ChatParams::default()
            },
        })
    }

    /// Parse the opaque `llmConfig.settings` mapping into an engine.
    pub fn from_config(settings: &serde_yaml::Value, max_tokens: u16) -> anyhow::Result<Self> {
        let settings: OpenAiSettings = serde_yaml::from_value(settings.clone())
            .map_err(|err| anyhow::anyhow!("invalid openai settings: {}", err))?;
        Self::new(settings, max_tokens)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> anyhow::Result<&'static EngineCapabilities> {
        lookup_engine(&self.model).ok_or_else(|| {
            anyhow::anyhow!(
                "no integrated engine named {}, available options are {}",
                self.model,
                engine_options()
            )
        })
    }

    fn validate_params(&self) -> anyhow::Result<()> {
        let params = &self.params;
        let engine = self.capabilities()?;

        if let Some(penalty) = params.frequency_penalty {
            if !in_range(penalty, -2.0, 2.0) {
                anyhow::bail!("frequency penalty must be between -2.0 and 2.0, got {}", penalty);
            }
        }

        if let Some(penalty) = params.presence_penalty {
            if !in_range(penalty, -2.0, 2.0) {
                anyhow::bail!("presence penalty must be between -2.0 and 2.0, got {}", penalty);
            }
        }

        if let Some(temperature) = params.temperature {
            if !in_range(temperature, 0.0, 2.0) {
                anyhow::bail!("temperature must be between 0.0 and 2.0, got {}", temperature);
            }
        }

        if let Some(top_p) = params.top_p {
            if !in_range(top_p, 0.0, 1.0) {
                anyhow::bail!("top p must be between 0.0 and 1.0, got {}", top_p);
            }
        }

        if let Some(top_logprobs) = params.top_logprobs {
            if top_logprobs > 20 {
                anyhow::bail!("top logprobs must be between 0 and 20, got {}", top_logprobs);
            }
        }

        if let Some(max_tokens) = params.max_tokens {
            if max_tokens < 1 {
                anyhow::bail!("max tokens must be at least 1");
            }
        }

        if let Some(format) = &params.response_format {
            validate_response_format(format, engine)?;
        }

        if let Some(tools) = &params.tools {
            for tool in tools {
                validate_tool(tool, engine)?;
            }
        }

        if let Some(choice) = &params.tool_choice {
            validate_tool_choice(choice)?;
        }

        Ok(())
    }

    /// Rewrite every raw base64 image payload into the
    /// `data:image/<type>;base64,<payload>` form the endpoint expects.
    /// Passthrough urls (`http…`, `data:image/…`) are left alone.
    fn adjusted(&self, conversation: &Conversation) -> Conversation {
        let mut adjusted = conversation.clone();

        for turn in adjusted.turns_mut() {
            let Turn::Multimodal(turn) = turn else {
                continue;
            };

            for part in &mut turn.content {
                let ContentPart::ImageUrl { image_url } = part else {
                    continue;
                };

                if image_url.is_passthrough() {
                    continue;
                }

                if let Some(image_type) = &image_url.image_type {
                    image_url.url = format!("data:image/{};base64,{}", image_type, image_url.url);
                }
            }
        }

        adjusted
    }

    fn request_body<'a>(&'a self, conversation: &'a Conversation) -> ChatRequest<'a> {
        let params = &self.params;
        ChatRequest {
            model: &self.model,
            messages: conversation,
            frequency_penalty: params.frequency_penalty,
            logit_bias: params.logit_bias.as_ref(),
            log_probs: params.log_probs,
            top_logprobs: params.top_logprobs,
            max_tokens: params.max_tokens,
            n: 1,
            presence_penalty: params.presence_penalty,
            response_format: params.response_format.as_ref(),
            seed: params.seed,
            stop: params.stop.as_ref(),
            stream: params.stream,
            temperature: params.temperature,
            top_p: params.top_p,
            tools: params.tools.as_ref(),
            tool_choice: &params.tool_choice,
        }
    }
}

fn validate_response_format(
    format: &HashMap<String, String>,
    engine: &EngineCapabilities,
) -> anyhow::Result<()> {
    if format.len() != 1 {
        anyhow::bail!(
            "response format must have exactly one key, detected {} keys",
            format.len()
        );
    }

    let value = match format.get("type") {
        Some(value) => value.as_str(),
        None => anyhow::bail!("response format must have exactly one key named type"),
    };

    if value != "text" && value != "json_object" {
        anyhow::bail!("{} is not a valid response format type", value);
    }

    if value == "json_object" && !engine.has_json_mode {
        anyhow::bail!("engine {} is not json mode capable", engine.name);
    }

    Ok(())
}

fn validate_tool(tool: &Tool, engine: &EngineCapabilities) -> anyhow::Result<()> {
    if tool.kind != "function" {
        anyhow::bail!("a tool can only be of type function, found {}", tool.kind);
    }

    if !engine.function_calling {
        anyhow::bail!("engine {} is not function call capable", engine.name);
    }

    Ok(())
}

fn validate_tool_choice(choice: &Value) -> anyhow::Result<()> {
    if let Some(choice) = choice.as_str() {
        if choice == "auto" || choice == "none" || choice == "required" {
            return Ok(());
        }
        anyhow::bail!("tool choice must be auto, none, or required, found {}", choice);
    }

    let object = match choice.as_object() {
        Some(object) => object,
        None => anyhow::bail!("tool choice must be either a string or an object"),
    };

    match object.get("type").and_then(Value::as_str) {
        Some("function") => {}
        Some(other) => anyhow::bail!("tool choice type must be function, found {}", other),
        None => anyhow::bail!("tool choice object is missing a type key"),
    }

    let function = object
        .get("function")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow::anyhow!("tool choice is missing the function definition object"))?;

    if !function.contains_key("name") {
        anyhow::bail!("tool choice function definition is missing a name");
    }

    Ok(())
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        text.chars().take(limit).collect()
    } else {
        text.to_string()
    }
}

#[async_trait]
impl ChatEngine for OpenAiEngine {
    fn validate(&self, conversation: &Conversation) -> anyhow::Result<()> {
        self.validate_params()?;

        let engine = self.capabilities()?;

        for turn in conversation.turns() {
            turn.validate()?;
        }

        if conversation.has_multimodal() && !engine.multimodal {
            anyhow::bail!("cannot use {} with multimodal turns", engine.name);
        }

        Ok(())
    }

    async fn chat(&self, conversation: &Conversation) -> Result<AssistantTurn, ProviderError> {
        if let Err(err) = self.validate(conversation) {
            return Err(ProviderError {
                kind: ProviderErrorKind::BadRequest,
                status: None,
                message: err.to_string(),
            });
        }

        let adjusted = self.adjusted(conversation);
        let body = self.request_body(&adjusted);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, url = %url, "issuing chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                error!("chat completion request failed: {}", err);
                ProviderError::network(&err)
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| ProviderError::network(&err))?;

        if !status.is_success() {
            error!(status = %status, "provider API error: {}", truncate_chars(&text, 300));
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        debug!("provider response: {}", truncate_chars(&text, 2000));

        let completion: ChatCompletion =
            serde_json::from_str(&text).map_err(|err| ProviderError::malformed(&err))?;

        completion.into_assistant().ok_or_else(|| ProviderError {
            kind: ProviderErrorKind::Unknown,
            status: Some(200),
            message: "no choices in response".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationBuilder, MultimodalTurn, StandardTurn};
    use serde_json::json;

    fn test_engine(model: &str) -> OpenAiEngine {
        OpenAiEngine::new(
            OpenAiSettings {
                api_key: Some("test-key".to_string()),
                model: model.to_string(),
                base_url: None,
                temperature: None,
            },
            500,
        )
        .expect("engine should initialize")
    }

    fn user_conversation() -> Conversation {
        let mut builder = ConversationBuilder::new();
        builder.add_standard(StandardTurn::new("user", "hello"));
        builder.build().unwrap()
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let result = OpenAiEngine::new(
            OpenAiSettings {
                api_key: Some("test-key".to_string()),
                model: "gpt-imaginary".to_string(),
                base_url: None,
                temperature: None,
            },
            500,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_api_key_is_rejected() {
        std::env::remove_var("OPENAI_API_KEY");
        let result = OpenAiEngine::new(
            OpenAiSettings {
                api_key: Some(String::new()),
                model: "gpt-4o".to_string(),
                base_url: None,
                temperature: None,
            },
            500,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parameter_ranges() {
        let conversation = user_conversation();

        let mut engine = test_engine("gpt-4o");
        engine.params.temperature = Some(2.5);
        assert!(engine.validate(&conversation).is_err());

        let mut engine = test_engine("gpt-4o");
        engine.params.frequency_penalty = Some(-3.0);
        assert!(engine.validate(&conversation).is_err());

        let mut engine = test_engine("gpt-4o");
        engine.params.top_p = Some(1.5);
        assert!(engine.validate(&conversation).is_err());

        let mut engine = test_engine("gpt-4o");
        engine.params.top_logprobs = Some(21);
        assert!(engine.validate(&conversation).is_err());

        let mut engine = test_engine("gpt-4o");
        engine.params.temperature = Some(1.0);
        engine.params.top_p = Some(0.9);
        assert!(engine.validate(&conversation).is_ok());
    }

    #[test]
    fn test_response_format_must_be_single_type_key() {
        let conversation = user_conversation();

        let mut engine = test_engine("gpt-4o");
        engine.params.response_format =
            Some(HashMap::from([("type".to_string(), "json_object".to_string())]));
        assert!(engine.validate(&conversation).is_ok());

        let mut engine = test_engine("gpt-4o");
        engine.params.response_format =
            Some(HashMap::from([("format".to_string(), "json_object".to_string())]));
        assert!(engine.validate(&conversation).is_err());

        let mut engine = test_engine("gpt-4o");
        engine.params.response_format =
            Some(HashMap::from([("type".to_string(), "yaml".to_string())]));
        assert!(engine.validate(&conversation).is_err());
    }

    #[test]
    fn test_tool_choice_shapes() {
        let conversation = user_conversation();

        for choice in ["auto", "none", "required"] {
            let mut engine = test_engine("gpt-4o");
            engine.params.tool_choice = Some(json!(choice));
            assert!(engine.validate(&conversation).is_ok(), "{} should be valid", choice);
        }

        let mut engine = test_engine("gpt-4o");
        engine.params.tool_choice = Some(json!("sometimes"));
        assert!(engine.validate(&conversation).is_err());

        let mut engine = test_engine("gpt-4o");
        engine.params.tool_choice =
            Some(json!({"type": "function", "function": {"name": "lookup"}}));
        assert!(engine.validate(&conversation).is_ok());

        let mut engine = test_engine("gpt-4o");
        engine.params.tool_choice = Some(json!({"type": "function", "function": {}}));
        assert!(engine.validate(&conversation).is_err());
    }

    #[test]
    fn test_tools_must_be_functions() {
        let conversation = user_conversation();

        let mut engine = test_engine("gpt-4o");
        engine.params.tools = Some(vec![Tool {
            kind: "retrieval".to_string(),
            function: ToolFunction {
                description: None,
                name: "lookup".to_string(),
                parameters: json!({}),
            },
        }]);
        assert!(engine.validate(&conversation).is_err());
    }

    #[test]
    fn test_multimodal_requires_capable_engine() {
        let mut builder = ConversationBuilder::new();
        let mut turn = MultimodalTurn::new("user");
        turn.push_text("what is in this image?");
        turn.push_image_url("https://example.com/cat.png", None);
        builder.add_multimodal(turn);
        let conversation = builder.build().unwrap();

        let engine = test_engine("gpt-3.5-turbo");
        assert!(engine.validate(&conversation).is_err());

        let engine = test_engine("gpt-4o");
        assert!(engine.validate(&conversation).is_ok());
    }

    #[test]
    fn test_adjust_rewrites_raw_payloads_only() {
        let engine = test_engine("gpt-4o");

        let mut builder = ConversationBuilder::new();
        let mut turn = MultimodalTurn::new("user");
        turn.push_image_bytes(b"pixels", None, "png");
        turn.push_image_url("https://example.com/cat.png", None);
        builder.add_multimodal(turn);
        let conversation = builder.build().unwrap();

        let adjusted = engine.adjusted(&conversation);
        let Turn::Multimodal(turn) = &adjusted.turns()[0] else {
            panic!("expected a multimodal turn");
        };

        let ContentPart::ImageUrl { image_url } = &turn.content[0] else {
            panic!("expected an image part");
        };
        assert!(image_url.url.starts_with("data:image/png;base64,"));

        let ContentPart::ImageUrl { image_url } = &turn.content[1] else {
            panic!("expected an image part");
        };
        assert_eq!(image_url.url, "https://example.com/cat.png");
    }

    #[test]
    fn test_request_body_shape() {
        let engine = test_engine("gpt-4o");
        let conversation = user_conversation();

        let body = serde_json::to_value(engine.request_body(&conversation)).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["n"], 1);
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hello"}]));
        // tool_choice is always on the wire, null when unset
        assert!(body.as_object().unwrap().contains_key("tool_choice"));
        assert_eq!(body["tool_choice"], Value::Null);
        // unset optionals stay off the wire
        assert!(!body.as_object().unwrap().contains_key("temperature"));
        assert!(!body.as_object().unwrap().contains_key("stream"));
    }

    #[test]
    fn test_completion_decodes_into_assistant() {
        let payload = json!({
            "id": "chatcmpl-1",
            "created": 1_700_000_000,
            "model": "gpt-4o",
            "system_fingerprint": "fp_1",
            "object": "chat.completion",
            "choices": [{
                "finish_reason": "stop",
                "index": 0,
                "message": {"role": "assistant", "content": "[{\"one\":1}]"}
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let completion: ChatCompletion = serde_json::from_value(payload).unwrap();
        let assistant = completion.into_assistant().unwrap();

        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content.as_deref(), Some("[{\"one\":1}]"));
        assert!(assistant.tool_calls.is_none());
        assert!(assistant.validate().is_ok());
    }

    #[test]
    fn test_completion_with_tool_calls() {
        let payload = json!({
            "id": "chatcmpl-2",
            "created": 1_700_000_000,
            "model": "gpt-4o",
            "object": "chat.completion",
            "choices": [{
                "finish_reason": "tool_calls",
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{}"}
                    }]
                }
            }]
        });

        let completion: ChatCompletion = serde_json::from_value(payload).unwrap();
        let assistant = completion.into_assistant().unwrap();

        assert!(assistant.content.is_none());
        assert_eq!(assistant.tool_calls.as_ref().unwrap().len(), 1);
        assert!(assistant.validate().is_ok());
    }

    #[test]
    fn test_empty_choices_is_an_error_shape() {
        let payload = json!({
            "id": "chatcmpl-3",
            "created": 1_700_000_000,
            "model": "gpt-4o",
            "object": "chat.completion",
            "choices": []
        });

        let completion: ChatCompletion = serde_json::from_value(payload).unwrap();
        assert!(completion.into_assistant().is_none());
    }
}
