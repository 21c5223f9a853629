//! Chat completion request and response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Request
// =============================================================================

/// Chat completion request body as sent on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Model to use (e.g., "openai/gpt-oss-120b", "deepseek/deepseek-v3.2")
    pub model: String,

    /// Conversation messages
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens in completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Structured output mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Reasoning hint for models that think before answering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,

    /// Upstream provider routing (OpenRouter extension)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderPreferences>,
}

impl CompletionRequest {
    /// Build a two-message request (system + user) from call options.
    pub fn from_options(
        system: impl Into<String>,
        user: impl Into<String>,
        options: &CompletionOptions,
    ) -> Self {
        let response_format = match (&options.json_schema, options.json_object) {
            (Some(schema), _) => Some(ResponseFormat::json_schema(schema.clone())),
            (None, true) => Some(ResponseFormat::json_object()),
            (None, false) => None,
        };

        Self {
            model: options.model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format,
            reasoning: options
                .reasoning_effort
                .as_ref()
                .map(|effort| Reasoning { effort: effort.clone() }),
            provider: options.provider.clone(),
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// `response_format` body field.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaFormat>,
}

impl ResponseFormat {
    /// Strict schema mode: the server guarantees a document matching `schema`.
    pub fn json_schema(schema: JsonSchemaFormat) -> Self {
        Self {
            format_type: "json_schema".to_string(),
            json_schema: Some(schema),
        }
    }

    /// Free-form JSON mode: the server only promises some JSON object.
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object".to_string(),
            json_schema: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

impl JsonSchemaFormat {
    pub fn strict(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            strict: true,
            schema,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reasoning {
    pub effort: String,
}

/// Provider routing preferences.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderPreferences {
    pub order: Vec<String>,
    pub allow_fallbacks: bool,
}

impl ProviderPreferences {
    /// Pin requests to exactly one upstream provider.
    pub fn only(provider: impl Into<String>) -> Self {
        Self {
            order: vec![provider.into()],
            allow_fallbacks: false,
        }
    }
}

// =============================================================================
// Call options
// =============================================================================

/// Per-call options for [`crate::LlmClient::complete`].
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_schema: Option<JsonSchemaFormat>,
    pub json_object: bool,
    pub reasoning_effort: Option<String>,
    pub provider: Option<ProviderPreferences>,
    pub timeout: Duration,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            json_schema: None,
            json_object: false,
            reasoning_effort: None,
            provider: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json_schema(mut self, schema: JsonSchemaFormat) -> Self {
        self.json_schema = Some(schema);
        self
    }

    pub fn json_object(mut self) -> Self {
        self.json_object = true;
        self
    }

    pub fn reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn provider(mut self, provider: ProviderPreferences) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponseRaw {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_option_wins_over_json_object() {
        let options = CompletionOptions::new("m")
            .json_object()
            .json_schema(JsonSchemaFormat::strict("route", serde_json::json!({})));

        let request = CompletionRequest::from_options("sys", "user", &options);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "route");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn test_json_object_request_body() {
        let options = CompletionOptions::new("deepseek/deepseek-v3.2")
            .temperature(0.1)
            .json_object()
            .provider(ProviderPreferences::only("DeepSeek"))
            .reasoning_effort(Some("low".into()));

        let body = serde_json::to_value(CompletionRequest::from_options("s", "u", &options)).unwrap();

        assert_eq!(body["model"], "deepseek/deepseek-v3.2");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "u");
        assert_eq!(body["response_format"], serde_json::json!({"type": "json_object"}));
        assert_eq!(body["reasoning"]["effort"], "low");
        assert_eq!(body["provider"]["order"][0], "DeepSeek");
        assert_eq!(body["provider"]["allow_fallbacks"], false);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let body =
            serde_json::to_value(CompletionRequest::from_options("s", "u", &CompletionOptions::new("m")))
                .unwrap();
        let obj = body.as_object().unwrap();

        assert!(!obj.contains_key("temperature"));
        assert!(!obj.contains_key("max_tokens"));
        assert!(!obj.contains_key("response_format"));
        assert!(!obj.contains_key("reasoning"));
        assert!(!obj.contains_key("provider"));
    }
}
