use async_trait::async_trait;
use log::{ info, warn };
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, ChatClient, ChunkStream };
use crate::error::{ RelayError, Result };
use crate::llm::LlmConfig;
use crate::models::chat::Conversation;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    google_search: serde_json::Value,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
struct GoogleError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Parses one server-sent-events line of a `streamGenerateContent?alt=sse`
/// response. Only `data:` lines produce output; the text parts of the first
/// candidate are joined into one fragment.
pub(crate) fn parse_gemini_line(line: &str) -> Option<Result<String>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let chunk = match serde_json::from_str::<GoogleChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Skipping unparseable Gemini stream line: {} ({})", data, e);
            return None;
        }
    };

    if let Some(err) = chunk.error {
        return Some(
            Err(RelayError::Stream(format!("Gemini stream error {}: {}", err.code, err.message)))
        );
    }

    let text: String = chunk.candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content.parts
                .iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        None
    } else {
        Some(Ok(text))
    }
}

pub struct GeminiChatClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system_instruction: Option<String>,
    enable_search: bool,
}

impl GeminiChatClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        let model = model.strip_prefix("models/").unwrap_or(&model).to_string();
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            system_instruction: None,
            enable_search: false,
        }
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_search(mut self, enable: bool) -> Self {
        self.enable_search = enable;
        self
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            warn!("Gemini API key is empty; upstream calls will be rejected");
        }

        Ok(
            Self::new(api_key, config.model_or_default(), config.base_url_or_default())
                .with_system_instruction(config.system_instruction.clone())
                .with_search(config.enable_search)
        )
    }

    fn stream_url(&self) -> String {
        format!("{}/v1beta/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model)
    }

    fn build_request(&self, conversation: &Conversation) -> GeminiStreamRequest {
        let contents = conversation.turns
            .iter()
            .map(|turn| GeminiContent {
                role: Some(turn.role.as_gemini()),
                parts: vec![GeminiPart { text: turn.text.clone() }],
            })
            .collect();

        let system_instruction = conversation.system_instruction
            .clone()
            .or_else(|| self.system_instruction.clone())
            .map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart { text }],
            });

        let tools = if self.enable_search {
            Some(vec![GeminiTool { google_search: serde_json::json!({}) }])
        } else {
            None
        };

        GeminiStreamRequest { contents, system_instruction, tools }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_generate(&self, conversation: &Conversation) -> Result<ChunkStream> {
        info!(
            "GeminiChatClient::stream_generate() → model={} turns={} search={}",
            self.model,
            conversation.turns.len(),
            self.enable_search
        );

        let payload = self.build_request(conversation);
        let headers = vec![
            ("x-goog-api-key".to_string(), self.api_key.clone()),
            ("Content-Type".to_string(), "application/json".to_string())
        ];

        http_stream_generate(
            &self.http,
            &self.stream_url(),
            payload,
            parse_gemini_line,
            Some(headers)
        ).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
