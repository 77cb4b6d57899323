pub mod chat;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
    pub system_instruction: Option<String>,
    pub enable_search: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            completion_model: None,
            base_url: None,
            system_instruction: None,
            enable_search: false,
        }
    }
}

impl LlmConfig {
    pub fn model_or_default(&self) -> String {
        self.completion_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string())
    }

    pub fn base_url_or_default(&self) -> String {
        self.base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string())
    }
}
