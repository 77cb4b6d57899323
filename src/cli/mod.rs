use clap::{ Parser, Subcommand };

use crate::llm::{ LlmConfig, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Gemini Args ---
    /// API key for the Gemini API. Startup continues without it; upstream calls will fail.
    #[arg(long, env = "GEMINI_API_KEY", default_value = "", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Gemini model used for generation (e.g., gemini-2.5-flash-lite, gemini-2.5-pro)
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    /// Base URL of the Gemini API.
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    /// Default system instruction, used when a request does not carry its own.
    #[arg(long, env = "SYSTEM_INSTRUCTION")]
    pub system_instruction: Option<String>,

    /// Attach the Google Search grounding tool to every generation request.
    #[arg(long, env = "GEMINI_GOOGLE_SEARCH", default_value = "false")]
    pub enable_search: bool,

    // --- Server Args ---
    /// Host address and port for the relay to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Marker written as the final fragment when the upstream stream breaks off.
    /// Unset means a broken stream simply ends early.
    #[arg(long, env = "STREAM_ERROR_SENTINEL")]
    pub stream_error_sentinel: Option<String>,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the relay server (default).
    Serve,
    /// Chat with a running relay from the terminal.
    Chat {
        /// Base URL of the relay to talk to.
        #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:3000")]
        relay_url: String,
    },
}

impl Args {
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: Some(self.gemini_api_key.clone()).filter(|k| !k.is_empty()),
            completion_model: Some(self.gemini_model.clone()),
            base_url: Some(self.gemini_base_url.clone()),
            system_instruction: self.system_instruction.clone(),
            enable_search: self.enable_search,
        }
    }

    pub fn stream_error_sentinel(&self) -> Option<String> {
        self.stream_error_sentinel.clone().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["gemini-voice-relay"]).unwrap();
        assert_eq!(args.gemini_model, DEFAULT_GEMINI_MODEL);
        assert!(args.command.is_none());
        assert!(!args.enable_tls);
    }

    #[test]
    fn chat_subcommand_takes_relay_url() {
        let args = Args::try_parse_from([
            "gemini-voice-relay",
            "chat",
            "--relay-url",
            "http://relay:8080",
        ]).unwrap();
        match args.command {
            Some(Command::Chat { relay_url }) => assert_eq!(relay_url, "http://relay:8080"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn empty_values_are_treated_as_unset() {
        let args = Args::try_parse_from([
            "gemini-voice-relay",
            "--gemini-api-key",
            "",
            "--stream-error-sentinel",
            "",
        ]).unwrap();
        assert!(args.llm_config().api_key.is_none());
        assert!(args.stream_error_sentinel().is_none());
    }
}
