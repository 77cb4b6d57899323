use futures::{ Stream, StreamExt };
use log::{ error, info, warn };

use super::relay::{ RelayClient, Utf8ChunkDecoder };
use super::speech::{ RecognitionEvent, SpeechCapture, SpeechRecognizer };
use crate::error::{ RelayError, Result };
use crate::models::chat::{ ChatRequest, Role, Turn };

pub const STREAM_INTERRUPTED: &str = "Response ended early";

/// State of one chat surface: the conversation log, the pending input and
/// the loading/error indicators. Lives as long as the UI session; nothing is
/// persisted.
#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<Turn>,
    input: String,
    loading: bool,
    error: Option<String>,
    system_instruction: Option<String>,
    stream_error_sentinel: Option<String>,
    reply_open: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction;
        self
    }

    pub fn with_stream_error_sentinel(mut self, sentinel: Option<String>) -> Self {
        self.stream_error_sentinel = sentinel.filter(|s| !s.is_empty());
        self
    }

    pub fn messages(&self) -> &[Turn] {
        &self.messages
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Appends recognized speech to the input field.
    pub fn append_transcript(&mut self, text: &str) {
        self.input.push_str(text);
    }

    /// Feeds one recognizer event through `speech`. Only committed (final)
    /// text reaches the input; interim text stays in the capture preview.
    pub fn apply_speech_event<R: SpeechRecognizer>(
        &mut self,
        speech: &mut SpeechCapture<R>,
        event: RecognitionEvent
    ) -> bool {
        match speech.handle_event(event) {
            Some(text) => {
                self.append_transcript(&text);
                true
            }
            None => false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn can_submit(&self) -> bool {
        !self.loading && !self.input.trim().is_empty()
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.reply_open = false;
    }

    /// Commits the current input as a user turn and returns the request to
    /// send. The whole non-empty log goes out as `contents`.
    pub fn begin_turn(&mut self) -> Result<ChatRequest> {
        if self.loading {
            return Err(RelayError::invalid_request("A request is already in flight"));
        }
        if self.input.trim().is_empty() {
            return Err(RelayError::invalid_request("No prompt provided"));
        }

        let prompt = std::mem::take(&mut self.input);
        self.loading = true;
        self.error = None;
        self.reply_open = false;
        self.messages.push(Turn::user(prompt));

        let contents = self.messages
            .iter()
            .filter(|t| !t.text.trim().is_empty())
            .cloned()
            .collect();
        Ok(ChatRequest::conversation(contents, self.system_instruction.clone()))
    }

    /// Merges a decoded fragment into the assistant turn of the current
    /// exchange, opening that turn on the first non-empty fragment.
    pub fn push_chunk(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.reply_open {
            if let Some(last) = self.messages.last_mut() {
                if last.role == Role::Assistant {
                    last.text.push_str(text);
                    return;
                }
            }
        }
        self.messages.push(Turn::assistant(text));
        self.reply_open = true;
    }

    pub fn finish_turn(&mut self) {
        if let Some(sentinel) = self.stream_error_sentinel.clone() {
            if self.reply_open && self.strip_sentinel(&sentinel) {
                warn!("Relay reported an interrupted stream");
                self.error = Some(STREAM_INTERRUPTED.to_string());
            }
        }
        self.loading = false;
        self.reply_open = false;
    }

    pub fn fail_turn(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.loading = false;
        self.reply_open = false;
    }

    fn strip_sentinel(&mut self, sentinel: &str) -> bool {
        let Some(last) = self.messages.last_mut() else {
            return false;
        };
        if last.role != Role::Assistant || !last.text.ends_with(sentinel) {
            return false;
        }
        let keep = last.text.len() - sentinel.len();
        last.text.truncate(keep);
        if last.text.is_empty() {
            self.messages.pop();
        }
        true
    }

    /// Reads a reply body to completion, decoding and merging every chunk.
    /// `on_chunk` sees each decoded fragment as it lands.
    pub async fn read_reply<S, F>(&mut self, mut body: S, mut on_chunk: F) -> Result<()>
        where S: Stream<Item = Result<Vec<u8>>> + Unpin, F: FnMut(&str)
    {
        let mut decoder = Utf8ChunkDecoder::new();
        while let Some(chunk) = body.next().await {
            let text = decoder.decode(&chunk?);
            self.push_chunk(&text);
            on_chunk(&text);
        }
        let tail = decoder.finish();
        self.push_chunk(&tail);
        on_chunk(&tail);
        Ok(())
    }

    /// Runs one full exchange against the relay.
    pub async fn send(&mut self, relay: &RelayClient) -> Result<()> {
        self.send_with(relay, |_| {}).await
    }

    pub async fn send_with<F>(&mut self, relay: &RelayClient, on_chunk: F) -> Result<()>
        where F: FnMut(&str)
    {
        let request = self.begin_turn()?;

        let outcome = match relay.open_stream(&request).await {
            Ok(body) => self.read_reply(body, on_chunk).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.finish_turn();
                info!("Exchange complete, log has {} message(s)", self.messages.len());
                Ok(())
            }
            Err(e) => {
                error!("Chat request failed: {}", e);
                self.fail_turn(e.to_string());
                Err(e)
            }
        }
    }
}
