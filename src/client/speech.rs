//! Voice input for the chat surface.
//!
//! The recognizer itself is an external capability (the browser's continuous
//! speech recognition in the web front-end). [`SpeechCapture`] owns the
//! listening state machine around it:
//!
//! ```text
//!   idle --start()--> listening --stop() / Ended / Error--> idle
//! ```
//!
//! Interim results only update a preview; final results are handed back to
//! the caller to append to the text input.

use log::{ debug, error, info, warn };

use crate::error::Result;

pub const RECOGNITION_LANG: &str = "ja-JP";
pub const UNSUPPORTED_MESSAGE: &str = "このブラウザは音声認識に対応していません。";
pub const RECOGNITION_ERROR_MESSAGE: &str = "音声認識中にエラーが発生しました。";
/// Appended after every committed utterance.
pub const SENTENCE_TERMINATOR: &str = "。";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub lang: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            lang: RECOGNITION_LANG.to_string(),
            continuous: true,
            interim_results: true,
        }
    }
}

/// Capability boundary to a platform speech recognizer. Results come back
/// asynchronously as [`RecognitionEvent`]s.
pub trait SpeechRecognizer: Send {
    fn start(&mut self, config: &RecognitionConfig) -> Result<()>;
    fn stop(&mut self);
}

/// Placeholder for platforms with no recognizer. It cannot be constructed.
pub enum NoRecognizer {}

impl SpeechRecognizer for NoRecognizer {
    fn start(&mut self, _config: &RecognitionConfig) -> Result<()> {
        match *self {}
    }

    fn stop(&mut self) {
        match *self {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self { transcript: transcript.into(), is_final: false }
    }

    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self { transcript: transcript.into(), is_final: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    /// `results` is the recognizer's full result list for the session; only
    /// entries from `result_index` on are new.
    Result {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    Error(String),
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    Idle,
    Listening,
}

pub struct SpeechCapture<R: SpeechRecognizer> {
    recognizer: Option<R>,
    config: RecognitionConfig,
    state: ListeningState,
    preview: String,
    error: Option<String>,
}

impl<R: SpeechRecognizer> SpeechCapture<R> {
    /// `None` means the platform has no recognizer: the feature stays
    /// disabled and the unsupported message is reported.
    pub fn new(recognizer: Option<R>) -> Self {
        let error = if recognizer.is_none() {
            warn!("Speech recognition is not available on this platform");
            Some(UNSUPPORTED_MESSAGE.to_string())
        } else {
            None
        };
        Self {
            recognizer,
            config: RecognitionConfig::default(),
            state: ListeningState::Idle,
            preview: String::new(),
            error,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn state(&self) -> ListeningState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == ListeningState::Listening
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn start(&mut self) {
        if self.state == ListeningState::Listening {
            debug!("start() while already listening ignored");
            return;
        }
        let Some(recognizer) = self.recognizer.as_mut() else {
            return;
        };
        match recognizer.start(&self.config) {
            Ok(()) => {
                info!("Speech recognition started ({})", self.config.lang);
                self.state = ListeningState::Listening;
            }
            Err(e) => {
                error!("Speech recognition failed to start: {}", e);
                self.error = Some(RECOGNITION_ERROR_MESSAGE.to_string());
            }
        }
    }

    pub fn stop(&mut self) {
        if self.state == ListeningState::Idle {
            return;
        }
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.stop();
        }
        self.state = ListeningState::Idle;
        info!("Speech recognition stopped");
    }

    pub fn toggle(&mut self) {
        match self.state {
            ListeningState::Idle => self.start(),
            ListeningState::Listening => self.stop(),
        }
    }

    /// Applies one recognizer event. Returns text to append to the input
    /// when the new results are all final.
    pub fn handle_event(&mut self, event: RecognitionEvent) -> Option<String> {
        match event {
            RecognitionEvent::Started => {
                self.state = ListeningState::Listening;
                None
            }
            RecognitionEvent::Ended => {
                self.state = ListeningState::Idle;
                None
            }
            RecognitionEvent::Error(reason) => {
                error!("Speech recognition error: {}", reason);
                self.state = ListeningState::Idle;
                self.error = Some(RECOGNITION_ERROR_MESSAGE.to_string());
                None
            }
            RecognitionEvent::Result { result_index, results } => {
                let fresh = results.get(result_index..).unwrap_or(&[]);
                let text: String = fresh
                    .iter()
                    .map(|r| r.transcript.as_str())
                    .collect();
                if text.is_empty() {
                    return None;
                }
                if fresh.iter().all(|r| r.is_final) {
                    self.preview.clear();
                    Some(format!("{}{}", text, SENTENCE_TERMINATOR))
                } else {
                    self.preview = text;
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use std::sync::{ Arc, Mutex };

    #[derive(Default, Clone)]
    struct FakeRecognizer {
        starts: Arc<Mutex<usize>>,
        stops: Arc<Mutex<usize>>,
        fail_start: bool,
    }

    impl SpeechRecognizer for FakeRecognizer {
        fn start(&mut self, config: &RecognitionConfig) -> Result<()> {
            assert_eq!(config.lang, "ja-JP");
            assert!(config.continuous && config.interim_results);
            if self.fail_start {
                return Err(RelayError::Speech("not-allowed".into()));
            }
            *self.starts.lock().unwrap() += 1;
            Ok(())
        }

        fn stop(&mut self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn capture() -> (SpeechCapture<FakeRecognizer>, FakeRecognizer) {
        let fake = FakeRecognizer::default();
        (SpeechCapture::new(Some(fake.clone())), fake)
    }

    #[test]
    fn stop_while_idle_is_a_noop() {
        let (mut speech, fake) = capture();
        speech.stop();
        assert_eq!(speech.state(), ListeningState::Idle);
        assert_eq!(*fake.stops.lock().unwrap(), 0);
        assert_eq!(speech.error(), None);
    }

    #[test]
    fn start_while_listening_does_not_open_second_session() {
        let (mut speech, fake) = capture();
        speech.start();
        speech.handle_event(RecognitionEvent::Started);
        speech.start();
        assert!(speech.is_listening());
        assert_eq!(*fake.starts.lock().unwrap(), 1);
    }

    #[test]
    fn toggle_cycles_idle_listening_idle() {
        let (mut speech, fake) = capture();
        speech.toggle();
        assert!(speech.is_listening());
        speech.toggle();
        assert!(!speech.is_listening());
        assert_eq!(*fake.stops.lock().unwrap(), 1);

        speech.toggle();
        speech.handle_event(RecognitionEvent::Ended);
        assert_eq!(speech.state(), ListeningState::Idle);
    }

    #[test]
    fn interim_results_only_touch_preview() {
        let (mut speech, _) = capture();
        speech.start();
        let committed = speech.handle_event(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::final_result("こん"), RecognitionResult::interim("にちは")],
        });
        assert_eq!(committed, None);
        assert_eq!(speech.preview(), "こんにちは");
    }

    #[test]
    fn final_results_are_committed_with_terminator() {
        let (mut speech, _) = capture();
        speech.start();
        speech.handle_event(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::interim("今日は")],
        });
        let committed = speech.handle_event(RecognitionEvent::Result {
            result_index: 1,
            results: vec![
                RecognitionResult::final_result("古い"),
                RecognitionResult::final_result("今日はいい天気")
            ],
        });
        assert_eq!(committed.as_deref(), Some("今日はいい天気。"));
        assert_eq!(speech.preview(), "");
    }

    #[test]
    fn empty_transcript_is_ignored() {
        let (mut speech, _) = capture();
        speech.handle_event(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::interim("え")],
        });
        let committed = speech.handle_event(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::final_result("")],
        });
        assert_eq!(committed, None);
        assert_eq!(speech.preview(), "え");

        let out_of_range = speech.handle_event(RecognitionEvent::Result {
            result_index: 5,
            results: vec![],
        });
        assert_eq!(out_of_range, None);
    }

    #[test]
    fn recognition_error_returns_to_idle_without_retry() {
        let (mut speech, fake) = capture();
        speech.start();
        speech.handle_event(RecognitionEvent::Error("network".into()));

        assert_eq!(speech.state(), ListeningState::Idle);
        assert_eq!(speech.error(), Some(RECOGNITION_ERROR_MESSAGE));
        assert_eq!(*fake.starts.lock().unwrap(), 1);
    }

    #[test]
    fn failed_start_stays_idle() {
        let fake = FakeRecognizer { fail_start: true, ..Default::default() };
        let mut speech = SpeechCapture::new(Some(fake));
        speech.start();
        assert_eq!(speech.state(), ListeningState::Idle);
        assert_eq!(speech.error(), Some(RECOGNITION_ERROR_MESSAGE));
    }

    #[test]
    fn unsupported_platform_disables_feature() {
        let mut speech = SpeechCapture::<NoRecognizer>::new(None);
        assert!(!speech.is_supported());
        assert_eq!(speech.error(), Some(UNSUPPORTED_MESSAGE));

        speech.start();
        speech.stop();
        assert_eq!(speech.state(), ListeningState::Idle);
    }
}
