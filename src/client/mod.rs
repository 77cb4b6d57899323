//! Client chat surface: conversation state, the streaming read loop against
//! the relay, and voice input.

pub mod relay;
pub mod session;
pub mod speech;
pub mod terminal;

pub use relay::{ RelayClient, Utf8ChunkDecoder };
pub use session::ChatSession;
pub use speech::{ RecognitionEvent, SpeechCapture, SpeechRecognizer };
