use async_trait::async_trait;
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use super::{ create_streaming_response, ChatClient, ChunkStream };
use crate::error::{ RelayError, Result };
use crate::models::chat::Conversation;

#[derive(Debug, Clone)]
enum MockReply {
    Chunks(Vec<String>),
    FailBeforeStream(String),
    FailMidStream {
        chunks: Vec<String>,
        message: String,
    },
    /// Repeats `chunk` until the receiver goes away.
    Endless(String),
}

/// In-process [`ChatClient`] that replays a scripted reply for every call.
pub struct MockChatClient {
    reply: MockReply,
    call_count: Arc<Mutex<usize>>,
    emitted: Arc<Mutex<usize>>,
    requests: Arc<Mutex<Vec<Conversation>>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::with_chunks(Vec::<String>::new())
    }

    pub fn with_chunks<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self::from_reply(MockReply::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    pub fn failing_before_stream(message: impl Into<String>) -> Self {
        Self::from_reply(MockReply::FailBeforeStream(message.into()))
    }

    pub fn failing_mid_stream<S: Into<String>>(
        chunks: impl IntoIterator<Item = S>,
        message: impl Into<String>
    ) -> Self {
        Self::from_reply(MockReply::FailMidStream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            message: message.into(),
        })
    }

    pub fn endless(chunk: impl Into<String>) -> Self {
        Self::from_reply(MockReply::Endless(chunk.into()))
    }

    fn from_reply(reply: MockReply) -> Self {
        Self {
            reply,
            call_count: Arc::new(Mutex::new(0)),
            emitted: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Number of chunks handed to the receiver so far, across all calls.
    pub fn emitted_count(&self) -> usize {
        *self.emitted.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<Conversation> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn stream_generate(&self, conversation: &Conversation) -> Result<ChunkStream> {
        *self.call_count.lock().unwrap() += 1;
        self.requests.lock().unwrap().push(conversation.clone());

        let emitted = self.emitted.clone();
        let (chunks, failure) = match self.reply.clone() {
            MockReply::FailBeforeStream(message) => {
                return Err(RelayError::Upstream { status: 401, message });
            }
            MockReply::Endless(chunk) => {
                return Ok(
                    create_streaming_response(move |tx| async move {
                        while tx.send(Ok(chunk.clone())).await.is_ok() {
                            *emitted.lock().unwrap() += 1;
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                    })
                );
            }
            MockReply::Chunks(chunks) => (chunks, None),
            MockReply::FailMidStream { chunks, message } => (chunks, Some(message)),
        };

        Ok(
            create_streaming_response(move |tx| async move {
                for chunk in chunks {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                    *emitted.lock().unwrap() += 1;
                }
                if let Some(message) = failure {
                    let _ = tx.send(Err(RelayError::Stream(message))).await;
                }
            })
        )
    }

    fn get_model(&self) -> String {
        "mock".to_string()
    }
}
