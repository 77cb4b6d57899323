pub mod gemini;
pub mod mock;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use log::{ debug, error };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::gemini::GeminiChatClient;
use super::LlmConfig;
use crate::error::{ RelayError, Result };
use crate::models::chat::Conversation;

pub use self::mock::MockChatClient;

/// Text fragments in arrival order. An `Err` item means the upstream broke
/// off mid-stream; nothing follows it.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Opens a streaming generation for `conversation`.
    ///
    /// Failures that happen before the first fragment (transport errors,
    /// non-success status) are returned as `Err`.
    async fn stream_generate(&self, conversation: &Conversation) -> Result<ChunkStream>;

    fn get_model(&self) -> String;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> ChunkStream
    where
        F: FnOnce(mpsc::Sender<Result<String>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>> {
    let client = GeminiChatClient::from_config(config)?;
    Ok(Arc::new(client))
}

/// Splits a byte stream into lines, keeping partial lines across reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    // Bytes of `pending` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every line completed by `bytes`, without the line terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let mut line = &self.pending[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        lines
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).trim_end_matches('\r').to_string();
        self.pending.clear();
        Some(line)
    }
}

/// POSTs `payload` and turns the line-oriented response body into a
/// [`ChunkStream`] using `line_parser`.
///
/// The request is sent and its status checked before this returns, so
/// pre-stream failures surface as `Err` rather than as a stream item.
pub async fn http_stream_generate(
    client: &reqwest::Client,
    url: &str,
    payload: impl serde::Serialize,
    line_parser: fn(&str) -> Option<Result<String>>,
    headers: Option<Vec<(String, String)>>
) -> Result<ChunkStream> {
    let mut req = client.post(url).json(&payload);

    if let Some(header_list) = headers {
        for (name, value) in header_list {
            req = req.header(name, value);
        }
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(RelayError::Upstream { status: status.as_u16(), message });
    }

    let mut bytes = resp.bytes_stream();

    Ok(
        create_streaming_response(move |tx| async move {
            let mut lines = LineBuffer::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        for line in lines.push(&buf) {
                            if let Some(item) = line_parser(&line) {
                                let stop = item.is_err();
                                if tx.send(item).await.is_err() {
                                    debug!("Receiver dropped, abandoning upstream stream");
                                    return;
                                }
                                if stop {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Upstream body read failed: {}", e);
                        let _ = tx.send(Err(RelayError::Http(e))).await;
                        return;
                    }
                }
            }
            if let Some(line) = lines.finish() {
                if let Some(item) = line_parser(&line) {
                    let _ = tx.send(item).await;
                }
            }
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        assert_eq!(buf.push(b":1}\r\n\r\ndata: x"), vec!["data: {\"a\":1}".to_string(), String::new()]);
        assert_eq!(buf.push(b"y\n"), vec!["data: xy".to_string()]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn line_buffer_keeps_multibyte_text_split_across_reads() {
        let text = "data: こんにちは\n".as_bytes();
        let mut buf = LineBuffer::new();
        assert!(buf.push(&text[..8]).is_empty());
        assert_eq!(buf.push(&text[8..]), vec!["data: こんにちは".to_string()]);
    }

    #[test]
    fn line_buffer_does_not_rescan_long_partial_line() {
        let mut buf = LineBuffer::new();
        let payload = "x".repeat(4096);
        for piece in payload.as_bytes().chunks(7) {
            assert!(buf.push(piece).is_empty());
            assert_eq!(buf.scanned, buf.pending.len());
        }
        let lines = buf.push(b"\r\nnext");
        assert_eq!(lines, vec![payload]);
        assert_eq!(buf.scanned, 4);
        assert_eq!(buf.finish().as_deref(), Some("next"));
    }

    #[test]
    fn line_buffer_flushes_unterminated_tail() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: tail").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("data: tail"));
        assert_eq!(buf.finish(), None);
    }

    #[tokio::test]
    async fn streaming_response_yields_in_send_order() {
        let stream = create_streaming_response(|tx| async move {
            for part in ["a", "b", "c"] {
                let _ = tx.send(Ok(part.to_string())).await;
            }
        });
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["a", "b", "c"]);
    }
}
