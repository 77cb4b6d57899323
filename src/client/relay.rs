use futures::{ Stream, StreamExt };
use log::{ debug, error };
use std::pin::Pin;

use crate::error::{ RelayError, Result };
use crate::models::chat::ChatRequest;
use crate::server::api::CHAT_ROUTE;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// HTTP side of the chat surface: one POST per user turn, body exposed as
/// raw byte chunks.
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Self {
        Self::new_with_client(base_url, reqwest::Client::new())
    }

    pub fn new_with_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CHAT_ROUTE),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        debug!("POST {}", self.endpoint);

        let resp = self.http.post(&self.endpoint).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            error!("Relay responded with status {}: {}", status, message);
            return Err(RelayError::Upstream { status: status.as_u16(), message });
        }

        Ok(
            Box::pin(
                resp
                    .bytes_stream()
                    .map(|chunk| chunk.map(|b| b.to_vec()).map_err(RelayError::from))
            )
        )
    }
}

/// Incremental UTF-8 decoder. A multi-byte sequence split across two network
/// chunks is held back until it is complete.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
