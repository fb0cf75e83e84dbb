//! Streaming chat client for a local Ollama server
//!
//! Posts the system prompt, remembered turns and the new command to
//! `/api/chat` with streaming enabled, and yields the content of each NDJSON
//! line as it arrives.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::LlmConfig;
use crate::pipeline::Turn;
use crate::voice::{ChunkStream, LanguageModel};
use crate::{Error, Result};

/// Chunks buffered between the HTTP reader and the generator
const CHUNK_BUFFER: usize = 32;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Build the message list: system prompt, then each turn, then the input
fn build_messages<'a>(system: &'a str, history: &'a [Turn], input: &'a str) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    if !system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    for turn in history {
        messages.push(ChatMessage {
            role: "user",
            content: &turn.input,
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: &turn.output,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: input,
    });
    messages
}

/// One decoded NDJSON line
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Content(String),
    Done,
}

/// Splits a byte stream into NDJSON lines, tolerating lines split across reads
#[derive(Debug, Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed bytes and decode every complete line
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Line>> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(line) = decode_line(&raw)? {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Decode whatever remains once the stream ends
    fn finish(&mut self) -> Result<Option<Line>> {
        let raw = std::mem::take(&mut self.buffer);
        decode_line(&raw)
    }
}

fn decode_line(raw: &[u8]) -> Result<Option<Line>> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk = serde_json::from_str(text)?;
    if let Some(error) = chunk.error {
        return Err(Error::Model(error));
    }
    if chunk.done {
        return Ok(Some(Line::Done));
    }
    Ok(chunk
        .message
        .map(|m| m.content)
        .filter(|c| !c.is_empty())
        .map(Line::Content))
}

/// [`LanguageModel`] backed by Ollama's chat API
pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    context_tokens: u32,
    request_timeout: Duration,
}

impl OllamaModel {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            context_tokens: config.context_tokens,
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn stream(&self, history: &[Turn], input: &str) -> Result<ChunkStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: build_messages(&self.system_prompt, history, input),
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
                num_ctx: self.context_tokens,
            },
        };

        tracing::debug!(
            model = %self.model,
            turns = history.len(),
            "starting chat stream"
        );

        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.post(&self.url).json(&request).send(),
        )
        .await
        .map_err(|_| Error::Model(format!("no response within {:?}", self.request_timeout)))??;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("Ollama error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = NdjsonDecoder::default();

            while let Some(read) = bytes.next().await {
                let lines = match read.map_err(Error::from).and_then(|b| decoder.feed(&b)) {
                    Ok(lines) => lines,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                for line in lines {
                    match line {
                        Line::Content(text) => {
                            // Receiver dropped: the generator stopped listening
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        Line::Done => return,
                    }
                }
            }

            match decoder.finish() {
                Ok(Some(Line::Content(text))) => {
                    let _ = tx.send(Ok(text)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_include_history_in_order() {
        let history = vec![Turn::new("hi", "hello there")];
        let messages = build_messages("be brief", &history, "what time is it");

        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(messages[3].content, "what time is it");
    }

    #[test]
    fn test_empty_system_prompt_omitted() {
        let messages = build_messages("", &[], "hello");
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = NdjsonDecoder::default();

        let first = decoder
            .feed(br#"{"message":{"role":"assistant","content":"It is"},"done":false}
{"message":{"role":"assis"#)
            .unwrap();
        assert_eq!(first, vec![Line::Content("It is".to_string())]);

        let second = decoder
            .feed(b"tant\",\"content\":\" sunny.\"},\"done\":false}\n{\"done\":true}\n")
            .unwrap();
        assert_eq!(
            second,
            vec![Line::Content(" sunny.".to_string()), Line::Done]
        );
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_decoder_surfaces_server_error() {
        let mut decoder = NdjsonDecoder::default();
        let result = decoder.feed(b"{\"error\":\"model not found\"}\n");
        assert!(matches!(result, Err(Error::Model(_))));
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = NdjsonDecoder::default();
        assert!(decoder.feed(b"not json\n").is_err());
    }
}
