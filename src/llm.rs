use crate::error::{Error, Result};
use crate::http::HttpClient;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// LLM provider; determines API format and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Groq,
    OpenRouter,
    /// Any OpenAI-compatible API (together.ai, local ollama, etc.)
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "http://localhost:11434/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama3-8b-8192",
            Self::OpenRouter => "meta-llama/llama-3.1-8b-instruct",
            Self::OpenAi => "llama3",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    /// Local OpenAI-compatible servers usually run without a key.
    fn requires_key(&self) -> bool {
        !matches!(self, Self::OpenAi)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    api_key_env: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    base_url: String,
    http: HttpClient,
}

// -- Anthropic format --

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Msg<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

// -- OpenAI-compatible format --

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Msg<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

// -- Shared --

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: String,
        max_tokens: u32,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = HttpClient::new(concat!("livemind/", env!("CARGO_PKG_VERSION")))?;
        let base_url = base_url.unwrap_or_else(|| provider.default_base_url().into());
        let api_key_env = provider.default_api_key_env().to_string();
        Ok(Self {
            provider,
            api_key,
            api_key_env,
            model,
            max_tokens,
            temperature: 0.7,
            base_url,
            http,
        })
    }

    /// Build from config, reading the API key from the specified env var.
    pub fn from_config(
        provider: Provider,
        model: String,
        max_tokens: u32,
        api_key_env: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let env_var = api_key_env.unwrap_or_else(|| provider.default_api_key_env().into());
        let api_key = std::env::var(&env_var).unwrap_or_default();
        let mut client = Self::new(provider, api_key, model, max_tokens, base_url)?;
        client.api_key_env = env_var;
        Ok(client)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Env var the key was (or would be) read from.
    pub fn api_key_env(&self) -> &str {
        &self.api_key_env
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() || !self.provider.requires_key()
    }

    pub async fn complete(&self, system: &str, user_message: &str) -> Result<String> {
        debug!(provider = ?self.provider, model = %self.model, "sending LLM request");
        let (url, body) = self.request_body(system, user_message, false)?;
        let headers = self.auth_headers();
        let header_refs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let response_text = self
            .http
            .post_json_raw(&url, &body, &header_refs)
            .await
            .map_err(|e| {
                warn!(provider = ?self.provider, "LLM API error: {e}");
                e
            })?;

        match self.provider {
            Provider::Anthropic => {
                let resp: AnthropicResponse = serde_json::from_str(&response_text)
                    .map_err(|e| Error::parse(format!("parse Anthropic response: {e}")))?;
                Ok(resp
                    .content
                    .into_iter()
                    .filter_map(|b| b.text)
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            _ => {
                let resp: OpenAiResponse = serde_json::from_str(&response_text)
                    .map_err(|e| Error::parse(format!("parse LLM response: {e}")))?;
                resp.choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| Error::parse("empty response from LLM"))
            }
        }
    }

    /// Start a streamed completion. Text deltas arrive on the returned channel
    /// in order; the channel closes when the provider signals the end.
    pub async fn complete_stream(
        &self,
        system: &str,
        user_message: &str,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        debug!(provider = ?self.provider, model = %self.model, "sending streaming LLM request");
        let (url, body) = self.request_body(system, user_message, true)?;
        let headers = self.auth_headers();
        let header_refs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let resp = self
            .http
            .post_json_streaming(&url, &body, &header_refs)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(Error::http(e.to_string()))).await;
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    match parse_stream_payload(&provider, &payload) {
                        StreamPiece::Text(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        StreamPiece::Done => return,
                        StreamPiece::Failed(message) => {
                            let _ = tx.send(Err(Error::api("llm-stream", message))).await;
                            return;
                        }
                        StreamPiece::Skip => {}
                    }
                }
            }
        });

        Ok(rx)
    }

    fn request_body(&self, system: &str, user_message: &str, stream: bool) -> Result<(String, String)> {
        let body = match self.provider {
            Provider::Anthropic => serde_json::to_string(&AnthropicRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                system,
                messages: vec![Msg {
                    role: "user",
                    content: user_message,
                }],
                stream,
            }),
            _ => serde_json::to_string(&OpenAiRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system,
                    },
                    Msg {
                        role: "user",
                        content: user_message,
                    },
                ],
                stream,
            }),
        }
        .map_err(|e| Error::parse(format!("serialize request: {e}")))?;

        let url = match self.provider {
            Provider::Anthropic => format!("{}/messages", self.base_url),
            _ => format!("{}/chat/completions", self.base_url),
        };
        Ok((url, body))
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        match self.provider {
            Provider::Anthropic => vec![
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
            _ if self.api_key.is_empty() => Vec::new(),
            _ => vec![("Authorization", format!("Bearer {}", self.api_key))],
        }
    }
}

/// Incremental decoder for `text/event-stream` bodies. Yields the payload of
/// each complete `data:` line.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum StreamPiece {
    Text(String),
    Done,
    Failed(String),
    Skip,
}

pub(crate) fn parse_stream_payload(provider: &Provider, payload: &str) -> StreamPiece {
    if payload == "[DONE]" {
        return StreamPiece::Done;
    }
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return StreamPiece::Skip,
    };

    match provider {
        Provider::Anthropic => match value["type"].as_str() {
            Some("content_block_delta") => value["delta"]["text"]
                .as_str()
                .map(|t| StreamPiece::Text(t.to_string()))
                .unwrap_or(StreamPiece::Skip),
            Some("message_stop") => StreamPiece::Done,
            Some("error") => StreamPiece::Failed(
                value["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string(),
            ),
            _ => StreamPiece::Skip,
        },
        _ => {
            if let Some(err) = value.get("error") {
                return StreamPiece::Failed(
                    err["message"].as_str().unwrap_or("unknown stream error").to_string(),
                );
            }
            match value["choices"][0]["delta"]["content"].as_str() {
                Some(t) if !t.is_empty() => StreamPiece::Text(t.to_string()),
                _ => StreamPiece::Skip,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\":").is_empty());
        let out = d.push(b"1}\n\ndata: [DONE]\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn decoder_ignores_event_and_comment_lines() {
        let mut d = SseDecoder::default();
        let out = d.push(b": keep-alive\r\nevent: message_start\r\ndata: x\r\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn decoder_keeps_multibyte_chars_split_across_chunks() {
        let mut d = SseDecoder::default();
        let bytes = "data: héllo\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(d.push(a).is_empty());
        assert_eq!(d.push(b), vec!["héllo".to_string()]);
    }

    #[test]
    fn openai_delta_parsed() {
        let p = parse_stream_payload(
            &Provider::Groq,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        );
        assert_eq!(p, StreamPiece::Text("Hel".into()));
        assert_eq!(
            parse_stream_payload(&Provider::Groq, r#"{"choices":[{"delta":{}}]}"#),
            StreamPiece::Skip
        );
        assert_eq!(parse_stream_payload(&Provider::Groq, "[DONE]"), StreamPiece::Done);
    }

    #[test]
    fn anthropic_events_parsed() {
        let p = parse_stream_payload(
            &Provider::Anthropic,
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#,
        );
        assert_eq!(p, StreamPiece::Text("Hi".into()));
        assert_eq!(
            parse_stream_payload(&Provider::Anthropic, r#"{"type":"message_stop"}"#),
            StreamPiece::Done
        );
        assert_eq!(
            parse_stream_payload(
                &Provider::Anthropic,
                r#"{"type":"error","error":{"message":"overloaded"}}"#
            ),
            StreamPiece::Failed("overloaded".into())
        );
    }

    #[test]
    fn unconfigured_without_key() {
        let c = LlmClient::new(Provider::Groq, String::new(), "m".into(), 10, None).unwrap();
        assert!(!c.is_configured());
        let c = LlmClient::new(Provider::OpenAi, String::new(), "m".into(), 10, None).unwrap();
        assert!(c.is_configured());
    }

    #[test]
    fn openai_request_omits_stream_flag_when_false() {
        let c = LlmClient::new(Provider::Groq, "k".into(), "m".into(), 10, None).unwrap();
        let (url, body) = c.request_body("sys", "hi", false).unwrap();
        assert_eq!(url, "https://api.groq.com/openai/v1/chat/completions");
        assert!(!body.contains("stream"));
        let (_, body) = c.request_body("sys", "hi", true).unwrap();
        assert!(body.contains("\"stream\":true"));
    }
}
