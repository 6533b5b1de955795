//! Chat-completion client for an OpenAI-compatible endpoint.

use std::io::{BufRead, BufReader};

use easel_contracts::conversation::ConversationTurn;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::http::{build_http_client, response_json_or_error, vendor_message};

const SERVICE: &str = "Chat";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionOptions {
    /// Conversational replies.
    pub const CHAT: Self = Self {
        max_tokens: 1024,
        temperature: 0.7,
    };

    /// Short deterministic label answers.
    pub const LABEL: Self = Self {
        max_tokens: 10,
        temperature: 0.0,
    };
}

/// Seam over the remote chat service so routing and classification can be
/// exercised without a network.
pub trait ChatBackend: Send + Sync {
    /// Single non-streamed completion; returns the first choice's text.
    fn complete(&self, messages: &[ConversationTurn], options: CompletionOptions)
        -> Result<String>;

    /// Streamed completion. `on_delta` sees each content fragment in order;
    /// the return value is the concatenated reply.
    fn stream(
        &self,
        messages: &[ConversationTurn],
        options: CompletionOptions,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String>;
}

pub struct OpenAiCompatibleChat {
    endpoint: String,
    api_key: String,
    model: String,
    http: HttpClient,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &EngineConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: format!("{}/chat/completions", config.chat_api_base),
            api_key: api_key.into(),
            model: config.chat_model.clone(),
            http: build_http_client(config.request_timeout)?,
        })
    }

    fn payload(
        &self,
        messages: &[ConversationTurn],
        options: CompletionOptions,
        stream: bool,
    ) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": stream,
        })
    }
}

impl ChatBackend for OpenAiCompatibleChat {
    fn complete(
        &self,
        messages: &[ConversationTurn],
        options: CompletionOptions,
    ) -> Result<String> {
        debug!(endpoint = %self.endpoint, model = %self.model, "chat completion");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&self.payload(messages, options, false))
            .send()?;
        let payload = response_json_or_error(SERVICE, response)?;
        first_choice_text(&payload).ok_or_else(|| {
            EngineError::vendor(SERVICE, 200, "completion response had no choices")
        })
    }

    fn stream(
        &self,
        messages: &[ConversationTurn],
        options: CompletionOptions,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String> {
        debug!(endpoint = %self.endpoint, model = %self.model, "chat stream");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(&self.payload(messages, options, true))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EngineError::vendor(
                SERVICE,
                status.as_u16(),
                vendor_message(&body),
            ));
        }
        read_event_stream(BufReader::new(response), on_delta)
    }
}

fn first_choice_text(payload: &Value) -> Option<String> {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_stream_line(line: &str) -> Result<StreamLine> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    if data.is_empty() {
        return Ok(StreamLine::Skip);
    }
    let chunk: Value = serde_json::from_str(data)?;
    if let Some(error) = chunk.get("error") {
        return Err(EngineError::vendor(
            SERVICE,
            200,
            vendor_message(&json!({ "error": error }).to_string()),
        ));
    }
    let delta = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if delta.is_empty() {
        return Ok(StreamLine::Skip);
    }
    Ok(StreamLine::Delta(delta.to_string()))
}

/// Consumes server-sent `data:` lines until `[DONE]` or end of body.
fn read_event_stream<R: BufRead>(reader: R, on_delta: &mut dyn FnMut(&str)) -> Result<String> {
    let mut answer = String::new();
    for line in reader.lines() {
        let line = line.map_err(|err| EngineError::Transport(err.to_string()))?;
        match parse_stream_line(&line)? {
            StreamLine::Delta(delta) => {
                on_delta(&delta);
                answer.push_str(&delta);
            }
            StreamLine::Done => break,
            StreamLine::Skip => {}
        }
    }
    Ok(answer)
}
