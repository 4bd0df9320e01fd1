//! Model gateway abstraction and an OpenAI-compatible streaming client.
//!
//! The [`ModelGateway`] trait decouples the loop from the provider. Tests use
//! scripted gateways that return predetermined responses without network access.

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::truncate::{max_words, truncate_left};
use crate::core::types::Role;
use crate::io::classifier::{self, Classifier};
use crate::io::config::LoopConfig;
use crate::io::process::Echo;
use crate::io::prompt::system_prompt;

/// Abstraction over model providers.
pub trait ModelGateway {
    /// Run `prompt` under the system prompt bound to `role` and return the trimmed response.
    fn inference(&self, role: Role, prompt: &str) -> Result<String>;

    /// True when the class index of `text` is at least `threshold`.
    fn classify(&self, text: &str, threshold: usize) -> Result<bool>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed server-sent-events line of a streaming chat completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

/// Parse one SSE line from `/chat/completions` with `stream: true`.
pub fn parse_stream_line(line: &str) -> Result<StreamLine> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    if data.is_empty() {
        return Ok(StreamLine::Skip);
    }
    let chunk: ChatChunk = serde_json::from_str(data).context("parse stream chunk")?;
    if let Some(error) = chunk.error {
        bail!("provider error: {error}");
    }
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if content.is_empty() {
        return Ok(StreamLine::Skip);
    }
    Ok(StreamLine::Delta(content))
}

/// Collect the deltas of a streamed chat completion, passing each to `on_delta`.
///
/// A read error or a bad chunk after some text has arrived ends the stream and
/// keeps the partial response. Before any text it is an error.
pub fn read_chat_stream<R: BufRead>(reader: R, mut on_delta: impl FnMut(&str)) -> Result<String> {
    let mut text = String::new();
    for line in reader.lines() {
        let parsed = line
            .context("read chat stream")
            .and_then(|line| parse_stream_line(&line));
        match parsed {
            Ok(StreamLine::Delta(delta)) => {
                on_delta(&delta);
                text.push_str(&delta);
            }
            Ok(StreamLine::Done) => break,
            Ok(StreamLine::Skip) => {}
            Err(err) if text.is_empty() => return Err(err),
            Err(err) => {
                warn!(err = %format!("{err:#}"), received = text.len(), "chat stream interrupted");
                break;
            }
        }
    }
    Ok(text)
}

/// Gateway for providers exposing the OpenAI chat completions API.
pub struct OpenAiGateway {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    context_length: usize,
    classifier: Box<dyn Classifier>,
    echo: Echo,
}

impl OpenAiGateway {
    pub fn from_config(cfg: &LoopConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.api.request_timeout_secs))
            .build()
            .context("build model http client")?;
        let api_key = match &cfg.api.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    warn!(var = %var, "api key variable is unset; sending requests without a key");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.api.base_url.trim_end_matches('/')),
            api_key,
            model: cfg.model.name.clone(),
            temperature: cfg.model.temperature,
            context_length: cfg.model.context_length,
            classifier: classifier::from_config(&cfg.classifier)?,
            echo: Echo::Silent,
        })
    }

    /// Mirror streamed tokens to stdout as they arrive.
    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    /// Stream one chat completion for `prompt` under `system` and return the trimmed text.
    ///
    /// The prompt is cut to the model's word budget, keeping its most recent words.
    pub fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let prompt = truncate_left(prompt, max_words(self.context_length));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            stream: true,
        };

        debug!(endpoint = %self.endpoint, prompt_bytes = prompt.len(), "sending chat request");
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().context("send chat request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("provider returned {status}: {}", body.trim()));
        }

        let text = read_chat_stream(BufReader::new(response), |delta| self.echo_delta(delta))?;
        self.echo_delta("\n");

        info!(response_bytes = text.len(), "chat response received");
        Ok(text.trim().to_string())
    }

    fn echo_delta(&self, delta: &str) {
        if self.echo != Echo::Console {
            return;
        }
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(delta.as_bytes()).and_then(|()| out.flush()) {
            warn!(err = %e, "failed to echo model output");
        }
    }
}

impl ModelGateway for OpenAiGateway {
    #[instrument(skip_all, fields(role = role.as_str(), model = %self.model))]
    fn inference(&self, role: Role, prompt: &str) -> Result<String> {
        self.complete(system_prompt(role), prompt)
    }

    fn classify(&self, text: &str, threshold: usize) -> Result<bool> {
        let index = self.classifier.class_index(text)?;
        debug!(index, threshold, "classification");
        Ok(index >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"print("}}]}"#;
        assert_eq!(
            parse_stream_line(line).expect("parse"),
            StreamLine::Delta("print(".to_string())
        );
    }

    #[test]
    fn skips_role_only_and_keepalive_lines() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_line(role_only).expect("parse"), StreamLine::Skip);
        assert_eq!(parse_stream_line(": keep-alive").expect("parse"), StreamLine::Skip);
        assert_eq!(parse_stream_line("").expect("parse"), StreamLine::Skip);
    }

    #[test]
    fn recognizes_done_marker() {
        assert_eq!(parse_stream_line("data: [DONE]").expect("parse"), StreamLine::Done);
    }

    #[test]
    fn surfaces_provider_errors() {
        let line = r#"data: {"error":{"message":"model not found"}}"#;
        let err = parse_stream_line(line).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    fn chunk(content: &str) -> String {
        format!(r#"data: {{"choices":[{{"delta":{{"content":"{content}"}}}}]}}"#)
    }

    #[test]
    fn stream_collects_deltas_until_done() {
        let body = format!("{}\n\n{}\n\ndata: [DONE]\n\n{}\n", chunk("Hello"), chunk(" world"), chunk("!"));
        let mut echoed = Vec::new();
        let text = read_chat_stream(Cursor::new(body), |d| echoed.push(d.to_string())).expect("read");
        assert_eq!(text, "Hello world");
        assert_eq!(echoed, vec!["Hello", " world"]);
    }

    #[test]
    fn stream_keeps_partial_text_on_a_bad_chunk() {
        let body = format!(
            "{}\n{}\ndata: {{\"error\":{{\"message\":\"overloaded\"}}}}\n{}\n",
            chunk("print("),
            chunk("1)"),
            chunk("ignored")
        );
        let text = read_chat_stream(Cursor::new(body), |_| {}).expect("read");
        assert_eq!(text, "print(1)");
    }

    #[test]
    fn stream_error_before_any_text_is_an_error() {
        let body = "data: {\"error\":{\"message\":\"model not found\"}}\n";
        let err = read_chat_stream(Cursor::new(body), |_| {}).unwrap_err();
        assert!(format!("{err:#}").contains("model not found"));
    }

    #[test]
    fn malformed_chunk_is_an_error() {
        assert!(parse_stream_line("data: {not json").is_err());
    }
}
