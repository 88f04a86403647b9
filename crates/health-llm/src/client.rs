//! Chat clients for local (Ollama) and remote (OpenAI-compatible) models.
//!
//! Both are synchronous and make exactly one HTTP request per call.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::prompt::Prompt;

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-r1";

const TEMPERATURE: f64 = 0.3;
const CONTEXT_WINDOW: u32 = 6144;

/// A chat model that can answer a [`Prompt`].
pub trait LlmClient {
    /// Provider name for logs (`ollama`, `openai`).
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Send `prompt` and return the full response text.
    ///
    /// Text is handed to `on_chunk` as it arrives; non-streaming clients call
    /// it once with the whole answer.
    fn complete(&self, prompt: &Prompt, on_chunk: &mut dyn FnMut(&str)) -> Result<String, LlmError>;
}

/// Settings needed to build a client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// `ollama` or `openai`.
    pub provider: String,
    pub model: String,
    /// Base URL; the provider default when `None`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub stream: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(300),
            stream: true,
        }
    }
}

/// Build the client named by `config.provider`.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
    let http = HttpClient::builder().timeout(config.timeout).build()?;
    match config.provider.to_ascii_lowercase().as_str() {
        "ollama" => Ok(Box::new(OllamaClient {
            http,
            model: config.model.clone(),
            base_url: base_url(config.endpoint.as_deref(), DEFAULT_OLLAMA_ENDPOINT),
            stream: config.stream,
        })),
        "openai" => {
            let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
            if api_key.is_none() && config.endpoint.is_none() {
                return Err(LlmError::Config(
                    "the openai provider needs an API key (--api-key or HEALTH_QUERY_API_KEY)"
                        .to_string(),
                ));
            }
            Ok(Box::new(OpenAiClient {
                http,
                model: config.model.clone(),
                api_key,
                base_url: base_url(config.endpoint.as_deref(), DEFAULT_OPENAI_ENDPOINT),
            }))
        }
        other => Err(LlmError::Config(format!("unknown provider: {}", other))),
    }
}

fn base_url(endpoint: Option<&str>, default: &str) -> String {
    endpoint
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Turn a non-success status into [`LlmError::Status`].
fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(LlmError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

// ── Ollama ────────────────────────────────────────────────────────────────────

pub struct OllamaClient {
    http: HttpClient,
    model: String,
    base_url: String,
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChunk {
    fn text(&self) -> &str {
        match self.response.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => self.message.as_ref().map(|m| m.content.as_str()).unwrap_or(""),
        }
    }
}

impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &Prompt, on_chunk: &mut dyn FnMut(&str)) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "options": {"temperature": TEMPERATURE, "num_ctx": CONTEXT_WINDOW},
            "stream": self.stream,
        });

        info!("Contacting Ollama at {} (model {})", self.base_url, self.model);
        let response = check_status(self.http.post(url).json(&body).send()?)?;

        let mut collected = String::new();
        if self.stream {
            for line in BufReader::new(response).lines() {
                let line = line.map_err(|e| LlmError::Network(e.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                let chunk: OllamaChunk = serde_json::from_str(&line)?;
                if let Some(err) = chunk.error {
                    return Err(LlmError::Api(err));
                }
                let text = chunk.text();
                if !text.is_empty() {
                    on_chunk(text);
                    collected.push_str(text);
                }
            }
        } else {
            let chunk: OllamaChunk = response.json()?;
            if let Some(err) = chunk.error {
                return Err(LlmError::Api(err));
            }
            collected.push_str(chunk.text());
            if !collected.is_empty() {
                on_chunk(&collected);
            }
        }

        debug!("Received {} characters from Ollama", collected.len());
        if collected.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(collected)
    }
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────────

pub struct OpenAiClient {
    http: HttpClient,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &Prompt, on_chunk: &mut dyn FnMut(&str)) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": TEMPERATURE,
        });

        info!("Contacting {} (model {})", self.base_url, self.model);
        let mut request = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = check_status(request.send()?)?;

        let parsed: CompletionResponse = response.json()?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::Empty)?;

        on_chunk(&text);
        Ok(text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
