//! HTTP generation backends.
//!
//! Speaks either the OpenAI-compatible chat completions API or the Ollama
//! generate API. Chat completions are requested whole; Ollama streams
//! newline-delimited chunks which are joined into one final string.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult, GenerationError};
use crate::domain::models::{Generation, GenerationContext, GeneratorBackend, GeneratorConfig};
use crate::domain::ports::Generator;

/// Instruction sent with every request so the backend reports confidence.
const SYSTEM_PROMPT: &str = "Answer the request. On the final line write `Confidence: <number between 0 and 1>` describing how confident you are in the answer.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
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
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Generator backed by a remote HTTP service.
pub struct HttpGenerator {
    config: GeneratorConfig,
    api_key: Option<String>,
    client: Client,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                DomainError::ValidationFailed(format!("Failed to create HTTP client: {e}"))
            })?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Use an explicit API key instead of the configured environment variable.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.backend {
            GeneratorBackend::OpenaiChat => format!("{base}/v1/chat/completions"),
            GeneratorBackend::Ollama => format!("{base}/api/generate"),
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.config.timeout_secs)
        } else {
            GenerationError::from(err)
        }
    }

    async fn request_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let request = match self.config.backend {
            GeneratorBackend::OpenaiChat => request.json(&ChatRequest {
                model: &self.config.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    ChatMessage {
                        role: "user",
                        content: prompt,
                    },
                ],
                temperature: self.config.temperature,
                stream: false,
            }),
            GeneratorBackend::Ollama => request.json(&OllamaRequest {
                model: &self.config.model,
                prompt,
                system: SYSTEM_PROMPT,
                stream: true,
                options: OllamaOptions {
                    temperature: self.config.temperature,
                },
            }),
        };

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                code: status.as_u16(),
                body,
            });
        }

        match self.config.backend {
            GeneratorBackend::OpenaiChat => {
                let body = response.text().await.map_err(|e| self.map_send_error(e))?;
                let parsed: ChatResponse = serde_json::from_str(&body)
                    .map_err(|e| GenerationError::Parse(e.to_string()))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| GenerationError::Parse("response has no choices".to_string()))
            }
            GeneratorBackend::Ollama => self.collect_ollama_stream(response).await,
        }
    }

    /// Join the streamed `response` fragments until a chunk reports `done`.
    async fn collect_ollama_stream(&self, response: Response) -> Result<String, GenerationError> {
        let mut stream = std::pin::pin!(response.bytes_stream());
        let mut pending: Vec<u8> = Vec::new();
        let mut text = String::new();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| self.map_send_error(e))?;
            pending.extend_from_slice(&bytes);
            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                if append_ollama_chunk(&line, &mut text)? {
                    return Ok(text);
                }
            }
        }

        // Trailing chunk without a newline
        append_ollama_chunk(&pending, &mut text)?;
        Ok(text)
    }
}

/// Parse one NDJSON line into `text`. Returns whether the stream is done.
fn append_ollama_chunk(line: &[u8], text: &mut String) -> Result<bool, GenerationError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(false);
    }
    let chunk: OllamaChunk =
        serde_json::from_slice(line).map_err(|e| GenerationError::Parse(e.to_string()))?;
    text.push_str(&chunk.response);
    Ok(chunk.done)
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<Generation, GenerationError> {
        let raw = self.request_text(prompt).await?;
        let (text, reported) = split_confidence(&raw);
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        let confidence = calibrate(
            reported.unwrap_or(self.config.base_confidence),
            self.config.calibration,
        );
        debug!(
            generator = %self.config.name,
            phase = %context.phase,
            reported = ?reported,
            confidence,
            "generation completed"
        );

        Ok(Generation {
            text,
            confidence,
            reasoning: None,
        })
    }
}

/// Apply a per-generator calibration multiplier to a self-reported score.
pub fn calibrate(confidence: f64, calibration: f64) -> f64 {
    let scaled = confidence * calibration;
    if scaled.is_finite() {
        scaled.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Strip a trailing `Confidence: x` line and return it parsed.
///
/// Accepts fractions (`0.8`) and percentages (`80%`).
pub fn split_confidence(raw: &str) -> (String, Option<f64>) {
    let trimmed = raw.trim_end();
    let (body, last_line) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..idx], trimmed[idx + 1..].trim()),
        None => ("", trimmed.trim()),
    };

    let parsed = last_line
        .to_lowercase()
        .trim_start_matches(['*', '_', '`'])
        .strip_prefix("confidence")
        .map(|rest| {
            rest.trim_start_matches(['*', '_', '`', ':', ' '])
                .trim_end_matches(['*', '_', '`', '.'])
                .to_string()
        })
        .and_then(|value| parse_score(&value));

    match parsed {
        Some(score) => (body.trim().to_string(), Some(score)),
        None => (trimmed.trim().to_string(), None),
    }
}

fn parse_score(value: &str) -> Option<f64> {
    let value = value.trim();
    let (number, percent) = match value.strip_suffix('%') {
        Some(n) => (n.trim(), true),
        None => (value, false),
    };
    let parsed: f64 = number.parse().ok()?;
    let score = if percent || parsed > 1.0 { parsed / 100.0 } else { parsed };
    (0.0..=1.0).contains(&score).then_some(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_confidence_fraction() {
        let (text, conf) = split_confidence("Use a mutex.\nConfidence: 0.82\n");
        assert_eq!(text, "Use a mutex.");
        assert_eq!(conf, Some(0.82));
    }

    #[test]
    fn test_split_confidence_percent_and_markdown() {
        let (text, conf) = split_confidence("Line one\nLine two\n**Confidence:** 75%");
        assert_eq!(text, "Line one\nLine two");
        assert!((conf.unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_split_confidence_missing() {
        let (text, conf) = split_confidence("Just an answer.");
        assert_eq!(text, "Just an answer.");
        assert_eq!(conf, None);

        let (text, conf) = split_confidence("Answer\nConfidence: very high");
        assert_eq!(text, "Answer\nConfidence: very high");
        assert_eq!(conf, None);
    }

    #[test]
    fn test_confidence_only_is_empty_text() {
        let (text, conf) = split_confidence("Confidence: 0.9");
        assert!(text.is_empty());
        assert_eq!(conf, Some(0.9));
    }

    #[test]
    fn test_calibrate() {
        assert!((calibrate(0.9, 0.5) - 0.45).abs() < 1e-9);
        assert!((calibrate(0.9, 2.0) - 1.0).abs() < 1e-9);
        assert!(calibrate(f64::NAN, 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_append_ollama_chunk() {
        let mut text = String::new();
        assert!(!append_ollama_chunk(b"{\"response\":\"Hel\",\"done\":false}\n", &mut text).unwrap());
        assert!(!append_ollama_chunk(b"  \n", &mut text).unwrap());
        assert!(append_ollama_chunk(b"{\"response\":\"lo\",\"done\":true}", &mut text).unwrap());
        assert_eq!(text, "Hello");
        assert!(append_ollama_chunk(b"not json", &mut text).is_err());
    }

    #[test]
    fn test_endpoints() {
        let chat = HttpGenerator::new(GeneratorConfig::new("a", "http://x/", "m")).unwrap();
        assert_eq!(chat.endpoint(), "http://x/v1/chat/completions");

        let ollama = HttpGenerator::new(
            GeneratorConfig::new("b", "http://y", "m").with_backend(GeneratorBackend::Ollama),
        )
        .unwrap();
        assert_eq!(ollama.endpoint(), "http://y/api/generate");
    }
}
