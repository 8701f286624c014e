//! Image analysis collaborator.
//!
//! The store never depends on this module. It turns a stored image into a
//! data URI, runs the preflight checks (key present, key shaped right,
//! payload under the provider limit) and hands the request to an
//! [`ImageAnalyzer`]. The bundled client speaks the OpenAI-compatible chat
//! completions protocol, which all supported providers expose.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing;

use crate::models::{AiProvider, TestType, UserSettings};

/// Providers reject requests above this size.
pub const MAX_PAYLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// JSON envelope and prompt on top of the encoded image.
const REQUEST_OVERHEAD_BYTES: u64 = 4 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No API key configured")]
    MissingKey,

    #[error("API key format is not valid for {0}")]
    InvalidKeyFormat(&'static str),

    #[error("Image too large: about {estimated_bytes} bytes after encoding")]
    TooLarge { estimated_bytes: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Provider quota exceeded")]
    QuotaExceeded,

    #[error("Provider returned no content")]
    NoContent,

    #[error("Provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can describe a medical image.
pub trait ImageAnalyzer {
    fn analyze(&self, image_data_uri: &str, test_type_label: &str) -> Result<String, AnalysisError>;
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub provider: AiProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl AnalysisConfig {
    /// Provider defaults for the key and provider stored in the user's settings.
    pub fn from_settings(settings: &UserSettings) -> Result<Self, AnalysisError> {
        let api_key = settings
            .ai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AnalysisError::MissingKey)?;
        let provider = settings.ai_provider.unwrap_or(AiProvider::OpenAi);
        validate_key_format(provider, api_key)?;

        Ok(Self {
            provider,
            api_key: api_key.to_string(),
            model: default_model(provider).to_string(),
            base_url: default_base_url(provider).to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }
}

pub fn default_base_url(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::OpenAi => "https://api.openai.com/v1",
        AiProvider::Anthropic => "https://api.anthropic.com/v1",
        AiProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
    }
}

pub fn default_model(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::OpenAi => "gpt-4o-mini",
        AiProvider::Anthropic => "claude-3-5-haiku-latest",
        AiProvider::Gemini => "gemini-1.5-flash",
    }
}

/// Cheap shape check so obviously wrong keys fail before any request.
pub fn validate_key_format(provider: AiProvider, key: &str) -> Result<(), AnalysisError> {
    let ok = match provider {
        AiProvider::OpenAi => key.starts_with("sk-") && !key.starts_with("sk-ant-") && key.len() >= 20,
        AiProvider::Anthropic => key.starts_with("sk-ant-") && key.len() >= 20,
        AiProvider::Gemini => key.starts_with("AIza") && key.len() >= 30,
    };
    if ok && !key.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(AnalysisError::InvalidKeyFormat(provider.as_str()))
    }
}

/// Request size for an image of `image_len` raw bytes.
pub fn estimated_payload_bytes(image_len: u64) -> u64 {
    image_len.div_ceil(3) * 4 + REQUEST_OVERHEAD_BYTES
}

/// Read an image and encode it as a `data:` URI, refusing oversized files.
pub fn to_data_uri(path: &Path) -> Result<String, AnalysisError> {
    let estimated_bytes = estimated_payload_bytes(std::fs::metadata(path)?.len());
    if estimated_bytes > MAX_PAYLOAD_BYTES {
        return Err(AnalysisError::TooLarge { estimated_bytes });
    }

    let bytes = std::fs::read(path)?;
    let mime = mime_guess::from_path(path).first_or(mime_guess::mime::IMAGE_JPEG);
    Ok(format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes)))
}

/// Run `analyzer` over a stored image.
pub fn analyze_image(
    analyzer: &dyn ImageAnalyzer,
    image_path: &Path,
    test_type: &str,
) -> Result<String, AnalysisError> {
    let data_uri = to_data_uri(image_path)?;
    let label = TestType::label_for(test_type);
    tracing::info!(test_type, "Requesting image analysis");
    analyzer.analyze(&data_uri, &label)
}

pub fn analysis_prompt(test_type_label: &str) -> String {
    format!(
        "This image shows a medical document of type: {test_type_label}. \
         Extract every value, unit and reference range you can read, then give a short \
         plain-language summary. Do not give a diagnosis."
    )
}

/// Map a non-success HTTP status to a typed failure.
pub fn error_from_status(status: u16, body: &str) -> AnalysisError {
    match status {
        401 | 403 => AnalysisError::Provider {
            status,
            body: "API key was rejected".to_string(),
        },
        402 => AnalysisError::QuotaExceeded,
        413 => AnalysisError::TooLarge { estimated_bytes: 0 },
        429 if body.contains("insufficient_quota") || body.contains("quota") => {
            AnalysisError::QuotaExceeded
        }
        429 => AnalysisError::RateLimited,
        _ => AnalysisError::Provider {
            status,
            body: body.to_string(),
        },
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: String },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// First non-empty completion text, or `NoContent`.
pub fn parse_completion(body: &str) -> Result<String, AnalysisError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| AnalysisError::Provider {
        status: 200,
        body: format!("unreadable response: {e}"),
    })?;

    parsed
        .choices
        .into_iter()
        .filter_map(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
        .ok_or(AnalysisError::NoContent)
}

/// Blocking client for OpenAI-compatible chat completion endpoints.
pub struct VisionClient {
    config: AnalysisConfig,
    client: reqwest::blocking::Client,
}

impl VisionClient {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        Ok(Self {
            config: AnalysisConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        })
    }
}

impl ImageAnalyzer for VisionClient {
    fn analyze(&self, image_data_uri: &str, test_type_label: &str) -> Result<String, AnalysisError> {
        let estimated_bytes = image_data_uri.len() as u64 + REQUEST_OVERHEAD_BYTES;
        if estimated_bytes > MAX_PAYLOAD_BYTES {
            return Err(AnalysisError::TooLarge { estimated_bytes });
        }

        let url = format!("{}/chat/completions", self.config.base_url);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: analysis_prompt(test_type_label),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_data_uri },
                    },
                ],
            }],
            max_tokens: 1500,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Network(format!(
                        "Request timed out after {}s",
                        self.config.timeout_secs
                    ))
                } else {
                    AnalysisError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), provider = self.config.provider.as_str(), "Analysis request failed");
            return Err(error_from_status(status.as_u16(), &text));
        }

        parse_completion(&text)
    }
}
