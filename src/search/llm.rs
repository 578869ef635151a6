//! Inference collaborators: semantic annotation and query expansion.
//!
//! The engine only depends on the [`Annotator`] and [`QueryExpander`]
//! traits. [`OllamaClient`] implements both against a local Ollama server.

use crate::core::config::OllamaConfig;
use crate::core::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Characters of extracted text sent to the model
const PROMPT_TEXT_CHARS: usize = 3000;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").expect("valid regex"));

static BRACED_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

static ANSWER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(keywords:|answer:|result:)\s*").expect("valid regex"));

/// Summary and keywords produced for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub summary: String,
    pub keywords: Vec<String>,
}

impl Annotation {
    /// Placeholder used when the backend could not annotate a file
    pub fn degraded(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            keywords: Vec::new(),
        }
    }
}

/// Produces a summary and keyword list for a file
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Annotate extracted text
    async fn annotate_text(&self, text: &str, file_name: &str) -> Result<Annotation>;

    /// Annotate an image from its bytes on disk
    async fn describe_image(&self, image_path: &Path, file_name: &str) -> Result<Annotation>;
}

/// Broadens a user query into search keywords
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str) -> Result<String>;
}

/// Extract an annotation from free-form model output. Never fails.
///
/// Tries a fenced code block, then the outermost brace-delimited span, and
/// finally treats the text (inside the fence, if there was one) as the
/// summary.
pub fn parse_annotation(response: &str) -> Annotation {
    let mut candidate = response;
    if let Some(inner) = FENCED_BLOCK.captures(response).and_then(|c| c.get(1)) {
        candidate = inner.as_str();
    }

    if let Some(span) = BRACED_SPAN.find(candidate) {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(span.as_str()) {
            let summary = match map.get("summary") {
                Some(serde_json::Value::String(s)) => s.trim().to_string(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let keywords = match map.get("keywords") {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| match item {
                        serde_json::Value::String(s) => Some(s.trim().to_string()),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .filter(|k| !k.is_empty())
                    .collect(),
                Some(serde_json::Value::String(s)) => s
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            return Annotation { summary, keywords };
        }
    }

    Annotation {
        summary: candidate.trim().to_string(),
        keywords: Vec::new(),
    }
}

/// Reduce a model's expansion reply to a single keyword line.
///
/// Returns `original` when nothing usable remains.
pub fn clean_expansion(response: &str, original: &str) -> String {
    let trimmed = response.trim().trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() {
        return original.to_string();
    }

    // Models often explain first; the keyword line tends to come last
    let line = trimmed
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.split_whitespace().count() > 1)
        .unwrap_or(trimmed);

    let cleaned = ANSWER_PREFIX.replace(line, "").trim().to_string();
    if cleaned.is_empty() {
        original.to_string()
    } else {
        cleaned
    }
}

fn text_prompt(text: &str, file_name: &str) -> String {
    let excerpt: String = text.chars().take(PROMPT_TEXT_CHARS).collect();
    format!(
        r#"Analyze this file and extract information for search indexing.
File name: {file_name}

CONTENT:
{excerpt}

INSTRUCTIONS:
- Respond ONLY with a JSON object, no other text
- All content must be in English
- If the original content is not in English, translate the key concepts
- Summary should be 1-3 sentences describing what this file is about
- Keywords should be comprehensive: include topics, names, places, technical terms, actions, and concepts
- Include 15-30 keywords

FORMAT:
{{"summary": "Brief description of the file content", "keywords": ["keyword1", "keyword2", "keyword3"]}}"#
    )
}

fn image_prompt(file_name: &str) -> String {
    format!(
        r#"Describe this image in EXTREME DETAIL for search indexing purposes.
File name: {file_name}

You must describe EVERYTHING you can see:
- Objects and items (what they are, their colors, materials, sizes)
- People (appearance, actions, emotions, clothing, number of people)
- Scene and setting (indoor/outdoor, location type, time of day, weather)
- Text visible in the image (signs, labels, watermarks)
- Colors, lighting, and visual style
- Background elements
- Any symbols, logos, or icons
- The overall mood and atmosphere
- Type of image (photo, screenshot, diagram, chart, illustration, meme, etc.)

Be as detailed and descriptive as possible. Every detail matters for searchability.
Include related concepts and synonyms. For example, if there is a beach, also mention: ocean, sea, coast, shore, sand, waves, tropical.

IMPORTANT: Respond ONLY with a JSON object. All content must be in English.

FORMAT:
{{"summary": "Detailed 2-4 sentence description of the image", "keywords": ["keyword1", "keyword2", ...]}}

Include 20-40 keywords covering all aspects of the image."#
    )
}

fn expansion_prompt(query: &str) -> String {
    format!(
        r#"You are a search query expansion assistant. The user wants to find files on their computer.

USER QUERY: {query}

INSTRUCTIONS:
- Convert the query into English search keywords
- Add synonyms, related concepts, and associated terms
- Include translations if the query is in another language
- Think about what words might appear in relevant files
- For visual concepts, include words that would describe such images
- Example: "beach photos" -> beach sand ocean sea coast shore waves tropical photo sunny water palm summer vacation seaside

Respond with ONLY a single line of space-separated English keywords (15-25 keywords).
Do NOT include any explanation, just the keywords."#
    )
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Deserialize)]
struct TagsModel {
    name: String,
}

/// Reachability of the inference server and the configured model
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub running: bool,
    pub model_available: bool,
    pub available_models: Vec<String>,
    pub required_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Client for a local Ollama server
pub struct OllamaClient {
    http: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    async fn chat(&self, prompt: String, image: Option<&Path>) -> Result<String> {
        let images = match image {
            Some(path) => {
                let bytes = tokio::fs::read(path).await?;
                vec![base64::engine::general_purpose::STANDARD.encode(bytes)]
            }
            None => Vec::new(),
        };

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
                images,
            }],
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
                num_predict: self.config.num_predict,
            },
        };

        let response: ChatResponse = self
            .http
            .post(format!("{}/api/chat", self.config.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.message.content)
    }

    /// Check that the server answers and offers the configured model
    pub async fn health(&self) -> BackendHealth {
        let required_model = self.config.model.clone();
        let result = async {
            let tags: TagsResponse = self
                .http
                .get(format!("{}/api/tags", self.config.base_url))
                .timeout(HEALTH_TIMEOUT)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, Error>(tags)
        }
        .await;

        match result {
            Ok(tags) => {
                let available_models: Vec<String> =
                    tags.models.into_iter().map(|m| m.name).collect();
                let family = required_model.split(':').next().unwrap_or_default();
                let model_available = available_models.iter().any(|name| name.contains(family));
                BackendHealth {
                    running: true,
                    model_available,
                    available_models,
                    required_model,
                    error: None,
                }
            }
            Err(e) => BackendHealth {
                running: false,
                model_available: false,
                available_models: Vec::new(),
                required_model,
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl Annotator for OllamaClient {
    async fn annotate_text(&self, text: &str, file_name: &str) -> Result<Annotation> {
        let response = self.chat(text_prompt(text, file_name), None).await?;
        debug!("Annotated {} ({} chars of output)", file_name, response.len());
        Ok(parse_annotation(&response))
    }

    async fn describe_image(&self, image_path: &Path, file_name: &str) -> Result<Annotation> {
        let response = self.chat(image_prompt(file_name), Some(image_path)).await?;
        debug!("Described image {}", file_name);
        Ok(parse_annotation(&response))
    }
}

#[async_trait]
impl QueryExpander for OllamaClient {
    async fn expand(&self, query: &str) -> Result<String> {
        let response = self.chat(expansion_prompt(query), None).await?;
        let expanded = clean_expansion(&response, query);
        if expanded == query {
            warn!("Expansion of '{}' produced no keywords", query);
        }
        Ok(expanded)
    }
}
