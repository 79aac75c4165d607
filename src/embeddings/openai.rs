//! OpenAI-compatible HTTP generators.
//!
//! `POST {base_url}/embeddings` for vectors and
//! `POST {base_url}/chat/completions` for match explanations.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, ExplainConfig};
use crate::embeddings::{EmbeddingError, EmbeddingProvider, Explainer};
use crate::records::LoincCode;

/// Shown when the model answered without any text.
const NO_EXPLANATION: &str = "No explanation available";

const EXPLAIN_SYSTEM_PROMPT: &str = "You are a medical terminology expert. Explain why a LOINC code matches a user's query. Be concise and focus on the medical relevance. Keep explanations under 100 words.";

fn api_key(env_var: &str) -> Result<String, EmbeddingError> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(EmbeddingError::MissingApiKey(env_var.to_string())),
    }
}

fn http_client(timeout_secs: u64) -> Result<Client, EmbeddingError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key(&config.api_key_env)?,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response: EmbeddingResponse = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()?
            .error_for_status()?
            .json()?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    /// First choice's text. A completed request without text is still an
    /// answer, just an empty one.
    fn into_explanation(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| NO_EXPLANATION.to_string())
    }
}

pub struct OpenAiExplainer {
    client: Client,
    base_url: String,
    api_key: String,
    config: ExplainConfig,
}

impl OpenAiExplainer {
    pub fn from_config(
        embedding: &EmbeddingConfig,
        config: &ExplainConfig,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(embedding.timeout_secs)?,
            base_url: embedding.base_url.trim_end_matches('/').to_string(),
            api_key: api_key(&embedding.api_key_env)?,
            config: config.clone(),
        })
    }
}

/// User prompt describing one candidate match.
pub fn explain_prompt(query: &str, code: &LoincCode) -> String {
    format!(
        "Query: \"{query}\"\nLOINC Code: {}\nDisplay Name: {}\nComponent: {}\nSystem: {}\nProperty: {}\n\nExplain why this LOINC code matches the query:",
        code.code, code.display_name, code.component, code.system, code.property
    )
}

impl Explainer for OpenAiExplainer {
    fn explain(&self, query: &str, code: &LoincCode) -> Result<String, EmbeddingError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: EXPLAIN_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: explain_prompt(query, code),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(response.into_explanation())
    }
}
