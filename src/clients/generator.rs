//! Bulletin text generation through an OpenAI-compatible chat completions API.
use std::{fmt::Write as _, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::GenerationError,
    pipeline::normalize::Article,
    util::{retry::is_retryable_error, text::truncate_graphemes},
};

/// Body excerpt length in the prompt, in grapheme clusters.
const EXCERPT_GRAPHEMES: usize = 400;
const ERROR_BODY_GRAPHEMES: usize = 200;

/// What the generator needs to know about one segment.
#[derive(Debug, Clone, Copy)]
pub struct BulletinRequest<'a> {
    pub segment_name: &'a str,
    pub display_name: &'a str,
    pub focus: &'a str,
    pub articles: &'a [Article],
}

/// Produces bulletin prose for a segment's ranked articles.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &BulletinRequest<'_>) -> Result<String, GenerationError>;
}

/// Stand-in used when no API key is configured. Every call fails as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl Generator for UnavailableGenerator {
    async fn generate(&self, _request: &BulletinRequest<'_>) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletionSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
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

const SYSTEM_PROMPT: &str = "Você é um especialista em análise de notícias e criação de boletins informativos. \
Escreva sempre em português do Brasil, com linguagem profissional mas acessível, e use apenas as notícias fornecidas.";

impl ChatCompletionGenerator {
    /// # Errors
    /// Returns an error when the base URL is invalid or the HTTP client cannot be built.
    pub fn new(settings: ChatCompletionSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("bulletin-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build generator HTTP client")?;

        let endpoint = format!(
            "{}/chat/completions",
            settings.base_url.trim_end_matches('/')
        );
        let endpoint = Url::parse(&endpoint).context("invalid generator base URL")?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key,
            model: settings.model,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: settings.timeout,
        })
    }

    fn build_prompt(&self, request: &BulletinRequest<'_>) -> String {
        let mut prompt = String::new();
        let focus = request.focus;
        let _ = writeln!(
            prompt,
            "TAREFA: Criar um boletim informativo sobre {focus} baseado nas notícias fornecidas.\n"
        );
        prompt.push_str("INSTRUÇÕES:\n");
        prompt.push_str("1. Analise as notícias fornecidas abaixo\n");
        prompt.push_str("2. Identifique os temas principais e tendências\n");
        prompt.push_str("3. Crie um boletim bem estruturado e informativo\n");
        prompt.push_str("4. Inclua insights e análises relevantes\n");
        let _ = writeln!(prompt, "5. Mantenha o foco em {focus}\n");
        prompt.push_str("FORMATO DO BOLETIM:\n");
        prompt.push_str("- Título principal\n");
        prompt.push_str("- Introdução com contexto geral\n");
        prompt.push_str("- Seções temáticas com análises\n");
        prompt.push_str("- Conclusão com insights principais\n");
        let _ = writeln!(prompt, "- Máximo de {} tokens\n", self.max_tokens);
        let _ = writeln!(
            prompt,
            "NOTÍCIAS PARA ANÁLISE ({}):",
            request.display_name
        );

        for (index, article) in request.articles.iter().enumerate() {
            let _ = writeln!(prompt, "\n{}. Título: {}", index + 1, article.title);
            let _ = writeln!(prompt, "   Fonte: {}", article.source);
            let _ = writeln!(
                prompt,
                "   Data: {}",
                article.published_at.format("%d/%m/%Y")
            );
            let _ = writeln!(prompt, "   URL: {}", article.url);
            if !article.body.is_empty() {
                let _ = writeln!(
                    prompt,
                    "   Resumo: {}",
                    truncate_graphemes(&article.body, EXCERPT_GRAPHEMES)
                );
            }
        }

        prompt.push_str("\nGere o boletim agora:");
        prompt
    }

    fn transport_error(&self, error: &reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else if is_retryable_error(error) {
            GenerationError::Transient(error.to_string())
        } else {
            GenerationError::Rejected(error.to_string())
        }
    }
}

#[async_trait]
impl Generator for ChatCompletionGenerator {
    async fn generate(&self, request: &BulletinRequest<'_>) -> Result<String, GenerationError> {
        let prompt = self.build_prompt(request);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        debug!(
            segment = request.segment_name,
            article_count = request.articles.len(),
            model = %self.model,
            "sending bulletin generation request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| self.transport_error(&error))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let detail = response.text().await.unwrap_or_default();
            let message = format!(
                "{status}: {}",
                truncate_graphemes(&detail, ERROR_BODY_GRAPHEMES)
            );
            warn!(segment = request.segment_name, %status, "generator returned error status");

            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited { retry_after },
                status if status.is_server_error() => GenerationError::Transient(message),
                _ => GenerationError::Rejected(message),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::Rejected(format!("malformed response: {error}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}
