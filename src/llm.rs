use crate::config::{LLMConfig, LLMProvider};
use crate::models::{AggregateReport, DiagnosticRecord};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a senior TypeScript engineer helping fix compiler diagnostics. \
Given one diagnostic and the surrounding code, answer with a single concrete fix in one or two sentences. \
Do not restate the error. Do not use markdown.";

/// Marker put in front of model-written suggestions so readers can tell them apart.
pub const AI_SUGGESTION_PREFIX: &str = "AI: ";

/// Optional collaborator that asks a language model for a fix suggestion.
pub struct SuggestionClient {
    config: LLMConfig,
    client: Client,
}

impl SuggestionClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("building HTTP client")?;

        Ok(Self { config, client })
    }

    /// Append one model-written suggestion to up to `max_suggestions` records.
    /// Failures are logged and leave the record as it was.
    pub async fn enrich(&self, report: &mut AggregateReport) -> usize {
        let limit = self.config.max_suggestions;
        let mut enriched = 0;

        for record in report.records_mut().take(limit) {
            match self.suggest(record).await {
                Ok(suggestion) if !suggestion.is_empty() => {
                    record
                        .suggestions
                        .get_or_insert_with(Vec::new)
                        .push(format!("{}{}", AI_SUGGESTION_PREFIX, suggestion));
                    enriched += 1;
                }
                Ok(_) => debug!("Empty suggestion for {}", record.location()),
                Err(e) => {
                    warn!("Suggestion request for {} failed: {:#}", record.location(), e);
                }
            }
        }

        info!("Added AI suggestions to {} diagnostic(s)", enriched);
        enriched
    }

    pub async fn suggest(&self, record: &DiagnosticRecord) -> Result<String> {
        let prompt = create_user_prompt(record);
        let content = match self.config.provider {
            LLMProvider::OpenAI => self.suggest_with_openai(&prompt).await?,
            LLMProvider::Ollama => self.suggest_with_ollama(&prompt).await?,
            LLMProvider::Anthropic => self.suggest_with_anthropic(&prompt).await?,
        };
        Ok(content.trim().to_string())
    }

    async fn suggest_with_openai(&self, prompt: &str) -> Result<String> {
        let api_key = self.config.api_key.as_ref()
            .ok_or_else(|| anyhow!("OpenAI API key not provided"))?;

        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "max_completion_tokens": self.config.max_tokens,
            "temperature": self.config.temperature
        });
        debug!("OpenAI request for model {}", self.config.model);

        let response = self.client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let response_json: serde_json::Value = response.json().await?;
        response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid response format from OpenAI"))
    }

    async fn suggest_with_ollama(&self, prompt: &str) -> Result<String> {
        let base_url = self.config.base_url.as_deref().unwrap_or("http://localhost:11434");

        let payload = serde_json::json!({
            "model": self.config.model,
            "prompt": format!("System: {}\n\nUser: {}", SYSTEM_PROMPT, prompt),
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens
            }
        });
        debug!("Ollama request to {} for model {}", base_url, self.config.model);

        let response = self.client
            .post(format!("{}/api/generate", base_url))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let response_json: serde_json::Value = response.json().await?;
        response_json["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid response format from Ollama"))
    }

    async fn suggest_with_anthropic(&self, prompt: &str) -> Result<String> {
        let api_key = self.config.api_key.as_ref()
            .ok_or_else(|| anyhow!("Anthropic API key not provided"))?;

        let payload = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        });
        debug!("Anthropic request for model {}", self.config.model);

        let response = self.client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("Content-Type", "application/json")
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Anthropic API error: {}", error_text));
        }

        let response_json: serde_json::Value = response.json().await?;
        response_json["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid response format from Anthropic"))
    }
}

fn create_user_prompt(record: &DiagnosticRecord) -> String {
    let mut prompt = format!(
        "Diagnostic {} at {}:\n{}\n",
        record.code,
        record.location(),
        record.message
    );
    if let Some(snippet) = &record.code_snippet {
        prompt.push_str("\nCode:\n");
        prompt.push_str(snippet);
        prompt.push('\n');
    }
    prompt
}
