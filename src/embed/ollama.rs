use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::EmbedConfig;

use super::{finalize_batch, EmbedError, EmbeddingBackend, RetryPolicy, MIN_CALL_BUDGET};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Local embedding server speaking the Ollama embed protocol.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    base_url: Url,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaBackend {
    #[inline]
    pub fn new(config: &EmbedConfig) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(&config.ollama_url).context("Invalid Ollama base URL in config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dims: config.dims,
            retry: RetryPolicy::new(config.retry_attempts),
        })
    }

    fn agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into()
    }
}

impl EmbeddingBackend for OllamaBackend {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dims(&self) -> usize {
        self.dims
    }

    fn embed_batch(
        &self,
        texts: &[String],
        budget: Duration,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if budget < MIN_CALL_BUDGET {
            return Err(EmbedError::BudgetExhausted);
        }

        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| EmbedError::Request(anyhow::Error::new(e)))?;

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| EmbedError::Request(anyhow::Error::new(e)))?;

        let agent = Self::agent(budget.min(DEFAULT_TIMEOUT));
        debug!("embedding {} texts via ollama at {url}", texts.len());

        let body = self.retry.run(budget, || {
            agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
            EmbedError::Request(anyhow::Error::new(e).context("Bad ollama embed response"))
        })?;

        finalize_batch(response.embeddings, texts.len(), self.dims)
    }
}
