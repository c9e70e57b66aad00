use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::EmbedConfig;

use super::{finalize_batch, EmbedError, EmbeddingBackend, RetryPolicy, MIN_CALL_BUDGET};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote OpenAI-protocol embedding API.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    base_url: Url,
    api_key: String,
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
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiBackend {
    #[inline]
    pub fn new(config: &EmbedConfig) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(&config.openai_url).context("Invalid OpenAI base URL in config")?;
        let api_key = config
            .api_key
            .clone()
            .context("OPENAI_API_KEY is required for the openai backend")?;

        Ok(Self {
            base_url,
            api_key,
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

impl EmbeddingBackend for OpenAiBackend {
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
            .join("/v1/embeddings")
            .map_err(|e| EmbedError::Request(anyhow::Error::new(e)))?;

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| EmbedError::Request(anyhow::Error::new(e)))?;

        let agent = Self::agent(budget.min(DEFAULT_TIMEOUT));
        let auth = format!("Bearer {}", self.api_key);
        debug!("embedding {} texts via openai at {url}", texts.len());

        let body = self.retry.run(budget, || {
            agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &auth)
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
            EmbedError::Request(anyhow::Error::new(e).context("Bad openai embed response"))
        })?;

        // The API documents response order as input order; sort by the echoed
        // index anyway so a reordering server cannot scramble assignments.
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        finalize_batch(vectors, texts.len(), self.dims)
    }
}
