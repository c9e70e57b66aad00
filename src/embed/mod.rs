pub mod ollama;
pub mod openai;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{EmbedBackendKind, EmbedConfig};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Minimum remaining budget worth spending on a network call; below this the
/// backend fails fast instead of starting a request it cannot finish.
pub const MIN_CALL_BUDGET: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("embedding request failed: {0}")]
    Request(#[source] anyhow::Error),

    #[error("backend returned {got} vectors for {want} inputs")]
    CountMismatch { want: usize, got: usize },

    #[error("backend returned a {got}-dim vector, expected {want}")]
    DimsMismatch { want: usize, got: usize },

    #[error("remaining deadline too short for an embedding call")]
    BudgetExhausted,
}

/// A pluggable text-to-vector adapter.
///
/// Implementations return one vector per input, in input order, all with
/// `dims()` components and unit L2 norm. `budget` is the caller's remaining
/// deadline; implementations must fail fast when it cannot be met.
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;

    fn dims(&self) -> usize;

    fn embed_batch(&self, texts: &[String], budget: Duration)
        -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Instantiate the configured backend; `None` when embedding is off.
#[inline]
pub fn backend_from_config(
    config: &EmbedConfig,
) -> anyhow::Result<Option<Arc<dyn EmbeddingBackend>>> {
    match config.backend {
        EmbedBackendKind::Off => Ok(None),
        EmbedBackendKind::Ollama => Ok(Some(Arc::new(OllamaBackend::new(config)?))),
        EmbedBackendKind::OpenAi => Ok(Some(Arc::new(OpenAiBackend::new(config)?))),
    }
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Pack a vector as little-endian IEEE-754 f32 bytes, the store blob format.
#[inline]
pub fn pack_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode a stored blob. Returns `None` when the length does not match
/// `dims * 4`; callers surface that as store corruption.
#[inline]
pub fn unpack_vector(blob: &[u8], dims: usize) -> Option<Vec<f32>> {
    if blob.len() != dims * 4 {
        return None;
    }
    let mut out = Vec::with_capacity(dims);
    for bytes in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    }
    Some(out)
}

/// Validate a backend response and normalize every vector in place.
pub(crate) fn finalize_batch(
    mut vectors: Vec<Vec<f32>>,
    want_count: usize,
    want_dims: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if vectors.len() != want_count {
        return Err(EmbedError::CountMismatch {
            want: want_count,
            got: vectors.len(),
        });
    }
    for v in &mut vectors {
        if v.len() != want_dims {
            return Err(EmbedError::DimsMismatch {
                want: want_dims,
                got: v.len(),
            });
        }
        l2_normalize(v);
    }
    Ok(vectors)
}

/// Retry policy shared by the HTTP backends.
///
/// Transient failures (transport hiccups, 5xx) are retried with doubling
/// backoff, but never past the caller's remaining budget: a wait that would
/// not leave room for another attempt fails over to the caller's degrade
/// path instead of sleeping through the deadline.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    pub(crate) fn run<F>(&self, budget: Duration, mut request_fn: F) -> Result<String, EmbedError>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        use tracing::warn;

        let started = std::time::Instant::now();
        let mut last_error: Option<ureq::Error> = None;

        for attempt in 1..=self.attempts {
            if budget.saturating_sub(started.elapsed()) < MIN_CALL_BUDGET {
                return Err(EmbedError::BudgetExhausted);
            }

            let error = match request_fn() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if !is_transient(&error) {
                return Err(EmbedError::Request(anyhow::anyhow!(
                    "embedding call failed: {error}"
                )));
            }

            if attempt < self.attempts {
                let wait = self.backoff(attempt);
                let remaining = budget.saturating_sub(started.elapsed());
                if wait + MIN_CALL_BUDGET > remaining {
                    warn!("embedding attempt {attempt} failed ({error}); no budget left to retry");
                    return Err(EmbedError::Unavailable(error.to_string()));
                }
                warn!(
                    "embedding attempt {attempt}/{} failed ({error}); retrying in {wait:?}",
                    self.attempts
                );
                std::thread::sleep(wait);
            }
            last_error = Some(error);
        }

        Err(EmbedError::Unavailable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "request failed after retries".to_string()),
        ))
    }
}

/// Worth a second try: server-side failures and transport hiccups. Client
/// errors never are.
fn is_transient(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}
