use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned {status}: {message}")]
    Status {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("{provider} returned no usable content: {reason}")]
    EmptyResponse {
        provider: &'static str,
        reason: String,
    },
    #[error("{provider} returned {actual} embeddings for {expected} inputs")]
    EmbeddingCount {
        provider: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{0}")]
    Other(String),
}

/// Turns text into vectors for similarity search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// A hosted language model answering a single fully rendered prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, prompt: &str) -> Result<String, ProviderError>;
}
