use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::provider::{ChatModel, EmbeddingProvider, ProviderError};
use crate::config::AssistantConfig;

const PROVIDER: &str = "gemini";
const MAX_BATCH_EMBED_REQUESTS: usize = 100;

/// Client for the Google Generative Language REST API, used both for answer
/// generation and for embeddings.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
}

impl GeminiClient {
    pub fn from_config(config: &AssistantConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            http,
            api_base: config.gemini_api_base.trim_end_matches('/').to_string(),
            api_key: config.google_api_key.clone(),
            chat_model: model_path(&config.chat_model),
            embedding_model: model_path(&config.embedding_model),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.api_base, model, method)
    }

    async fn post<B, R>(&self, url: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: PROVIDER,
                source,
            })
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = GenerateContentRequest {
            contents: vec![Content::user(prompt)],
        };
        let url = self.endpoint(&self.chat_model, "generateContent");
        debug!(model = %self.chat_model, prompt_chars = prompt.len(), "calling Gemini generateContent");
        let response: GenerateContentResponse = self.post(&url, &request).await?;
        response.into_text()
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = self.endpoint(&self.embedding_model, "batchEmbedContents");
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(MAX_BATCH_EMBED_REQUESTS) {
            let request = BatchEmbedContentsRequest {
                requests: chunk
                    .iter()
                    .map(|text| EmbedContentRequest {
                        model: &self.embedding_model,
                        content: Content::text(text),
                        task_type: TaskType::RetrievalDocument,
                    })
                    .collect(),
            };
            let response: BatchEmbedContentsResponse = self.post(&url, &request).await?;
            if response.embeddings.len() != chunk.len() {
                return Err(ProviderError::EmbeddingCount {
                    provider: PROVIDER,
                    expected: chunk.len(),
                    actual: response.embeddings.len(),
                });
            }
            vectors.extend(response.embeddings.into_iter().map(|e| e.values));
        }

        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = self.endpoint(&self.embedding_model, "embedContent");
        let request = EmbedContentRequest {
            model: &self.embedding_model,
            content: Content::text(text),
            task_type: TaskType::RetrievalQuery,
        };
        let response: EmbedContentResponse = self.post(&url, &request).await?;
        Ok(response.embedding.values)
    }
}

fn model_path(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            role: None,
            parts: vec![Part { text }],
        }
    }

    fn user(text: &'a str) -> Self {
        Self {
            role: Some("user"),
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
}

#[derive(Debug, Serialize)]
struct BatchEmbedContentsRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenates the text parts of the first candidate.
    fn into_text(self) -> Result<String, ProviderError> {
        let block_reason = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(ProviderError::EmptyResponse {
                provider: PROVIDER,
                reason: block_reason
                    .map(|reason| format!("prompt blocked: {reason}"))
                    .unwrap_or_else(|| "no candidates".to_string()),
            });
        };

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: PROVIDER,
                reason: candidate
                    .finish_reason
                    .map(|reason| format!("finish reason {reason}"))
                    .unwrap_or_else(|| "candidate has no text".to_string()),
            });
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn model_names_get_the_models_prefix_once() {
        assert_eq!(model_path("gemini-1.0-pro"), "models/gemini-1.0-pro");
        assert_eq!(model_path("models/embedding-001"), "models/embedding-001");
    }

    #[test]
    fn embed_request_uses_camel_case_task_type() {
        let request = EmbedContentRequest {
            model: "models/embedding-001",
            content: Content::text("hello"),
            task_type: TaskType::RetrievalQuery,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "models/embedding-001",
                "content": { "parts": [{ "text": "hello" }] },
                "taskType": "RETRIEVAL_QUERY"
            })
        );
    }

    #[test]
    fn generate_request_marks_the_user_turn() {
        let request = GenerateContentRequest {
            contents: vec![Content::user("prompt")],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "prompt");
    }

    #[test]
    fn first_candidate_parts_are_joined() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "The battery " }, { "text": "lasts 72 hours." }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "The battery lasts 72 hours.");
    }

    #[test]
    fn blocked_prompt_is_an_empty_response() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();
        let err = response.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn candidate_without_text_is_an_empty_response() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "RECITATION" }]
        }))
        .unwrap();
        assert!(matches!(
            response.into_text(),
            Err(ProviderError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn api_errors_surface_their_message() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid.");
        assert_eq!(api_error_message(""), "empty response body");
        assert_eq!(api_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn batch_embeddings_deserialize() {
        let response: BatchEmbedContentsResponse = serde_json::from_value(json!({
            "embeddings": [{ "values": [0.1, 0.2] }, { "values": [0.3, 0.4] }]
        }))
        .unwrap();
        assert_eq!(response.embeddings.len(), 2);
        assert_eq!(response.embeddings[1].values, vec![0.3f32, 0.4]);
    }
}
