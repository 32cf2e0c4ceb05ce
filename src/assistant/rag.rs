use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::knowledge::Document;
use super::provider::{ChatModel, ProviderError};
use super::vector_store::{RetrievalError, Retriever, ScoredDocument};

pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I'm having trouble finding an answer right now. Would you like to speak to a human agent?";

#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("generation failed: {0}")]
    Generation(#[source] ProviderError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub answer: String,
    pub documents: Vec<ScoredDocument>,
}

/// Result of the chain with its fallback applied. `documents` is empty when the
/// fallback message was used.
#[derive(Debug, Clone, PartialEq)]
pub struct RagReply {
    pub answer: String,
    pub documents: Vec<ScoredDocument>,
    pub fell_back: bool,
}

pub fn format_docs<'a, I>(docs: I) -> String
where
    I: IntoIterator<Item = &'a Document>,
{
    docs.into_iter()
        .map(|doc| doc.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_prompt(context: &str, question: &str) -> String {
    format!(
        "\nYou are a helpful customer support assistant. Answer the user's question based only on the following context.\n\
         If the context does not contain the answer, say that you don't have enough information to answer. Do not make up information.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n"
    )
}

/// Retrieve, prompt, generate.
#[derive(Clone)]
pub struct RagChain {
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
}

impl RagChain {
    pub fn new(retriever: Retriever, model: Arc<dyn ChatModel>) -> Self {
        Self { retriever, model }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredDocument>, RagError> {
        Ok(self.retriever.retrieve(question).await?)
    }

    pub async fn generate(
        &self,
        question: &str,
        documents: &[ScoredDocument],
    ) -> Result<String, RagError> {
        let context = format_docs(documents.iter().map(|hit| &hit.document));
        let prompt = render_prompt(&context, question);
        debug!(
            model = self.model.name(),
            context_documents = documents.len(),
            "invoking language model"
        );
        self.model
            .invoke(&prompt)
            .await
            .map(|answer| answer.trim().to_string())
            .map_err(RagError::Generation)
    }

    pub async fn invoke(&self, question: &str) -> Result<RagAnswer, RagError> {
        let documents = self.retrieve(question).await?;
        self.answer_from(question, documents).await
    }

    /// Generates an answer from documents that were already retrieved.
    pub async fn answer_from(
        &self,
        question: &str,
        documents: Vec<ScoredDocument>,
    ) -> Result<RagAnswer, RagError> {
        let answer = self.generate(question, &documents).await?;
        if answer.is_empty() {
            return Err(RagError::Generation(ProviderError::EmptyResponse {
                provider: self.model.name(),
                reason: "blank answer".to_string(),
            }));
        }
        Ok(RagAnswer { answer, documents })
    }

    /// Never fails: any error becomes [`FALLBACK_MESSAGE`].
    pub async fn invoke_with_fallback(&self, question: &str) -> RagReply {
        Self::with_fallback(self.invoke(question).await)
    }

    pub fn with_fallback(result: Result<RagAnswer, RagError>) -> RagReply {
        match result {
            Ok(RagAnswer { answer, documents }) => RagReply {
                answer,
                documents,
                fell_back: false,
            },
            Err(err) => {
                warn!(error = %err, "answer chain failed, using fallback reply");
                RagReply {
                    answer: FALLBACK_MESSAGE.to_string(),
                    documents: Vec::new(),
                    fell_back: true,
                }
            }
        }
    }
}
