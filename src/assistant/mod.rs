//! Automated first-line answers for customer questions.
//!
//! A question is handled in three steps: an explicit request for a human is
//! escalated, a close match in the static FAQ is answered directly, and
//! anything else goes through retrieval over the knowledge base and the hosted
//! language model, falling back to a fixed apology when that fails.

pub mod embedding;
pub mod faq;
pub mod fuzzy;
pub mod gemini;
pub mod knowledge;
pub mod provider;
pub mod rag;
pub mod router;
pub mod vector_store;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AssistantConfig, EmbeddingBackend};
use embedding::HashingEmbedding;
use faq::{FaqMatch, FaqMatcher};
use gemini::GeminiClient;
use provider::{ChatModel, EmbeddingProvider};
use rag::RagChain;
use router::{route, Route, HUMAN_ESCALATION_MESSAGE};
use vector_store::{Retriever, ScoredDocument, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Escalation,
    Faq,
    Knowledge,
    Fallback,
}

impl ReplySource {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplySource::Escalation => "escalation",
            ReplySource::Faq => "faq",
            ReplySource::Knowledge => "knowledge",
            ReplySource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantReply {
    pub answer: String,
    pub source: ReplySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faq: Option<FaqMatch>,
    pub documents: Vec<ScoredDocument>,
}

impl AssistantReply {
    pub fn is_escalation(&self) -> bool {
        self.source == ReplySource::Escalation
    }
}

pub struct SupportAssistant {
    faq: Option<FaqMatcher>,
    faq_threshold: f64,
    chain: RagChain,
}

impl SupportAssistant {
    /// Without a FAQ matcher every non-escalation question goes to the chain.
    pub fn new(faq: Option<FaqMatcher>, faq_threshold: f64, chain: RagChain) -> Self {
        Self {
            faq,
            faq_threshold,
            chain,
        }
    }

    /// Loads the FAQ and knowledge base and embeds the passages. Fails when any
    /// of these cannot be prepared.
    pub async fn from_config(config: &AssistantConfig) -> Result<Self> {
        let faq = FaqMatcher::from_path(&config.faq_path)?;

        let documents = match &config.knowledge_base_path {
            Some(path) => knowledge::load_documents(path)?,
            None => knowledge::default_documents(),
        };

        let gemini = Arc::new(GeminiClient::from_config(config)?);
        let embeddings: Arc<dyn EmbeddingProvider> = match config.embedding_backend {
            EmbeddingBackend::Gemini => gemini.clone(),
            EmbeddingBackend::Hashing => Arc::new(HashingEmbedding::default()),
        };
        let model: Arc<dyn ChatModel> = gemini;

        let document_count = documents.len();
        let store = VectorStore::from_documents(documents, embeddings.as_ref())
            .await
            .context("failed to embed knowledge base")?;

        info!(
            faq_entries = faq.len(),
            documents = document_count,
            dimensions = store.dimensions(),
            embeddings = embeddings.name(),
            model = model.name(),
            top_k = config.retriever_top_k,
            faq_threshold = config.faq_match_threshold,
            "support assistant ready"
        );

        let retriever = Retriever::new(Arc::new(store), embeddings, config.retriever_top_k);
        Ok(Self::new(
            Some(faq),
            config.faq_match_threshold,
            RagChain::new(retriever, model),
        ))
    }

    pub fn chain(&self) -> &RagChain {
        &self.chain
    }

    pub fn faq(&self) -> Option<&FaqMatcher> {
        self.faq.as_ref()
    }

    pub fn faq_threshold(&self) -> f64 {
        self.faq_threshold
    }

    pub async fn answer(&self, question: &str) -> AssistantReply {
        if route(question) == Route::HumanEscalation {
            debug!("question asks for a human, escalating");
            return AssistantReply {
                answer: HUMAN_ESCALATION_MESSAGE.to_string(),
                source: ReplySource::Escalation,
                faq: None,
                documents: Vec::new(),
            };
        }

        if let Some(found) = self
            .faq
            .as_ref()
            .and_then(|faq| faq.lookup(question, self.faq_threshold))
        {
            debug!(scorer = %found.scorer, score = found.score, "answered from FAQ");
            return AssistantReply {
                answer: found.answer.clone(),
                source: ReplySource::Faq,
                faq: Some(found),
                documents: Vec::new(),
            };
        }

        let reply = self.chain.invoke_with_fallback(question).await;
        AssistantReply {
            answer: reply.answer,
            source: if reply.fell_back {
                ReplySource::Fallback
            } else {
                ReplySource::Knowledge
            },
            faq: None,
            documents: reply.documents,
        }
    }
}
