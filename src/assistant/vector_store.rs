use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::knowledge::Document;
use super::provider::{EmbeddingProvider, ProviderError};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("embedding provider returned {actual} vectors for {expected} documents")]
    VectorCount { expected: usize, actual: usize },
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    Dimensions { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: Document,
    pub score: f32,
}

/// In-memory similarity index over a fixed set of documents.
#[derive(Debug, Default)]
pub struct VectorStore {
    documents: Vec<Document>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl VectorStore {
    pub async fn from_documents(
        documents: Vec<Document>,
        embeddings: &dyn EmbeddingProvider,
    ) -> Result<Self, RetrievalError> {
        let texts: Vec<String> = documents
            .iter()
            .map(|doc| doc.page_content.clone())
            .collect();
        let vectors = embeddings.embed_documents(&texts).await?;
        Self::from_vectors(documents, vectors)
    }

    pub fn from_vectors(
        documents: Vec<Document>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, RetrievalError> {
        if documents.len() != vectors.len() {
            return Err(RetrievalError::VectorCount {
                expected: documents.len(),
                actual: vectors.len(),
            });
        }
        let dimensions = vectors.first().map(Vec::len).unwrap_or_default();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(RetrievalError::Dimensions {
                expected: dimensions,
                actual: bad.len(),
            });
        }
        Ok(Self {
            documents,
            vectors,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Top `k` documents by cosine similarity; equal scores keep corpus order.
    pub fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, RetrievalError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RetrievalError::Dimensions {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| (index, cosine_similarity(query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(index, score)| ScoredDocument {
                document: self.documents[index].clone(),
                score,
            })
            .collect())
    }
}

/// Embeds the question and looks it up in the shared index.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    k: usize,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, embeddings: Arc<dyn EmbeddingProvider>, k: usize) -> Self {
        Self {
            store,
            embeddings,
            k,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredDocument>, RetrievalError> {
        let query = self.embeddings.embed_query(question).await?;
        self.store.similarity_search(&query, self.k)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::embedding::HashingEmbedding;
    use crate::assistant::knowledge::{default_documents, DocumentSource};

    async fn default_retriever(k: usize) -> Retriever {
        let embedder = Arc::new(HashingEmbedding::default());
        let store = VectorStore::from_documents(default_documents(), embedder.as_ref())
            .await
            .unwrap();
        Retriever::new(Arc::new(store), embedder, k)
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_orders_by_similarity_and_keeps_ties_stable() {
        let docs = vec![
            Document::new("a", DocumentSource::Faq),
            Document::new("b", DocumentSource::Faq),
            Document::new("c", DocumentSource::Faq),
        ];
        let store = VectorStore::from_vectors(
            docs,
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();

        let hits = store.similarity_search(&[1.0, 0.0], 2).unwrap();
        let contents: Vec<&str> = hits
            .iter()
            .map(|hit| hit.document.page_content.as_str())
            .collect();
        assert_eq!(contents, ["b", "c"]);
    }

    #[test]
    fn mismatched_vectors_are_rejected() {
        let docs = vec![Document::new("a", DocumentSource::Faq)];
        assert!(matches!(
            VectorStore::from_vectors(docs.clone(), vec![]),
            Err(RetrievalError::VectorCount { .. })
        ));

        let store = VectorStore::from_vectors(docs, vec![vec![1.0, 0.0]]).unwrap();
        assert!(matches!(
            store.similarity_search(&[1.0], 1),
            Err(RetrievalError::Dimensions { .. })
        ));
    }

    #[tokio::test]
    async fn battery_question_retrieves_battery_passage() {
        let retriever = default_retriever(2).await;
        let hits = retriever
            .retrieve("What is the battery life of the QuantumLeap X1?")
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits
            .iter()
            .any(|hit| hit.document.page_content.contains("72-hour battery life")));
    }

    #[tokio::test]
    async fn repeated_queries_return_the_same_documents() {
        let retriever = default_retriever(2).await;
        let question = "Do you ship to other countries?";
        let first = retriever.retrieve(question).await.unwrap();
        let second = retriever.retrieve(question).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn k_caps_the_result_count() {
        let retriever = default_retriever(10).await;
        let hits = retriever.retrieve("returns").await.unwrap();
        assert_eq!(hits.len(), retriever.store().len());
    }
}
