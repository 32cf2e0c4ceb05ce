use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Faq,
    ProductDocs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: DocumentSource,
}

/// A passage of the assistant's knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>, source: DocumentSource) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: DocumentMetadata { source },
        }
    }
}

pub fn default_documents() -> Vec<Document> {
    vec![
        Document::new(
            "Our return policy allows for returns within 30 days of purchase, provided the item is in its original condition.",
            DocumentSource::Faq,
        ),
        Document::new(
            "To track your order, please use the tracking link sent to your email address after shipment.",
            DocumentSource::Faq,
        ),
        Document::new(
            "We currently do not offer international shipping.",
            DocumentSource::Faq,
        ),
        Document::new(
            "The 'QuantumLeap X1' smartwatch features a 72-hour battery life under normal usage.",
            DocumentSource::ProductDocs,
        ),
        Document::new(
            "The 'QuantumLeap X1' is water-resistant up to 5 atmospheres (50 meters).",
            DocumentSource::ProductDocs,
        ),
        Document::new(
            "Our customer support team is available 24/7 via the chat widget on our website.",
            DocumentSource::Faq,
        ),
    ]
}

/// Reads a JSON array of documents, replacing the built-in passages.
pub fn load_documents(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open knowledge base {}", path.display()))?;
    let documents: Vec<Document> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse knowledge base {}", path.display()))?;
    ensure!(
        !documents.is_empty(),
        "knowledge base {} contains no documents",
        path.display()
    );
    ensure!(
        documents
            .iter()
            .all(|doc| !doc.page_content.trim().is_empty()),
        "knowledge base {} contains an empty passage",
        path.display()
    );
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn built_in_corpus_tags_sources() {
        let docs = default_documents();
        assert_eq!(docs.len(), 6);
        assert_eq!(
            docs.iter()
                .filter(|d| d.metadata.source == DocumentSource::ProductDocs)
                .count(),
            2
        );
    }

    #[test]
    fn loads_documents_with_snake_case_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"page_content": "Gift cards never expire.", "metadata": {{"source": "faq"}}}},
                {{"page_content": "The X2 has GPS.", "metadata": {{"source": "product_docs"}}}}]"#
        )
        .unwrap();

        let docs = load_documents(file.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].metadata.source, DocumentSource::ProductDocs);
    }

    #[test]
    fn rejects_empty_or_unknown_sources() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        write!(empty, "[]").unwrap();
        assert!(load_documents(empty.path()).is_err());

        let mut unknown = tempfile::NamedTempFile::new().unwrap();
        write!(
            unknown,
            r#"[{{"page_content": "x", "metadata": {{"source": "blog"}}}}]"#
        )
        .unwrap();
        assert!(load_documents(unknown.path()).is_err());
    }
}
