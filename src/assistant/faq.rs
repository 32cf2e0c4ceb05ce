use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::fuzzy::{extract_one, Scorer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaqMatch {
    pub question: String,
    pub answer: String,
    pub score: f64,
    pub scorer: Scorer,
}

/// Static question/answer list searched with fuzzy string scorers.
#[derive(Debug, Clone, Default)]
pub struct FaqMatcher {
    entries: Vec<FaqEntry>,
}

impl FaqMatcher {
    pub fn new(entries: Vec<FaqEntry>) -> Self {
        Self { entries }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open FAQ file {}", path.display()))?;
        let entries: Vec<FaqEntry> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse FAQ file {}", path.display()))?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs each scorer in priority order and returns the first best match whose
    /// score reaches `threshold`. `None` means the caller should fall through to
    /// the language model.
    pub fn lookup(&self, query: &str, threshold: f64) -> Option<FaqMatch> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || self.entries.is_empty() {
            return None;
        }

        for scorer in Scorer::ALL {
            let questions = self.entries.iter().map(|entry| entry.question.as_str());
            let Some((index, score)) = extract_one(&query, questions, scorer) else {
                continue;
            };
            if score >= threshold {
                let entry = &self.entries[index];
                return Some(FaqMatch {
                    question: entry.question.clone(),
                    answer: entry.answer.clone(),
                    score,
                    scorer,
                });
            }
        }

        None
    }
}
