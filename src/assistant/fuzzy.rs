//! String similarity scorers on a 0–100 scale.
//!
//! All scorers are built on rapidfuzz's normalized InDel similarity,
//! `100 * 2 * lcs / (len_a + len_b)` over characters. The token scorers only
//! rearrange whitespace-separated words before comparing.

use std::collections::BTreeSet;
use std::fmt;

use rapidfuzz::fuzz;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scorer {
    QuickRatio,
    TokenSortRatio,
    TokenSetRatio,
}

impl Scorer {
    /// Priority order used by the FAQ matcher.
    pub const ALL: [Scorer; 3] = [
        Scorer::QuickRatio,
        Scorer::TokenSortRatio,
        Scorer::TokenSetRatio,
    ];

    pub fn score(self, a: &str, b: &str) -> f64 {
        match self {
            Scorer::QuickRatio => quick_ratio(a, b),
            Scorer::TokenSortRatio => token_sort_ratio(a, b),
            Scorer::TokenSetRatio => token_set_ratio(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scorer::QuickRatio => "quick_ratio",
            Scorer::TokenSortRatio => "token_sort_ratio",
            Scorer::TokenSetRatio => "token_set_ratio",
        }
    }
}

impl fmt::Display for Scorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized InDel similarity. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    fuzz::ratio(a.chars(), b.chars()) * 100.0
}

/// Whole-string ratio that scores 0 when either side is empty.
pub fn quick_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    ratio(a, b)
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    if !intersection.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let common = intersection.join(" ");
    let with_a = join_nonempty(&common, &only_a.join(" "));
    let with_b = join_nonempty(&common, &only_b.join(" "));

    let mut best = ratio(&with_a, &with_b);
    if !common.is_empty() {
        best = best.max(ratio(&common, &with_a)).max(ratio(&common, &with_b));
    }
    best
}

/// Returns the index and score of the best choice. Equal scores keep the
/// earliest choice; an empty choice list yields `None`.
pub fn extract_one<'a, I>(query: &str, choices: I, scorer: Scorer) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (index, choice) in choices.into_iter().enumerate() {
        let score = scorer.score(query, choice);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

fn sorted_tokens(value: &str) -> String {
    let mut tokens: Vec<&str> = value.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}
