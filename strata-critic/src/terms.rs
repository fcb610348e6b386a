//! Query term extraction and overlap

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of", "on", "or", "our",
    "should", "so", "that", "the", "their", "then", "there", "these", "this", "to", "was", "we",
    "what", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

pub(crate) fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercased word tokens of `text`, split on anything that is not
/// alphanumeric or `_`.
pub(crate) fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Distinct non-stopword terms of a query.
pub fn query_terms(query: &str) -> BTreeSet<String> {
    tokens(query)
        .filter(|t| t.chars().count() > 1 && !is_stopword(t))
        .collect()
}

/// Fraction of the query's terms that also occur in `content`.
pub fn term_overlap(query: &str, content: &str) -> f32 {
    let terms = query_terms(query);
    if terms.is_empty() {
        return 0.0;
    }
    let content_terms: BTreeSet<String> = tokens(content).collect();
    let shared = terms.iter().filter(|t| content_terms.contains(*t)).count();
    shared as f32 / terms.len() as f32
}
