//! Tokenization and relevance scoring for the inverted index.

use std::collections::HashMap;

/// BM25 term-frequency saturation
pub const BM25_K1: f64 = 1.2;
/// BM25 document-length normalization
pub const BM25_B: f64 = 0.75;

/// Strip everything but ASCII alphanumerics, space, underscore and hyphen.
///
/// Quotes are removed outright; every other disallowed character becomes a
/// space. Runs of whitespace collapse to a single space.
pub fn sanitize_query(query: &str) -> String {
    let safe: String = query
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    safe.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct query terms in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(&sanitize_query(query)) {
        if !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

/// Term frequencies over a set of fields, plus the total token count.
pub fn term_frequencies<'a>(fields: impl IntoIterator<Item = &'a str>) -> (HashMap<String, u32>, u64) {
    let mut freqs: HashMap<String, u32> = HashMap::new();
    let mut length = 0u64;
    for field in fields {
        for token in tokenize(field) {
            *freqs.entry(token).or_insert(0) += 1;
            length += 1;
        }
    }
    (freqs, length)
}

/// Inverse document frequency, never negative.
pub fn idf(doc_count: u64, doc_freq: u64) -> f64 {
    let n = doc_count as f64;
    let df = doc_freq as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// BM25 contribution of one term to one document.
pub fn bm25_term(idf: f64, tf: u32, doc_len: u64, avg_doc_len: f64) -> f64 {
    let tf = tf as f64;
    let norm = if avg_doc_len > 0.0 {
        doc_len as f64 / avg_doc_len
    } else {
        1.0
    };
    idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm))
}
