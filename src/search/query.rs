use crate::search::llm::QueryExpander;
use crate::storage::index::{IndexStore, SearchHit};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Search result envelope; always well-formed, even on failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub original_query: String,
    pub expanded_query: String,
    pub total_results: usize,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Expands natural-language queries and runs them against the index
pub struct QueryEngine {
    store: Arc<IndexStore>,
    expander: Arc<dyn QueryExpander>,
}

impl QueryEngine {
    pub fn new(store: Arc<IndexStore>, expander: Arc<dyn QueryExpander>) -> Self {
        Self { store, expander }
    }

    pub async fn search(&self, query: &str, limit: usize) -> SearchResponse {
        let expanded = match self.expander.expand(query).await {
            Ok(expanded) if !expanded.trim().is_empty() => expanded,
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Query expansion failed for '{}', using it verbatim: {}", query, e);
                query.to_string()
            }
        };
        info!("Search '{}' expanded to '{}'", query, expanded);

        match self.store.search(&expanded, limit) {
            Ok(results) => SearchResponse {
                original_query: query.to_string(),
                expanded_query: expanded,
                total_results: results.len(),
                results,
                error: None,
            },
            Err(e) => {
                warn!("Search for '{}' failed: {}", query, e);
                SearchResponse {
                    original_query: query.to_string(),
                    expanded_query: query.to_string(),
                    total_results: 0,
                    results: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
