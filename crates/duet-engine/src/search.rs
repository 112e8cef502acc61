//! Rewriting user turns before they are sent

use async_trait::async_trait;
use duet_ai::{
    ChatProvider, WebSearch,
    search::{augment_message, format_results, keyword_prompt, parse_keywords},
};

/// Appended to the base speaker's system message while web search is on.
pub const SEARCH_SYSTEM_PROMPT: &str = "You are a search-augmented assistant. When the user \
provides SEARCH_RESULTS, you must read them and base your answer strictly on that information.";

/// Rewrites the latest user message of a request.
#[async_trait]
pub trait Augmenter: Send + Sync {
    /// The message to send in place of `text`, or `None` to send it unchanged.
    async fn augment(&self, model: &str, text: &str) -> Option<String>;
}

/// Asks the model for search keywords, runs the search and prepends the results.
pub struct WebSearchAugmenter<P> {
    provider: P,
    search: WebSearch,
}

impl<P: ChatProvider> WebSearchAugmenter<P> {
    pub fn new(provider: P, search: WebSearch) -> Self {
        Self { provider, search }
    }
}

#[async_trait]
impl<P: ChatProvider + 'static> Augmenter for WebSearchAugmenter<P> {
    async fn augment(&self, model: &str, text: &str) -> Option<String> {
        let reply = match self.provider.generate(model, &keyword_prompt(text)).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "keyword extraction failed");
                return None;
            }
        };
        let Some(keywords) = parse_keywords(&reply) else {
            tracing::debug!("no search needed");
            return None;
        };
        let results = match self.search.search(&keywords).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, %keywords, "web search failed");
                return None;
            }
        };
        tracing::debug!(%keywords, hits = results.len(), "web search done");
        format_results(&results).map(|block| augment_message(text, &block))
    }
}
