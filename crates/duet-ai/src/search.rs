//! Web search used to ground replies in current information

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Brave Search web endpoint
pub const DEFAULT_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// Results requested per query
pub const DEFAULT_RESULT_COUNT: usize = 5;

const KEYWORD_PREFIX: &str = "SEARCH:";

/// One search hit, as shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

impl SearchResult {
    fn is_empty(&self) -> bool {
        self.title.is_empty() && self.url.is_empty() && self.snippet.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebHit>,
}

#[derive(Debug, Deserialize)]
struct WebHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Client for a Brave-compatible web search API
#[derive(Debug, Clone)]
pub struct WebSearch {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl WebSearch {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let url = url.into().trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "search URL must start with http:// or https://, got {url:?}"
            )));
        }
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(Error::InvalidConfig("search API key is empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        })
    }

    /// Run a query. Hits with no title, URL or description are dropped.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        tracing::debug!(%query, "web search");
        let count = DEFAULT_RESULT_COUNT.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), body));
        }
        let reply: SearchReply = response.json().await?;
        Ok(reply
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .map(|hit| SearchResult {
                title: hit.title,
                url: hit.url,
                snippet: hit.description,
            })
            .filter(|r| !r.is_empty())
            .collect())
    }
}

/// Prompt asking a model whether `question` needs a web search.
pub fn keyword_prompt(question: &str) -> String {
    format!(
        "Decide whether the user's question needs an internet search and, if it does, \
         extract search keywords.\n\n\
         Reply with exactly one of:\n\n\
         1. When a search is needed:\n{KEYWORD_PREFIX} <keywords>\n\n\
         2. When no search is needed:\nNONE\n\n\
         Rules:\n\
         - No explanations or reasons\n\
         - No lists or extra information\n\
         - Keywords must be short terms usable in a search engine\n\
         - Put several keywords on one line separated by spaces\n\
         - Never change the reply format\n\n\
         User question:\n\"{question}\""
    )
}

/// Keywords from a reply to [`keyword_prompt`], or `None` when no search is needed.
pub fn parse_keywords(reply: &str) -> Option<String> {
    let keywords = reply.trim().strip_prefix(KEYWORD_PREFIX)?.trim();
    (!keywords.is_empty()).then(|| keywords.to_string())
}

/// Numbered results block, or `None` when there is nothing to show.
pub fn format_results(results: &[SearchResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    #[derive(Serialize)]
    struct Numbered<'a> {
        id: usize,
        #[serde(flatten)]
        result: &'a SearchResult,
    }
    let numbered: Vec<_> = results
        .iter()
        .enumerate()
        .map(|(i, result)| Numbered { id: i + 1, result })
        .collect();
    let json = serde_json::to_string_pretty(&numbered).ok()?;
    Some(format!("SEARCH_RESULTS:\n{json}"))
}

/// User message carrying search results ahead of the question.
pub fn augment_message(question: &str, results_block: &str) -> String {
    format!(
        "The following are web search results. Treat them as SEARCH_RESULTS.\n\
         {results_block}\n\nQuestion: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_keywords() {
        assert_eq!(
            parse_keywords("  SEARCH: tokyo weather tomorrow\n"),
            Some("tokyo weather tomorrow".into())
        );
        assert_eq!(parse_keywords("NONE"), None);
        assert_eq!(parse_keywords("SEARCH:   "), None);
        assert_eq!(parse_keywords("I think SEARCH: x"), None);
    }

    #[test]
    fn test_format_results_numbers_hits() {
        let results = vec![
            SearchResult {
                title: "Rust".into(),
                url: "https://rust-lang.org".into(),
                snippet: String::new(),
            },
            SearchResult {
                title: String::new(),
                url: "https://docs.rs".into(),
                snippet: "Docs".into(),
            },
        ];
        let block = format_results(&results).unwrap();
        assert!(block.starts_with("SEARCH_RESULTS:\n["));
        let json: serde_json::Value =
            serde_json::from_str(block.trim_start_matches("SEARCH_RESULTS:\n")).unwrap();
        assert_eq!(json[0]["id"], 1);
        assert_eq!(json[0]["title"], "Rust");
        assert!(json[0].get("snippet").is_none());
        assert_eq!(json[1]["id"], 2);
        assert!(json[1].get("title").is_none());
        assert_eq!(format_results(&[]), None);
    }

    #[test]
    fn test_augment_message_ends_with_question() {
        let msg = augment_message("What is new?", "SEARCH_RESULTS:\n[]");
        assert!(msg.contains("SEARCH_RESULTS:\n[]"));
        assert!(msg.ends_with("Question: What is new?"));
    }

    #[test]
    fn test_requires_key_and_url() {
        assert!(WebSearch::new(DEFAULT_SEARCH_URL, " ").is_err());
        assert!(WebSearch::new("api.example.com", "key").is_err());
        assert!(WebSearch::new(DEFAULT_SEARCH_URL, "key").is_ok());
    }

    #[tokio::test]
    async fn test_search_sends_token_and_reads_web_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res/v1/web/search"))
            .and(query_param("q", "rust async"))
            .and(query_param("count", "5"))
            .and(header("X-Subscription-Token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {
                    "results": [
                        { "title": "Async Rust", "url": "https://example.com/a", "description": "A book" },
                        { "title": "", "url": "", "description": "" }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let search = WebSearch::new(format!("{}/res/v1/web/search", server.uri()), "secret").unwrap();
        let results = search.search("rust async").await.unwrap();
        assert_eq!(
            results,
            vec![SearchResult {
                title: "Async Rust".into(),
                url: "https://example.com/a".into(),
                snippet: "A book".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_search_without_web_section_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "search"
            })))
            .mount(&server)
            .await;
        let search = WebSearch::new(server.uri(), "k").unwrap();
        assert!(search.search("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;
        let search = WebSearch::new(server.uri(), "k").unwrap();
        let err = search.search("x").await.unwrap_err();
        assert!(matches!(err, Error::Status { code: 401, .. }));
    }
}
