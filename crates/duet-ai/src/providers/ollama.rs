//! Ollama `/api/chat` provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::ChatProvider;
use crate::{
    error::{Error, Result},
    stream::{ChatEvent, ChatEventStream, LineDecoder, parse_line},
    types::{ChatRequest, ModelInfo},
};

/// Default address of a local Ollama server
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama API client
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
}

impl OllamaProvider {
    /// Create a provider for the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must start with http:// or https://, got {base_url:?}"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "POST /api/chat"
        );
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatEventStream> {
        let response = self.send(request).await?;
        if request.stream {
            Ok(Box::pin(ndjson_stream(response)))
        } else {
            Ok(Box::pin(single_reply(response)))
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), body));
        }
        let list: TagList = response.json().await?;
        Ok(list.models)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        tracing::debug!(%model, "POST /api/generate");
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), body));
        }
        let reply: GenerateReply = response.json().await?;
        Ok(reply.response)
    }
}

fn ndjson_stream(response: reqwest::Response) -> impl futures::Stream<Item = ChatEvent> {
    stream! {
        let mut body = response.bytes_stream();
        let mut decoder = LineDecoder::new();

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield ChatEvent::Error { message: Error::from(e).to_string() };
                    return;
                }
            };
            for line in decoder.push(&bytes) {
                tracing::trace!(%line, "stream line");
                match parse_line(&line) {
                    Ok(chunk) => {
                        if let Some(content) = chunk.content() {
                            yield ChatEvent::Delta { content: content.to_string() };
                        }
                        if chunk.done {
                            yield ChatEvent::Done;
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, %line, "skipping malformed stream line");
                    }
                }
            }
        }

        if let Some(line) = decoder.finish() {
            match parse_line(&line) {
                Ok(chunk) => {
                    if let Some(content) = chunk.content() {
                        yield ChatEvent::Delta { content: content.to_string() };
                    }
                }
                Err(e) => tracing::warn!(error = %e, %line, "skipping malformed stream line"),
            }
        }
        yield ChatEvent::Done;
    }
}

fn single_reply(response: reqwest::Response) -> impl futures::Stream<Item = ChatEvent> {
    stream! {
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                yield ChatEvent::Error { message: Error::from(e).to_string() };
                return;
            }
        };
        tracing::trace!(body = %text, "chat reply");
        match parse_line(text.trim()) {
            Ok(chunk) => {
                if let Some(content) = chunk.content() {
                    yield ChatEvent::Delta { content: content.to_string() };
                }
                yield ChatEvent::Done;
            }
            Err(e) => {
                yield ChatEvent::Error { message: Error::from(e).to_string() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(provider: &OllamaProvider, request: &ChatRequest) -> Vec<ChatEvent> {
        let stream = provider.stream_chat(request).await.unwrap();
        stream.collect().await
    }

    fn request(stream: bool) -> ChatRequest {
        ChatRequest::new("llama3", vec![ChatMessage::user("hi")]).with_stream(stream)
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            OllamaProvider::new("localhost:11434"),
            Err(Error::InvalidConfig(_))
        ));
        let p = OllamaProvider::new("http://host:1/ ").unwrap();
        assert_eq!(p.base_url(), "http://host:1");
    }

    #[tokio::test]
    async fn test_streams_deltas_and_skips_bad_lines() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
            "garbage\n",
            "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri()).unwrap();
        let events = collect(&provider, &request(true)).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Delta { content: "Hel".into() },
                ChatEvent::Delta { content: "lo".into() },
                ChatEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_body_without_done_still_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"message\":{\"content\":\"x\"},\"done\":false}"),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri()).unwrap();
        let events = collect(&provider, &request(true)).await;
        assert_eq!(
            events,
            vec![ChatEvent::Delta { content: "x".into() }, ChatEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_non_streaming_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": { "role": "assistant", "content": "Whole reply." },
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri()).unwrap();
        let events = collect(&provider, &request(false)).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Delta { content: "Whole reply.".into() },
                ChatEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri()).unwrap();
        let err = provider.stream_chat(&request(true)).await.err().unwrap();
        assert!(matches!(err, Error::Status { code: 500, .. }));
        assert_eq!(err.to_string(), "HTTP error: 500");
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [
                    { "name": "llama3:8b", "size": 42 },
                    { "name": "qwen3:4b" }
                ]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri()).unwrap();
        let models = provider.list_models().await.unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama3:8b", "qwen3:4b"]);
        assert_eq!(models[0].size, Some(42));
    }

    #[tokio::test]
    async fn test_generate_returns_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen3",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "qwen3",
                "response": "SEARCH: rust 2024 edition",
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri()).unwrap();
        let reply = provider.generate("qwen3", "classify this").await.unwrap();
        assert_eq!(reply, "SEARCH: rust 2024 edition");
    }
}
