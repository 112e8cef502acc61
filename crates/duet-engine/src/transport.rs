//! Transport abstraction between the engine and a chat backend

use async_stream::stream;
use async_trait::async_trait;
use duet_ai::{ChatEvent, ChatEventStream, ChatProvider, ChatRequest};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Transport for running one chat request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and stream the reply. The stream ends early once
    /// `cancel` fires.
    async fn run(&self, request: ChatRequest, cancel: CancellationToken) -> Result<ChatEventStream>;
}

/// Direct provider transport - calls the backend API directly
pub struct ProviderTransport<P> {
    provider: P,
}

impl<P: ChatProvider> ProviderTransport<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: ChatProvider + 'static> Transport for ProviderTransport<P> {
    async fn run(&self, request: ChatRequest, cancel: CancellationToken) -> Result<ChatEventStream> {
        let mut upstream = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(Box::pin(futures::stream::empty()));
            }
            result = self.provider.stream_chat(&request) => result?,
        };

        Ok(Box::pin(stream! {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("stream aborted");
                        return;
                    }
                    event = upstream.next() => event,
                };
                match event {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                    None => {
                        yield ChatEvent::Done;
                        return;
                    }
                }
            }
        }))
    }
}
