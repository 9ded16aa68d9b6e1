use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::debug;

use conductor_core::errors::GatewayError;
use conductor_core::provider::{ModelClient, ModelRequest};
use conductor_core::stream::{ModelChunk, ModelStream, ToolCallFragment};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of chunks, then end the stream.
    Stream(Vec<ModelChunk>),
    /// Yield the chunks, then fail mid-stream.
    StreamThenError(Vec<ModelChunk>, GatewayError),
    /// Yield the chunks, then never produce another item.
    StallAfter(Vec<ModelChunk>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A single content chunk followed by `finish_reason: stop`.
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![ModelChunk::content(text), ModelChunk::finish("stop")])
    }

    /// Text split into several content chunks, as a provider would stream it.
    pub fn text_chunks(parts: &[&str]) -> Self {
        let mut chunks: Vec<ModelChunk> = parts.iter().map(|p| ModelChunk::content(*p)).collect();
        chunks.push(ModelChunk::finish("stop"));
        Self::Stream(chunks)
    }

    pub fn reasoning_then_text(reasoning: &str, text: &str) -> Self {
        Self::Stream(vec![
            ModelChunk::reasoning(reasoning),
            ModelChunk::content(text),
            ModelChunk::finish("stop"),
        ])
    }

    /// One complete tool call in a single fragment.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(&[(id, name, arguments)])
    }

    /// Several tool calls in one response, each in a single fragment.
    pub fn tool_calls(calls: &[(&str, &str, serde_json::Value)]) -> Self {
        let mut chunks: Vec<ModelChunk> = calls
            .iter()
            .enumerate()
            .map(|(i, (id, name, args))| {
                ModelChunk::tool_call(fragment(i as u32, Some(id), Some(name), &args.to_string()))
            })
            .collect();
        chunks.push(ModelChunk::finish("tool_calls"));
        Self::Stream(chunks)
    }

    /// A tool call whose argument text arrives across several fragments.
    /// Only the first fragment carries the id and name.
    pub fn split_tool_call(id: &str, name: &str, arg_parts: &[&str]) -> Self {
        let mut chunks = Vec::with_capacity(arg_parts.len() + 1);
        for (i, part) in arg_parts.iter().enumerate() {
            let frag = if i == 0 {
                fragment(0, Some(id), Some(name), part)
            } else {
                ToolCallFragment {
                    arguments: Some((*part).to_string()),
                    ..Default::default()
                }
            };
            chunks.push(ModelChunk::tool_call(frag));
        }
        chunks.push(ModelChunk::finish("tool_calls"));
        Self::Stream(chunks)
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    /// A stream that opens but never yields.
    pub fn stall() -> Self {
        Self::StallAfter(Vec::new())
    }
}

fn fragment(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> ToolCallFragment {
    ToolCallFragment {
        index: Some(index),
        id: id.map(str::to_string),
        name: name.map(str::to_string),
        kind: Some("function".into()),
        arguments: Some(arguments.to_string()),
    }
}

/// Mock client that returns pre-programmed responses in sequence and records
/// every request it receives.
pub struct MockModelClient {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    requests: Mutex<Vec<ModelRequest>>,
    call_count: AtomicUsize,
}

impl MockModelClient {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Serve `response` whenever the scripted queue is empty.
    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Snapshot of every request seen so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let Some(response) = next.or_else(|| self.fallback.clone()) else {
            return Err(GatewayError::rejected(format!(
                "MockModelClient: no response configured for call {idx}"
            )));
        };
        debug!(call = idx, model = %request.model, "mock model call");

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<ModelStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(chunks) => {
                return Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))));
            }
            MockResponse::StreamThenError(chunks, error) => {
                let items = chunks.into_iter().map(Ok).chain(std::iter::once(Err(error)));
                return Ok(Box::pin(stream::iter(items)));
            }
            MockResponse::StallAfter(chunks) => {
                let head = stream::iter(chunks.into_iter().map(Ok));
                return Ok(Box::pin(head.chain(stream::pending())));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
