use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tally::invocation::{to_conversation, ChatMessage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::error::Error;
use crate::state::AppState;
use crate::stream::{DataStreamEncoder, DATA_STREAM_HEADER, DATA_STREAM_VERSION};

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

/// Response body that forwards encoded stream parts as they are produced.
pub struct DataStreamResponse {
    rx: ReceiverStream<String>,
}

impl DataStreamResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for DataStreamResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for DataStreamResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
                (
                    HeaderName::from_static(DATA_STREAM_HEADER),
                    DATA_STREAM_VERSION,
                ),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<DataStreamResponse, Error> {
    let Json(request) = payload.map_err(|rejection| Error::BadRequest(rejection.body_text()))?;
    let messages = to_conversation(&request.messages);
    if messages.is_empty() {
        return Err(Error::BadRequest("messages must not be empty".to_string()));
    }
    debug!(messages = messages.len(), "starting reply");

    let (tx, rx) = mpsc::channel(100);
    let encoder = DataStreamEncoder::new(format!("msg-{}", Utc::now().timestamp_millis()));
    let mut events = state.orchestrator.run(messages);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        break;
                    };
                    if tx.send(encoder.encode(&event)).await.is_err() {
                        info!("Client disconnected, abandoning reply");
                        break;
                    }
                }
                _ = tx.closed() => {
                    info!("Client disconnected, abandoning reply");
                    break;
                }
            }
        }
    });

    Ok(DataStreamResponse::new(ReceiverStream::new(rx)))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/agent", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use mcp_core::tool::ToolCall;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tally::message::Message;
    use std::time::Duration;
    use tally::agents::AgentConfig;
    use tally::orchestrator::{Orchestrator, OrchestratorConfig};
    use tally::providers::mock::MockProvider;
    use tally::registry::RemoteToolConfig;
    use tally::tools::PriceQuoteTool;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(provider: MockProvider, price_host: &str) -> Router {
        app_with(provider, price_host, OrchestratorConfig::default())
    }

    fn app_with(provider: MockProvider, price_host: &str, config: OrchestratorConfig) -> Router {
        let orchestrator = Orchestrator::new(
            Arc::new(provider),
            vec![PriceQuoteTool::new("getCryptoPrices", "Crypto prices")
                .with_host(price_host)
                .into()],
            config,
        );
        routes(AppState::new(orchestrator))
    }

    /// An MCP server with no tools that hands out session `session-7`.
    async fn mcp_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(|request: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                let reply = |result: Value| {
                    ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": body["id"],
                        "result": result,
                    }))
                };
                match body["method"].as_str() {
                    Some("initialize") => reply(json!({
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {"listChanged": false}},
                        "serverInfo": {"name": "stocks", "version": "1.0.0"}
                    }))
                    .insert_header("Mcp-Session-Id", "session-7"),
                    Some("tools/list") => reply(json!({"tools": []})),
                    _ => ResponseTemplate::new(202),
                }
            })
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/mcp"))
            .and(header("Mcp-Session-Id", "session-7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .uri("/api/agent")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn parts(body: &str) -> Vec<(String, Value)> {
        body.lines()
            .map(|line| {
                let (code, json) = line.split_once(':').unwrap();
                (code.to_string(), serde_json::from_str(json).unwrap())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_streams_tool_round_in_order() {
        let prices = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bitcoin": {"usd": 65000}})))
            .mount(&prices)
            .await;
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("getCryptoPrices", json!({"ids": ["bitcoin"]}))),
            ),
            Message::assistant().with_text("Bitcoin is at $65000."),
        ]);

        let response = app(provider, &prices.uri())
            .oneshot(post_json(json!({
                "messages": [{"role": "user", "content": "price of bitcoin?"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[DATA_STREAM_HEADER], DATA_STREAM_VERSION);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parts = parts(std::str::from_utf8(&body).unwrap());
        let codes: Vec<&str> = parts.iter().map(|(code, _)| code.as_str()).collect();
        assert_eq!(codes, vec!["f", "b", "9", "a", "e", "f", "0", "e", "d"]);

        assert_eq!(parts[2].1["toolName"], "getCryptoPrices");
        assert_eq!(parts[3].1["toolCallId"], "call_1");
        assert!(parts[3].1["result"].as_str().unwrap().contains("65000"));
        assert_eq!(parts[6].1, json!("Bitcoin is at $65000."));
        assert_eq!(parts[8].1["finishReason"], "stop");
    }

    #[tokio::test]
    async fn test_prior_tool_invocations_are_replayed() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("Still $65000.")]);
        let response = app(provider.clone(), "http://127.0.0.1:1")
            .oneshot(post_json(json!({
                "messages": [
                    {"role": "user", "content": "price of bitcoin?"},
                    {
                        "role": "assistant",
                        "content": "Bitcoin is at $65000.",
                        "toolInvocations": [{
                            "toolCallId": "call_1",
                            "toolName": "getCryptoPrices",
                            "state": "result",
                            "args": {"ids": ["bitcoin"]},
                            "result": "{\"bitcoin\":{\"usd\":65000}}"
                        }]
                    },
                    {"role": "user", "content": "and now?"}
                ]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.into_body().collect().await.unwrap();

        let conversation = &provider.requests()[0];
        assert_eq!(conversation.len(), 4);
        assert!(conversation[1].is_tool_call());
        assert_eq!(conversation[3].as_concat_text(), "and now?");
    }

    #[tokio::test]
    async fn test_unparsable_body_is_rejected() {
        let provider = MockProvider::new(vec![]);
        let response = app(provider.clone(), "http://127.0.0.1:1")
            .oneshot(post_json(json!({"msgs": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(provider.clone(), "http://127.0.0.1:1")
            .oneshot(post_json(json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_remote_session() {
        let mcp = mcp_server().await;
        let prices = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"bitcoin": {"usd": 65000}}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&prices)
            .await;
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("getCryptoPrices", json!({"ids": ["bitcoin"]}))),
            ),
            Message::assistant().with_text("Bitcoin is at $65000."),
        ]);
        let config = OrchestratorConfig {
            agent: AgentConfig::default(),
            remote: Some(RemoteToolConfig::new(format!("{}/mcp", mcp.uri()))),
        };

        let response = app_with(provider.clone(), &prices.uri(), config)
            .oneshot(post_json(json!({
                "messages": [{"role": "user", "content": "price of bitcoin?"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // read until the tool call is announced, then hang up while the quote is in flight
        let mut body = response.into_body();
        let mut received = String::new();
        while !received.contains("\n9:") {
            let frame = body.frame().await.unwrap().unwrap();
            if let Ok(data) = frame.into_data() {
                received.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
        drop(body);

        let mut deletes = 0;
        for _ in 0..100 {
            deletes = mcp
                .received_requests()
                .await
                .unwrap()
                .iter()
                .filter(|request| request.method.as_str() == "DELETE")
                .count();
            if deletes > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(deletes, 1);

        // the quote still completes, but nobody asks the model about it
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_ends_with_error_parts() {
        let provider = MockProvider::with_results(vec![Err(
            tally::providers::errors::ProviderError::RateLimitExceeded("slow down".to_string()),
        )]);
        let response = app(provider, "http://127.0.0.1:1")
            .oneshot(post_json(json!({
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parts = parts(std::str::from_utf8(&body).unwrap());
        let codes: Vec<&str> = parts.iter().map(|(code, _)| code.as_str()).collect();
        assert_eq!(codes, vec!["f", "3", "d"]);
        assert_eq!(parts[2].1["finishReason"], "error");
    }
}
