use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use mcp_core::handler::{ToolError, ToolResult};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

/// The document search collaborator behind the retrieval tool.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search_documents(&self, query: &str) -> anyhow::Result<Value>;
}

/// Searches a retrieval service that accepts `POST {"query": ...}` and answers with JSON.
pub struct HttpDocumentSearch {
    client: Client,
    url: String,
}

impl HttpDocumentSearch {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client<S: Into<String>>(client: Client, url: S) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DocumentSearch for HttpDocumentSearch {
    async fn search_documents(&self, query: &str) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("retrieval service unreachable")?;

        let status = response.status();
        if !status.is_success() {
            bail!("retrieval service returned {}", status);
        }

        response
            .json()
            .await
            .context("retrieval service returned malformed JSON")
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RetrievalParams {
    /// The search query to find information in the document collection
    pub query: String,
}

#[derive(Clone)]
pub struct RetrievalTool {
    pub name: String,
    pub description: String,
    search: Arc<dyn DocumentSearch>,
}

impl RetrievalTool {
    pub fn new<N, D>(name: N, description: D, search: Arc<dyn DocumentSearch>) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            search,
        }
    }

    pub async fn execute(&self, params: RetrievalParams) -> ToolResult<Value> {
        if params.query.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "query must not be empty".to_string(),
            ));
        }

        tracing::debug!(query = %params.query, "searching documents");
        self.search
            .search_documents(&params.query)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_search_posts_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_json(json!({"query": "cashback cards"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"documents": [{"content": "Card A: 2% cashback"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let search = HttpDocumentSearch::new(format!("{}/search", server.uri()));
        let tool = RetrievalTool::new("docs", "Search documents", Arc::new(search));
        let result = tool
            .execute(RetrievalParams {
                query: "cashback cards".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["documents"][0]["content"], "Card A: 2% cashback");
    }

    #[tokio::test]
    async fn test_search_failure_is_opaque_execution_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tool = RetrievalTool::new(
            "docs",
            "Search documents",
            Arc::new(HttpDocumentSearch::new(server.uri())),
        );
        let err = tool
            .execute(RetrievalParams {
                query: "anything".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionError(m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let tool = RetrievalTool::new(
            "docs",
            "Search documents",
            Arc::new(HttpDocumentSearch::new("http://127.0.0.1:9")),
        );
        let err = tool
            .execute(RetrievalParams {
                query: "  ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
