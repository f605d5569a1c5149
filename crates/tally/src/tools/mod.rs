//! Tool adapters: every capability the model can call, behind one interface.
//!
//! Local tools (document retrieval, price quotes) and tools discovered on a remote MCP
//! server are variants of the same closed [`ToolAdapter`] enum and are looked up by name
//! in a [`ToolSet`] when a step executes.
pub mod price;
pub mod remote;
pub mod retrieval;

use std::collections::BTreeMap;
use std::sync::Arc;

use mcp_core::handler::{ToolError, ToolResult};
use mcp_core::tool::Tool;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use price::{PriceParams, PriceQuoteTool};
pub use remote::RemoteTool;
pub use retrieval::{DocumentSearch, HttpDocumentSearch, RetrievalParams, RetrievalTool};

#[derive(Clone)]
pub enum ToolAdapter {
    Retrieval(RetrievalTool),
    PriceQuote(PriceQuoteTool),
    Remote(RemoteTool),
}

impl ToolAdapter {
    pub fn name(&self) -> &str {
        match self {
            ToolAdapter::Retrieval(tool) => &tool.name,
            ToolAdapter::PriceQuote(tool) => &tool.name,
            ToolAdapter::Remote(tool) => tool.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolAdapter::Retrieval(tool) => &tool.description,
            ToolAdapter::PriceQuote(tool) => &tool.description,
            ToolAdapter::Remote(tool) => tool.description(),
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            ToolAdapter::Retrieval(_) => schema_for::<RetrievalParams>(),
            ToolAdapter::PriceQuote(_) => schema_for::<PriceParams>(),
            ToolAdapter::Remote(tool) => tool.input_schema().clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ToolAdapter::Remote(_))
    }

    pub fn to_tool(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.input_schema())
    }

    /// Validate `args` against the adapter's input shape and run it.
    #[tracing::instrument(skip(self, args), fields(tool = %self.name()))]
    pub async fn execute(&self, args: Value) -> ToolResult<Value> {
        match self {
            ToolAdapter::Retrieval(tool) => tool.execute(parse_params(args)?).await,
            ToolAdapter::PriceQuote(tool) => tool.execute(parse_params(args)?).await,
            ToolAdapter::Remote(tool) => tool.execute(args).await,
        }
    }
}

impl From<RetrievalTool> for ToolAdapter {
    fn from(tool: RetrievalTool) -> Self {
        ToolAdapter::Retrieval(tool)
    }
}

impl From<PriceQuoteTool> for ToolAdapter {
    fn from(tool: PriceQuoteTool) -> Self {
        ToolAdapter::PriceQuote(tool)
    }
}

impl From<RemoteTool> for ToolAdapter {
    fn from(tool: RemoteTool) -> Self {
        ToolAdapter::Remote(tool)
    }
}

/// Deserialize untyped model arguments into a typed parameter struct.
pub fn parse_params<T: DeserializeOwned>(args: Value) -> ToolResult<T> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

fn schema_for<T: schemars::JsonSchema>() -> Value {
    mcp_core::handler::generate_schema::<T>().unwrap_or_else(|e| {
        tracing::warn!("falling back to an open schema: {}", e);
        serde_json::json!({"type": "object"})
    })
}

/// The tools active for one request, keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<ToolAdapter>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine discovered remote tools with local ones; a local tool wins a name clash.
    pub fn merge<R, L>(remote: R, local: L) -> Self
    where
        R: IntoIterator<Item = ToolAdapter>,
        L: IntoIterator<Item = ToolAdapter>,
    {
        let mut set = Self::new();
        for tool in remote {
            set.insert(tool);
        }
        for tool in local {
            if let Some(replaced) = set.insert(tool) {
                tracing::debug!(
                    tool = %replaced.name(),
                    "local tool overrides remote tool of the same name"
                );
            }
        }
        set
    }

    /// Adds a tool, returning the one it replaced.
    pub fn insert(&mut self, tool: ToolAdapter) -> Option<Arc<ToolAdapter>> {
        self.tools.insert(tool.name().to_string(), Arc::new(tool))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolAdapter>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Tool declarations to send to the model.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.values().map(|tool| tool.to_tool()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSearch;

    #[async_trait]
    impl DocumentSearch for StaticSearch {
        async fn search_documents(&self, query: &str) -> anyhow::Result<Value> {
            Ok(json!([{"title": "Visa Oro", "match": query}]))
        }
    }

    fn retrieval(name: &str) -> ToolAdapter {
        RetrievalTool::new(name, "Search card documents", Arc::new(StaticSearch)).into()
    }

    #[tokio::test]
    async fn test_execute_validates_before_running() {
        let tool = retrieval("getCreditCardsInfo");

        let err = tool.execute(json!({"query": 42})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));

        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(m) if m.contains("query")));

        let result = tool.execute(json!({"query": "gold card"})).await.unwrap();
        assert_eq!(result[0]["match"], "gold card");
    }

    #[test]
    fn test_schema_describes_parameters() {
        let tool = retrieval("getCreditCardsInfo").to_tool();
        assert_eq!(tool.input_schema["type"], "object");
        assert_eq!(tool.input_schema["required"], json!(["query"]));
        assert!(tool.input_schema["properties"]["query"]["description"].is_string());
    }

    #[test]
    fn test_merge_prefers_local_tools() {
        let remote = vec![retrieval("shared"), retrieval("remote_only")];
        let local = vec![
            ToolAdapter::PriceQuote(PriceQuoteTool::new("shared", "local price tool")),
            retrieval("local_only"),
        ];

        let set = ToolSet::merge(remote, local);
        assert_eq!(set.names(), vec!["local_only", "remote_only", "shared"]);
        let shared = set.get("shared").unwrap();
        assert!(matches!(shared.as_ref(), ToolAdapter::PriceQuote(_)));
        assert_eq!(set.tools().len(), 3);
        assert!(!set.contains("missing"));
    }
}
