use mcp_core::handler::{ToolError, ToolResult};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_PRICE_HOST: &str = "https://api.coingecko.com";
pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PriceParams {
    /// The ids of the crypto assets to get prices for, e.g. "bitcoin"
    pub ids: Vec<String>,
    /// Currency to quote prices in, defaults to usd
    #[serde(default)]
    pub currency: Option<String>,
}

/// Quotes asset prices from a CoinGecko-compatible `simple/price` endpoint.
#[derive(Clone)]
pub struct PriceQuoteTool {
    pub name: String,
    pub description: String,
    client: Client,
    host: String,
    default_currency: String,
}

impl PriceQuoteTool {
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            client: Client::new(),
            host: DEFAULT_PRICE_HOST.to_string(),
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_default_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub async fn execute(&self, params: PriceParams) -> ToolResult<Value> {
        if params.ids.is_empty() {
            return Err(ToolError::InvalidParameters(
                "ids must contain at least one asset id".to_string(),
            ));
        }
        let currency = params
            .currency
            .unwrap_or_else(|| self.default_currency.clone())
            .to_lowercase();

        let url = format!("{}/api/v3/simple/price", self.host.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("ids", params.ids.join(",")),
                ("vs_currencies", currency),
            ])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Failed to fetch prices: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Upstream {
                status: status.as_u16(),
                message: format!(
                    "Failed to fetch prices: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            });
        }

        let prices: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionError(format!("Malformed price response: {}", e)))?;
        if !prices.is_object() {
            return Err(ToolError::ExecutionError(format!(
                "Malformed price response: expected an object, got {}",
                prices
            )));
        }
        Ok(prices)
    }
}
