use super::base::Usage;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::providers::errors::ProviderError;

// Maps a non-ok response status to a ProviderError
pub async fn non_ok_response_to_provider_error(
    payload: &Value,
    response: Response,
) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("Authentication failed. Please ensure your API keys are valid and have the required permissions. \
                Status: {}. Response: {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::RateLimitExceeded(format!("Rate limit exceeded. Please retry after some time. Status: {}", status))
        }
        StatusCode::BAD_REQUEST if is_context_length_body(&body) => {
            ProviderError::ContextLengthExceeded(body)
        }
        status if status.is_server_error() => {
            ProviderError::ServerError(format!("Server error occurred. Status: {}", status))
        }
        _ => {
            debug!(
                "Provider request failed with status: {}. Body: {}. Payload: {}",
                status, body, payload
            );
            ProviderError::RequestFailed(format!("Request failed with status: {}.", status))
        }
    }
}

fn is_context_length_body(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .and_then(|error| super::formats::openai::is_context_length_error(&error))
        .is_some()
}

pub async fn handle_response(payload: &Value, response: Response) -> Result<Value, ProviderError> {
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        _ => Err(non_ok_response_to_provider_error(payload, response).await),
    }
}

/// Longest function name the chat-completions API accepts.
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Replace characters model APIs reject in function names.
pub fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| if is_function_name_char(c) { c } else { '_' })
        .collect()
}

pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name.chars().all(is_function_name_char)
}

fn is_function_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extract the model name from a JSON object. Common with most providers to have this top level attribute.
pub fn get_model(data: &Value) -> String {
    data.get("model")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string()
}

pub fn emit_debug_trace<T: serde::Serialize>(
    model_config: &T,
    payload: &Value,
    response: &Value,
    usage: &Usage,
) {
    debug!(
        model_config = %serde_json::to_string_pretty(model_config).unwrap_or_default(),
        input = %serde_json::to_string_pretty(payload).unwrap_or_default(),
        output = %serde_json::to_string_pretty(response).unwrap_or_default(),
        input_tokens = ?usage.input_tokens.unwrap_or_default(),
        output_tokens = ?usage.output_tokens.unwrap_or_default(),
        total_tokens = ?usage.total_tokens.unwrap_or_default(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("hello-world"));
        assert!(is_valid_function_name("getCryptoPrices"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name("hello@world"));
        assert!(!is_valid_function_name(""));
        assert!(is_valid_function_name(&"a".repeat(MAX_FUNCTION_NAME_LEN)));
        assert!(!is_valid_function_name(&"a".repeat(MAX_FUNCTION_NAME_LEN + 1)));
    }

    #[test]
    fn test_get_model() {
        assert_eq!(get_model(&json!({"model": "gpt-4o-mini"})), "gpt-4o-mini");
        assert_eq!(get_model(&json!({})), "Unknown");
    }
}
