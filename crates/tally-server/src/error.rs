use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request body: {0}")]
    BadRequest(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Invalid listen address {host}:{port}")]
    InvalidAddress { host: String, port: u16 },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Maps a settings path to the environment variable that sets it
pub(crate) fn to_env_var(field_path: &str) -> String {
    // bare field names come from the provider block, the only one with required fields
    let normalized_path = if field_path.contains('.') {
        field_path.to_string()
    } else {
        format!("provider.{}", field_path)
    };

    format!(
        "TALLY_{}",
        normalized_path.replace('.', "__").to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_conversion() {
        assert_eq!(to_env_var("type"), "TALLY_PROVIDER__TYPE");
        assert_eq!(to_env_var("api_key"), "TALLY_PROVIDER__API_KEY");
        assert_eq!(to_env_var("provider.host"), "TALLY_PROVIDER__HOST");
        assert_eq!(to_env_var("remote.url"), "TALLY_REMOTE__URL");
    }

    #[test]
    fn test_bad_request_status() {
        let response = Error::BadRequest("expected `messages`".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
