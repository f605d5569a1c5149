use serde::{Deserialize, Serialize};

/// Configuration for model-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The name of the model to use
    pub model_name: String,
    /// Optional temperature setting (0.0 - 1.0)
    pub temperature: Option<f32>,
    /// Optional maximum tokens to generate per step
    pub max_tokens: Option<i32>,
}

impl ModelConfig {
    /// Create a new ModelConfig with the specified model name
    pub fn new(model_name: String) -> Self {
        Self {
            model_name,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temp: Option<f32>) -> Self {
        self.temperature = temp;
        self
    }

    /// Set the max tokens
    pub fn with_max_tokens(mut self, tokens: Option<i32>) -> Self {
        self.max_tokens = tokens;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_builders() {
        let config = ModelConfig::new("gpt-4o-mini".to_string())
            .with_temperature(Some(0.2))
            .with_max_tokens(Some(1000));
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.max_tokens, Some(1000));
    }
}
