//! LLM provider implementations.
//!
//! Contains the concrete [`LlmProvider`](stepflow_core::llm::provider::LlmProvider)
//! backend for OpenAI-compatible gateways, plus a factory ([`create_provider`])
//! that resolves the API key from the environment and boxes the provider.

pub mod openai_compat;

use secrecy::SecretString;

use stepflow_core::llm::box_provider::BoxLlmProvider;
use stepflow_types::config::ProviderConfig;
use stepflow_types::llm::LlmError;

use self::openai_compat::OpenAiCompatibleProvider;

/// Create a [`BoxLlmProvider`] from a [`ProviderConfig`].
///
/// The API key is read from the environment variable named by
/// `config.api_key_env`.
///
/// # Errors
///
/// Returns [`LlmError::AuthenticationFailed`] when that variable is unset or empty.
pub fn create_provider(config: &ProviderConfig) -> Result<BoxLlmProvider, LlmError> {
    let key = std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            tracing::error!(env = config.api_key_env.as_str(), "API key environment variable not set");
            LlmError::AuthenticationFailed
        })?;

    create_provider_with_key(config, SecretString::from(key))
}

/// Create a [`BoxLlmProvider`] with an already resolved API key.
pub fn create_provider_with_key(
    config: &ProviderConfig,
    api_key: SecretString,
) -> Result<BoxLlmProvider, LlmError> {
    if config.base_url.trim().is_empty() {
        return Err(LlmError::InvalidRequest("provider base_url is empty".to_string()));
    }
    tracing::debug!(
        provider = config.name.as_str(),
        base_url = config.base_url.as_str(),
        "creating provider"
    );
    Ok(BoxLlmProvider::new(OpenAiCompatibleProvider::new(config, api_key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::llm::provider::LlmProvider;

    #[test]
    fn test_create_provider_with_key() {
        let provider =
            create_provider_with_key(&ProviderConfig::default(), SecretString::from("sk-test")).unwrap();
        assert_eq!(LlmProvider::name(&provider), "unbound");
    }

    #[test]
    fn test_create_provider_empty_base_url() {
        let mut config = ProviderConfig::default();
        config.base_url = "  ".to_string();
        let result = create_provider_with_key(&config, SecretString::from("sk-test"));
        assert!(matches!(result, Err(LlmError::InvalidRequest(_))));
    }

    #[test]
    fn test_create_provider_missing_env_key() {
        let mut config = ProviderConfig::default();
        config.api_key_env = "STEPFLOW_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        match create_provider(&config) {
            Err(LlmError::AuthenticationFailed) => {}
            Err(other) => panic!("Expected AuthenticationFailed, got: {other}"),
            Ok(_) => panic!("Expected error but got Ok"),
        }
    }
}
