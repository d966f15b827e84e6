use crate::models::SearchMode;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_CHAT_MODEL: &str = "qwen-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v3";
pub const DEFAULT_REMOTE_EMBEDDING_DIMENSIONS: usize = 1024;
pub const DEFAULT_COLLECTION: &str = "pdf_notes";

/// Connection settings for an OpenAI-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl EndpointConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }

    /// `base_url` joined with `path`, validated as an absolute URL.
    pub fn endpoint(&self, path: &str) -> Result<String, url::ParseError> {
        let base = Url::parse(self.base_url.trim())?;
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?.to_string())
    }

    pub fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub mode: SearchMode,
    /// Each side of a hybrid search fetches `top_k * fetch_factor` candidates.
    pub fetch_factor: usize,
    pub dense_weight: f64,
    pub sparse_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            mode: SearchMode::Hybrid,
            fetch_factor: 3,
            dense_weight: 0.6,
            sparse_weight: 0.4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub tool_name: String,
    pub tool_description: String,
    pub max_iterations: usize,
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: "你是AI助手，请根据检索结果回答问题，不要编造。".to_string(),
            tool_name: "pdf_extractor".to_string(),
            tool_description: "This tool is to give answer to queries from the pdf".to_string(),
            max_iterations: 5,
            temperature: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let config = EndpointConfig::new("https://example.com/v1/", "key", "model");
        assert_eq!(
            config.endpoint("/embeddings").expect("valid url"),
            "https://example.com/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_rejects_relative_base() {
        let config = EndpointConfig::new("not a url", "key", "model");
        assert!(config.endpoint("chat/completions").is_err());
    }

    #[test]
    fn backoff_is_capped() {
        let config = EndpointConfig::new(DEFAULT_BASE_URL, "key", DEFAULT_CHAT_MODEL);
        assert_eq!(config.retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(config.retry_backoff(9), config.retry_backoff(5));
    }
}
