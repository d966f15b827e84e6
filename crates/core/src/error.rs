use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("embedding backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding backend returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} does not match declared {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("collection not found: {0}")]
    CollectionMissing(String),

    #[error("collection is corrupt: {0}")]
    Corrupt(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("store not ready: {0}")]
    InvalidState(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("chat backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("chat backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("malformed chat response: {0}")]
    MalformedResponse(String),

    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),

    #[error("tool `{name}` failed: {source}")]
    Tool {
        name: String,
        #[source]
        source: ToolError,
    },

    #[error("agent gave no answer after {0} iterations")]
    IterationLimit(usize),

    #[error("model returned an empty answer")]
    EmptyAnswer,

    #[error("invalid chat config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Configuration,
    Extraction,
    Embedding,
    Storage,
    Generation,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Configuration => "configuration",
            PipelineStage::Extraction => "extraction",
            PipelineStage::Embedding => "embedding",
            PipelineStage::Storage => "storage",
            PipelineStage::Generation => "generation",
        };
        f.write_str(name)
    }
}

/// Failure of one pipeline run, labelled with the stage that broke.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration invalid: {0}")]
    Configuration(String),

    #[error("extraction failed: {0}")]
    Extraction(#[from] IngestError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("generation failed: {0}")]
    Generation(AgentError),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Configuration(_) => PipelineStage::Configuration,
            PipelineError::Extraction(_) => PipelineStage::Extraction,
            PipelineError::Embedding(_) => PipelineStage::Embedding,
            PipelineError::Storage(_) => PipelineStage::Storage,
            PipelineError::Generation(_) => PipelineStage::Generation,
        }
    }
}

impl From<ToolError> for PipelineError {
    fn from(value: ToolError) -> Self {
        match value {
            ToolError::Embedding(error) => PipelineError::Embedding(error),
            ToolError::Store(error) => PipelineError::Storage(error),
            other @ ToolError::InvalidArguments(_) => {
                PipelineError::Generation(AgentError::Tool {
                    name: "unknown".to_string(),
                    source: other,
                })
            }
        }
    }
}

impl From<AgentError> for PipelineError {
    fn from(value: AgentError) -> Self {
        match value {
            AgentError::Tool {
                source: ToolError::Embedding(error),
                ..
            } => PipelineError::Embedding(error),
            AgentError::Tool {
                source: ToolError::Store(error),
                ..
            } => PipelineError::Storage(error),
            other => PipelineError::Generation(other),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_failures_inside_tools_keep_their_stage() {
        let error = PipelineError::from(AgentError::Tool {
            name: "pdf_extractor".to_string(),
            source: ToolError::Embedding(EmbeddingError::BackendUnavailable(
                "connection refused".to_string(),
            )),
        });
        assert_eq!(error.stage(), PipelineStage::Embedding);
        assert!(error.to_string().starts_with("embedding failed"));

        let error = PipelineError::from(AgentError::Tool {
            name: "pdf_extractor".to_string(),
            source: ToolError::Store(StoreError::CollectionMissing("notes".to_string())),
        });
        assert_eq!(error.stage(), PipelineStage::Storage);
    }

    #[test]
    fn model_failures_are_generation_stage() {
        let error = PipelineError::from(AgentError::EmptyAnswer);
        assert_eq!(error.stage(), PipelineStage::Generation);
        assert_eq!(error.stage().to_string(), "generation");
    }

    #[test]
    fn configuration_errors_name_their_own_stage() {
        let error = PipelineError::Configuration("chunk overlap exceeds size".to_string());
        assert_eq!(error.stage(), PipelineStage::Configuration);
        assert_eq!(error.stage().to_string(), "configuration");
        assert!(error.to_string().starts_with("configuration invalid"));
    }
}
