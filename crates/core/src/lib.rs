pub mod agent;
pub mod chunking;
pub mod cleaner;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod store;
pub mod stores;
pub mod traits;

pub use agent::{
    Agent, AgentOutcome, ChatMessage, ChatModel, FunctionCall, OpenAiChatModel, RetrieverTool,
    Role, Tool, ToolCall, ToolInvocation, ToolOutput, ToolSpec,
};
pub use chunking::{KeepSeparator, SeparatorMode, SplitterConfig, TextSpan, TextSplitter};
pub use cleaner::TextCleaner;
pub use config::{
    AgentConfig, EndpointConfig, RetrievalConfig, DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL,
    DEFAULT_COLLECTION, DEFAULT_EMBEDDING_MODEL, DEFAULT_REMOTE_EMBEDDING_DIMENSIONS,
};
pub use embeddings::{
    CharacterNgramEmbedder, DenseEncoder, EmbeddingAdapter, LexicalSparseEncoder, OpenAiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    AgentError, EmbeddingError, IngestError, PipelineError, PipelineStage, StoreError, ToolError,
};
pub use extractor::{display_name, extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{discover_pdf_files, load_documents, LoadedDocuments};
pub use models::{
    ChunkMetadata, DocumentChunk, HybridEmbedding, IngestionOptions, IngestionSummary,
    PageDocument, RetrievedChunk, ScoredRow, SearchMode, SparseVector,
};
pub use orchestrator::RagPipeline;
pub use retriever::Retriever;
pub use store::{
    CollectionSchema, IndexSpec, OpenOutcome, StoreState, VectorStoreManager,
    DEFAULT_MAX_TEXT_CHARS,
};
pub use stores::{LocalStore, QdrantStore};
pub use traits::VectorIndex;
