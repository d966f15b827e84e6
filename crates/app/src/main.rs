use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use notes_rag_core::{
    AgentConfig, CharacterNgramEmbedder, CollectionSchema, DenseEncoder, EmbeddingAdapter,
    EndpointConfig, IngestionOptions, LocalStore, LopdfExtractor, OpenAiChatModel, OpenAiEmbedder,
    PipelineError, QdrantStore, RagPipeline, RetrievalConfig, SearchMode, VectorIndex,
    VectorStoreManager, DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_COLLECTION,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_TEXT_CHARS,
    DEFAULT_REMOTE_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_QUESTION: &str = "主流的开源模型体系分为哪几类？";
/// Upper bound on inputs per embeddings request accepted by DashScope.
const REMOTE_EMBED_BATCH: usize = 10;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    Remote,
    Ngram,
}

#[derive(Parser)]
#[command(name = "notes-rag", version, about = "Ask questions answered from a folder of PDF notes")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder scanned recursively for PDFs
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Vector store backend
    #[arg(long, value_enum, default_value_t = Backend::Local)]
    backend: Backend,

    /// Root directory of the local vector store
    #[arg(long, default_value = "vector_index")]
    index_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Collection name
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Dense embedding backend
    #[arg(long, value_enum, default_value_t = EmbedderKind::Remote)]
    embedder: EmbedderKind,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "DASH_SCOPE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// API key for embeddings and chat
    #[arg(long, env = "DASH_SCOPE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Dense vector size; defaults depend on the embedder
    #[arg(long)]
    embedding_dimensions: Option<usize>,

    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    #[arg(long, default_value_t = 500)]
    chunk_size: usize,

    #[arg(long, default_value_t = 100)]
    chunk_overlap: usize,

    /// HTTP timeout for embedding and chat requests
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Attempts per embedding or chat request
    #[arg(long, default_value_t = 3)]
    max_retries: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest the data folder unless the collection is already populated.
    Ingest,
    /// Answer a question from the notes.
    Ask {
        #[arg(default_value = DEFAULT_QUESTION)]
        question: String,
        /// Chunks handed to the model per lookup.
        #[arg(long, default_value_t = 4)]
        top_k: usize,
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
    },
    /// Print the chunks retrieved for a question without calling the model.
    Search {
        question: String,
        #[arg(long, default_value_t = 4)]
        top_k: usize,
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
    },
}

impl Cli {
    fn endpoint(&self, model: &str) -> EndpointConfig {
        let mut config = EndpointConfig::new(
            self.base_url.clone(),
            self.api_key.clone().unwrap_or_default(),
            model,
        );
        config.timeout = Duration::from_secs(self.timeout_secs);
        config.max_retries = self.max_retries.max(1);
        config
    }

    fn dense_encoder(&self) -> Result<Box<dyn DenseEncoder>, PipelineError> {
        let encoder: Box<dyn DenseEncoder> = match self.embedder {
            EmbedderKind::Remote => Box::new(OpenAiEmbedder::new(
                self.endpoint(&self.embedding_model),
                self.embedding_dimensions
                    .unwrap_or(DEFAULT_REMOTE_EMBEDDING_DIMENSIONS),
                REMOTE_EMBED_BATCH,
            )?),
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder {
                dimensions: self
                    .embedding_dimensions
                    .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            }),
        };
        Ok(encoder)
    }

    fn vector_backend(&self) -> Result<Box<dyn VectorIndex>, PipelineError> {
        let backend: Box<dyn VectorIndex> = match self.backend {
            Backend::Local => Box::new(LocalStore::new(self.index_dir.clone())),
            Backend::Qdrant => Box::new(QdrantStore::new(self.qdrant_url.clone())?),
        };
        Ok(backend)
    }

    /// Text field bound of the collection; never smaller than one chunk.
    fn max_text_chars(&self) -> usize {
        DEFAULT_MAX_TEXT_CHARS.max(self.chunk_size)
    }

    fn pipeline(&self, mode: SearchMode, top_k: usize) -> Result<RagPipeline, PipelineError> {
        let options = IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            ..IngestionOptions::default()
        };
        let embedder = EmbeddingAdapter::new(self.dense_encoder()?);
        let store = VectorStoreManager::new(
            self.vector_backend()?,
            CollectionSchema::hybrid(
                self.collection.clone(),
                embedder.dimensions(),
                self.max_text_chars(),
            ),
        );

        Ok(RagPipeline::new(Box::new(LopdfExtractor), &options, embedder, store)?
            .with_retrieval(RetrievalConfig {
                top_k,
                mode,
                ..RetrievalConfig::default()
            }))
    }

    fn chat_model(&self, agent: &AgentConfig) -> Result<OpenAiChatModel, PipelineError> {
        OpenAiChatModel::new(self.endpoint(&self.chat_model), agent.temperature)
            .map_err(PipelineError::Generation)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        backend = ?cli.backend,
        embedder = ?cli.embedder,
        collection = %cli.collection,
        "notes-rag boot"
    );

    match &cli.command {
        Command::Ingest => {
            let defaults = RetrievalConfig::default();
            let mut pipeline = cli.pipeline(defaults.mode, defaults.top_k)?;
            match pipeline.ensure_ingested(&cli.data_dir).await? {
                Some(summary) => println!(
                    "ingested {} files, {} pages, {} chunks; collection `{}` holds {} rows",
                    summary.files,
                    summary.pages,
                    summary.chunks,
                    cli.collection,
                    summary.rows
                ),
                None => println!("collection `{}` is already populated", cli.collection),
            }
        }
        Command::Ask {
            question,
            top_k,
            mode,
        } => {
            let agent = AgentConfig::default();
            let chat = cli.chat_model(&agent)?;
            let mut pipeline = cli
                .pipeline(*mode, *top_k)?
                .with_chat_model(Box::new(chat))
                .with_agent(agent);

            pipeline.ensure_ingested(&cli.data_dir).await?;
            let outcome = pipeline.answer(question).await?;
            for invocation in &outcome.invocations {
                info!(
                    tool = %invocation.tool,
                    query = %invocation.query,
                    hits = invocation.hits.len(),
                    "retrieval"
                );
            }
            println!("{}", outcome.answer);
        }
        Command::Search {
            question,
            top_k,
            mode,
        } => {
            let mut pipeline = cli.pipeline(*mode, *top_k)?;
            let hits = pipeline.search(question, None).await?;
            if hits.is_empty() {
                println!("no matching chunks");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "[{}] score={:.4} file={} page={} modes={:?}",
                    rank + 1,
                    hit.score,
                    hit.metadata.file,
                    hit.metadata.page,
                    hit.modes
                );
                println!("{}\n", hit.text);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(["notes-rag", "--embedder", "ngram"].iter().chain(args).copied())
    }

    #[test]
    fn large_chunks_widen_the_text_field() -> Result<(), Box<dyn std::error::Error>> {
        let cli = parse(&["--chunk-size", "3000", "search", "问题"])?;
        assert_eq!(cli.max_text_chars(), 3000);
        assert!(cli.pipeline(SearchMode::Hybrid, 4).is_ok());

        let cli = parse(&["search", "问题"])?;
        assert_eq!(cli.max_text_chars(), DEFAULT_MAX_TEXT_CHARS);
        Ok(())
    }
}
