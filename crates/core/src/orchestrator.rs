use crate::agent::{Agent, AgentOutcome, ChatModel, RetrieverTool};
use crate::chunking::{SplitterConfig, TextSplitter};
use crate::cleaner::TextCleaner;
use crate::config::{AgentConfig, RetrievalConfig};
use crate::embeddings::EmbeddingAdapter;
use crate::extractor::PdfExtractor;
use crate::ingest::load_documents;
use crate::models::{IngestionOptions, IngestionSummary, RetrievedChunk};
use crate::retriever::Retriever;
use crate::store::{StoreState, VectorStoreManager};
use crate::{AgentError, PipelineError, StoreError};
use std::path::Path;
use tracing::{info, warn};

const EMBED_BATCH: usize = 64;

/// Owns every stage of the pipeline; built once and passed around explicitly.
pub struct RagPipeline {
    extractor: Box<dyn PdfExtractor>,
    cleaner: TextCleaner,
    splitter: TextSplitter,
    embedder: EmbeddingAdapter,
    store: VectorStoreManager,
    chat: Option<Box<dyn ChatModel>>,
    retrieval: RetrievalConfig,
    agent: AgentConfig,
}

impl RagPipeline {
    pub fn new(
        extractor: Box<dyn PdfExtractor>,
        options: &IngestionOptions,
        embedder: EmbeddingAdapter,
        store: VectorStoreManager,
    ) -> Result<Self, PipelineError> {
        if let Some(max_chars) = store.schema().max_text_chars() {
            if options.chunk_size > max_chars {
                return Err(PipelineError::Configuration(format!(
                    "chunk size {} exceeds the collection text limit of {max_chars} characters",
                    options.chunk_size
                )));
            }
        }
        let cleaner = TextCleaner::from_options(options)
            .map_err(|error| PipelineError::Configuration(error.to_string()))?;
        let splitter = TextSplitter::new(SplitterConfig::from(options))
            .map_err(|error| PipelineError::Configuration(error.to_string()))?;

        Ok(Self {
            extractor,
            cleaner,
            splitter,
            embedder,
            store,
            chat: None,
            retrieval: RetrievalConfig::default(),
            agent: AgentConfig::default(),
        })
    }

    pub fn with_chat_model(mut self, chat: Box<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    pub fn store(&self) -> &VectorStoreManager {
        &self.store
    }

    /// Extract, clean, split, embed and store every PDF under `folder`.
    pub async fn ingest(&mut self, folder: &Path) -> Result<IngestionSummary, PipelineError> {
        let loaded = load_documents(
            folder,
            self.extractor.as_ref(),
            &self.cleaner,
            &self.splitter,
        )?;
        if loaded.chunks.is_empty() {
            warn!(folder = %folder.display(), "no text chunks extracted");
        }

        let texts = loaded
            .chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            embeddings.extend(self.embedder.embed_documents(batch).await?);
        }

        self.store.create_or_open().await?;
        let inserted = self.store.insert(&loaded.chunks, &embeddings).await?;
        let rows = if inserted > 0 {
            self.store.load().await?
        } else {
            self.store.rows()
        };

        let summary = IngestionSummary {
            files: loaded.files,
            pages: loaded.pages,
            chunks: loaded.chunks.len(),
            rows,
        };
        info!(
            collection = self.store.collection(),
            files = summary.files,
            pages = summary.pages,
            chunks = summary.chunks,
            rows = summary.rows,
            "ingestion finished"
        );
        Ok(summary)
    }

    /// Runs [`RagPipeline::ingest`] only when the collection is missing or empty.
    pub async fn ensure_ingested(
        &mut self,
        folder: &Path,
    ) -> Result<Option<IngestionSummary>, PipelineError> {
        if !self.store.needs_ingestion().await? {
            info!(collection = self.store.collection(), "collection already populated");
            return Ok(None);
        }
        self.ingest(folder).await.map(Some)
    }

    /// Makes the persisted collection queryable without ingesting anything.
    async fn open(&mut self) -> Result<(), PipelineError> {
        if self.store.state() == StoreState::Queryable {
            return Ok(());
        }
        if !self.store.collection_exists().await? {
            return Err(StoreError::CollectionMissing(self.store.collection().to_string()).into());
        }
        self.store.load().await?;
        Ok(())
    }

    pub async fn answer(&mut self, question: &str) -> Result<AgentOutcome, PipelineError> {
        self.open().await?;
        let chat = self.chat.as_deref().ok_or_else(|| {
            PipelineError::Generation(AgentError::InvalidConfig(
                "no chat model configured".to_string(),
            ))
        })?;

        let retriever = Retriever::new(&self.store, &self.embedder, self.retrieval);
        let tool = RetrieverTool::new(
            retriever,
            self.agent.tool_name.clone(),
            self.agent.tool_description.clone(),
        );
        let agent = Agent::new(chat, &self.agent).with_tool(Box::new(tool));

        Ok(agent.run(question).await?)
    }

    /// Retrieval only; `top_k` overrides the configured value.
    pub async fn search(
        &mut self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievedChunk>, PipelineError> {
        self.open().await?;
        let mut config = self.retrieval;
        if let Some(top_k) = top_k {
            config.top_k = top_k;
        }
        Ok(Retriever::new(&self.store, &self.embedder, config)
            .retrieve(question)
            .await?)
    }
}
