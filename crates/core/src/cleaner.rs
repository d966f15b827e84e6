use crate::error::IngestError;
use crate::models::IngestionOptions;
use regex::Regex;
use std::path::Path;

/// Strips known boilerplate and the document's own title from page text.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    boilerplate: Vec<String>,
    title_prefix: Regex,
}

impl TextCleaner {
    pub fn new(boilerplate: Vec<String>, title_prefix_regex: &str) -> Result<Self, IngestError> {
        Ok(Self {
            boilerplate: boilerplate
                .into_iter()
                .filter(|item| !item.is_empty())
                .collect(),
            title_prefix: Regex::new(title_prefix_regex)?,
        })
    }

    pub fn from_options(options: &IngestionOptions) -> Result<Self, IngestError> {
        Self::new(options.boilerplate.clone(), options.title_prefix_regex)
    }

    /// File stem without its leading ordinal:
    /// `1-大模型（LLMs）基础面` becomes `大模型（LLMs）基础面`.
    pub fn title_key(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        self.title_prefix.replace(stem, "").into_owned()
    }

    pub fn clean(&self, text: &str, path: &Path) -> String {
        let mut cleaned = text.to_string();
        for item in &self.boilerplate {
            cleaned = cleaned.replace(item.as_str(), "");
        }

        // literal removal: titles routinely contain brackets and dots
        let title = self.title_key(path);
        if !title.is_empty() {
            cleaned = cleaned.replace(title.as_str(), "");
        }

        cleaned
    }
}
