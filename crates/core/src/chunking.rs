use crate::error::IngestError;
use crate::models::{DocumentChunk, IngestionOptions, PageDocument};
use regex::Regex;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorMode {
    /// Separators are plain strings.
    Literal,
    /// Separators are regular expressions.
    Pattern,
}

/// Where a matched separator ends up after splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepSeparator {
    Discard,
    Start,
    End,
}

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Tried in order; the empty string means "any character".
    pub separators: Vec<String>,
    pub separator_mode: SeparatorMode,
    pub keep_separator: KeepSeparator,
    pub strip_whitespace: bool,
}

impl From<&IngestionOptions> for SplitterConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
            separators: value.separators.clone(),
            separator_mode: SeparatorMode::Literal,
            keep_separator: KeepSeparator::Start,
            strip_whitespace: true,
        }
    }
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

/// A chunk of text and the character offset where it starts in its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub start: usize,
    pub text: String,
}

impl TextSpan {
    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone)]
struct Separator {
    raw: String,
    matcher: Option<Regex>,
}

impl Separator {
    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(text),
            None => true,
        }
    }
}

/// Recursive character splitter: paragraph, line, sentence, word, then character.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: SplitterConfig,
    separators: Vec<Separator>,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Result<Self, IngestError> {
        if config.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.separators.is_empty() {
            return Err(IngestError::InvalidChunkConfig(
                "at least one separator is required".to_string(),
            ));
        }

        let separators = config
            .separators
            .iter()
            .map(|raw| {
                let matcher = if raw.is_empty() {
                    None
                } else {
                    let pattern = match config.separator_mode {
                        SeparatorMode::Literal => regex::escape(raw),
                        SeparatorMode::Pattern => raw.clone(),
                    };
                    Some(Regex::new(&pattern)?)
                };
                Ok(Separator {
                    raw: raw.clone(),
                    matcher,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(Self { config, separators })
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_spans(text)
            .into_iter()
            .map(|span| span.text)
            .collect()
    }

    pub fn split_spans(&self, text: &str) -> Vec<TextSpan> {
        let root = TextSpan {
            start: 0,
            text: text.to_string(),
        };

        self.split_recursive(root, &self.separators)
            .into_iter()
            .filter_map(|span| self.finish(span))
            .collect()
    }

    /// Splits every page; chunks inherit the metadata of their page.
    pub fn split_documents(&self, pages: &[PageDocument]) -> Vec<DocumentChunk> {
        pages
            .iter()
            .flat_map(|page| {
                self.split_text(&page.text)
                    .into_iter()
                    .map(|text| DocumentChunk {
                        text,
                        metadata: page.metadata.clone(),
                    })
            })
            .collect()
    }

    fn split_recursive(&self, span: TextSpan, separators: &[Separator]) -> Vec<TextSpan> {
        let mut chosen = separators.len().saturating_sub(1);
        for (index, separator) in separators.iter().enumerate() {
            if separator.matches(&span.text) {
                chosen = index;
                break;
            }
        }

        let separator = &separators[chosen];
        let remaining = if separator.matcher.is_none() {
            &[][..]
        } else {
            &separators[chosen + 1..]
        };

        let merge_separator = match self.config.keep_separator {
            KeepSeparator::Discard => separator.raw.as_str(),
            KeepSeparator::Start | KeepSeparator::End => "",
        };

        let mut chunks = Vec::new();
        let mut fitting = Vec::new();

        for piece in self.split_on(&span, separator) {
            if piece.char_len() < self.config.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, merge_separator));
                fitting.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, merge_separator));
        }

        chunks
    }

    fn split_on(&self, span: &TextSpan, separator: &Separator) -> Vec<TextSpan> {
        let Some(matcher) = &separator.matcher else {
            return span
                .text
                .chars()
                .enumerate()
                .map(|(offset, character)| TextSpan {
                    start: span.start + offset,
                    text: character.to_string(),
                })
                .collect();
        };

        let text = span.text.as_str();
        let mut bounds = Vec::new();
        let mut last = 0usize;
        for found in matcher.find_iter(text) {
            if found.start() == found.end() {
                continue;
            }
            match self.config.keep_separator {
                KeepSeparator::Discard => {
                    bounds.push((last, found.start()));
                    last = found.end();
                }
                KeepSeparator::Start => {
                    bounds.push((last, found.start()));
                    last = found.start();
                }
                KeepSeparator::End => {
                    bounds.push((last, found.end()));
                    last = found.end();
                }
            }
        }
        bounds.push((last, text.len()));

        let mut pieces = Vec::with_capacity(bounds.len());
        let (mut byte_cursor, mut char_cursor) = (0usize, 0usize);
        for (from, to) in bounds {
            char_cursor += text[byte_cursor..from].chars().count();
            byte_cursor = from;
            if from < to {
                pieces.push(TextSpan {
                    start: span.start + char_cursor,
                    text: text[from..to].to_string(),
                });
            }
        }

        pieces
    }

    fn merge(&self, pieces: &[TextSpan], separator: &str) -> Vec<TextSpan> {
        let separator_len = separator.chars().count();
        let chunk_size = self.config.chunk_size;
        let mut merged = Vec::new();
        let mut current: VecDeque<(&TextSpan, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = piece.char_len();
            let joint = if current.is_empty() { 0 } else { separator_len };

            if total + len + joint > chunk_size {
                if total > chunk_size {
                    warn!(total, chunk_size, "created a chunk longer than chunk_size");
                }

                if !current.is_empty() {
                    if let Some(chunk) = self.join(&current, separator) {
                        merged.push(chunk);
                    }

                    loop {
                        let joint = if current.is_empty() { 0 } else { separator_len };
                        let over_overlap = total > self.config.chunk_overlap;
                        let over_size = total + len + joint > chunk_size && total > 0;
                        if !(over_overlap || over_size) {
                            break;
                        }
                        let extra = if current.len() > 1 { separator_len } else { 0 };
                        match current.pop_front() {
                            Some((_, first_len)) => {
                                total = total.saturating_sub(first_len + extra);
                            }
                            None => break,
                        }
                    }
                }
            }

            current.push_back((piece, len));
            if current.len() > 1 {
                total += len + separator_len;
            } else {
                total += len;
            }
        }

        if let Some(chunk) = self.join(&current, separator) {
            merged.push(chunk);
        }

        merged
    }

    fn join(&self, pieces: &VecDeque<(&TextSpan, usize)>, separator: &str) -> Option<TextSpan> {
        let (first, _) = pieces.front()?;
        let text = pieces
            .iter()
            .map(|(piece, _)| piece.text.as_str())
            .collect::<Vec<_>>()
            .join(separator);

        self.finish(TextSpan {
            start: first.start,
            text,
        })
    }

    fn finish(&self, span: TextSpan) -> Option<TextSpan> {
        if span.text.trim().is_empty() {
            return None;
        }
        if !self.config.strip_whitespace {
            return Some(span);
        }

        let trimmed_start = span.text.trim_start();
        let leading = span.text[..span.text.len() - trimmed_start.len()]
            .chars()
            .count();
        Some(TextSpan {
            start: span.start + leading,
            text: trimmed_start.trim_end().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> TextSplitter {
        TextSplitter::new(SplitterConfig {
            chunk_size,
            chunk_overlap,
            ..SplitterConfig::default()
        })
        .expect("config should be valid")
    }

    #[test]
    fn paragraphs_are_preferred_over_sentences() {
        let first = "第一段内容。".repeat(5);
        let second = "第二段内容！".repeat(5);
        let text = format!("{first}\n\n{second}");

        let chunks = splitter(40, 10).split_text(&text);

        assert_eq!(chunks, vec![first, second]);
    }

    #[test]
    fn sentences_split_at_cjk_punctuation() {
        let text = concat!(
            "主流的开源模型体系分为三类。",
            "第一类是编码器模型。",
            "第二类是解码器模型。",
            "第三类是编码器解码器模型。",
        );

        let chunks = splitter(20, 5).split_text(text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20, "{chunk} is too long");
        }
        assert!(chunks[1..].iter().all(|chunk| chunk.starts_with('。')));
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let text = (0..30)
            .map(|index| format!("w{index:02}"))
            .collect::<Vec<_>>()
            .join(" ");

        let chunks = splitter(20, 8).split_text(&text);

        assert_eq!(chunks[0], "w00 w01 w02 w03 w04");
        assert_eq!(chunks[1], "w03 w04 w05 w06 w07");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20);
        }
    }

    #[test]
    fn spans_reconstruct_the_source_text() {
        let text = (0..12)
            .map(|paragraph| {
                (0..6)
                    .map(|sentence| format!("段落{paragraph}句子{sentence}说明内容"))
                    .collect::<Vec<_>>()
                    .join("。")
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let splitter = TextSplitter::new(SplitterConfig {
            chunk_size: 60,
            chunk_overlap: 15,
            separators: vec!["\n\n".to_string(), "。".to_string(), String::new()],
            strip_whitespace: false,
            ..SplitterConfig::default()
        })
        .expect("config should be valid");
        let spans = splitter.split_spans(&text);
        let source = text.chars().collect::<Vec<_>>();

        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for span in &spans {
            let len = span.text.chars().count();
            assert!(len <= 60);
            let expected = source[span.start..span.start + len].iter().collect::<String>();
            assert_eq!(span.text, expected);
            assert!(span.start <= covered, "gap before offset {}", span.start);
            if span.start + len > covered {
                rebuilt.extend(&source[covered..span.start + len]);
                covered = span.start + len;
            }
        }

        assert_eq!(rebuilt, text);
    }

    #[test]
    fn falls_back_to_single_characters() {
        let splitter = TextSplitter::new(SplitterConfig {
            chunk_size: 4,
            chunk_overlap: 1,
            separators: vec!["\n\n".to_string(), String::new()],
            ..SplitterConfig::default()
        })
        .expect("config should be valid");

        let chunks = splitter.split_text("abcdefghij");

        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn pattern_separators_are_supported() {
        let splitter = TextSplitter::new(SplitterConfig {
            chunk_size: 16,
            chunk_overlap: 0,
            separators: vec![r"\d+\.".to_string(), String::new()],
            separator_mode: SeparatorMode::Pattern,
            keep_separator: KeepSeparator::Start,
            strip_whitespace: true,
        })
        .expect("config should be valid");

        let chunks = splitter.split_text("1. alpha beta 2. gamma delta");

        assert_eq!(chunks, vec!["1. alpha beta", "2. gamma delta"]);
    }

    #[test]
    fn blank_text_yields_no_chunks() {
        assert!(splitter(50, 10).split_text("").is_empty());
        assert!(splitter(50, 10).split_text(" \n\n \n").is_empty());
    }

    #[test]
    fn documents_inherit_page_metadata() {
        let pages = vec![
            PageDocument {
                text: "第一页。".repeat(10),
                metadata: ChunkMetadata {
                    file: "《笔记》".to_string(),
                    page: 1,
                },
            },
            PageDocument {
                text: "   ".to_string(),
                metadata: ChunkMetadata {
                    file: "《笔记》".to_string(),
                    page: 2,
                },
            },
            PageDocument {
                text: "第三页".to_string(),
                metadata: ChunkMetadata {
                    file: "《笔记》".to_string(),
                    page: 3,
                },
            },
        ];

        let chunks = splitter(16, 4).split_documents(&pages);

        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|chunk| chunk.metadata.page != 2));
        assert_eq!(chunks.last().map(|chunk| chunk.metadata.page), Some(3));
        assert_eq!(chunks[0].metadata.file, "《笔记》");
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let result = TextSplitter::new(SplitterConfig {
            chunk_size: 10,
            chunk_overlap: 10,
            ..SplitterConfig::default()
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }
}
