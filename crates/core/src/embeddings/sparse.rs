use super::fnv1a;
use crate::models::SparseVector;
use std::collections::BTreeMap;

pub const SPARSE_INDEX_SPACE: u64 = 1 << 20;

/// Lexical term weights: ASCII words plus CJK unigrams and bigrams.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSparseEncoder;

impl LexicalSparseEncoder {
    pub fn encode(&self, text: &str) -> SparseVector {
        let mut counts = BTreeMap::<u32, f32>::new();
        for token in tokenize(text) {
            let index = (fnv1a(token.as_bytes()) % SPARSE_INDEX_SPACE) as u32;
            *counts.entry(index).or_insert(0.0) += 1.0;
        }

        let weights = counts
            .values()
            .map(|tf| 1.0 + tf.ln())
            .collect::<Vec<_>>();
        let norm = weights.iter().map(|w| w * w).sum::<f32>().sqrt();

        SparseVector {
            indices: counts.keys().copied().collect(),
            values: weights
                .into_iter()
                .map(|w| if norm > 0.0 { w / norm } else { w })
                .collect(),
        }
    }
}

fn is_cjk(character: char) -> bool {
    matches!(character as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2EBEF |
        0x3040..=0x30FF | 0xAC00..=0xD7AF)
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut previous_cjk: Option<char> = None;

    for character in text.chars().flat_map(char::to_lowercase) {
        if is_cjk(character) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(character.to_string());
            if let Some(previous) = previous_cjk {
                tokens.push(format!("{previous}{character}"));
            }
            previous_cjk = Some(character);
            continue;
        }

        previous_cjk = None;
        if character.is_alphanumeric() {
            word.push(character);
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }

    if !word.is_empty() {
        tokens.push(word);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_mixes_words_and_cjk_bigrams() {
        let tokens = tokenize("LLMs 模型体系");
        assert_eq!(tokens, vec!["llms", "模", "型", "模型", "体", "型体", "系", "体系"]);
    }

    #[test]
    fn encoding_is_sorted_normalized_and_deterministic() {
        let encoder = LexicalSparseEncoder;
        let first = encoder.encode("开源模型 开源模型 open models");
        let second = encoder.encode("开源模型 开源模型 open models");

        assert_eq!(first, second);
        assert!(first.indices.windows(2).all(|pair| pair[0] < pair[1]));
        let norm = first.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_terms_score_higher() {
        let encoder = LexicalSparseEncoder;
        let query = encoder.encode("开源模型体系");
        let related = encoder.encode("主流的开源模型体系分为三类");
        let unrelated = encoder.encode("向量数据库的索引结构");
        assert!(query.dot(&related) > query.dot(&unrelated));
    }

    #[test]
    fn punctuation_only_text_is_empty() {
        assert!(LexicalSparseEncoder.encode("。！？ ,.").is_empty());
    }
}
