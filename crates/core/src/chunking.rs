use crate::models::{Chunk, DocumentType};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;

/// Window sizes are counted in whitespace-separated words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_words: usize,
    pub overlap_words: usize,
}

impl ChunkingConfig {
    pub fn for_document_type(document_type: DocumentType) -> Self {
        let (max_words, overlap_words) = match document_type {
            DocumentType::EmiratesId => (32, 0),
            DocumentType::BankStatement | DocumentType::AssetsLiabilities => (64, 8),
            DocumentType::CreditReport => (96, 10),
            DocumentType::Resume | DocumentType::EmploymentLetter | DocumentType::Other => {
                (128, 12)
            }
        };
        Self {
            max_words,
            overlap_words,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits text after `.`, `!` or `?` when the next character is whitespace.
pub fn split_sentences(normalized: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = normalized.char_indices().peekable();

    while let Some((offset, current)) = chars.next() {
        let at_boundary = matches!(current, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace());
        if !at_boundary {
            continue;
        }

        let end = offset + current.len_utf8();
        let sentence = normalized[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let tail = normalized[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

fn word_count(sentence: &str) -> usize {
    sentence.split_whitespace().count()
}

/// Lazily yields sentence-snapped chunk texts over a borrowed document.
///
/// Consumed once; there is no way to rewind it.
pub struct SentenceChunks<'a> {
    sentences: std::vec::IntoIter<&'a str>,
    config: ChunkingConfig,
    window: VecDeque<&'a str>,
    window_words: usize,
    carried: usize,
    pending: Option<&'a str>,
}

impl<'a> SentenceChunks<'a> {
    fn new(normalized: &'a str, config: ChunkingConfig) -> Self {
        Self {
            sentences: split_sentences(normalized).into_iter(),
            config,
            window: VecDeque::new(),
            window_words: 0,
            carried: 0,
            pending: None,
        }
    }

    fn emit(&mut self) -> String {
        let text = self.window.iter().copied().collect::<Vec<_>>().join(" ");
        self.carry_overlap();
        text
    }

    fn carry_overlap(&mut self) {
        let mut kept = VecDeque::new();
        let mut kept_words = 0;
        while let Some(sentence) = self.window.pop_back() {
            let words = word_count(sentence);
            if kept_words + words > self.config.overlap_words {
                break;
            }
            kept_words += words;
            kept.push_front(sentence);
        }
        self.window = kept;
        self.window_words = kept_words;
        self.carried = self.window.len();
    }

    fn push(&mut self, sentence: &'a str) {
        self.window_words += word_count(sentence);
        self.window.push_back(sentence);
    }
}

impl Iterator for SentenceChunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let Some(sentence) = self.pending.take().or_else(|| self.sentences.next()) else {
                if self.window.len() > self.carried {
                    let text = self.window.iter().copied().collect::<Vec<_>>().join(" ");
                    self.window.clear();
                    self.window_words = 0;
                    self.carried = 0;
                    return Some(text);
                }
                return None;
            };

            let words = word_count(sentence);
            if self.window_words + words <= self.config.max_words || self.window.is_empty() {
                self.push(sentence);
                continue;
            }

            if self.window.len() == self.carried {
                // Only overlap left; it cannot make room for this sentence.
                self.window.clear();
                self.window_words = 0;
                self.carried = 0;
                self.push(sentence);
                continue;
            }

            self.pending = Some(sentence);
            return Some(self.emit());
        }
    }
}

pub fn chunk_text(normalized: &str, config: ChunkingConfig) -> SentenceChunks<'_> {
    SentenceChunks::new(normalized, config)
}

pub fn build_chunks(
    application_id: &str,
    document_type: DocumentType,
    source_path: &str,
    text: &str,
) -> Vec<Chunk> {
    let document = document_name(source_path);
    let normalized = normalize_whitespace(text);
    let config = ChunkingConfig::for_document_type(document_type);
    let pieces = chunk_text(&normalized, config).collect::<Vec<_>>();
    let total_chunks = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, piece)| Chunk {
            id: make_chunk_id(application_id, document_type, &document, chunk_index),
            text: piece,
            application_id: application_id.to_string(),
            document_type,
            document: document.clone(),
            chunk_index,
            total_chunks,
            source_path: source_path.to_string(),
        })
        .collect()
}

/// File name component of a source path; the whole path when it has none.
pub fn document_name(source_path: &str) -> String {
    Path::new(source_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.to_string())
}

/// Stable id of one chunk position within one document file.
pub fn make_chunk_id(
    application_id: &str,
    document_type: DocumentType,
    document: &str,
    index: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(application_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(document_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(document.as_bytes());
    hasher.update([0u8]);
    hasher.update((index as u64).to_le_bytes());
    format!("{:x}", hasher.finalize())
}
