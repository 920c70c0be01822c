use crate::error::IngestError;
use crate::models::{ChunkRecord, Document, DocumentBody, DocumentFingerprint, FormatTag};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Numbered headings ("3", "3.2", "3.2(a)") the way technical documents label
/// their sections.
const NUMBERED_HEADING_REGEX: &str = r"^\s*\d+(?:\.\d+)*(?:\([a-zA-Z]\))?\s+\S.*$";
const MARKDOWN_HEADING_REGEX: &str = r"^#{1,6}\s+\S.*$";

/// Collapse whitespace runs to single spaces and drop extraction artifacts
/// (non-breaking spaces, stray control characters).
pub fn normalize_whitespace(text: &str) -> String {
    let stripped: String = text
        .replace('\u{a0}', " ")
        .chars()
        .filter(|ch| !ch.is_control() || ch.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One fixed-size window over cleaned text. Offsets are char offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkWindow {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub overlap_with_prev: usize,
}

/// Slide a `chunk_size`-char window across `text`, advancing by
/// `chunk_size - overlap` per step. The final window may be shorter; empty
/// input yields no windows. Deterministic for fixed inputs.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkWindow>, IngestError> {
    if chunk_size == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(IngestError::InvalidChunkConfig(format!(
            "overlap ({overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let stride = chunk_size - overlap;
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(chars.len());
        windows.push(ChunkWindow {
            text: chars[start..end].iter().collect(),
            start_offset: start,
            end_offset: end,
            overlap_with_prev: if start == 0 { 0 } else { overlap },
        });
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    Ok(windows)
}

/// Cleaned document text plus the page and section marks needed to attach
/// provenance to chunk windows. Offsets are char offsets into `text`.
#[derive(Debug, Clone)]
pub struct PreparedText {
    pub text: String,
    page_marks: Vec<(usize, u32)>,
    section_marks: Vec<(usize, String)>,
}

impl PreparedText {
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        self.page_marks
            .iter()
            .rev()
            .find(|(start, _)| *start <= offset)
            .map(|(_, number)| *number)
    }

    pub fn section_at(&self, offset: usize) -> Option<&str> {
        self.section_marks
            .iter()
            .rev()
            .find(|(start, _)| *start <= offset)
            .map(|(_, label)| label.as_str())
    }
}

/// Clean a document body into one contiguous text, recording where each page
/// begins and which section heading governs each offset. Heading detection
/// runs on the raw lines, before cleaning flattens line structure.
pub fn prepare_document(document: &Document) -> Result<PreparedText, IngestError> {
    let heading_re = Regex::new(match document.fingerprint.format {
        FormatTag::Markdown => MARKDOWN_HEADING_REGEX,
        FormatTag::PlainText => NUMBERED_HEADING_REGEX,
    })?;

    let mut prepared = PreparedText {
        text: String::new(),
        page_marks: Vec::new(),
        section_marks: Vec::new(),
    };
    let mut char_len = 0usize;

    let append_page = |prepared: &mut PreparedText,
                       char_len: &mut usize,
                       page: Option<u32>,
                       raw: &str| {
        if let Some(number) = page {
            prepared.page_marks.push((*char_len, number));
        }
        for line in raw.lines() {
            let cleaned = normalize_whitespace(line);
            if cleaned.is_empty() {
                continue;
            }
            if heading_re.is_match(line.trim()) {
                let label = match document.fingerprint.format {
                    FormatTag::Markdown => {
                        cleaned.trim_start_matches('#').trim_start().to_string()
                    }
                    FormatTag::PlainText => cleaned.clone(),
                };
                prepared.section_marks.push((*char_len, label));
            }
            if *char_len > 0 {
                prepared.text.push(' ');
                *char_len += 1;
            }
            prepared.text.push_str(&cleaned);
            *char_len += cleaned.chars().count();
        }
    };

    match &document.body {
        DocumentBody::Whole(raw) => append_page(&mut prepared, &mut char_len, None, raw),
        DocumentBody::Pages(pages) => {
            for page in pages {
                append_page(&mut prepared, &mut char_len, Some(page.number), &page.text);
            }
        }
    }

    Ok(prepared)
}

/// Turn prepared text into provenance-carrying chunk records.
pub fn build_chunks(
    fingerprint: &DocumentFingerprint,
    prepared: &PreparedText,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkRecord>, IngestError> {
    let windows = chunk_text(&prepared.text, chunk_size, overlap)?;

    Ok(windows
        .into_iter()
        .enumerate()
        .map(|(index, window)| ChunkRecord {
            chunk_id: make_chunk_id(&fingerprint.source_id, index as u64, &window.text),
            source_id: fingerprint.source_id.clone(),
            source_name: fingerprint.source_name.clone(),
            chunk_index: index as u64,
            start_offset: window.start_offset,
            end_offset: window.end_offset,
            overlap_with_prev: window.overlap_with_prev,
            page_number: prepared.page_at(window.start_offset),
            section_label: prepared.section_at(window.start_offset).map(str::to_string),
            text: window.text,
        })
        .collect())
}

fn make_chunk_id(source_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
