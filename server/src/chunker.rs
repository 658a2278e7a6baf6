//! Splits a document body into ordered, size-bounded, heading-aware chunks.
//! See SPEC_FULL.md §4.C.

use regex::Regex;
use std::sync::OnceLock;
use vibe_core::types::PRIORITY_HEADINGS;

use crate::header::strip_header;

pub const MAX_CHUNK_CHARS: usize = 6000;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub heading: Option<String>,
    pub heading_level: i32,
    pub content: String,
    pub chunk_order: i32,
    pub char_offset: i64,
    pub is_priority_heading: bool,
}

fn heading_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,2})\s+(.+)$").unwrap())
}

pub fn is_priority_heading(heading: Option<&str>) -> bool {
    let Some(heading) = heading else { return false };
    let text = heading.trim_start_matches('#').trim().to_lowercase();
    PRIORITY_HEADINGS.contains(&text.as_str())
}

struct Section {
    heading: Option<String>,
    level: i32,
    content: String,
    char_offset: i64,
}

fn split_by_headings(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut last_end = 0usize;
    let mut last_heading: Option<String> = None;
    let mut last_level = 0i32;

    for caps in heading_pattern().captures_iter(content) {
        let m = caps.get(0).unwrap();
        if m.start() > last_end {
            let section_content = content[last_end..m.start()].trim().to_string();
            if !section_content.is_empty() || last_heading.is_some() {
                sections.push(Section {
                    heading: last_heading.clone(),
                    level: last_level,
                    content: section_content,
                    char_offset: last_end as i64,
                });
            }
        }

        let hashes = &caps[1];
        let heading_text = caps[2].trim();
        last_heading = Some(format!("{hashes} {heading_text}"));
        last_level = hashes.len() as i32;
        last_end = m.end() + 1; // +1 for the newline
    }

    if last_end < content.len() {
        let section_content = content[last_end.min(content.len())..].trim().to_string();
        if !section_content.is_empty() || last_heading.is_some() {
            sections.push(Section {
                heading: last_heading.clone(),
                level: last_level,
                content: section_content,
                char_offset: last_end as i64,
            });
        }
    } else if last_heading.is_some() && sections.is_empty() {
        sections.push(Section {
            heading: last_heading,
            level: last_level,
            content: String::new(),
            char_offset: last_end as i64,
        });
    }

    if sections.is_empty() {
        sections.push(Section {
            heading: None,
            level: 0,
            content: content.trim().to_string(),
            char_offset: 0,
        });
    }

    sections
}

fn split_by_lines(content: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for line in content.split('\n') {
        let line_len = line.chars().count();

        if line_len > max_chars {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
                current_len = 0;
            }
            chunks.push(line.chars().take(max_chars).collect());
            continue;
        }

        let sep = if current.is_empty() { 0 } else { 1 };
        let new_len = current_len + line_len + sep;
        if new_len > max_chars && !current.is_empty() {
            chunks.push(current.join("\n"));
            current.clear();
            current_len = 0;
        }

        current.push(line);
        let sep = if current.len() > 1 { 1 } else { 0 };
        current_len += line_len + sep;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    chunks
}

fn split_by_paragraphs(content: &str, max_chars: usize) -> Vec<String> {
    let para_re = Regex::new(r"\n\n+").unwrap();
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for para in para_re.split(content) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_len = para.chars().count();

        if para_len > max_chars {
            if !current.is_empty() {
                chunks.push(current.join("\n\n"));
                current.clear();
                current_len = 0;
            }
            chunks.extend(split_by_lines(para, max_chars));
            continue;
        }

        let sep = if current.is_empty() { 0 } else { 2 };
        let new_len = current_len + para_len + sep;
        if new_len > max_chars && !current.is_empty() {
            chunks.push(current.join("\n\n"));
            current.clear();
            current_len = 0;
        }

        current.push(para.to_string());
        let sep = if current.len() > 1 { 2 } else { 0 };
        current_len += para_len + sep;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }

    chunks
}

/// Chunk a full document's raw content (header block included; it is
/// stripped before sectioning).
pub fn chunk_document(content: &str) -> Vec<Chunk> {
    let body = strip_header(content);
    let sections = split_by_headings(&body);

    let mut chunks = Vec::new();
    let mut chunk_order = 0i32;

    for section in sections {
        if section.content.chars().count() <= MAX_CHUNK_CHARS {
            chunks.push(Chunk {
                heading: section.heading.clone(),
                heading_level: section.level,
                content: section.content,
                chunk_order,
                char_offset: section.char_offset,
                is_priority_heading: is_priority_heading(section.heading.as_deref()),
            });
            chunk_order += 1;
        } else {
            let sub_contents = split_by_paragraphs(&section.content, MAX_CHUNK_CHARS);
            for (i, sub_content) in sub_contents.into_iter().enumerate() {
                chunks.push(Chunk {
                    heading: if i == 0 { section.heading.clone() } else { None },
                    heading_level: if i == 0 { section.level } else { 0 },
                    content: sub_content,
                    chunk_order,
                    char_offset: section.char_offset,
                    is_priority_heading: if i == 0 {
                        is_priority_heading(section.heading.as_deref())
                    } else {
                        false
                    },
                });
                chunk_order += 1;
            }
        }
    }

    chunks
}
