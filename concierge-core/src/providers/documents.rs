//! Local document extractors.
//!
//! [`StructuredExtractor`] reads PDFs through `pdf-extract` and text formats
//! directly, then splits the result into heading-led sections.
//! [`RawTextExtractor`] is the fallback: it salvages printable text from any
//! file's bytes without understanding the format.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{ExtractRequest, ExtractedDocument, Provider};
use crate::error::ProviderError;
use crate::types::SourceSection;

/// pdf-extract separates pages with form feeds.
const PAGE_BREAK: char = '\x0c';

/// Printable runs shorter than this are dropped by the raw extractor.
const MIN_RAW_RUN: usize = 4;

fn not_found(provider: &str, path: &Path, e: std::io::Error) -> ProviderError {
    ProviderError::NonRetryable {
        provider: provider.to_string(),
        message: format!("cannot read {}: {}", path.display(), e),
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Collapse runs of spaces within lines and runs of blank lines.
fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn heading_of(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        let text = trimmed.trim_start_matches('#').trim();
        return (!text.is_empty()).then_some(text);
    }
    None
}

/// Split cleaned text into sections. Markdown-style headings open a new
/// section; blank lines separate paragraphs within the current heading.
/// Paragraphs shorter than `min_chars` are dropped.
pub(crate) fn split_sections(text: &str, min_chars: usize) -> Vec<SourceSection> {
    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut paragraph = String::new();

    let flush = |paragraph: &mut String, heading: &Option<String>, sections: &mut Vec<SourceSection>| {
        let body = paragraph.trim();
        if body.chars().count() >= min_chars {
            sections.push(SourceSection {
                heading: heading.clone(),
                text: body.to_string(),
            });
        }
        paragraph.clear();
    };

    for line in text.lines() {
        if let Some(h) = heading_of(line) {
            flush(&mut paragraph, &heading, &mut sections);
            heading = Some(h.to_string());
        } else if line.trim().is_empty() {
            flush(&mut paragraph, &heading, &mut sections);
        } else {
            if !paragraph.is_empty() {
                paragraph.push(' ');
            }
            paragraph.push_str(line.trim());
        }
    }
    flush(&mut paragraph, &heading, &mut sections);
    sections
}

pub struct StructuredExtractor {
    min_section_chars: usize,
}

impl StructuredExtractor {
    pub fn new(min_section_chars: usize) -> Self {
        Self { min_section_chars }
    }

    async fn read_pdf(&self, path: PathBuf) -> Result<(String, usize), ProviderError> {
        let provider = self.name().to_string();
        let display = path.display().to_string();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .map_err(|e| ProviderError::Transient {
                provider: provider.clone(),
                message: format!("extraction task failed: {}", e),
            })?
            .map_err(|e| ProviderError::NonRetryable {
                provider,
                message: format!("failed to extract PDF text from {}: {}", display, e),
            })?;
        let pages = text
            .split(PAGE_BREAK)
            .filter(|p| !p.trim().is_empty())
            .count();
        Ok((text.replace(PAGE_BREAK, "\n\n"), pages))
    }
}

#[async_trait]
impl Provider<ExtractRequest, ExtractedDocument> for StructuredExtractor {
    fn name(&self) -> &str {
        "structured_extractor"
    }

    async fn call(&self, request: &ExtractRequest) -> Result<ExtractedDocument, ProviderError> {
        let (raw, pages) = if is_pdf(&request.path) {
            let (text, pages) = self.read_pdf(request.path.clone()).await?;
            (text, Some(pages))
        } else {
            let text = tokio::fs::read_to_string(&request.path)
                .await
                .map_err(|e| not_found(self.name(), &request.path, e))?;
            (text, None)
        };

        let text = clean_text(&raw);
        if text.is_empty() {
            return Err(ProviderError::NonRetryable {
                provider: self.name().to_string(),
                message: format!("no extractable text in {}", request.path.display()),
            });
        }
        let sections = split_sections(&text, self.min_section_chars);
        let unit_count = pages.unwrap_or(sections.len().max(1));

        Ok(ExtractedDocument {
            text,
            sections,
            unit_count,
        })
    }
}

#[derive(Default)]
pub struct RawTextExtractor;

impl RawTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

/// Keep printable runs of at least [`MIN_RAW_RUN`] characters, one per line.
fn salvage_text(bytes: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(bytes);
    let mut out = String::new();
    for line in lossy.lines() {
        let mut run = String::new();
        for ch in line.chars() {
            if ch.is_alphanumeric() || ch.is_ascii_punctuation() || ch == ' ' || ch == '\t' {
                run.push(ch);
                continue;
            }
            if run.trim().chars().count() >= MIN_RAW_RUN {
                out.push_str(run.trim());
                out.push('\n');
            }
            run.clear();
        }
        if run.trim().chars().count() >= MIN_RAW_RUN {
            out.push_str(run.trim());
        }
        out.push('\n');
    }
    clean_text(&out)
}

#[async_trait]
impl Provider<ExtractRequest, ExtractedDocument> for RawTextExtractor {
    fn name(&self) -> &str {
        "raw_text_extractor"
    }

    async fn call(&self, request: &ExtractRequest) -> Result<ExtractedDocument, ProviderError> {
        let bytes = tokio::fs::read(&request.path)
            .await
            .map_err(|e| not_found(self.name(), &request.path, e))?;
        let text = salvage_text(&bytes);
        if text.is_empty() {
            return Err(ProviderError::NonRetryable {
                provider: self.name().to_string(),
                message: format!("no printable text in {}", request.path.display()),
            });
        }
        let sections = split_sections(&text, 1);
        Ok(ExtractedDocument {
            unit_count: sections.len().max(1),
            text,
            sections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const LONG: &str = "Solid-state batteries replace the liquid electrolyte with a solid one, \
                        which improves safety and may allow lithium-metal anodes.";

    #[test]
    fn test_clean_text_collapses_blank_runs() {
        assert_eq!(clean_text("\n\na   b\n\n\n\nc\n"), "a b\n\nc");
    }

    #[test]
    fn test_split_sections_tracks_headings() {
        let text = format!("# Intro\n{LONG}\n\nshort\n\n## Costs\n{LONG}\n");
        let sections = split_sections(&text, 100);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Intro"));
        assert_eq!(sections[1].heading.as_deref(), Some("Costs"));
        assert_eq!(sections[1].text, LONG);
    }

    #[tokio::test]
    async fn test_structured_extractor_reads_markdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, format!("# Overview\n\n{LONG}\n\n# Risks\n\n{LONG}\n")).unwrap();

        let doc = StructuredExtractor::new(100)
            .call(&ExtractRequest { path })
            .await
            .unwrap();
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.unit_count, 2);
        assert!(doc.text.starts_with("# Overview"));
    }

    #[tokio::test]
    async fn test_structured_extractor_rejects_non_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.txt");
        std::fs::write(&path, [0xff, 0xfe, b'h', b'i']).unwrap();
        let err = StructuredExtractor::new(100)
            .call(&ExtractRequest { path })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NonRetryable { .. }));
    }

    #[tokio::test]
    async fn test_raw_extractor_salvages_printable_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        let mut bytes = vec![0u8, 1, 2, 0xff];
        bytes.extend_from_slice(b"Readable text survives");
        bytes.extend_from_slice(&[0, 0xfe, b'x', 0]);
        std::fs::write(&path, &bytes).unwrap();

        let doc = RawTextExtractor::new()
            .call(&ExtractRequest { path })
            .await
            .unwrap();
        assert_eq!(doc.text, "Readable text survives");
        assert_eq!(doc.unit_count, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_non_retryable() {
        let err = RawTextExtractor::new()
            .call(&ExtractRequest {
                path: PathBuf::from("/definitely/not/here.txt"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NonRetryable { .. }));
    }
}
