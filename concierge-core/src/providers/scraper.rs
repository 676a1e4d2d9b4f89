//! HTTP page scraper.
//!
//! Fetches a page and reduces it to readable lines of text. Only `http` and
//! `https` URLs are accepted.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;

use super::{Provider, ScrapeRequest, ScrapedPage, map_send_error, retry_after_secs, status_error};
use crate::config::SearchConfig;
use crate::error::{ConfigError, ProviderError};

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

/// Tags whose start or end begins a new line of text.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "section", "article",
];

const ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
];

pub struct HttpScraper {
    client: Client,
    min_line_chars: usize,
    max_chars: usize,
}

impl HttpScraper {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            min_line_chars: config.min_line_chars,
            max_chars: config.max_page_chars,
        })
    }
}

/// Strip tags, scripts, and styles from HTML and return trimmed, non-empty lines.
pub fn extract_text_from_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut reading_name = false;
    let mut tag = String::new();
    let mut skip_depth_tag: Option<&'static str> = None;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                reading_name = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.to_ascii_lowercase();
                let bare = name.trim_start_matches('/');
                match (skip_depth_tag, name.as_str()) {
                    (None, "script") => skip_depth_tag = Some("/script"),
                    (None, "style") => skip_depth_tag = Some("/style"),
                    (None, "noscript") => skip_depth_tag = Some("/noscript"),
                    (Some(end), n) if n == end => skip_depth_tag = None,
                    _ => {}
                }
                if BLOCK_TAGS.contains(&bare) {
                    text.push('\n');
                }
            }
            _ if in_tag => {
                if reading_name && (ch.is_ascii_alphanumeric() || (ch == '/' && tag.is_empty())) {
                    tag.push(ch);
                } else {
                    reading_name = false;
                }
            }
            _ if skip_depth_tag.is_some() => {}
            _ => text.push(ch),
        }
    }

    let decoded = ENTITIES
        .iter()
        .fold(text, |acc, (entity, plain)| acc.replace(entity, plain));

    decoded
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| extract_text_from_html(m.as_str()))
        .filter(|t| !t.is_empty())
}

/// Keep lines long enough to be prose rather than navigation, up to `max_chars`.
fn readable_lines(text: &str, min_line_chars: usize, max_chars: usize) -> String {
    let mut out = String::new();
    for line in text.lines().filter(|l| l.chars().count() > min_line_chars) {
        if out.len() + line.len() + 1 > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

#[async_trait]
impl Provider<ScrapeRequest, ScrapedPage> for HttpScraper {
    fn name(&self) -> &str {
        "http_scraper"
    }

    async fn call(&self, request: &ScrapeRequest) -> Result<ScrapedPage, ProviderError> {
        if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
            return Err(ProviderError::NonRetryable {
                provider: self.name().to_string(),
                message: format!("unsupported URL scheme: {}", request.url),
            });
        }

        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|e| map_send_error(self.name(), e))?;
        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let html = response
            .text()
            .await
            .map_err(|e| map_send_error(self.name(), e))?;
        if !status.is_success() {
            return Err(status_error(self.name(), status, retry_after, &html));
        }

        let text = readable_lines(&extract_text_from_html(&html), self.min_line_chars, self.max_chars);
        if text.is_empty() {
            return Err(ProviderError::NonRetryable {
                provider: self.name().to_string(),
                message: format!("no readable text at {}", request.url),
            });
        }

        Ok(ScrapedPage {
            url: request.url.clone(),
            title: extract_title(&html),
            text,
        })
    }
}
