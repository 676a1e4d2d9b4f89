//! Source gathering.
//!
//! The web branch (search, then scrape) and the document branch (extract)
//! run concurrently, each under its own deadline. A branch that runs out of
//! time keeps whatever it finished and records a warning; it never aborts
//! the other branch. Within a branch, records are appended in completion
//! order.

use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{CallError, StageContext, StageOutput};
use crate::memory::{Session, SessionDelta};
use crate::providers::SearchHit;
use crate::types::{ExtractionStatus, Intent, SourceOrigin, SourceRecord, Stage};

/// Search queries for an intent: the topic, then keywords, as many as the
/// scope allows. Case-insensitive duplicates are skipped.
pub fn search_queries(intent: &Intent) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(intent.topic.as_str())
        .chain(intent.keywords.iter().map(String::as_str))
        .map(str::trim)
        .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
        .take(intent.scope.search_fanout())
        .map(str::to_string)
        .collect()
}

fn web_record(hit: &SearchHit, text: String, title: Option<String>, status: ExtractionStatus) -> SourceRecord {
    let mut record = SourceRecord::new(SourceOrigin::Web, hit.url.clone(), text);
    record.title = title.or_else(|| Some(hit.title.clone()).filter(|t| !t.is_empty()));
    record.status = status;
    record
}

async fn web_branch(ctx: &StageContext<'_>, intent: &Intent) -> SessionDelta {
    let mut delta = SessionDelta::default();
    let max_sources = ctx.query.config.max_sources;
    let per_query = (max_sources / 3).max(1);

    let mut hits: Vec<SearchHit> = Vec::new();
    let mut seen_urls = HashSet::new();
    let mut timed_out = false;
    for query in search_queries(intent) {
        match ctx.search(&query, per_query).await {
            Ok(found) => {
                debug!(query = %query, hits = found.len(), "Search returned");
                hits.extend(found.into_iter().filter(|h| seen_urls.insert(h.url.clone())));
            }
            Err(CallError::Deadline) => {
                timed_out = true;
                break;
            }
            Err(CallError::Provider(e)) => {
                warn!(query = %query, error = %e, "Search failed");
                delta.warn(Stage::Gathering, format!("search for '{query}' failed: {e}"));
            }
        }
    }
    hits.truncate(max_sources);

    let mut scraped: HashSet<&str> = HashSet::new();
    if !timed_out {
        let limit = ctx.config.pipeline.max_concurrent_calls;
        let mut pages = futures::stream::iter(&hits)
            .map(|hit| async move {
                let page = ctx.scrape(&hit.url).await;
                (hit, page)
            })
            .buffer_unordered(limit);

        while let Some((hit, page)) = pages.next().await {
            match page {
                Ok(page) => {
                    scraped.insert(hit.url.as_str());
                    delta
                        .sources
                        .push(web_record(hit, page.text, page.title, ExtractionStatus::Complete));
                }
                Err(CallError::Deadline) => {
                    timed_out = true;
                    break;
                }
                Err(CallError::Provider(e)) => {
                    scraped.insert(hit.url.as_str());
                    debug!(url = %hit.url, error = %e, "Scrape failed, keeping snippet");
                    let status = if hit.snippet.trim().is_empty() {
                        ExtractionStatus::Failed
                    } else {
                        ExtractionStatus::Partial
                    };
                    delta.warn(
                        Stage::Gathering,
                        format!("could not scrape {}: {e}", hit.url),
                    );
                    delta.sources.push(web_record(hit, hit.snippet.clone(), None, status));
                }
            }
        }
    }

    if timed_out {
        // Hits found but never scraped still carry their search snippet.
        let mut from_snippets = 0;
        for hit in hits.iter().filter(|h| !scraped.contains(h.url.as_str())) {
            if !hit.snippet.trim().is_empty() {
                delta
                    .sources
                    .push(web_record(hit, hit.snippet.clone(), None, ExtractionStatus::Partial));
                from_snippets += 1;
            }
        }
        warn!(kept = delta.sources.len(), from_snippets, "Web branch timed out");
        delta.warn(
            Stage::Gathering,
            format!(
                "web branch timed out; kept {} source(s), {from_snippets} from search snippets",
                delta.sources.len()
            ),
        );
    }
    info!(branch = "web", sources = delta.sources.len(), "Gathering branch finished");
    delta
}

async fn document_branch(ctx: &StageContext<'_>, paths: &[PathBuf]) -> SessionDelta {
    let mut delta = SessionDelta::default();
    if paths.is_empty() {
        return delta;
    }

    let limit = ctx.config.pipeline.max_concurrent_calls;
    let mut documents = futures::stream::iter(paths)
        .map(|path| async move { (path, ctx.extract(path).await) })
        .buffer_unordered(limit);

    let mut timed_out = false;
    while let Some((path, result)) = documents.next().await {
        let uri = path.display().to_string();
        match result {
            Ok(document) => {
                let mut record = SourceRecord::new(SourceOrigin::Document, uri, document.text);
                record.title = path.file_name().map(|n| n.to_string_lossy().into_owned());
                record.sections = document.sections;
                record.unit_count = Some(document.unit_count);
                delta.sources.push(record);
            }
            Err(CallError::Deadline) => {
                timed_out = true;
                break;
            }
            Err(CallError::Provider(e)) => {
                warn!(path = %uri, error = %e, "Document extraction failed");
                delta.warn(Stage::Gathering, format!("could not read document {uri}: {e}"));
                let mut record = SourceRecord::new(SourceOrigin::Document, uri, String::new());
                record.status = ExtractionStatus::Failed;
                delta.sources.push(record);
            }
        }
    }

    if timed_out {
        warn!(kept = delta.sources.len(), "Document branch timed out");
        delta.warn(
            Stage::Gathering,
            format!(
                "document branch timed out; kept {} of {} document(s)",
                delta.sources.len(),
                paths.len()
            ),
        );
    }
    info!(branch = "documents", sources = delta.sources.len(), "Gathering branch finished");
    delta
}

/// Gather web and document sources concurrently. Sources already recorded
/// on the session are reused as-is.
pub async fn gather_sources(
    ctx: &StageContext<'_>,
    session: &Session,
    intent: &Intent,
) -> StageOutput<Vec<SourceRecord>> {
    if !session.sources.is_empty() {
        debug!(session_id = %session.id, sources = session.sources.len(), "Reusing gathered sources");
        return StageOutput::new(session.sources.clone(), SessionDelta::default());
    }

    let web_ctx = ctx.narrowed(ctx.config.pipeline.web_branch_timeout());
    let doc_ctx = ctx.narrowed(ctx.config.pipeline.document_branch_timeout());
    let (web, documents) = tokio::join!(
        web_branch(&web_ctx, intent),
        document_branch(&doc_ctx, &ctx.query.documents)
    );

    let mut delta = web;
    delta.merge(documents);
    StageOutput::new(delta.sources.clone(), delta)
}
