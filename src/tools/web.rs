//! `web_search` and `fetch_webpage`.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::conversation::ToolResult;

pub const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
pub const MAX_SEARCH_RESULTS: usize = 10;
pub const MAX_PAGE_CHARS: usize = 5000;
const FETCH_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; ntn/0.1)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

pub struct WebTools {
    client: reqwest::Client,
    search_url: String,
}

impl WebTools {
    pub fn new() -> Result<Self> {
        Self::with_search_url(DUCKDUCKGO_HTML_URL)
    }

    pub fn with_search_url(search_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build web HTTP client")?;
        Ok(Self {
            client,
            search_url: search_url.into(),
        })
    }

    pub async fn search(&self, call_id: &str, query: &str) -> ToolResult {
        match self.search_inner(query).await {
            Ok(results) => {
                let body = serde_json::json!({ "results": results });
                ToolResult::ok(call_id, body.to_string())
            }
            Err(e) => ToolResult::error(call_id, format!("Search failed: {e:#}")),
        }
    }

    async fn search_inner(&self, query: &str) -> Result<Vec<SearchResult>> {
        debug!(query, "web_search");
        let html = self
            .client
            .get(&self.search_url)
            .query(&[("q", query)])
            .send()
            .await
            .context("Search request failed")?
            .error_for_status()
            .context("Search endpoint returned an error")?
            .text()
            .await
            .context("Failed to read search response")?;
        Ok(parse_search_results(&html, MAX_SEARCH_RESULTS))
    }

    pub async fn fetch(&self, call_id: &str, url: &str) -> ToolResult {
        match self.fetch_inner(url).await {
            Ok(text) => ToolResult::ok(call_id, text),
            Err(e) => ToolResult::error(call_id, format!("Fetch failed: {e:#}")),
        }
    }

    async fn fetch_inner(&self, url: &str) -> Result<String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("Only http and https URLs can be fetched: {url}");
        }
        debug!(url, "fetch_webpage");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{url} returned HTTP {}", status.as_u16());
        }
        let html = response.text().await.context("Failed to read page body")?;
        Ok(truncate_chars(&html_to_text(&html)?, MAX_PAGE_CHARS))
    }
}

fn result_link_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
            .expect("result link regex must compile")
    })
}

fn result_snippet_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</(a|td|div)>"#)
            .expect("result snippet regex must compile")
    })
}

fn page_converter() -> htmd::HtmlToMarkdown {
    let options = htmd::options::Options {
        heading_style: htmd::options::HeadingStyle::Atx,
        code_block_style: htmd::options::CodeBlockStyle::Fenced,
        link_style: htmd::options::LinkStyle::Inlined,
        ..Default::default()
    };
    htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "head"])
        .options(options)
        .build()
}

/// Readable text of an HTML page as markdown, without blank lines or padding.
pub fn html_to_text(html: &str) -> Result<String> {
    let markdown = page_converter()
        .convert(html)
        .context("Failed to convert page to text")?;
    Ok(markdown
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Text of an inline fragment on one line, emphasis dropped.
fn inline_text(html: &str) -> String {
    let text = htmd::convert(html).unwrap_or_default().replace("**", "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract results from DuckDuckGo's HTML endpoint.
pub fn parse_search_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let snippets: Vec<String> = result_snippet_regex()
        .captures_iter(html)
        .map(|c| inline_text(&c[1]))
        .collect();
    result_link_regex()
        .captures_iter(html)
        .take(limit)
        .enumerate()
        .map(|(i, c)| SearchResult {
            title: inline_text(&c[2]),
            href: resolve_result_href(&c[1].replace("&amp;", "&")),
            body: snippets.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>&...`.
fn resolve_result_href(href: &str) -> String {
    href.split(['?', '&'])
        .find_map(|part| part.strip_prefix("uddg="))
        .and_then(|encoded| urlencoding::decode(encoded).ok())
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|| href.to_string())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
