//! Web search with provider fallback and a result cache.
//!
//! Providers are tried in the configured order. A provider without an API
//! key is skipped; the first provider that returns results wins. Results are
//! cached in the store keyed by the normalized query and result count.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use questlog_config::SearchConfig;

use crate::tool::{ParamExt, Tool, ToolContext, ToolError, ToolOutput, ToolResult};

/// A single search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// One search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        client: &Client,
        query: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, String>;
}

/// The hosted search APIs, each with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpSearchProvider {
    /// Brave Search API
    Brave { api_key: String },
    /// Tavily Search API
    Tavily { api_key: String },
    /// Serper (Google Search API)
    Serper { api_key: String },
}

impl HttpSearchProvider {
    /// Provider for a configured name. Unknown names yield `None`.
    pub fn from_name(name: &str, api_key: impl Into<String>) -> Option<Self> {
        let api_key = api_key.into();
        match name {
            "brave" => Some(Self::Brave { api_key }),
            "tavily" => Some(Self::Tavily { api_key }),
            "serper" => Some(Self::Serper { api_key }),
            _ => None,
        }
    }

    /// Extract results from a provider's JSON response.
    pub fn parse_results(&self, data: &Value) -> Vec<SearchResult> {
        let (items, url_key, snippet_key) = match self {
            Self::Brave { .. } => (&data["web"]["results"], "url", "description"),
            Self::Tavily { .. } => (&data["results"], "url", "content"),
            Self::Serper { .. } => (&data["organic"], "link", "snippet"),
        };
        items
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        Some(SearchResult {
                            title: r["title"].as_str()?.trim().to_string(),
                            url: r[url_key].as_str()?.trim().to_string(),
                            snippet: r[snippet_key].as_str().unwrap_or("").trim().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        match self {
            Self::Brave { .. } => "brave",
            Self::Tavily { .. } => "tavily",
            Self::Serper { .. } => "serper",
        }
    }

    async fn search(
        &self,
        client: &Client,
        query: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, String> {
        let request = match self {
            Self::Brave { api_key } => client
                .get("https://api.search.brave.com/res/v1/web/search")
                .query(&[("q", query.to_string()), ("count", max_results.to_string())])
                .header("X-Subscription-Token", api_key)
                .header("Accept", "application/json"),
            Self::Tavily { api_key } => client.post("https://api.tavily.com/search").json(&json!({
                "api_key": api_key,
                "query": query,
                "max_results": max_results
            })),
            Self::Serper { api_key } => client
                .post("https://google.serper.dev/search")
                .header("X-API-KEY", api_key)
                .json(&json!({
                    "q": query,
                    "num": max_results
                })),
        };

        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| format!("failed to parse response: {}", e))?;
        Ok(self.parse_results(&data))
    }
}

/// Providers with keys, in configured order.
fn configured_providers(config: &SearchConfig) -> Vec<Arc<dyn SearchProvider>> {
    let mut providers: Vec<Arc<dyn SearchProvider>> = Vec::new();
    for name in &config.provider_order {
        let Some(entry) = config.providers.get(name) else {
            warn!(provider = %name, "Search provider in order but not configured");
            continue;
        };
        if !entry.enabled {
            continue;
        }
        let Some(key) = entry.resolve_api_key() else {
            debug!(provider = %name, "Search provider skipped: no API key");
            continue;
        };
        match HttpSearchProvider::from_name(name, key) {
            Some(provider) => providers.push(Arc::new(provider)),
            None => warn!(provider = %name, "Unknown search provider"),
        }
    }
    providers
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cache key for a query and result count (hex sha256).
pub fn cache_key(query: &str, max_results: usize) -> String {
    let material = format!("{}:{}", normalize_query(query), max_results);
    format!("{:x}", Sha256::digest(material.as_bytes()))
}

/// Render results as a bulleted list for the model.
pub fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("- {}\n  {}\n  {}", r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

fn dedupe(results: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.url.is_empty() && seen.insert(r.url.trim_end_matches('/').to_string()))
        .take(max_results)
        .collect()
}

fn output(query: &str, results: &[SearchResult], source: &str, cached: bool) -> ToolOutput {
    let summary = if results.is_empty() {
        format!("No results found for '{}'", query)
    } else {
        format!("Results for '{}':\n{}", query, format_results(results))
    };
    ToolOutput::new(json!({
        "query": query,
        "count": results.len(),
        "provider": source,
        "cached": cached,
        "results": results,
    }))
    .with_summary(summary)
}

/// Per-provider deadline: the configured search timeout, capped so every
/// provider gets a turn inside the tool's own timeout.
pub fn provider_timeout(configured: Duration, tool_timeout: Duration, providers: usize) -> Duration {
    let share = tool_timeout.mul_f64(0.9) / providers.max(1) as u32;
    configured.min(share).max(Duration::from_millis(1))
}

// ─────────────────────────────────────────────────────────────────────────────
// Web Search Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Tool for searching the web.
#[derive(Clone)]
pub struct WebSearchTool {
    client: Client,
    /// Fixed providers. When `None` they are built from configuration per call.
    providers: Option<Vec<Arc<dyn SearchProvider>>>,
}

impl std::fmt::Debug for WebSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchTool")
            .field(
                "providers",
                &self
                    .providers
                    .as_ref()
                    .map(|p| p.iter().map(|p| p.name().to_string()).collect::<Vec<_>>()),
            )
            .finish()
    }
}

impl WebSearchTool {
    /// Providers come from the `[search]` configuration of each call.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            providers: None,
        }
    }

    /// Use exactly these providers, in order.
    pub fn with_providers(providers: Vec<Arc<dyn SearchProvider>>) -> Self {
        Self {
            client: Client::new(),
            providers: Some(providers),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns titles, URLs and snippets."
    }

    fn tags(&self) -> &[&'static str] {
        &["search", "web"]
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 8}
            },
            "required": ["query"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let config = ctx.config.search();
        let query = args
            .required_str("query", "what to search for")?
            .trim()
            .to_string();
        let ceiling = i64::from(config.max_results.clamp(1, 8));
        let max_results = args
            .get("max_results")
            .and_then(Value::as_i64)
            .unwrap_or(i64::from(config.default_results))
            .clamp(1, ceiling) as usize;

        let key = cache_key(&query, max_results);
        if let Some(raw) = ctx.store.cache_get(&key, ctx.now)? {
            match serde_json::from_str::<Vec<SearchResult>>(&raw) {
                Ok(results) => {
                    debug!(query = %query, "Search cache hit");
                    return Ok(output(&query, &results, "cache", true));
                }
                Err(e) => warn!(error = %e, "Discarding unreadable search cache entry"),
            }
        }

        let providers = match &self.providers {
            Some(fixed) => fixed.clone(),
            None => configured_providers(&config),
        };
        if providers.is_empty() {
            return Err(ToolError::upstream(
                "no search provider is configured (set an API key for brave, tavily or serper)",
            ));
        }

        // Expired rows for other queries are never read again.
        match ctx.store.cache_purge(ctx.now) {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired search cache entries"),
            Err(e) => warn!(error = %e, "Search cache purge failed"),
        }

        let timeout = provider_timeout(
            Duration::from_secs(config.timeout_secs.max(1)),
            Duration::from_secs(ctx.config.agent().tool_timeout_secs.max(1)),
            providers.len(),
        );
        let mut failures = Vec::new();
        let mut answered_empty = None;
        for provider in &providers {
            if ctx.is_cancelled() {
                return Err(ToolError::upstream("search cancelled"));
            }
            let attempt = provider.search(&self.client, &query, max_results, timeout);
            let outcome = match tokio::time::timeout(timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
            };
            match outcome {
                Ok(results) if !results.is_empty() => {
                    let results = dedupe(results, max_results);
                    if config.cache_ttl_seconds > 0 {
                        let encoded = serde_json::to_string(&results).map_err(|e| {
                            ToolError::internal(format!("cannot encode results: {}", e))
                        })?;
                        let ttl = i64::try_from(config.cache_ttl_seconds).unwrap_or(i64::MAX / 1000);
                        let expires = ctx.now + ChronoDuration::seconds(ttl);
                        ctx.store.cache_put(&key, &encoded, expires)?;
                    }
                    debug!(provider = provider.name(), count = results.len(), "Search answered");
                    return Ok(output(&query, &results, provider.name(), false));
                }
                Ok(_) => {
                    debug!(provider = provider.name(), "Search returned no results");
                    if answered_empty.is_none() {
                        answered_empty = Some(provider.name().to_string());
                    }
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Search provider failed");
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        match answered_empty {
            Some(source) => Ok(output(&query, &[], &source, false)),
            None => Err(ToolError::upstream(format!(
                "all search providers failed ({})",
                failures.join("; ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolErrorKind, run_tool};
    use crate::tools::test_support::ctx;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        name: &'static str,
        reply: Result<Vec<SearchResult>, String>,
        calls: AtomicUsize,
    }

    fn provider(
        name: &'static str,
        reply: Result<Vec<SearchResult>, String>,
    ) -> Arc<dyn SearchProvider> {
        StaticProvider::new(name, reply)
    }

    impl StaticProvider {
        fn new(name: &'static str, reply: Result<Vec<SearchResult>, String>) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(
            &self,
            _client: &Client,
            _query: &str,
            _max_results: usize,
            _timeout: Duration,
        ) -> Result<Vec<SearchResult>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    /// Never answers on its own; only an outer deadline ends the call.
    struct HangingProvider;

    #[async_trait]
    impl SearchProvider for HangingProvider {
        fn name(&self) -> &str {
            "brave"
        }

        async fn search(
            &self,
            _client: &Client,
            _query: &str,
            _max_results: usize,
            _timeout: Duration,
        ) -> Result<Vec<SearchResult>, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn result(n: usize, url: &str) -> SearchResult {
        SearchResult {
            title: format!("Result {}", n),
            url: url.to_string(),
            snippet: format!("snippet {}", n),
        }
    }

    #[test]
    fn test_cache_key_normalizes_query() {
        assert_eq!(cache_key("Rust  Async", 5), cache_key(" rust async ", 5));
        assert_ne!(cache_key("rust async", 5), cache_key("rust async", 6));
        assert_eq!(cache_key("x", 1).len(), 64);
    }

    #[test]
    fn test_format_results() {
        let text = format_results(&[result(1, "https://a.example")]);
        assert_eq!(text, "- Result 1\n  https://a.example\n  snippet 1");
    }

    #[test]
    fn test_parse_provider_shapes() {
        let brave = HttpSearchProvider::from_name("brave", "k").unwrap();
        let data = json!({"web": {"results": [
            {"title": "A", "url": "https://a", "description": "about a"},
            {"url": "https://no-title"}
        ]}});
        assert_eq!(
            brave.parse_results(&data),
            vec![SearchResult {
                title: "A".into(),
                url: "https://a".into(),
                snippet: "about a".into()
            }]
        );

        let serper = HttpSearchProvider::from_name("serper", "k").unwrap();
        let data = json!({"organic": [{"title": "S", "link": "https://s", "snippet": "s"}]});
        assert_eq!(serper.parse_results(&data)[0].url, "https://s");

        let tavily = HttpSearchProvider::from_name("tavily", "k").unwrap();
        let data = json!({"results": [{"title": "T", "url": "https://t", "content": "t"}]});
        assert_eq!(tavily.parse_results(&data)[0].snippet, "t");

        assert!(HttpSearchProvider::from_name("bing", "k").is_none());
        assert!(brave.parse_results(&json!({})).is_empty());
    }

    #[test]
    fn test_dedupe_by_url() {
        let results = vec![
            result(1, "https://a.example/"),
            result(2, "https://a.example"),
            result(3, "https://b.example"),
            result(4, "https://c.example"),
        ];
        let deduped = dedupe(results, 2);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[1].url, "https://b.example");
    }

    #[tokio::test]
    async fn test_falls_back_and_caches() {
        let failing = StaticProvider::new("brave", Err("HTTP 500".into()));
        let working = StaticProvider::new("tavily", Ok(vec![result(1, "https://a")]));
        let tool = WebSearchTool::with_providers(vec![
            failing.clone() as Arc<dyn SearchProvider>,
            working.clone() as Arc<dyn SearchProvider>,
        ]);
        let ctx = ctx();

        let out = tool.run(json!({"query": "rust"}), &ctx).await.unwrap();
        assert_eq!(out.get("provider"), Some(&json!("tavily")));
        assert_eq!(out.get("cached"), Some(&json!(false)));
        assert!(out.summary().unwrap().contains("https://a"));

        let out = tool.run(json!({"query": "  RUST "}), &ctx).await.unwrap();
        assert_eq!(out.get("cached"), Some(&json!(true)));
        assert_eq!(failing.calls(), 1);
        assert_eq!(working.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let tool = WebSearchTool::with_providers(vec![
            provider("brave", Err("timeout".into())),
            provider("serper", Err("HTTP 401".into())),
        ]);
        let err = tool.run(json!({"query": "rust"}), &ctx()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::UpstreamFailure);
        assert!(err.message.contains("brave: timeout"));
        assert!(err.message.contains("serper: HTTP 401"));
    }

    #[tokio::test]
    async fn test_no_providers_configured() {
        let tool = WebSearchTool::with_providers(Vec::new());
        let err = tool.run(json!({"query": "rust"}), &ctx()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::UpstreamFailure);
    }

    #[tokio::test]
    async fn test_empty_results_are_not_failures() {
        let tool = WebSearchTool::with_providers(vec![provider("brave", Ok(vec![]))]);
        let out = tool.run(json!({"query": "zzz"}), &ctx()).await.unwrap();
        assert_eq!(out.get("count"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_max_results_clamped() {
        let many: Vec<_> = (0..20)
            .map(|i| result(i, &format!("https://{}.example", i)))
            .collect();
        let tool = WebSearchTool::with_providers(vec![provider("brave", Ok(many))]);
        let out = tool
            .run(json!({"query": "rust", "max_results": 50}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.get("count"), Some(&json!(8)));

        let err = tool.run(json!({"max_results": 3}), &ctx()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
    }

    #[test]
    fn test_provider_timeout_fits_inside_tool_timeout() {
        let twenty = Duration::from_secs(20);
        assert_eq!(provider_timeout(twenty, twenty, 3), Duration::from_secs(6));
        assert_eq!(
            provider_timeout(Duration::from_secs(2), twenty, 3),
            Duration::from_secs(2)
        );
        assert!(provider_timeout(twenty, twenty, 0) < twenty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_does_not_block_fallback() {
        let working = StaticProvider::new("tavily", Ok(vec![result(1, "https://a")]));
        let tool = WebSearchTool::with_providers(vec![
            Arc::new(HangingProvider) as Arc<dyn SearchProvider>,
            working.clone() as Arc<dyn SearchProvider>,
        ]);
        let ctx = ctx();

        let out = run_tool(&tool, json!({"query": "rust"}), &ctx, Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(out.get("provider"), Some(&json!("tavily")));
        assert_eq!(working.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_providers_report_each_failure() {
        let tool = WebSearchTool::with_providers(vec![
            Arc::new(HangingProvider) as Arc<dyn SearchProvider>,
            provider("serper", Err("HTTP 401".into())),
        ]);
        let err = run_tool(&tool, json!({"query": "rust"}), &ctx(), Duration::from_secs(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::UpstreamFailure);
        assert!(err.message.contains("all search providers failed"));
        assert!(err.message.contains("brave: timed out"));
        assert!(err.message.contains("serper: HTTP 401"));
    }

    #[tokio::test]
    async fn test_cache_miss_purges_expired_entries() {
        let ctx = ctx();
        ctx.store
            .cache_put("stale", "[]", ctx.now - ChronoDuration::seconds(1))
            .unwrap();
        let tool = WebSearchTool::with_providers(vec![provider(
            "brave",
            Ok(vec![result(1, "https://a")]),
        )]);

        tool.run(json!({"query": "rust"}), &ctx).await.unwrap();
        assert_eq!(ctx.store.cache_purge(ctx.now).unwrap(), 0);
    }
}
