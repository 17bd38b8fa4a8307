//! Bounded, same-site crawler for one organization website.
//!
//! The base URL is fetched first and its final (post-redirect) URL fixes the
//! crawl scope. Remaining pages are claimed breadth-first from the frontier,
//! one depth level at a time, with up to `page_concurrency` fetches in flight.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use openness_discovery::{RobotsRules, discover_robots};
use openness_extract::{ContentKind, decode_body, extract};
use openness_shared::{
    CrawlConfig, FetchStatus, OpennessError, PageRecord, Result, RetryPolicy, USER_AGENT,
};

use crate::frontier::Frontier;
use crate::scope::{CrawlScope, LinkVerdict, is_ssrf_target, normalize_url};

const MAX_REDIRECTS: usize = 5;

/// Bodies beyond this size are not parsed (5 MiB).
const MAX_BODY_BYTES: u64 = 5 * 1024 * 1024;

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

// ---------------------------------------------------------------------------
// CrawlOutcome
// ---------------------------------------------------------------------------

/// Everything one crawl produced.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// The base URL as given.
    pub base_url: String,
    /// In claim order: by depth, then relevance. The base page comes first.
    pub pages: Vec<PageRecord>,
    pub base_reachable: bool,
    /// Page requests sent, retries included. Bounded by `max_pages * (1 + max_retries)`.
    pub fetch_attempts: u32,
    /// robots.txt requests sent before the crawl: 1 when robots.txt is respected.
    pub robots_requests: u32,
    /// Same-site links seen on fetched pages, fetched or not.
    pub discovered: BTreeSet<String>,
    /// Links to other sites. Recorded, never followed.
    pub external: BTreeSet<String>,
    /// Same-site links skipped because robots.txt disallows them.
    pub robots_blocked: BTreeSet<String>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CrawlOutcome {
    /// A crawl that never got past its base URL.
    fn unreachable(base_url: &str, reason: impl Into<String>, started: Instant) -> Self {
        let mut record = PageRecord::failed(base_url, 0, FetchStatus::HttpError, reason);
        record.attempts = 0;
        Self {
            base_url: base_url.to_string(),
            pages: vec![record],
            base_reachable: false,
            fetch_attempts: 0,
            robots_requests: 0,
            discovered: BTreeSet::new(),
            external: BTreeSet::new(),
            robots_blocked: BTreeSet::new(),
            cancelled: false,
            duration: started.elapsed(),
        }
    }

    pub fn successful_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_ok()).count()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.len() - self.successful_pages()
    }

    /// Every request this crawl sent to the site.
    pub fn requests_sent(&self) -> u32 {
        self.fetch_attempts + self.robots_requests
    }

    /// Pages with extracted text, in crawl order.
    pub fn ok_pages(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.iter().filter(|p| p.is_ok())
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Concurrent crawler shared by all organizations of a run.
#[derive(Debug, Clone)]
pub struct Crawler {
    config: CrawlConfig,
    client: Client,
}

impl Crawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| OpennessError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawl `base_url` within its own site.
    ///
    /// Never fails: an unusable or unreachable base URL yields an outcome
    /// with `base_reachable == false` and a single failed page.
    #[instrument(skip_all, fields(base_url = %base_url))]
    pub async fn crawl(&self, base_url: &str, cancel: &CancellationToken) -> CrawlOutcome {
        let started = Instant::now();

        let base = match parse_base_url(base_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "base URL rejected");
                return CrawlOutcome::unreachable(base_url, e.to_string(), started);
            }
        };
        if !self.config.allow_private_hosts && is_ssrf_target(&base) {
            warn!("base URL targets a private or loopback host, not crawled");
            return CrawlOutcome::unreachable(base_url, "private or loopback host blocked", started);
        }
        if cancel.is_cancelled() {
            let mut outcome = CrawlOutcome::unreachable(base_url, "crawl cancelled", started);
            outcome.cancelled = true;
            return outcome;
        }

        let (robots, robots_requests) = if self.config.respect_robots_txt {
            (discover_robots(&self.client, &base).await, 1)
        } else {
            (RobotsRules::allow_all(), 0)
        };
        if !robots.is_allowed(robots_path(&base)) {
            warn!("base URL disallowed by robots.txt");
            let mut outcome =
                CrawlOutcome::unreachable(base_url, "disallowed by robots.txt", started);
            outcome.robots_requests = robots_requests;
            return outcome;
        }

        let delay = self
            .config
            .request_delay
            .max(robots.crawl_delay().unwrap_or_default());

        info!(
            max_depth = self.config.max_depth,
            max_pages = self.config.max_pages,
            page_concurrency = self.config.page_concurrency,
            delay_ms = delay.as_millis() as u64,
            "starting crawl"
        );

        let fetcher = PageFetcher {
            client: self.client.clone(),
            retry: self.config.retry,
            delay,
            cancel: cancel.clone(),
        };

        let base_page = fetcher.fetch(&base, 0).await;
        let base_reachable = base_page.record.is_ok();
        let scope_url = base_page.final_url.clone().unwrap_or_else(|| base.clone());

        let state = Arc::new(CrawlState::new(
            CrawlScope::new(&scope_url, self.config.allow_private_hosts),
            robots,
            self.config.max_depth,
        ));
        state.mark_visited(&base).await;
        state.mark_visited(&scope_url).await;
        if base_reachable {
            state.enqueue_links(base_page.links, 0).await;
        } else {
            warn!(
                status = %base_page.record.status,
                error = base_page.record.error.as_deref().unwrap_or(""),
                "base URL not reachable"
            );
        }

        let mut records: Vec<(u64, PageRecord)> = vec![(0, base_page.record)];
        let mut claimed: usize = 1;
        let mut level: u32 = 0;
        let mut tasks: JoinSet<(u64, PageRecord)> = JoinSet::new();
        let concurrency = self.config.page_concurrency.max(1);

        loop {
            while tasks.len() < concurrency
                && claimed < self.config.max_pages
                && !cancel.is_cancelled()
            {
                // A deeper level only starts once the current one has drained.
                let next = {
                    let mut frontier = state.frontier.lock().await;
                    match frontier.peek_depth() {
                        Some(depth)
                            if depth <= self.config.max_depth
                                && (tasks.is_empty() || depth == level) =>
                        {
                            frontier.pop()
                        }
                        _ => None,
                    }
                };
                let Some(entry) = next else { break };

                level = entry.depth;
                let order = claimed as u64;
                claimed += 1;

                let fetcher = fetcher.clone();
                let state = Arc::clone(&state);
                tasks.spawn(async move {
                    let page = fetcher.fetch(&entry.url, entry.depth).await;
                    if page.record.is_ok() {
                        if let Some(final_url) = &page.final_url {
                            state.mark_visited(final_url).await;
                        }
                        state.enqueue_links(page.links, entry.depth).await;
                    }
                    (order, page.record)
                });
            }

            match tasks.join_next().await {
                Some(Ok(done)) => records.push(done),
                Some(Err(e)) => warn!(error = %e, "page task failed"),
                None => break,
            }
        }

        records.sort_by_key(|(order, _)| *order);
        let pages: Vec<PageRecord> = records.into_iter().map(|(_, record)| record).collect();
        let fetch_attempts = pages.iter().map(|p| p.attempts).sum();
        let links = std::mem::take(&mut *state.links.lock().await);

        let outcome = CrawlOutcome {
            base_url: base_url.to_string(),
            pages,
            base_reachable,
            fetch_attempts,
            robots_requests,
            discovered: links.discovered,
            external: links.external,
            robots_blocked: links.robots_blocked,
            cancelled: cancel.is_cancelled(),
            duration: started.elapsed(),
        };

        info!(
            pages = outcome.pages.len(),
            ok = outcome.successful_pages(),
            failed = outcome.failed_pages(),
            attempts = outcome.fetch_attempts,
            requests = outcome.requests_sent(),
            discovered = outcome.discovered.len(),
            external = outcome.external.len(),
            cancelled = outcome.cancelled,
            duration_ms = outcome.duration.as_millis() as u64,
            "crawl finished"
        );

        outcome
    }
}

// ---------------------------------------------------------------------------
// Shared crawl state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LinkLog {
    discovered: BTreeSet<String>,
    external: BTreeSet<String>,
    robots_blocked: BTreeSet<String>,
}

/// State shared between page tasks. Lock order: `visited`, then `frontier`.
struct CrawlState {
    scope: CrawlScope,
    robots: RobotsRules,
    max_depth: u32,
    frontier: Mutex<Frontier>,
    visited: Mutex<HashSet<String>>,
    links: Mutex<LinkLog>,
}

impl CrawlState {
    fn new(scope: CrawlScope, robots: RobotsRules, max_depth: u32) -> Self {
        Self {
            scope,
            robots,
            max_depth,
            frontier: Mutex::new(Frontier::new()),
            visited: Mutex::new(HashSet::new()),
            links: Mutex::new(LinkLog::default()),
        }
    }

    /// Claim the normalized form of `url`. Returns false if already claimed.
    async fn mark_visited(&self, url: &Url) -> bool {
        self.visited.lock().await.insert(normalize_url(url))
    }

    /// Record the links of a page at `parent_depth` and queue the followable ones.
    async fn enqueue_links(&self, links: Vec<Url>, parent_depth: u32) {
        let child_depth = parent_depth + 1;
        let mut accepted = Vec::new();

        {
            let mut log = self.links.lock().await;
            for link in links {
                match self.scope.classify(&link) {
                    LinkVerdict::External => {
                        log.external.insert(link.to_string());
                    }
                    LinkVerdict::Excluded | LinkVerdict::Blocked => {
                        debug!(url = %link, "link skipped");
                    }
                    LinkVerdict::Follow => {
                        if !self.robots.is_allowed(robots_path(&link)) {
                            log.robots_blocked.insert(link.to_string());
                            continue;
                        }
                        log.discovered.insert(link.to_string());
                        if child_depth <= self.max_depth {
                            accepted.push(link);
                        }
                    }
                }
            }
        }

        if accepted.is_empty() {
            return;
        }

        let mut visited = self.visited.lock().await;
        let mut frontier = self.frontier.lock().await;
        for link in accepted {
            if visited.insert(normalize_url(&link)) {
                frontier.push(link, child_depth);
            }
        }
        debug!(queued = frontier.len(), depth = child_depth, "frontier updated");
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PageFetcher {
    client: Client,
    retry: RetryPolicy,
    delay: Duration,
    cancel: CancellationToken,
}

/// A finished page: the record plus what the crawl needs to continue.
struct FetchedPage {
    record: PageRecord,
    final_url: Option<Url>,
    links: Vec<Url>,
}

struct RawResponse {
    final_url: Url,
    http_status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// One failed request, classified for the retry loop.
#[derive(Debug)]
struct AttemptFailure {
    status: FetchStatus,
    http_status: Option<u16>,
    message: String,
    retryable: bool,
}

impl AttemptFailure {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self {
                status: FetchStatus::Timeout,
                http_status: None,
                message: format!("request timed out: {err}"),
                retryable: true,
            };
        }
        if let Some(status) = err.status() {
            return Self::from_status(status);
        }
        Self {
            status: FetchStatus::HttpError,
            http_status: None,
            message: err.to_string(),
            retryable: err.is_connect() || err.is_request() || err.is_body(),
        }
    }

    /// 5xx and 429 are worth another try. Other 4xx are final.
    fn from_status(status: StatusCode) -> Self {
        Self {
            status: FetchStatus::HttpError,
            http_status: Some(status.as_u16()),
            message: format!("HTTP {status}"),
            retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        }
    }

    fn into_page(self, url: &Url, depth: u32, attempts: u32) -> FetchedPage {
        let mut record = PageRecord::failed(url.as_str(), depth, self.status, self.message);
        record.http_status = self.http_status;
        record.attempts = attempts;
        FetchedPage {
            record,
            final_url: None,
            links: Vec::new(),
        }
    }
}

impl PageFetcher {
    /// Fetch with politeness delay and retries. Never fails; failures end up
    /// in the record status.
    async fn fetch(&self, url: &Url, depth: u32) -> FetchedPage {
        let mut attempt: u32 = 0;
        loop {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            debug!(%url, depth, attempt = attempt + 1, "fetching page");

            let failure = match self.fetch_once(url).await {
                Ok(response) => return finish_page(url, depth, attempt + 1, response),
                Err(failure) => failure,
            };

            if !failure.retryable || !self.retry.should_retry(attempt) {
                debug!(%url, status = %failure.status, error = %failure.message, "page failed");
                return failure.into_page(url, depth, attempt + 1);
            }

            let backoff = self.retry.delay_for_attempt(attempt);
            warn!(
                %url,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure.message,
                "fetch failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(%url, "retry abandoned, crawl cancelled");
                    return failure.into_page(url, depth, attempt + 1);
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<RawResponse, AttemptFailure> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(AttemptFailure::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure::from_status(status));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_BODY_BYTES {
                return Err(AttemptFailure {
                    status: FetchStatus::ParseError,
                    http_status: Some(status.as_u16()),
                    message: format!("response too large ({len} bytes, max {MAX_BODY_BYTES})"),
                    retryable: false,
                });
            }
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(AttemptFailure::from_reqwest)?;

        Ok(RawResponse {
            final_url,
            http_status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Turn a successful response into a page record, or a `parse-error` one.
fn finish_page(url: &Url, depth: u32, attempts: u32, response: RawResponse) -> FetchedPage {
    let content_type = response.content_type.as_deref();

    match extract(&response.body, content_type) {
        Ok(extracted) => {
            let links = if ContentKind::from_content_type(content_type) == Some(ContentKind::Html) {
                decode_body(&response.body, content_type, ContentKind::Html)
                    .map(|html| extract_links(&html, &response.final_url))
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            let mut record = PageRecord::ok(
                response.final_url.as_str(),
                depth,
                extracted.text,
                extracted.title,
            );
            record.http_status = Some(response.http_status);
            record.attempts = attempts;
            record.links = outgoing_links(&links);
            debug!(%url, words = extracted.word_count, links = links.len(), "page fetched");
            FetchedPage {
                record,
                final_url: Some(response.final_url),
                links,
            }
        }
        Err(e) => {
            debug!(%url, error = %e, "page unreadable");
            let mut record =
                PageRecord::failed(url.as_str(), depth, FetchStatus::ParseError, e.to_string());
            record.http_status = Some(response.http_status);
            record.attempts = attempts;
            FetchedPage {
                record,
                final_url: Some(response.final_url),
                links: Vec::new(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Accept only absolute http(s) URLs with a host.
fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|e| OpennessError::validation(format!("invalid base URL '{trimmed}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OpennessError::validation(format!(
            "base URL '{trimmed}' is not an http(s) URL"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(OpennessError::validation(format!(
            "base URL '{trimmed}' has no host"
        )));
    }
    url.set_fragment(None);
    Ok(url)
}

/// Path and query, the part robots.txt rules match against.
fn robots_path(url: &Url) -> &str {
    &url[url::Position::BeforePath..url::Position::AfterQuery]
}

/// Distinct link targets in document order, as kept on the page record.
fn outgoing_links(links: &[Url]) -> Vec<String> {
    let mut seen = HashSet::new();
    links
        .iter()
        .map(Url::as_str)
        .filter(|link| seen.insert(*link))
        .map(str::to_string)
        .collect()
}

/// Extract all links from an HTML document, resolved against the page URL.
fn extract_links(html: &str, page_url: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        if let Ok(mut resolved) = page_url.join(href) {
            resolved.set_fragment(None);
            links.push(resolved);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CrawlConfig {
        CrawlConfig {
            max_depth: 2,
            max_pages: 10,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
                multiplier: 2.0,
                max_delay: Duration::from_millis(20),
            },
            page_concurrency: 3,
            respect_robots_txt: false,
            request_delay: Duration::ZERO,
            allow_private_hosts: true,
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
    }

    async fn mount_page(server: &MockServer, at: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(html(body))
            .mount(server)
            .await;
    }

    fn paths(outcome: &CrawlOutcome) -> Vec<String> {
        outcome
            .pages
            .iter()
            .map(|p| Url::parse(&p.url).unwrap().path().to_string())
            .collect()
    }

    #[test]
    fn test_extract_links() {
        let body = r##"<html><body>
            <a href="/about">About</a>
            <a href="team#people">Team</a>
            <a href="https://external.example/">Out</a>
            <a href="#top">Top</a>
            <a href="mailto:info@example.org">Mail</a>
            <a href="javascript:void(0)">JS</a>
        </body></html>"##;
        let base = Url::parse("https://example.org/org/").unwrap();
        let links: Vec<String> = extract_links(body, &base)
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            links,
            vec![
                "https://example.org/about",
                "https://example.org/org/team",
                "https://external.example/",
            ]
        );
    }

    #[test]
    fn latin1_page_keeps_text_and_distinct_links() {
        let final_url = Url::parse("https://example.org/").unwrap();
        let response = RawResponse {
            final_url: final_url.clone(),
            http_status: 200,
            content_type: Some("text/html; charset=iso-8859-1".into()),
            body: b"<html><body><p>F\xf6rderung</p>\
                <a href=\"/ber\xfccht.pdf\">PDF</a>\
                <a href=\"/about\">About</a>\
                <a href=\"/about#team\">Team</a></body></html>"
                .to_vec(),
        };
        let page = finish_page(&final_url, 0, 1, response);

        assert!(page.record.is_ok());
        assert!(page.record.text.as_deref().unwrap().contains("förderung"));
        assert_eq!(page.links.len(), 3);
        assert_eq!(
            page.record.links,
            vec!["https://example.org/ber%C3%BCcht.pdf", "https://example.org/about"]
        );
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(parse_base_url("https://example.org/").is_ok());
        assert!(parse_base_url("  http://example.org  ").is_ok());
        assert!(parse_base_url("ftp://example.org/").is_err());
        assert!(parse_base_url("example.org").is_err());
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn status_classification() {
        assert!(AttemptFailure::from_status(StatusCode::SERVICE_UNAVAILABLE).retryable);
        assert!(AttemptFailure::from_status(StatusCode::TOO_MANY_REQUESTS).retryable);
        assert!(!AttemptFailure::from_status(StatusCode::NOT_FOUND).retryable);
        assert!(!AttemptFailure::from_status(StatusCode::FORBIDDEN).retryable);
    }

    #[tokio::test]
    async fn test_crawl_with_mock_server() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            r#"<html><head><title>Home</title></head><body>
                <a href="/shop">Shop</a>
                <a href="/about">About us</a>
                <a href="https://elsewhere.example/partner">Partner</a>
            </body></html>"#,
        )
        .await;
        mount_page(
            &server,
            "/about",
            r#"<html><body><p>Our mission</p>
               <a href="/about/team">Team</a><a href="/">Home</a></body></html>"#,
        )
        .await;
        mount_page(&server, "/shop", "<html><body><p>Shop</p></body></html>").await;
        mount_page(&server, "/about/team", "<html><body><p>Board</p></body></html>").await;

        let crawler = Crawler::new(test_config()).unwrap();
        let outcome = crawler.crawl(&server.uri(), &CancellationToken::new()).await;

        assert!(outcome.base_reachable);
        assert_eq!(outcome.successful_pages(), 4);
        assert_eq!(outcome.failed_pages(), 0);
        // Relevance puts /about ahead of /shop within depth 1.
        assert_eq!(paths(&outcome), vec!["/", "/about", "/shop", "/about/team"]);
        assert_eq!(outcome.pages[0].title.as_deref(), Some("Home"));
        assert!(outcome.external.contains("https://elsewhere.example/partner"));
        assert_eq!(outcome.fetch_attempts, 4);
    }

    #[tokio::test]
    async fn depth_zero_fetches_only_the_base() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            r#"<a href="/about">About</a><a href="/contact">Contact</a>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(html("about"))
            .expect(0)
            .mount(&server)
            .await;

        let config = CrawlConfig {
            max_depth: 0,
            ..test_config()
        };
        let crawler = Crawler::new(config).unwrap();
        let outcome = crawler.crawl(&server.uri(), &CancellationToken::new()).await;

        assert_eq!(outcome.pages.len(), 1);
        assert!(outcome.base_reachable);
        let about = format!("{}/about", server.uri());
        assert!(outcome.discovered.contains(&about));
        assert_eq!(outcome.discovered.len(), 2);
    }

    #[tokio::test]
    async fn max_pages_caps_claims() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            r#"<a href="/a">a</a><a href="/b">b</a><a href="/c">c</a><a href="/d">d</a>"#,
        )
        .await;
        for p in ["/a", "/b", "/c", "/d"] {
            mount_page(&server, p, "<p>leaf</p>").await;
        }

        let config = CrawlConfig {
            max_pages: 3,
            ..test_config()
        };
        let outcome = Crawler::new(config)
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.pages.len(), 3);
        assert_eq!(paths(&outcome), vec!["/", "/a", "/b"]);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_page(&server, "/", "<p>finally</p>").await;

        let outcome = Crawler::new(test_config())
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert!(outcome.base_reachable);
        assert_eq!(outcome.pages[0].attempts, 3);
        assert_eq!(outcome.pages[0].text.as_deref(), Some("finally"));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = Crawler::new(test_config())
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert!(!outcome.base_reachable);
        assert_eq!(outcome.successful_pages(), 0);
        let page = &outcome.pages[0];
        assert_eq!(page.status, FetchStatus::HttpError);
        assert_eq!(page.http_status, Some(404));
        assert_eq!(page.attempts, 1);
    }

    #[tokio::test]
    async fn fetch_attempts_stay_within_budget() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            r#"<a href="/x">x</a><a href="/y">y</a><a href="/z">z</a>"#,
        )
        .await;
        for p in ["/x", "/y", "/z"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
        }

        let mut config = test_config();
        config.max_pages = 3;
        config.retry = config.retry.with_max_retries(1);
        let outcome = Crawler::new(config.clone())
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        let budget = config.max_pages as u32 * config.retry.max_attempts();
        assert!(outcome.fetch_attempts <= budget);
        assert_eq!(outcome.fetch_attempts, 1 + 2 * 2);
        assert_eq!(outcome.failed_pages(), 2);
        assert!(outcome.base_reachable);
    }

    #[tokio::test]
    async fn unparseable_base_is_never_fetched() {
        let outcome = Crawler::new(test_config())
            .unwrap()
            .crawl("not a url", &CancellationToken::new())
            .await;

        assert!(!outcome.base_reachable);
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.fetch_attempts, 0);
        assert!(outcome.pages[0].error.is_some());
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("secret"))
            .expect(0)
            .mount(&server)
            .await;

        let config = CrawlConfig {
            allow_private_hosts: false,
            ..test_config()
        };
        let outcome = Crawler::new(config)
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert!(!outcome.base_reachable);
        assert_eq!(outcome.fetch_attempts, 0);
    }

    #[tokio::test]
    async fn excluded_and_disallowed_links_are_not_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /intern/\n"),
            )
            .mount(&server)
            .await;
        mount_page(
            &server,
            "/",
            r#"<a href="/intern/budget">Budget</a>
               <a href="/files/report.pdf">PDF</a>
               <a href="/wp-admin/">Admin</a>
               <a href="/transparenz">Transparenz</a>"#,
        )
        .await;
        mount_page(&server, "/transparenz", "<p>jahresbericht</p>").await;
        for p in ["/intern/budget", "/files/report.pdf", "/wp-admin/"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(html("nope"))
                .expect(0)
                .mount(&server)
                .await;
        }

        let config = CrawlConfig {
            respect_robots_txt: true,
            ..test_config()
        };
        let outcome = Crawler::new(config)
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert_eq!(paths(&outcome), vec!["/", "/transparenz"]);
        assert_eq!(outcome.robots_blocked.len(), 1);
        assert_eq!(outcome.fetch_attempts, 2);
        assert_eq!(outcome.robots_requests, 1);
        assert_eq!(outcome.requests_sent(), 3);
    }

    #[tokio::test]
    async fn disallowed_base_sends_only_the_robots_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html("hidden"))
            .expect(0)
            .mount(&server)
            .await;

        let config = CrawlConfig {
            respect_robots_txt: true,
            ..test_config()
        };
        let outcome = Crawler::new(config)
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert!(!outcome.base_reachable);
        assert_eq!(outcome.fetch_attempts, 0);
        assert_eq!(outcome.requests_sent(), 1);
        assert_eq!(outcome.pages[0].error.as_deref(), Some("disallowed by robots.txt"));
    }

    #[tokio::test]
    async fn unsupported_content_is_parse_error() {
        let server = MockServer::start().await;
        mount_page(&server, "/", r#"<a href="/data">Data</a>"#).await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(vec![0u8, 1, 2, 3], "application/octet-stream"),
            )
            .mount(&server)
            .await;

        let outcome = Crawler::new(test_config())
            .unwrap()
            .crawl(&server.uri(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.pages.len(), 2);
        assert_eq!(outcome.pages[1].status, FetchStatus::ParseError);
        assert_eq!(outcome.pages[1].attempts, 1);
        assert_eq!(outcome.successful_pages(), 1);
    }

    #[tokio::test]
    async fn cancelled_crawl_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("hello"))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = Crawler::new(test_config())
            .unwrap()
            .crawl(&server.uri(), &cancel)
            .await;

        assert!(outcome.cancelled);
        assert!(!outcome.base_reachable);
    }
}
