//! robots.txt discovery for the crawl orchestrator.
//!
//! Before crawling an organization, the crawler fetches `<origin>/robots.txt`
//! once and keeps the rules that apply to our user agent. A missing or
//! unreachable robots.txt means no restrictions.

mod parser;

use openness_shared::{OpennessError, Result, USER_AGENT};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use parser::parse_robots_txt;
pub use parser::RobotsRules;

/// Bodies beyond this size are ignored (500 KiB).
const MAX_RESPONSE_SIZE: u64 = 500 * 1024;

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Fetch and parse robots.txt for the origin of `url` with the crawler's client.
///
/// Never fails on network or HTTP errors: those yield [`RobotsRules::allow_all`].
#[instrument(skip_all, fields(url = %url))]
pub async fn discover_robots(client: &Client, url: &Url) -> RobotsRules {
    let robots_url = match origin_url(url) {
        Ok(origin) => format!("{origin}/robots.txt"),
        Err(e) => {
            debug!(error = %e, "no origin for robots.txt");
            return RobotsRules::allow_all();
        }
    };

    match fetch_robots(client, &robots_url).await {
        Ok(body) => {
            let rules = parse_robots_txt(&body, USER_AGENT);
            info!(
                %robots_url,
                rules = rules.rule_count(),
                crawl_delay_ms = rules.crawl_delay().map(|d| d.as_millis() as u64),
                "robots.txt loaded"
            );
            rules
        }
        Err(e) => {
            debug!(%robots_url, error = %e, "robots.txt unavailable, no restrictions");
            RobotsRules::allow_all()
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| OpennessError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

async fn fetch_robots(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| OpennessError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(OpennessError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(OpennessError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    response
        .text()
        .await
        .map_err(|e| OpennessError::Network(format!("{url}: failed to read body: {e}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_origin_url_simple() {
        let url = Url::parse("https://www.example.org/foo/bar").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "https://www.example.org");
    }

    #[test]
    fn test_origin_url_with_port() {
        let url = Url::parse("http://localhost:3000/about").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_discover_with_mock_server() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/robots.txt"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /intern/\nCrawl-delay: 1\n"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/start/page", server.uri())).unwrap();
        let rules = discover_robots(&Client::new(), &url).await;

        assert!(!rules.is_allowed("/intern/budget"));
        assert!(rules.is_allowed("/about"));
        assert_eq!(rules.crawl_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_missing_robots_allows_everything() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/robots.txt"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let rules = discover_robots(&Client::new(), &url).await;

        assert_eq!(rules.rule_count(), 0);
        assert!(rules.is_allowed("/intern/budget"));
        assert!(rules.crawl_delay().is_none());
    }

    #[tokio::test]
    async fn test_server_error_allows_everything() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/robots.txt"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let rules = discover_robots(&Client::new(), &url).await;
        assert!(rules.is_allowed("/"));
    }
}
