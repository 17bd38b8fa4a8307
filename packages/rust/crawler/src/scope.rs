//! URL scope rules: same-domain checks, exclusions, SSRF protection,
//! normalization for deduplication, and relevance scoring.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Path terms that make a page likely to carry openness evidence.
/// English and German; each hit adds one point.
const RELEVANCE_TERMS: &[&str] = &[
    "about",
    "transparency",
    "imprint",
    "report",
    "governance",
    "policy",
    "policies",
    "publication",
    "open-data",
    "opendata",
    "open-access",
    "annual",
    "finance",
    "mission",
    "organisation",
    "organization",
    "team",
    "contact",
    "impressum",
    "ueber-uns",
    "uber-uns",
    "über-uns",
    "transparenz",
    "jahresbericht",
    "bericht",
    "leitbild",
    "satzung",
    "finanzen",
    "kontakt",
    "veroeffentlichung",
];

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which URLs belong to the organization being crawled.
#[derive(Debug, Clone)]
pub(crate) struct CrawlScope {
    host: String,
    port: Option<u16>,
    allow_private_hosts: bool,
}

/// Why a discovered link is not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkVerdict {
    Follow,
    External,
    Excluded,
    Blocked,
}

impl CrawlScope {
    pub(crate) fn new(base: &Url, allow_private_hosts: bool) -> Self {
        Self {
            host: site_host(base),
            port: base.port_or_known_default(),
            allow_private_hosts,
        }
    }

    /// Same host (ignoring a leading `www.`) and same effective port.
    pub(crate) fn same_site(&self, url: &Url) -> bool {
        site_host(url) == self.host && url.port_or_known_default() == self.port
    }

    pub(crate) fn classify(&self, url: &Url) -> LinkVerdict {
        if !matches!(url.scheme(), "http" | "https") {
            return LinkVerdict::Excluded;
        }
        if !self.same_site(url) {
            return LinkVerdict::External;
        }
        if is_excluded_url(url) {
            return LinkVerdict::Excluded;
        }
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return LinkVerdict::Blocked;
        }
        LinkVerdict::Follow
    }
}

/// Lowercased host without a leading `www.`.
fn site_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

/// Documents, media, feeds and account pages never carry page text worth matching.
pub(crate) fn is_excluded_url(url: &Url) -> bool {
    static EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            concat!(
                r"(?i)\.(pdf|docx?|xlsx?|pptx?|odt|ods|zip|rar|tar|gz|7z",
                r"|jpe?g|png|gif|svg|webp|ico|bmp",
                r"|mp3|mp4|avi|mov|wmv|webm|css|js|xml|rss|json)$",
            ),
        )
        .expect("valid regex")
    });
    static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)(^|/)(login|logout|admin|wp-admin|wp-login\.php|user|feed|rss)(/|$)")
            .expect("valid regex")
    });

    let path = url.path();
    EXTENSION_RE.is_match(path) || SEGMENT_RE.is_match(path)
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub(crate) fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization and ranking
// ---------------------------------------------------------------------------

/// Dedup key: no scheme, no fragment, lowercase host, no trailing slash.
pub fn normalize_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let mut key = match url.port() {
        Some(port) => format!("{host}:{port}{}", url.path()),
        None => format!("{host}{}", url.path()),
    };
    while key.ends_with('/') {
        key.pop();
    }
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

/// Number of relevance terms in the URL path.
pub fn relevance_score(url: &Url) -> u32 {
    let path = url.path().to_lowercase();
    let decoded = path.replace("%c3%bc", "ü");
    RELEVANCE_TERMS
        .iter()
        .filter(|term| decoded.contains(*term))
        .count() as u32
}
