//! robots.txt parser.
//!
//! Supports the subset crawlers agree on:
//! - `User-agent:` groups (consecutive agent lines share one group)
//! - `Allow:` / `Disallow:` with `*` wildcards and a trailing `$` anchor
//! - `Crawl-delay:` in seconds
//!
//! The most specific rule (longest pattern) wins; on a tie `Allow` wins.

use std::time::Duration;

use regex::Regex;

/// Upper bound on a site's `Crawl-delay`.
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    /// Pattern length, used for longest-match precedence.
    specificity: usize,
    matcher: Regex,
}

/// Rules that apply to our user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// No restrictions (no robots.txt, or it could not be fetched).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `path` (path plus optional query) may be fetched.
    pub fn is_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };
        let mut best: Option<&Rule> = None;
        for rule in self.rules.iter().filter(|r| r.matcher.is_match(path)) {
            best = match best {
                Some(b) if b.specificity > rule.specificity => Some(b),
                Some(b) if b.specificity == rule.specificity && b.allow => Some(b),
                _ => Some(rule),
            };
        }
        best.is_none_or(|r| r.allow)
    }

    /// `Crawl-delay` for our agent, capped at [`MAX_CRAWL_DELAY`].
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay.map(|d| d.min(MAX_CRAWL_DELAY))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse robots.txt content and keep the groups that apply to `user_agent`.
///
/// Groups naming our product token take precedence over `*`.
pub fn parse_robots_txt(content: &str, user_agent: &str) -> RobotsRules {
    let token = user_agent
        .split('/')
        .next()
        .unwrap_or(user_agent)
        .trim()
        .to_ascii_lowercase();

    let mut groups: Vec<Group> = Vec::new();
    let mut current = Group::default();
    let mut in_agent_lines = false;

    for raw in content.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                if !in_agent_lines && !current.agents.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                current.agents.push(value.to_ascii_lowercase());
                in_agent_lines = true;
            }
            "allow" | "disallow" => {
                in_agent_lines = false;
                if current.agents.is_empty() || value.is_empty() {
                    // Empty Disallow means allow everything.
                    continue;
                }
                if let Some(matcher) = compile_pattern(value) {
                    current.rules.push(Rule {
                        allow: field == "allow",
                        specificity: value.len(),
                        matcher,
                    });
                }
            }
            "crawl-delay" => {
                in_agent_lines = false;
                if let Ok(secs) = value.parse::<f64>() {
                    if secs.is_finite() && secs >= 0.0 {
                        current.crawl_delay = Some(Duration::from_secs_f64(secs.min(3600.0)));
                    }
                }
            }
            _ => {
                in_agent_lines = false;
            }
        }
    }
    if !current.agents.is_empty() {
        groups.push(current);
    }

    let specific: Vec<Group> = groups
        .iter()
        .filter(|g| {
            g.agents
                .iter()
                .any(|a| a != "*" && !a.is_empty() && token.contains(a.as_str()))
        })
        .cloned()
        .collect();
    let selected = if specific.is_empty() {
        groups
            .into_iter()
            .filter(|g| g.agents.iter().any(|a| a == "*"))
            .collect()
    } else {
        specific
    };

    let mut rules = RobotsRules::default();
    for group in selected {
        rules.rules.extend(group.rules);
        if group.crawl_delay.is_some() {
            rules.crawl_delay = group.crawl_delay;
        }
    }
    rules
}

/// Translate a robots path pattern into an anchored regex.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(body) => (body, true),
        None => (pattern, false),
    };
    let mut re = String::from("^");
    for (i, part) in body.split('*').enumerate() {
        if i > 0 {
            re.push_str(".*");
        }
        re.push_str(&regex::escape(part));
    }
    if anchored {
        re.push('$');
    }
    Regex::new(&re).ok()
}
