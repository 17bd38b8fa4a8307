//! External evaluator: the LLM that judges a criterion from ranked evidence.
//!
//! [`Evaluator`] is the seam the adjudicator calls through. [`OpenAiEvaluator`]
//! speaks the OpenAI-compatible chat completions API.

use std::fmt::Write as _;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use openness_shared::{
    CriterionType, EvidenceCandidate, LlmConfig, OpennessError, Result, USER_AGENT,
};

/// Excerpts longer than this are cut before prompting (chars).
const MAX_EXCERPT_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "You assess how openly organizations operate, based on evidence \
    found on their public websites. Judge strictly from the evidence given. \
    Always answer with a single JSON object.";

// ---------------------------------------------------------------------------
// Evaluator seam
// ---------------------------------------------------------------------------

/// Everything the evaluator needs to judge one (organization, criterion) pair.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    pub organization: String,
    pub base_url: String,
    pub criterion_id: String,
    pub criterion_name: String,
    pub criterion_description: String,
    pub criterion_type: CriterionType,
    /// Ranked evidence. Empty means the evaluator judges absence.
    pub evidence: Vec<EvidenceCandidate>,
}

/// The evaluator's answer, before clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub fulfilled: bool,
    pub confidence: f64,
    pub justification: String,
    pub source_url: Option<String>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Short name for logs (model name for LLM evaluators).
    fn name(&self) -> &str;

    /// Judge one criterion. Failures must be `OpennessError::Evaluation`
    /// with `transient` set when a retry can help.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// Calls `POST {base_url}/chat/completions` with a JSON-object response format.
#[derive(Debug, Clone)]
pub struct OpenAiEvaluator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiEvaluator {
    /// Build a client for the configured endpoint. The base URL env override
    /// is resolved here, once.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| OpennessError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.resolved_base_url()),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Evaluator for OpenAiEvaluator {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(criterion = %request.criterion_id, model = %self.model))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict> {
        let prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let reply: ChatResponse = response.json().await.map_err(|e| {
            OpennessError::evaluation_permanent(format!("malformed completion response: {e}"))
        })?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OpennessError::evaluation_permanent("completion has no content"))?;

        debug!(chars = content.len(), "evaluator replied");
        parse_verdict(&content)
    }
}

/// 429 and 5xx are transient. Other statuses will not improve on retry.
fn classify_status(status: StatusCode, detail: &str) -> OpennessError {
    let detail: String = detail.chars().take(200).collect();
    let message = format!("evaluator returned HTTP {status}: {detail}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        OpennessError::evaluation_transient(message)
    } else {
        OpennessError::evaluation_permanent(message)
    }
}

fn classify_transport_error(err: reqwest::Error) -> OpennessError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        OpennessError::evaluation_transient(format!("evaluator request failed: {err}"))
    } else {
        OpennessError::evaluation_permanent(format!("evaluator request failed: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Prompt and reply handling
// ---------------------------------------------------------------------------

/// User prompt for one criterion.
pub fn build_prompt(request: &EvaluationRequest) -> String {
    let mut prompt = format!(
        "Organization: {}\nWebsite: {}\n\nCriterion ({}): {}\nDescription: {}\n\n",
        request.organization,
        request.base_url,
        request.criterion_type,
        request.criterion_name,
        request.criterion_description,
    );

    if request.evidence.is_empty() {
        prompt.push_str(
            "No page on the crawled website matched any pattern of this criterion.\n\
             Judge whether the criterion is fulfilled given this absence of evidence.\n",
        );
    } else {
        prompt.push_str("Evidence found on the website:\n");
        for (i, candidate) in request.evidence.iter().enumerate() {
            let excerpt: String = candidate.excerpt.chars().take(MAX_EXCERPT_CHARS).collect();
            // Writing into a String cannot fail.
            let _ = writeln!(
                prompt,
                "[{}] {} (matched \"{}\")\n\"{}\"",
                i + 1,
                candidate.source_url,
                candidate.pattern,
                excerpt
            );
        }
    }

    prompt.push_str(
        "\nAnswer with a JSON object: {\"fulfilled\": true|false, \"confidence\": 0.0-1.0, \
         \"justification\": \"one or two sentences\", \
         \"source_url\": \"URL of the strongest evidence or null\"}",
    );
    prompt
}

/// Parse an evaluator reply, tolerating a Markdown code fence around the JSON.
pub fn parse_verdict(content: &str) -> Result<Verdict> {
    let json = strip_code_fence(content);
    let value: Value = serde_json::from_str(json).map_err(|e| {
        OpennessError::evaluation_permanent(format!("evaluator reply is not JSON: {e}"))
    })?;

    let fulfilled = match value.get("fulfilled") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => {
            return Err(OpennessError::evaluation_permanent(
                "evaluator reply has no boolean 'fulfilled'",
            ));
        }
    };
    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    let justification = value
        .get("justification")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let source_url = value
        .get("source_url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string);

    Ok(Verdict {
        fulfilled,
        confidence,
        justification,
        source_url,
    })
}

fn strip_code_fence(content: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("valid regex")
    });

    match FENCE_RE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    }
}
