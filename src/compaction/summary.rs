//! Lossy, bounded summarization of a session's artifacts.
//!
//! Decisions and touched files are pulled out of the raw text with fixed patterns before
//! the generator is asked for anything, so they survive a generator that is missing,
//! times out, or answers with nothing. The condensed text is always flagged as an
//! approximation.

use super::generator::TextGenerator;
use super::tokens::TokenCounter;
use crate::store::SessionArtifacts;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default size bound for the condensed text, in tokens.
pub const DEFAULT_TARGET_TOKENS: usize = 500;

/// First line of every summary.
pub const APPROXIMATION_BANNER: &str =
    "> APPROXIMATE SUMMARY: lossy condensation; removed detail is not recoverable from this text.";

static DECISION_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^\s*(?:#+\s*(?:Decision|ADR[- ]?\d*)\b.*|(?:[-*]\s+)?\*\*Decision\*\*:.*|(?:[-*]\s+)?Decision:.*|.*\bADR-\d+\b.*)$",
    )
    .ok()
});

static BACKTICK_PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"`([A-Za-z0-9_./-]+\.[A-Za-z0-9]{1,8})`").ok());

static BARE_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s(\[])((?:\.{0,2}/)?(?:[A-Za-z0-9_.-]+/)+[A-Za-z0-9_.-]+\.[A-Za-z0-9]{1,8})\b",
    )
    .ok()
});

/// Result of one summarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub text: String,
    pub preserved_decisions: Vec<String>,
    pub preserved_files: Vec<String>,
    /// Always true.
    pub lossy: bool,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// False when the deterministic placeholder was used instead of generated text.
    pub generated: bool,
}

/// Produces [`SummaryResult`]s for sessions.
pub struct Summarizer {
    counter: TokenCounter,
    generator: Option<Arc<dyn TextGenerator>>,
    target_tokens: usize,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(counter: TokenCounter, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            counter,
            generator,
            target_tokens: DEFAULT_TARGET_TOKENS,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_target_tokens(mut self, target_tokens: usize) -> Self {
        self.target_tokens = target_tokens.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target_tokens(&self) -> usize {
        self.target_tokens
    }

    pub async fn summarize(&mut self, session: &SessionArtifacts) -> SummaryResult {
        let combined = session.combined_text();
        let preserved_decisions = extract_decisions(&combined);
        let preserved_files = extract_touched_files(&combined);

        let tokens_before = self.counter.measure_artifacts(session).await;

        if tokens_before == 0 {
            return SummaryResult {
                text: String::new(),
                preserved_decisions,
                preserved_files,
                lossy: true,
                tokens_before: 0,
                tokens_after: 0,
                generated: false,
            };
        }

        let (body, generated) = match self.generate(session, &combined).await {
            Some(text) => (text, true),
            None => (
                placeholder(&session.scope, &preserved_decisions, &preserved_files),
                false,
            ),
        };

        let mut text = self.fit_to_target(&body).await;
        let mut tokens_after = self.counter.measure(&text).await.count;

        // The summary must be strictly smaller than what it replaces.
        while tokens_after >= tokens_before && !text.is_empty() {
            let keep = text.chars().count() / 2;
            text = text.chars().take(keep).collect();
            tokens_after = self.counter.measure(&text).await.count;
        }

        info!(
            scope = %session.scope,
            tokens_before,
            tokens_after,
            generated,
            decisions = preserved_decisions.len(),
            files = preserved_files.len(),
            "session summarized"
        );

        SummaryResult {
            text,
            preserved_decisions,
            preserved_files,
            lossy: true,
            tokens_before,
            tokens_after,
            generated,
        }
    }

    async fn generate(&self, session: &SessionArtifacts, combined: &str) -> Option<String> {
        let generator = self.generator.as_ref()?;
        let prompt = build_prompt(&session.scope, combined, self.target_tokens);

        match tokio::time::timeout(self.timeout, generator.generate(&prompt)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(Ok(_)) => {
                warn!(scope = %session.scope, "generator returned no text, using placeholder");
                None
            }
            Ok(Err(e)) => {
                warn!(scope = %session.scope, error = %e, "generator failed, using placeholder");
                None
            }
            Err(_) => {
                warn!(
                    scope = %session.scope,
                    timeout_secs = self.timeout.as_secs(),
                    "generator timed out, using placeholder"
                );
                None
            }
        }
    }

    /// Banner plus `body`, with the body cut down until the whole fits the target.
    async fn fit_to_target(&mut self, body: &str) -> String {
        let mut body = body.to_string();
        loop {
            let text = format!("{}\n\n{}", APPROXIMATION_BANNER, body);
            let count = self.counter.measure(&text).await.count;
            if count <= self.target_tokens || body.is_empty() {
                return text;
            }
            let keep = body.chars().count() * 3 / 4;
            debug!(count, target = self.target_tokens, keep, "trimming summary body");
            body = body.chars().take(keep).collect();
        }
    }
}

fn build_prompt(scope: &str, combined: &str, target_tokens: usize) -> String {
    format!(
        "You are condensing the working documents of the development session '{scope}' so \
         that a later session can continue with minimal context.\n\n\
         Write a summary of at most {target_tokens} tokens. Keep:\n\
         - what the session is trying to achieve\n\
         - decisions made and their rationale\n\
         - files touched and why\n\
         - unresolved problems and the next concrete step\n\n\
         Drop tool output, repeated content and exploration that led nowhere. Reply with the \
         summary only, as markdown, with no preamble.\n\n\
         <documents>\n{combined}</documents>\n"
    )
}

fn placeholder(scope: &str, decisions: &[String], files: &[String]) -> String {
    let mut text = format!(
        "Summary text unavailable for '{}'; structured facts only.\n",
        scope
    );
    if !decisions.is_empty() {
        text.push_str("\n### Decisions\n\n");
        for d in decisions {
            text.push_str(&format!("- {}\n", d));
        }
    }
    if !files.is_empty() {
        text.push_str("\n### Files Touched\n\n");
        for f in files {
            text.push_str(&format!("- {}\n", f));
        }
    }
    text
}

/// Decision and ADR lines, trimmed, in first-seen order.
pub fn extract_decisions(text: &str) -> Vec<String> {
    let Some(re) = DECISION_LINE.as_ref() else {
        return Vec::new();
    };
    let mut found: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let line = m.as_str().trim().to_string();
        if !line.is_empty() && !found.contains(&line) {
            found.push(line);
        }
    }
    found
}

/// Relative file paths mentioned in the text, backticked or bare, in first-seen order.
///
/// Bare paths need at least one directory component so prose like "e.g." is ignored.
pub fn extract_touched_files(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        let path = path.trim_start_matches("./").to_string();
        if !path.contains("://") && !found.contains(&path) {
            found.push(path);
        }
    };

    for line in text.lines() {
        // URLs are not files.
        let line = strip_urls(line);
        if let Some(re) = BACKTICK_PATH.as_ref() {
            for cap in re.captures_iter(&line) {
                if let Some(m) = cap.get(1) {
                    push(m.as_str());
                }
            }
        }
        if let Some(re) = BARE_PATH.as_ref() {
            for cap in re.captures_iter(&line) {
                if let Some(m) = cap.get(1) {
                    push(m.as_str());
                }
            }
        }
    }
    found
}

fn strip_urls(line: &str) -> String {
    line.split_whitespace()
        .filter(|w| !w.contains("://"))
        .collect::<Vec<_>>()
        .join(" ")
}
