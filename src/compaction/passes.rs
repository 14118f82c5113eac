//! Reduction passes over a single artifact's text.
//!
//! Passes run in a fixed order (transient output, exact duplicates, verbose blocks,
//! stale sections) and finish with the preservation check. Every pass is pure: it
//! takes text and returns the transformed text plus one [`Reduction`] per change.
//! Token sizing happens later, in the engine.

use super::rules::RuleSet;
use serde::{Deserialize, Serialize};

/// Category of a reduction, in pass order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReductionKind {
    TransientToolOutput,
    ExactDuplicate,
    VerboseBlock,
    StaleContent,
}

impl std::fmt::Display for ReductionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReductionKind::TransientToolOutput => write!(f, "transient-tool-output"),
            ReductionKind::ExactDuplicate => write!(f, "exact-duplicate"),
            ReductionKind::VerboseBlock => write!(f, "verbose-block"),
            ReductionKind::StaleContent => write!(f, "stale-content"),
        }
    }
}

/// One change made by a pass: the text it replaced and what replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub kind: ReductionKind,
    /// 1-based line in the original artifact text where the replaced span starts.
    pub line: usize,
    pub before: String,
    pub after: String,
}

/// Transformed text of one artifact plus what changed.
#[derive(Debug, Clone, Default)]
pub struct PassOutput {
    pub text: String,
    pub reductions: Vec<Reduction>,
    /// Preserve matches that had to be re-appended by the preservation pass.
    pub restored: Vec<String>,
}

/// Run every pass in order over `original`.
pub fn run_passes(original: &str, rules: &RuleSet) -> PassOutput {
    let mut reductions = Vec::new();

    let text = remove_transient(original, rules, &mut reductions);
    let text = collapse_duplicates(&text, rules, &mut reductions);
    let text = trim_verbose_blocks(&text, rules, &mut reductions);
    let text = remove_stale_sections(&text, rules, &mut reductions);
    let (text, restored) = ensure_preserved(original, text, rules);

    for r in &mut reductions {
        if let Some(pos) = original.find(&r.before) {
            r.line = original[..pos].matches('\n').count() + 1;
        }
    }

    PassOutput {
        text,
        reductions,
        restored,
    }
}

struct Lines<'a> {
    lines: Vec<&'a str>,
    trailing_newline: bool,
}

impl<'a> Lines<'a> {
    fn split(text: &'a str) -> Self {
        let trailing_newline = text.ends_with('\n');
        let body = if trailing_newline {
            &text[..text.len() - 1]
        } else {
            text
        };
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n').collect()
        };
        Self {
            lines,
            trailing_newline,
        }
    }
}

fn join(lines: &[&str], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    out
}

fn join_block(lines: &[&str]) -> String {
    lines.join("\n")
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Closing tag for markers of the form `<tag>`, if the line opens one.
fn closing_tag(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix('<')?;
    let end = rest.find('>')?;
    let tag = &rest[..end];
    if tag.is_empty() || tag.starts_with('/') || tag.contains(' ') {
        return None;
    }
    Some(format!("</{}>", tag))
}

/// Pass a: drop blocks of ephemeral tool output. A block starts at a transient marker
/// and runs to the next blank line, or to the matching close tag for `<tag>` markers.
/// Preserved lines inside a block are kept.
fn remove_transient(text: &str, rules: &RuleSet, out: &mut Vec<Reduction>) -> String {
    let split = Lines::split(text);
    let lines = &split.lines;
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if !rules.is_transient_start(lines[i]) {
            kept.push(lines[i]);
            i += 1;
            continue;
        }

        let end = match closing_tag(lines[i]) {
            Some(close) => lines[i..]
                .iter()
                .position(|l| l.contains(&close))
                .map(|p| i + p + 1)
                .unwrap_or(lines.len()),
            None => lines[i..]
                .iter()
                .position(|l| is_blank(l))
                .map(|p| i + p)
                .unwrap_or(lines.len()),
        };

        let block = &lines[i..end];
        let retained: Vec<&str> = block
            .iter()
            .copied()
            .filter(|l| rules.is_preserved(l))
            .collect();

        if retained.len() < block.len() {
            out.push(Reduction {
                kind: ReductionKind::TransientToolOutput,
                line: i + 1,
                before: join_block(block),
                after: join_block(&retained),
            });
        }
        kept.extend(retained);
        i = end;
    }

    join(&kept, split.trailing_newline)
}

/// Pass b: collapse runs of `min_duplicate_run` or more consecutive identical lines or
/// multi-line blocks into one copy. The block length covering the most lines wins; ties
/// go to the shorter block.
fn collapse_duplicates(text: &str, rules: &RuleSet, out: &mut Vec<Reduction>) -> String {
    let split = Lines::split(text);
    let lines = &split.lines;
    let n = lines.len();
    // The fields are public, so the clamp from `with_limits` is reapplied here.
    let min_run = rules.min_duplicate_run.max(2);
    let mut kept: Vec<&str> = Vec::with_capacity(n);
    let mut i = 0;

    while i < n {
        let mut best: Option<(usize, usize)> = None;
        let max_k = rules.max_duplicate_block_lines.min((n - i) / min_run);

        for k in 1..=max_k {
            // A repeat of a k-line block must start with the same line.
            if lines[i + k] != lines[i] {
                continue;
            }
            let block = &lines[i..i + k];
            if block.iter().all(|l| is_blank(l)) {
                continue;
            }
            let mut reps = 1;
            while i + (reps + 1) * k <= n && &lines[i + reps * k..i + (reps + 1) * k] == block {
                reps += 1;
            }
            if reps >= min_run && best.is_none_or(|(bk, br)| k * reps > bk * br) {
                best = Some((k, reps));
            }
        }

        match best {
            Some((k, reps)) => {
                let block = &lines[i..i + k];
                out.push(Reduction {
                    kind: ReductionKind::ExactDuplicate,
                    line: i + 1,
                    before: join_block(&lines[i..i + k * reps]),
                    after: join_block(block),
                });
                kept.extend_from_slice(block);
                i += k * reps;
            }
            None => {
                kept.push(lines[i]);
                i += 1;
            }
        }
    }

    join(&kept, split.trailing_newline)
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Pass c: trim fenced code blocks longer than `verbose_block_lines`, keeping the head
/// and tail around an elision marker. Disabled when the limit is 0.
fn trim_verbose_blocks(text: &str, rules: &RuleSet, out: &mut Vec<Reduction>) -> String {
    let limit = rules.verbose_block_lines;
    if limit == 0 {
        return text.to_string();
    }
    let limit = limit.max(4);
    let head = limit / 2;
    let tail = limit / 4;

    let split = Lines::split(text);
    let lines = &split.lines;
    let mut kept: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if !is_fence(lines[i]) {
            kept.push(lines[i].to_string());
            i += 1;
            continue;
        }

        let Some(close) = lines[i + 1..].iter().position(|l| is_fence(l)).map(|p| i + 1 + p)
        else {
            kept.extend(lines[i..].iter().map(|l| l.to_string()));
            break;
        };

        let body = &lines[i + 1..close];
        if body.len() <= limit {
            kept.extend(lines[i..=close].iter().map(|l| l.to_string()));
            i = close + 1;
            continue;
        }

        let elided = &body[head..body.len() - tail];
        let mut replacement: Vec<String> = Vec::new();
        replacement.push(format!("[... {} lines elided by compaction ...]", elided.len()));
        replacement.extend(
            elided
                .iter()
                .filter(|l| rules.is_preserved(l))
                .map(|l| l.to_string()),
        );

        out.push(Reduction {
            kind: ReductionKind::VerboseBlock,
            line: i + 2 + head,
            before: join_block(elided),
            after: replacement.join("\n"),
        });

        kept.push(lines[i].to_string());
        kept.extend(body[..head].iter().map(|l| l.to_string()));
        kept.extend(replacement);
        kept.extend(body[body.len() - tail..].iter().map(|l| l.to_string()));
        kept.push(lines[close].to_string());
        i = close + 1;
    }

    let refs: Vec<&str> = kept.iter().map(String::as_str).collect();
    join(&refs, split.trailing_newline)
}

/// Markdown heading depth, if the line is a heading.
fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match line[hashes..].chars().next() {
        Some(' ') | None => Some(hashes),
        _ => None,
    }
}

/// Pass d: remove sections under stale-marked headings, up to the next heading of the
/// same or higher level. Preserved lines are kept.
fn remove_stale_sections(text: &str, rules: &RuleSet, out: &mut Vec<Reduction>) -> String {
    if rules.stale.is_empty() {
        return text.to_string();
    }

    let split = Lines::split(text);
    let lines = &split.lines;
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let level = match heading_level(lines[i]) {
            Some(level) if rules.is_stale_heading(lines[i]) => level,
            _ => {
                kept.push(lines[i]);
                i += 1;
                continue;
            }
        };

        let end = lines[i + 1..]
            .iter()
            .position(|l| heading_level(l).is_some_and(|h| h <= level))
            .map(|p| i + 1 + p)
            .unwrap_or(lines.len());

        let section = &lines[i..end];
        let retained: Vec<&str> = section
            .iter()
            .copied()
            .filter(|l| rules.is_preserved(l))
            .collect();

        if retained.len() < section.len() {
            out.push(Reduction {
                kind: ReductionKind::StaleContent,
                line: i + 1,
                before: join_block(section),
                after: join_block(&retained),
            });
        }
        kept.extend(retained);
        i = end;
    }

    join(&kept, split.trailing_newline)
}

/// Pass e: every preserve match present in `original` must be present in `text`.
/// Missing matches are appended under a `## Preserved` heading; nothing is removed.
fn ensure_preserved(original: &str, mut text: String, rules: &RuleSet) -> (String, Vec<String>) {
    let missing: Vec<String> = rules
        .preserved_matches(original)
        .into_iter()
        .filter(|m| !text.contains(m.as_str()))
        .collect();

    if missing.is_empty() {
        return (text, missing);
    }

    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str("\n## Preserved\n");
    for m in &missing {
        text.push_str(m);
        text.push('\n');
    }
    (text, missing)
}
