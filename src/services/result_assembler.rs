//! Normalizes raw provider text into an [`AnalysisResult`].
//!
//! Providers are asked for JSON, but the assembler also accepts JSON inside
//! a fenced code block and plain Markdown with insight and recommendation
//! headings. A narrative and at least one insight are required.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::AssemblyError;
use crate::domain::models::{AnalysisResult, AnalysisTask, CommitStats, ResultMetadata};
use crate::services::metrics::compute_metrics;

const NARRATIVE_KEYS: &[&str] = &["analysis", "narrative", "summary"];
const INSIGHT_KEYS: &[&str] = &["key_insights", "insights"];
const RECOMMENDATION_KEYS: &[&str] = &["recommendations"];

/// Narrative, insights and recommendations extracted from provider text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub narrative: String,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// The winning provider call plus totals for the whole chain.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Build the stored result for a task.
pub fn assemble(
    task: &AnalysisTask,
    output: &ProviderOutput,
    stats: &CommitStats,
) -> Result<AnalysisResult, AssemblyError> {
    let parsed = parse_output(&output.text)?;

    Ok(AnalysisResult {
        id: Uuid::new_v4(),
        task_id: task.id,
        narrative: parsed.narrative,
        key_insights: parsed.key_insights,
        recommendations: parsed.recommendations,
        metrics: compute_metrics(stats),
        metadata: ResultMetadata {
            tokens_used: output.tokens_used,
            duration_ms: output.duration_ms,
            commits_analyzed: stats.total_commits,
            total_additions: stats.total_additions,
            total_deletions: stats.total_deletions,
            total_files_changed: stats.total_files_changed,
            developer_stats: stats.developers.clone(),
            commit_patterns: stats.patterns.clone(),
        },
        provider: output.provider.clone(),
        model: output.model.clone(),
        cost_usd: output.cost_usd,
        raw_output: output.text.clone(),
        created_at: Utc::now(),
    })
}

/// Extract the structured parts of a provider reply.
pub fn parse_output(text: &str) -> Result<ParsedOutput, AssemblyError> {
    let parsed = parse_json(text).unwrap_or_else(|| parse_markdown(text));

    if parsed.narrative.trim().is_empty() {
        return Err(AssemblyError::MalformedProviderOutput("missing analysis narrative".to_string()));
    }
    if parsed.key_insights.is_empty() {
        return Err(AssemblyError::MalformedProviderOutput("no key insights present".to_string()));
    }
    Ok(parsed)
}

fn parse_json(text: &str) -> Option<ParsedOutput> {
    let body = fenced_block(text).unwrap_or(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&body[start..=end]).ok()?;
    let obj = value.as_object()?;

    let narrative = NARRATIVE_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(ParsedOutput {
        narrative,
        key_insights: string_list(obj, INSIGHT_KEYS),
        recommendations: string_list(obj, RECOMMENDATION_KEYS),
    })
}

fn string_list(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Vec<String> {
    let Some(value) = keys.iter().find_map(|k| obj.get(*k)) else {
        return Vec::new();
    };
    let items: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    };
    items.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Contents of the first ``` fenced block, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Narrative,
    Insights,
    Recommendations,
    Other,
}

fn heading_section(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    let is_heading = trimmed.starts_with('#')
        || (trimmed.starts_with("**") && trimmed.ends_with("**") && trimmed.len() > 4)
        || (trimmed.ends_with(':') && !is_bullet(trimmed) && trimmed.split_whitespace().count() <= 4);
    if !is_heading {
        return None;
    }
    let title = trimmed.trim_matches(|c: char| c == '#' || c == '*' || c == ':' || c.is_whitespace()).to_lowercase();
    if title.contains("insight") || title.contains("finding") {
        Some(Section::Insights)
    } else if title.contains("recommendation") {
        Some(Section::Recommendations)
    } else if title.contains("summary") || title.contains("analysis") || title.contains("overview") {
        Some(Section::Narrative)
    } else {
        Some(Section::Other)
    }
}

fn is_bullet(line: &str) -> bool {
    bullet_text(line).is_some()
}

fn bullet_text(line: &str) -> Option<&str> {
    let t = line.trim_start();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = t.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &t[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

fn parse_markdown(text: &str) -> ParsedOutput {
    let mut section = Section::Narrative;
    let mut narrative: Vec<&str> = Vec::new();
    let mut out = ParsedOutput::default();

    for line in text.lines() {
        if let Some(next) = heading_section(line) {
            section = next;
            continue;
        }
        match section {
            Section::Narrative => {
                let t = line.trim();
                if !t.is_empty() {
                    narrative.push(t);
                }
            }
            Section::Insights => {
                if let Some(item) = bullet_text(line).filter(|s| !s.is_empty()) {
                    out.key_insights.push(item.to_string());
                }
            }
            Section::Recommendations => {
                if let Some(item) = bullet_text(line).filter(|s| !s.is_empty()) {
                    out.recommendations.push(item.to_string());
                }
            }
            Section::Other => {}
        }
    }

    out.narrative = narrative.join("\n");
    out
}
