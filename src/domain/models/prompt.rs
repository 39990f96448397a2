//! Prompt templates for commit analysis.
//!
//! Templates use `{placeholder}` substitution. Only the placeholders in
//! [`PLACEHOLDERS`] are recognised; anything else is rejected when a custom
//! template is submitted.

use serde::{Deserialize, Serialize};

use super::task::AnalysisType;

/// Placeholders a user-prompt template may reference.
pub const PLACEHOLDERS: &[&str] = &[
    "repository_name",
    "developer_name",
    "date_range",
    "total_commits",
    "total_additions",
    "total_deletions",
    "file_changes",
    "commit_data",
];

const JSON_CONTRACT: &str = "Respond with a single JSON object of the form \
{\"analysis\": string, \"key_insights\": [string], \"recommendations\": [string]}. \
Do not include any text outside the JSON object.";

/// Values substituted into a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    pub repository_name: String,
    pub developer_name: String,
    pub date_range: String,
    pub total_commits: u64,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub file_changes: u64,
    /// Pretty-printed JSON of the most recent commits.
    pub commit_data: String,
}

impl PromptContext {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "repository_name" => Some(self.repository_name.clone()),
            "developer_name" => Some(self.developer_name.clone()),
            "date_range" => Some(self.date_range.clone()),
            "total_commits" => Some(self.total_commits.to_string()),
            "total_additions" => Some(self.total_additions.to_string()),
            "total_deletions" => Some(self.total_deletions.to_string()),
            "file_changes" => Some(self.file_changes.to_string()),
            "commit_data" => Some(self.commit_data.clone()),
            _ => None,
        }
    }
}

/// System and user prompt sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Names of every `{placeholder}` in a template, in order of appearance.
/// `{{` and `}}` are literal braces.
pub fn placeholders_in(template: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
            }
            '{' => {
                let mut name = String::new();
                for n in chars.by_ref() {
                    if n == '}' {
                        break;
                    }
                    name.push(n);
                }
                found.push(name);
            }
            _ => {}
        }
    }
    found
}

/// Reject templates that reference unknown placeholders or are empty.
pub fn validate_template(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("prompt template cannot be empty".to_string());
    }
    for name in placeholders_in(template) {
        if !PLACEHOLDERS.contains(&name.as_str()) {
            return Err(format!("unknown prompt placeholder '{{{}}}'", name));
        }
    }
    Ok(())
}

/// Substitute placeholders. Unknown names are left untouched.
pub fn render_template(template: &str, ctx: &PromptContext) -> String {
    let mut out = String::with_capacity(template.len() + ctx.commit_data.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                match ctx.lookup(&name) {
                    Some(value) if closed => out.push_str(&value),
                    _ => {
                        out.push('{');
                        out.push_str(&name);
                        if closed {
                            out.push('}');
                        }
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Built-in system prompt for an analysis type.
pub fn system_prompt(analysis_type: AnalysisType) -> String {
    let persona = match analysis_type {
        AnalysisType::Performance => {
            "You are an expert software development analyst. Analyze the provided commit data \
             and provide insights about developer performance, productivity and work patterns."
        }
        AnalysisType::Quality => {
            "You are a senior code reviewer and software architect. Focus on code quality, \
             maintainability and development best practices when analyzing commit data."
        }
        AnalysisType::Security => {
            "You are a cybersecurity expert specializing in secure coding practices. Analyze \
             commit data for potential security implications and best practices."
        }
        AnalysisType::Comprehensive => {
            "You are a principal engineer reviewing a repository's development history. Give a \
             balanced assessment of productivity, code quality, collaboration and risk."
        }
    };
    format!("{}\n\n{}", persona, JSON_CONTRACT)
}

/// Built-in user prompt template for an analysis type.
pub fn default_user_template(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::Performance => {
            "Analyze the performance of {developer_name} in the {repository_name} repository over {date_range}.

Commit Statistics:
- Total commits: {total_commits}
- Total additions: {total_additions}
- Total deletions: {total_deletions}
- Files changed: {file_changes}

Commit Data:
{commit_data}

Cover commit frequency and patterns, contribution volume, work consistency and areas for improvement."
        }
        AnalysisType::Quality => {
            "Evaluate the code quality for {developer_name} in {repository_name} over {date_range}.

Statistics:
- Commits: {total_commits}
- Lines added: {total_additions}
- Lines deleted: {total_deletions}
- Files modified: {file_changes}

Recent Commits:
{commit_data}

Assess refactoring versus feature work, commit message clarity and technical debt indicators."
        }
        AnalysisType::Security => {
            "Security analysis for {developer_name} in {repository_name} over {date_range}.

Development Metrics:
- Commits analyzed: {total_commits}
- Lines added: {total_additions}
- Lines removed: {total_deletions}
- Files modified: {file_changes}

Commit Details:
{commit_data}

Identify security-relevant changes, risky patterns and missing safeguards."
        }
        AnalysisType::Comprehensive => {
            "Provide a comprehensive review of {developer_name} in {repository_name} over {date_range}.

Summary:
- Total commits: {total_commits}
- Total additions: {total_additions}
- Total deletions: {total_deletions}
- Files changed: {file_changes}

Commit Data:
{commit_data}

Cover productivity, code quality, collaboration and security, with specific recommendations."
        }
    }
}

/// Build the prompt for a task, using a custom user template when given.
pub fn build_prompt(
    analysis_type: AnalysisType,
    custom_template: Option<&str>,
    ctx: &PromptContext,
) -> Prompt {
    let template = custom_template.unwrap_or_else(|| default_user_template(analysis_type));
    Prompt { system: system_prompt(analysis_type), user: render_template(template, ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext {
        PromptContext {
            repository_name: "octo/widgets".to_string(),
            developer_name: "All developers".to_string(),
            date_range: "2024-01-01 to 2024-01-31".to_string(),
            total_commits: 12,
            total_additions: 340,
            total_deletions: 120,
            file_changes: 18,
            commit_data: "[]".to_string(),
        }
    }

    #[test]
    fn test_builtin_templates_only_use_known_placeholders() {
        for ty in AnalysisType::ALL {
            assert!(validate_template(default_user_template(ty)).is_ok());
        }
    }

    #[test]
    fn test_render_substitutes_all_fields() {
        let out = render_template("{repository_name}: {total_commits} commits, {{literal}}", &ctx());
        assert_eq!(out, "octo/widgets: 12 commits, {literal}");
    }

    #[test]
    fn test_unknown_placeholder_left_in_place() {
        let out = render_template("hello {nobody}", &ctx());
        assert_eq!(out, "hello {nobody}");
        assert!(validate_template("hello {nobody}").is_err());
    }

    #[test]
    fn test_system_prompt_requests_json() {
        let p = build_prompt(AnalysisType::Security, None, &ctx());
        assert!(p.system.contains("key_insights"));
        assert!(p.user.contains("octo/widgets"));
    }
}
