//! Validated output types for refined backlog items.
//!
//! Model output arrives as loosely-typed JSON. It is deserialized into
//! [`RawRefinedItem`] first and only becomes a [`RefinedItem`] through
//! [`TryFrom`], which reports every violation it finds rather than stopping at
//! the first one. Those issues feed the corrective retry prompt.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

pub const MAX_ACCEPTANCE_CRITERIA: usize = 10;
pub const MAX_TAGS: usize = 10;
pub const MAX_ASSUMPTIONS: usize = 2;

lazy_static! {
    static ref PRIORITY_PATTERN: Regex = {
        #[expect(clippy::expect_used)]
        let pattern = Regex::new(r"^(HIGH|MEDIUM|LOW)\s*[—–-]\s*(?s:(.+))$")
            .expect("priority pattern must compile");
        pattern
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PriorityLevel {
    High,
    Medium,
    Low,
}

/// `LEVEL — rationale`, where the separator may be an em-dash, en-dash or
/// hyphen in the input. Always rendered with an em-dash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Priority {
    level: PriorityLevel,
    rationale: String,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = PRIORITY_PATTERN.captures(raw.trim())?;
        let level = captures.get(1)?.as_str().parse().ok()?;
        let rationale = captures.get(2)?.as_str().trim();
        if rationale.is_empty() {
            return None;
        }
        Some(Self {
            level,
            rationale: rationale.to_string(),
        })
    }

    pub fn level(&self) -> PriorityLevel {
        self.level
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {}", self.level, self.rationale)
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// T-shirt size estimate. Matching is exact-case.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum Estimate {
    #[serde(rename = "XS")]
    #[strum(serialize = "XS")]
    Xs,
    S,
    M,
    L,
    #[serde(rename = "XL")]
    #[strum(serialize = "XL")]
    Xl,
}

/// Model output for a single item before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRefinedItem {
    pub title: Value,
    pub problem: Value,
    pub acceptance_criteria: Value,
    pub estimate: Value,
    pub priority: Value,
    pub tags: Value,
    pub assumptions: Value,
    pub user_story: Value,
}

/// A refined backlog item. Only obtainable through validation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedItem {
    title: String,
    problem: String,
    acceptance_criteria: Vec<String>,
    estimate: Estimate,
    priority: Priority,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assumptions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_story: Option<String>,
}

impl RefinedItem {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    pub fn acceptance_criteria(&self) -> &[String] {
        &self.acceptance_criteria
    }

    pub fn estimate(&self) -> Estimate {
        self.estimate
    }

    pub fn priority(&self) -> &Priority {
        &self.priority
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn assumptions(&self) -> Option<&[String]> {
        self.assumptions.as_deref()
    }

    pub fn user_story(&self) -> Option<&str> {
        self.user_story.as_deref()
    }

    /// Drops a user story the caller did not ask for.
    pub fn without_user_story(mut self) -> Self {
        self.user_story = None;
        self
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(
    field: &str,
    value: &Value,
    min: usize,
    max: usize,
    issues: &mut Vec<String>,
) -> Option<Vec<String>> {
    let Some(entries) = value.as_array() else {
        issues.push(format!(
            "{field}: must be an array of {min}-{max} non-empty strings"
        ));
        return None;
    };
    if entries.len() < min || entries.len() > max {
        issues.push(format!(
            "{field}: must contain {min}-{max} entries, got {}",
            entries.len()
        ));
    }
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match non_empty_string(entry) {
            Some(s) => out.push(s),
            None => issues.push(format!("{field}[{i}]: must be a non-empty string")),
        }
    }
    Some(out)
}

impl TryFrom<RawRefinedItem> for RefinedItem {
    type Error = Vec<String>;

    fn try_from(raw: RawRefinedItem) -> Result<Self, Self::Error> {
        let mut issues = Vec::new();

        let title = non_empty_string(&raw.title);
        if title.is_none() {
            issues.push("title: must be a non-empty string".to_string());
        }
        let problem = non_empty_string(&raw.problem);
        if problem.is_none() {
            issues.push("problem: must be a non-empty string".to_string());
        }
        let acceptance_criteria = string_list(
            "acceptanceCriteria",
            &raw.acceptance_criteria,
            1,
            MAX_ACCEPTANCE_CRITERIA,
            &mut issues,
        );
        let estimate = raw.estimate.as_str().and_then(|s| s.parse::<Estimate>().ok());
        if estimate.is_none() {
            issues.push("estimate: must be one of XS, S, M, L, XL".to_string());
        }
        let priority = raw.priority.as_str().and_then(Priority::parse);
        if priority.is_none() {
            issues.push(
                "priority: must match \"LEVEL — rationale\" with LEVEL one of HIGH, MEDIUM, LOW"
                    .to_string(),
            );
        }
        let tags = string_list("tags", &raw.tags, 1, MAX_TAGS, &mut issues);

        let assumptions = match &raw.assumptions {
            Value::Null => None,
            Value::Array(entries) => {
                if entries.len() > MAX_ASSUMPTIONS {
                    issues.push(format!(
                        "assumptions: must contain at most {MAX_ASSUMPTIONS} entries, got {}",
                        entries.len()
                    ));
                }
                let mut out = Vec::with_capacity(entries.len());
                for (i, entry) in entries.iter().enumerate() {
                    match entry.as_str() {
                        Some(s) => out.push(s.to_string()),
                        None => issues.push(format!("assumptions[{i}]: must be a string")),
                    }
                }
                Some(out)
            }
            _ => {
                issues.push("assumptions: must be an array of strings".to_string());
                None
            }
        };

        let user_story = match &raw.user_story {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            _ => {
                issues.push("userStory: must be a string".to_string());
                None
            }
        };

        match (title, problem, acceptance_criteria, estimate, priority, tags) {
            (
                Some(title),
                Some(problem),
                Some(acceptance_criteria),
                Some(estimate),
                Some(priority),
                Some(tags),
            ) if issues.is_empty() => Ok(RefinedItem {
                title,
                problem,
                acceptance_criteria,
                estimate,
                priority,
                tags,
                assumptions,
                user_story,
            }),
            _ => Err(issues),
        }
    }
}

/// Validates a parsed model response against the item schema.
///
/// Issues are prefixed with the item index (`[2].priority: ...`). A response
/// whose length differs from `expected` is rejected as well, since each input
/// line must map to exactly one output item in order.
pub fn validate_items(value: &Value, expected: usize) -> Result<Vec<RefinedItem>, Vec<String>> {
    let Some(entries) = value.as_array() else {
        return Err(vec!["response must be a JSON array of items".to_string()]);
    };
    if entries.is_empty() {
        return Err(vec!["response must contain at least one item".to_string()]);
    }

    let mut issues = Vec::new();
    if entries.len() != expected {
        issues.push(format!("expected {expected} items, got {}", entries.len()));
    }

    let mut items = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        if !entry.is_object() {
            issues.push(format!("[{i}]: must be an object"));
            continue;
        }
        let raw: RawRefinedItem = match serde_json::from_value(entry.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                issues.push(format!("[{i}]: {e}"));
                continue;
            }
        };
        match RefinedItem::try_from(raw) {
            Ok(item) => items.push(item),
            Err(item_issues) => {
                issues.extend(item_issues.into_iter().map(|issue| format!("[{i}].{issue}")));
            }
        }
    }

    if issues.is_empty() {
        Ok(items)
    } else {
        Err(issues)
    }
}

/// Removes a surrounding Markdown code fence (```` ```json ```` or bare
/// ```` ``` ````), if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.strip_prefix("json").unwrap_or(rest),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}
