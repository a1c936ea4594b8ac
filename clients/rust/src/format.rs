//! Markdown rendering of refined items for chat clients.

use crate::{RefineResponse, RefinedItem};

const ITEM_SEPARATOR: &str = "\n\n---\n\n";

pub fn estimate_label(estimate: &str) -> &str {
    match estimate {
        "XS" => "< 1 day",
        "S" => "1–2 days",
        "M" => "3–5 days",
        "L" => "1–2 weeks",
        "XL" => "2+ weeks",
        other => other,
    }
}

fn format_item(index: usize, item: &RefinedItem) -> String {
    let mut lines = vec![format!("## {}. {}", index + 1, item.title), String::new()];
    if let Some(story) = &item.user_story {
        lines.push(format!("**User Story:** {story}"));
        lines.push(String::new());
    }
    lines.push(format!("**Problem:** {}", item.problem));
    lines.push(String::new());
    lines.push(format!(
        "**Estimate:** {} ({})",
        item.estimate,
        estimate_label(&item.estimate)
    ));
    lines.push(format!("**Priority:** {}", item.priority));
    lines.push(format!("**Tags:** {}", item.tags.join(", ")));
    lines.push(String::new());
    lines.push("**Acceptance Criteria:**".to_string());
    lines.extend(item.acceptance_criteria.iter().map(|ac| format!("- {ac}")));

    if let Some(assumptions) = item.assumptions.as_ref().filter(|a| !a.is_empty()) {
        lines.push(String::new());
        lines.push("**Assumptions / Open Questions:**".to_string());
        lines.extend(assumptions.iter().map(|a| format!("- {a}")));
    }
    lines.join("\n")
}

pub fn format_refined_items(items: &[RefinedItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format_item(i, item))
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

/// Items followed by a one-line footer with count, latency, tier and cost.
pub fn format_response(response: &RefineResponse) -> String {
    let count = response.items.len();
    let meta = &response.meta;
    format!(
        "{}\n\n---\n*Refined {count} item{} · {}ms · Tier: {} · Cost: ${:.6}*",
        format_refined_items(&response.items),
        if count == 1 { "" } else { "s" },
        meta.latency_ms,
        meta.tier,
        meta.cost_usd,
    )
}
