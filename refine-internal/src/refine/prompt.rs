use minijinja::{context, Environment, UndefinedBehavior};

use crate::error::{Error, ErrorDetails};

/// Tag reported in response metadata. Bump whenever a template changes.
pub const PROMPT_VERSION: &str = "v3";

const REFINE_TEMPLATE: &str = "refine_prompt";
const CORRECTION_TEMPLATE: &str = "correction";

const REFINE_PROMPT: &str = r#"You are an experienced agile product owner. Refine each backlog item below into a structured, sprint-ready work item.

Return a JSON array with exactly one object per input item, in the same order as the input. Each object has these fields:
- "title": a concise, action-oriented title
- "problem": one or two sentences describing the underlying problem or need
- "acceptanceCriteria": 2-5 specific, testable criteria (never more than 10)
- "estimate": exactly one of "XS", "S", "M", "L", "XL"
- "priority": "LEVEL — rationale", where LEVEL is HIGH, MEDIUM or LOW and the rationale is one sentence
- "tags": 1-3 short lowercase tags
- "assumptions": 0-2 assumptions or open questions (omit the field when there are none)

Respond with the JSON array only. Do not wrap it in Markdown or add commentary.
{% if context %}

Project context:
{{ context }}
{% endif %}
{% if use_user_stories %}

Also include a "userStory" field on every item: "As a <user>, I want <goal>, so that <benefit>."
{% endif %}
{% if use_gherkin %}

Write every acceptance criterion in Gherkin form: "Given <context>, When <action>, Then <outcome>".
{% endif %}

Backlog items:
{% for item in items %}
{{ loop.index }}. {{ item }}
{% endfor %}"#;

const CORRECTION_PROMPT: &str = r#"Your previous response did not match the required schema. Fix these issues:
{% for issue in issues %}
- {{ issue }}
{% endfor %}

Reminders:
- "estimate" must be exactly one of "XS", "S", "M", "L", "XL".
- "priority" must be "LEVEL — rationale" with LEVEL one of HIGH, MEDIUM, LOW.
- Return exactly {{ expected }} items, one per input item, in the original order.

Respond with the corrected JSON array only."#;

#[derive(Clone, Debug)]
pub struct PromptInput<'a> {
    pub items: &'a [String],
    pub context: Option<&'a str>,
    pub use_user_stories: bool,
    pub use_gherkin: bool,
}

/// Compiled prompt templates. Rendering is deterministic for identical input.
#[derive(Debug)]
pub struct PromptTemplates {
    env: Environment<'static>,
}

impl PromptTemplates {
    pub fn new() -> Result<Self, Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in [
            (REFINE_TEMPLATE, REFINE_PROMPT),
            (CORRECTION_TEMPLATE, CORRECTION_PROMPT),
        ] {
            env.add_template(name, source).map_err(|e| {
                Error::new(ErrorDetails::PromptTemplate {
                    message: format!("Failed to compile template `{name}`: {e}"),
                })
            })?;
        }
        Ok(Self { env })
    }

    pub fn render_refine(&self, input: &PromptInput<'_>) -> Result<String, Error> {
        let context = input.context.map(str::trim).filter(|c| !c.is_empty());
        self.render(
            REFINE_TEMPLATE,
            context! {
                items => input.items,
                context => context,
                use_user_stories => input.use_user_stories,
                use_gherkin => input.use_gherkin,
            },
        )
    }

    pub fn render_correction(&self, issues: &[String], expected: usize) -> Result<String, Error> {
        self.render(
            CORRECTION_TEMPLATE,
            context! {
                issues => issues,
                expected => expected,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, Error> {
        let template = self.env.get_template(name).map_err(|e| {
            Error::new(ErrorDetails::PromptTemplate {
                message: format!("Unknown template `{name}`: {e}"),
            })
        })?;
        template.render(ctx).map_err(|e| {
            Error::new(ErrorDetails::PromptTemplate {
                message: format!("Failed to render template `{name}`: {e}"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<String> {
        vec![
            "users can't reset password".to_string(),
            "export to csv is slow".to_string(),
        ]
    }

    #[test]
    fn test_refine_prompt_numbers_items_in_order() {
        let templates = PromptTemplates::new().unwrap();
        let items = items();
        let prompt = templates
            .render_refine(&PromptInput {
                items: &items,
                context: None,
                use_user_stories: false,
                use_gherkin: false,
            })
            .unwrap();
        let first = prompt.find("1. users can't reset password").unwrap();
        let second = prompt.find("2. export to csv is slow").unwrap();
        assert!(first < second);
        assert!(prompt.contains("LEVEL — rationale"));
        assert!(!prompt.contains("Project context"));
        assert!(!prompt.contains("userStory"));
        assert!(!prompt.contains("Gherkin"));
    }

    #[test]
    fn test_optional_sections_follow_instruction_body() {
        let templates = PromptTemplates::new().unwrap();
        let items = items();
        let prompt = templates
            .render_refine(&PromptInput {
                items: &items,
                context: Some("B2B invoicing SaaS"),
                use_user_stories: true,
                use_gherkin: true,
            })
            .unwrap();
        let body = prompt.find("Respond with the JSON array only").unwrap();
        let context = prompt.find("Project context:\nB2B invoicing SaaS").unwrap();
        let story = prompt.find("\"userStory\"").unwrap();
        let gherkin = prompt.find("Gherkin").unwrap();
        let listed = prompt.find("Backlog items:").unwrap();
        assert!(body < context && context < story && story < gherkin && gherkin < listed);
    }

    #[test]
    fn test_blank_context_is_omitted() {
        let templates = PromptTemplates::new().unwrap();
        let items = items();
        let input = PromptInput {
            items: &items,
            context: Some("   "),
            use_user_stories: false,
            use_gherkin: false,
        };
        let prompt = templates.render_refine(&input).unwrap();
        assert!(!prompt.contains("Project context"));
        assert_eq!(prompt, templates.render_refine(&input).unwrap());
    }

    #[test]
    fn test_correction_lists_issues() {
        let templates = PromptTemplates::new().unwrap();
        let prompt = templates
            .render_correction(
                &[
                    "[0].estimate: must be one of XS, S, M, L, XL".to_string(),
                    "[1].priority: must match \"LEVEL — rationale\"".to_string(),
                ],
                2,
            )
            .unwrap();
        assert!(prompt.contains("- [0].estimate: must be one of XS, S, M, L, XL\n"));
        assert!(prompt.contains("- [1].priority"));
        assert!(prompt.contains("Return exactly 2 items"));
    }
}
