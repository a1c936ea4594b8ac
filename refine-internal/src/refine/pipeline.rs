use serde_json::Value;
use tracing::{debug, error, warn};

use super::prompt::{PromptInput, PromptTemplates};
use super::schema::{strip_code_fences, validate_items, RefinedItem};
use crate::completion::{CompletionRequest, CompletionService, Message};
use crate::error::{Error, ErrorDetails};

/// Sampling parameters for the two attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub retry_temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug)]
pub struct RefineOutcome {
    pub items: Vec<RefinedItem>,
    /// Summed over every attempt.
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retried: bool,
}

/// The first call may be followed by exactly one corrective call. A failure
/// in `Retry` always terminates.
enum Attempt {
    First,
    Retry {
        previous_output: String,
        issues: Vec<String>,
    },
}

enum Rejection {
    Unparseable(String),
    Invalid(Vec<String>),
}

/// A failed refinement, with the tokens already spent on it.
#[derive(Debug)]
pub struct RefineFailure {
    pub error: Error,
    /// Summed over every attempt that reached the model.
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Set once the corrective call has been attempted.
    pub retried: bool,
}

fn parse_and_validate(text: &str, expected: usize) -> Result<Vec<RefinedItem>, Rejection> {
    let value: Value = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| Rejection::Unparseable(e.to_string()))?;
    validate_items(&value, expected).map_err(Rejection::Invalid)
}

/// Renders the prompt, calls the model and validates its output, retrying once
/// with the validation issues when the first output violates the schema.
pub async fn refine_items(
    completion: &dyn CompletionService,
    templates: &PromptTemplates,
    input: &PromptInput<'_>,
    sampling: SamplingSettings,
) -> Result<RefineOutcome, RefineFailure> {
    let prompt = templates.render_refine(input).map_err(|error| RefineFailure {
        error,
        input_tokens: 0,
        output_tokens: 0,
        retried: false,
    })?;
    let expected = input.items.len();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut attempt = Attempt::First;

    loop {
        let retried = matches!(attempt, Attempt::Retry { .. });
        let fail = |error: Error, input_tokens: u64, output_tokens: u64| RefineFailure {
            error,
            input_tokens,
            output_tokens,
            retried,
        };
        let request = match &attempt {
            Attempt::First => CompletionRequest {
                messages: vec![Message::user(prompt.as_str())],
                temperature: sampling.temperature,
                max_tokens: sampling.max_tokens,
            },
            Attempt::Retry {
                previous_output,
                issues,
            } => CompletionRequest {
                messages: vec![
                    Message::user(prompt.as_str()),
                    Message::assistant(previous_output.as_str()),
                    Message::user(
                        templates
                            .render_correction(issues, expected)
                            .map_err(|e| fail(e, input_tokens, output_tokens))?,
                    ),
                ],
                temperature: sampling.retry_temperature,
                max_tokens: sampling.max_tokens,
            },
        };

        let response = completion
            .complete(&request)
            .await
            .map_err(|e| fail(e, input_tokens, output_tokens))?;
        input_tokens = input_tokens.saturating_add(response.input_tokens);
        output_tokens = output_tokens.saturating_add(response.output_tokens);

        attempt = match (attempt, parse_and_validate(&response.text, expected)) {
            (_, Ok(items)) => {
                debug!(items = items.len(), retried, "Model output validated");
                let items = if input.use_user_stories {
                    items
                } else {
                    items.into_iter().map(RefinedItem::without_user_story).collect()
                };
                return Ok(RefineOutcome {
                    items,
                    input_tokens,
                    output_tokens,
                    retried,
                });
            }
            (Attempt::First, Err(Rejection::Unparseable(message))) => {
                return Err(fail(
                    Error::new(ErrorDetails::ModelOutputParse {
                        message,
                        raw_output: response.text,
                    }),
                    input_tokens,
                    output_tokens,
                ));
            }
            (Attempt::First, Err(Rejection::Invalid(issues))) => {
                warn!(
                    issues = issues.len(),
                    "Model output failed schema validation, retrying once: {}",
                    issues.join("; ")
                );
                Attempt::Retry {
                    previous_output: response.text,
                    issues,
                }
            }
            (Attempt::Retry { .. }, Err(Rejection::Unparseable(message))) => {
                error!("Corrective retry returned unparseable output: {}", response.text);
                return Err(fail(
                    Error::new(ErrorDetails::ModelOutputValidation {
                        issues: vec![format!("response is not valid JSON: {message}")],
                    }),
                    input_tokens,
                    output_tokens,
                ));
            }
            (Attempt::Retry { .. }, Err(Rejection::Invalid(issues))) => {
                return Err(fail(
                    Error::new(ErrorDetails::ModelOutputValidation { issues }),
                    input_tokens,
                    output_tokens,
                ));
            }
        };
    }
}
