use std::fmt::{Debug, Display};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::tier::PlanTier;

/// Controls whether raw model output is echoed back in error bodies.
///
/// WARNING: raw output may contain customer backlog text. Only enable this in
/// development.
static DEBUG: OnceCell<bool> = OnceCell::const_new();

pub fn set_debug(debug: bool) -> Result<(), Error> {
    DEBUG.set(debug).map_err(|_| {
        Error::new(ErrorDetails::Config {
            message: "Failed to set debug mode".to_string(),
        })
    })
}

fn is_debug() -> bool {
    *DEBUG.get().unwrap_or(&false)
}

/// Chooses between a `Debug` or `Display` representation based on the gateway-level `DEBUG` flag.
pub struct DisplayOrDebugGateway<T: Debug + Display> {
    val: T,
}

impl<T: Debug + Display> DisplayOrDebugGateway<T> {
    pub fn new(val: T) -> Self {
        Self { val }
    }
}

impl<T: Debug + Display> Display for DisplayOrDebugGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if is_debug() {
            write!(f, "{:?}", self.val)
        } else {
            write!(f, "{}", self.val)
        }
    }
}

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We box `ErrorDetails` per the `clippy::result_large_err` lint
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }

    pub fn is_completion_unavailable(&self) -> bool {
        matches!(*self.0, ErrorDetails::CompletionUnavailable { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AllItemsEmpty,
    AppState {
        message: String,
    },
    CompletionUnavailable {
        message: String,
        status_code: Option<StatusCode>,
    },
    Config {
        message: String,
    },
    DailyLimitReached {
        tier: PlanTier,
        limit: u32,
        upgrade: Option<String>,
    },
    InvalidQuery {
        message: String,
    },
    ItemLimitExceeded {
        tier: PlanTier,
        received: usize,
        allowed: usize,
        upgrade: Option<String>,
    },
    JsonRequest {
        message: String,
    },
    KvStore {
        message: String,
    },
    MissingItems,
    Observability {
        message: String,
    },
    ModelOutputParse {
        message: String,
        raw_output: String,
    },
    ModelOutputValidation {
        issues: Vec<String>,
    },
    PromptTemplate {
        message: String,
    },
    RouteNotFound {
        path: String,
    },
    Serialization {
        message: String,
    },
    Unauthorized,
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AllItemsEmpty => tracing::Level::WARN,
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::CompletionUnavailable { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::DailyLimitReached { .. } => tracing::Level::WARN,
            ErrorDetails::InvalidQuery { .. } => tracing::Level::WARN,
            ErrorDetails::ItemLimitExceeded { .. } => tracing::Level::WARN,
            ErrorDetails::JsonRequest { .. } => tracing::Level::WARN,
            ErrorDetails::KvStore { .. } => tracing::Level::WARN,
            ErrorDetails::MissingItems => tracing::Level::WARN,
            ErrorDetails::Observability { .. } => tracing::Level::ERROR,
            ErrorDetails::ModelOutputParse { .. } => tracing::Level::ERROR,
            ErrorDetails::ModelOutputValidation { .. } => tracing::Level::ERROR,
            ErrorDetails::PromptTemplate { .. } => tracing::Level::ERROR,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::WARN,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::Unauthorized => tracing::Level::WARN,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AllItemsEmpty => StatusCode::BAD_REQUEST,
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::CompletionUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::DailyLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::ItemLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorDetails::JsonRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::KvStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::MissingItems => StatusCode::BAD_REQUEST,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::ModelOutputParse { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::ModelOutputValidation { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::PromptTemplate { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AllItemsEmpty => write!(
                f,
                "All items were empty. Provide at least one non-blank backlog item."
            ),
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing AppState: {message}")
            }
            ErrorDetails::CompletionUnavailable { message, .. } => {
                write!(f, "AI service temporarily unavailable: {message}")
            }
            ErrorDetails::Config { message } => write!(f, "{message}"),
            ErrorDetails::DailyLimitReached {
                tier,
                limit,
                upgrade,
            } => {
                write!(
                    f,
                    "Daily request limit reached ({limit}/day on the {tier} tier)."
                )?;
                if upgrade.is_some() {
                    write!(f, " Upgrade for unlimited requests.")?;
                }
                Ok(())
            }
            ErrorDetails::InvalidQuery { message } => write!(f, "Invalid query: {message}"),
            ErrorDetails::ItemLimitExceeded {
                tier,
                received,
                allowed,
                ..
            } => match tier {
                PlanTier::Free => write!(
                    f,
                    "Free tier is limited to {allowed} items per request. You sent {received}."
                ),
                _ => write!(
                    f,
                    "The {tier} tier is limited to {allowed} items per request. You sent {received}."
                ),
            },
            ErrorDetails::JsonRequest { message } => write!(f, "{message}"),
            ErrorDetails::KvStore { message } => write!(f, "Key-value store error: {message}"),
            ErrorDetails::MissingItems => {
                write!(f, "No backlog items provided. Send {{ items: string[] }}")
            }
            ErrorDetails::Observability { message } => write!(f, "{message}"),
            ErrorDetails::ModelOutputParse {
                message,
                raw_output,
            } => write!(
                f,
                "Model returned output that is not valid JSON: {message}. Raw output: {raw_output}"
            ),
            ErrorDetails::ModelOutputValidation { issues } => write!(
                f,
                "Model output failed schema validation after retry: {}",
                issues.join("; ")
            ),
            ErrorDetails::PromptTemplate { message } => {
                write!(f, "Failed to render prompt template: {message}")
            }
            ErrorDetails::RouteNotFound { path } => write!(f, "Route not found: {path}"),
            ErrorDetails::Serialization { message } => write!(f, "{message}"),
            ErrorDetails::Unauthorized => write!(f, "Unauthorized"),
        }
    }
}

impl Error {
    /// Builds the JSON error body: `{ error, upgrade?, tier?, itemsReceived?, itemsAllowed?, issues? }`.
    pub fn to_response_json(&self) -> (StatusCode, Value) {
        let mut body = json!({ "error": self.to_string() });
        match self.get_details() {
            ErrorDetails::DailyLimitReached { tier, upgrade, .. } => {
                body["tier"] = json!(tier);
                if let Some(upgrade) = upgrade {
                    body["upgrade"] = json!(upgrade);
                }
            }
            ErrorDetails::ItemLimitExceeded {
                tier,
                received,
                allowed,
                upgrade,
            } => {
                body["tier"] = json!(tier);
                body["itemsReceived"] = json!(received);
                body["itemsAllowed"] = json!(allowed);
                if let Some(upgrade) = upgrade {
                    body["upgrade"] = json!(upgrade);
                }
            }
            ErrorDetails::ModelOutputValidation { issues } => {
                body["error"] = json!("AI output failed validation. Please try again.");
                body["issues"] = json!(issues);
            }
            ErrorDetails::ModelOutputParse { raw_output, .. } => {
                body["error"] = json!("AI returned an unreadable response. Please try again.");
                if is_debug() {
                    body["rawOutput"] = json!(raw_output);
                }
            }
            ErrorDetails::CompletionUnavailable { .. } => {
                body["error"] =
                    json!("AI service temporarily unavailable. Please try again in a moment.");
            }
            _ => {}
        }
        (self.status_code(), body)
    }
}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        let (status_code, body) = self.to_response_json();
        (status_code, Json(body)).into_response()
    }
}
