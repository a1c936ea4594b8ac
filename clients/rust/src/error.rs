use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{message}")]
    RateLimited {
        message: String,
        upgrade: Option<String>,
    },
    #[error("Refine Backlog AI service is temporarily unavailable. Please try again in a moment.")]
    Unavailable,
    #[error("Error from Refine Backlog API ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        upgrade: Option<String>,
    },
    #[error("Failed to reach Refine Backlog API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid API base URL: {0}")]
    Url(#[from] url::ParseError),
}
