//! Client side of the premium full-archive search API: rule payloads, paginated result streams, and counts.

pub mod client;
mod rule;
mod stream;
pub mod types;

pub use client::PowerTrackClient;
pub use rule::build_rule;
pub use stream::{ResultStream, StreamLimits, collect_counts};

#[derive(Debug, thiserror::Error)]
pub enum PowerTrackError {
    #[error("API rate limit exceeded. Please retry later.")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid date '{0}': expected YYYY-mm-DD, YYYY-mm-DD HH:MM, or YYYYmmDDHHMM")]
    InvalidDate(String),
}
