//! Renderer: turns athlete data into plan text, and plan text into a
//! downloadable document.
//!
//! ```text
//! Worker
//!   |
//!   | generate_content(athlete, weeks) --> plan text
//!   | render_document(plan, athlete, text) --> bytes
//!   v
//! dyn Renderer (AnthropicRenderer in production, fakes in tests)
//! ```

pub mod anthropic;
pub mod document;

pub use anthropic::{AnthropicConfig, AnthropicRenderer};

use std::time::Duration;

use async_trait::async_trait;

use periodize_db::models::Plan;

use crate::discipline::{AthleteData, AthleteDataError};

/// Why a generation attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generative service rejected the request (HTTP {status}): {message}")]
    UpstreamClient { status: u16, message: String },
    #[error("generative service failed (HTTP {status}): {message}")]
    UpstreamServer { status: u16, message: String },
    #[error("request to generative service failed: {0}")]
    Transport(String),
    #[error("unusable response from generative service: {0}")]
    Parse(String),
    #[error(transparent)]
    InvalidAthleteData(#[from] AthleteDataError),
    #[error("failed to store plan output: {0}")]
    StoreWrite(String),
}

impl GenerationError {
    /// Stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::UpstreamClient { .. } => "upstream_4xx",
            Self::UpstreamServer { .. } => "upstream_5xx",
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::InvalidAthleteData(_) => "invalid_athlete_data",
            Self::StoreWrite(_) => "store_write",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        if (400..500).contains(&status) {
            Self::UpstreamClient { status, message }
        } else {
            Self::UpstreamServer { status, message }
        }
    }
}

/// Producer of plan text and documents.
///
/// Object-safe so the worker can hold an `Arc<dyn Renderer>`.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Generate the text of a `weeks`-long plan for the athlete.
    async fn generate_content(
        &self,
        athlete: &AthleteData,
        weeks: i32,
    ) -> Result<String, GenerationError>;

    /// Render plan text into a document.
    async fn render_document(
        &self,
        plan: &Plan,
        athlete: &AthleteData,
        text: &str,
    ) -> Result<Vec<u8>, GenerationError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Renderer) {}
};
