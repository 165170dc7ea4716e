use thiserror::Error;

use crate::ports::captioner::CaptionError;
use crate::ports::social::SocialError;

/// Crate-level error type.
///
/// Design:
/// - Port errors wrap transparently so callers can still match on them.
/// - Persistence and config problems get their own variants because the
///   failure policy differs (logged-and-continue vs fail-fast at startup).
#[derive(Debug, Error)]
pub enum KatariError {
    #[error(transparent)]
    Social(#[from] SocialError),

    #[error(transparent)]
    Caption(#[from] CaptionError),

    #[error("persistence error at {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}
