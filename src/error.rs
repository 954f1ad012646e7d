//! Error types for the playback engine

use thiserror::Error;

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy of errors reported by the embed runtime.
///
/// The provider reports numeric codes; the engine only distinguishes the three
/// cases below because the UI only has three different things to say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EmbedErrorKind {
    /// The video id is malformed, removed, or private
    InvalidVideo,
    /// The uploader disabled playback in embedded players
    EmbeddingDisallowed,
    /// Anything else the player reported
    Playback,
}

impl EmbedErrorKind {
    /// Map a provider error code onto the taxonomy.
    ///
    /// `2` is an invalid parameter (usually a bad video id), `100` means the
    /// video was not found or is private, `101` and `150` are the two codes
    /// used for "embedding disallowed". Everything else, including the HTML5
    /// playback error `5`, is a generic playback error.
    pub fn from_code(code: i32) -> Self {
        match code {
            2 | 100 => EmbedErrorKind::InvalidVideo,
            101 | 150 => EmbedErrorKind::EmbeddingDisallowed,
            _ => EmbedErrorKind::Playback,
        }
    }

    /// Whether retrying the same window could possibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedErrorKind::Playback)
    }

    /// Summarized, user-facing text for a toast
    pub fn user_message(&self) -> &'static str {
        match self {
            EmbedErrorKind::InvalidVideo => "This video is unavailable.",
            EmbedErrorKind::EmbeddingDisallowed => {
                "The owner of this video doesn't allow it to be played here."
            }
            EmbedErrorKind::Playback => "Something went wrong while playing this video.",
        }
    }
}

impl std::fmt::Display for EmbedErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EmbedErrorKind::InvalidVideo => "invalid video",
            EmbedErrorKind::EmbeddingDisallowed => "embedding disallowed",
            EmbedErrorKind::Playback => "playback error",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in the playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to create a player or another engine resource
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// A window with nonsensical bounds was requested
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// The embed runtime reported an error for the current video
    #[error("Embed error: {0}")]
    Embed(EmbedErrorKind),

    /// Every play attempt failed
    #[error("Playback failed after {attempts} attempts")]
    PlaybackFailed { attempts: u32 },

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error (offline, or an HTTP collaborator failed)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The data-access collaborator failed
    #[error("Data access failed: {0}")]
    DataAccess(String),

    /// The requested sniplist has no playable snippets
    #[error("Sniplist has no snippets")]
    EmptyPlaylist,

    /// The operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The operation was superseded by a newer window or a teardown
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::DataAccess(err.to_string())
    }
}
