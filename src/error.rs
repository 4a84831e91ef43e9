// Failure taxonomy for the search and delivery workflow.

use thiserror::Error;

/// Structured failure returned by the media retrieval engine.
///
/// The engine has no stable error-code contract, so the variant is picked
/// from its diagnostic output on a best-effort basis (see
/// [`RetrievalError::classify`]). Callers must treat anything other than
/// `Failed` as a hint, not a guarantee.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    /// The platform rejected the request with HTTP 403.
    #[error("blocked by remote (HTTP 403): {0}")]
    Blocked(String),

    /// The platform requires a logged-in session.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The media is private, removed or region-locked.
    #[error("media unavailable: {0}")]
    Unavailable(String),

    /// Any other failure reported by the engine.
    #[error("retrieval failed: {0}")]
    Failed(String),

    /// The engine could not be started at all.
    #[error("failed to run retrieval engine: {0}")]
    Spawn(String),
}

impl RetrievalError {
    /// Map raw engine output onto a failure category.
    ///
    /// A 403 wins over login hints here; the info-extraction step reverses
    /// that order (see `From<&RetrievalError> for InfoFailure`).
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let detail = message.trim().to_string();
        if message.contains("HTTP Error 403") || lower.contains("403 forbidden") {
            RetrievalError::Blocked(detail)
        } else if mentions_auth(&lower) {
            RetrievalError::AuthRequired(detail)
        } else if lower.contains("unavailable") || lower.contains("not available in your country")
        {
            RetrievalError::Unavailable(detail)
        } else {
            RetrievalError::Failed(detail)
        }
    }
}

/// Why the metadata-only extraction step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoFailure {
    AuthRequired,
    Blocked,
    Generic,
}

fn mentions_auth(lower: &str) -> bool {
    lower.contains("authentication") || lower.contains("login") || lower.contains("sign in")
}

/// Login hints take precedence over a 403 when metadata extraction fails.
impl From<&RetrievalError> for InfoFailure {
    fn from(err: &RetrievalError) -> Self {
        match err {
            RetrievalError::AuthRequired(_) => InfoFailure::AuthRequired,
            RetrievalError::Blocked(detail) if mentions_auth(&detail.to_lowercase()) => {
                InfoFailure::AuthRequired
            }
            RetrievalError::Blocked(_) => InfoFailure::Blocked,
            _ => InfoFailure::Generic,
        }
    }
}

/// Why the media download step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// HTTP 403. Records what was configured so the advice fits.
    Blocked { used_cookies: bool, used_proxy: bool },
    Unavailable,
    Generic,
    /// The engine reported success but produced no audio file.
    MissingOutput,
}

/// Terminal failure of one delivery run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureReason {
    #[error("info extraction failed: {0:?}")]
    InfoExtraction(InfoFailure),

    #[error("media fetch failed: {0:?}")]
    MediaFetch(FetchFailure),

    #[error("persisting audio failed: {0}")]
    Persist(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl FailureReason {
    /// Human-readable status text for the chat user.
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::InfoExtraction(kind) => {
                let mut msg = String::from("Failed to get track information.");
                match kind {
                    InfoFailure::AuthRequired => {
                        msg.push_str(" (Authentication may be required - check cookies)")
                    }
                    InfoFailure::Blocked => msg.push_str(" (Blocked by YouTube - 403)"),
                    InfoFailure::Generic => {}
                }
                msg
            }
            FailureReason::MediaFetch(kind) => {
                let mut msg = String::from("Download failed. ");
                match kind {
                    FetchFailure::Blocked {
                        used_cookies,
                        used_proxy,
                    } => {
                        msg.push_str("YouTube blocked the request (403 Forbidden). ");
                        if *used_cookies {
                            msg.push_str("Try updating cookies or using a proxy.");
                        } else if *used_proxy {
                            msg.push_str("The proxy might be blocked.");
                        } else {
                            msg.push_str("Consider using a proxy or cookies.");
                        }
                    }
                    FetchFailure::Unavailable => {
                        msg.push_str("The video might be unavailable or region-locked.")
                    }
                    FetchFailure::Generic => msg.push_str("Please try again later."),
                    FetchFailure::MissingOutput => {
                        msg = String::from("Processing failed: Final audio file not found.")
                    }
                }
                msg
            }
            FailureReason::Persist(_) => "Failed to save the processed track.".to_string(),
            FailureReason::Delivery(e) => format!("Error sending the track: {}", e),
        }
    }
}
