//! Error types for mask generation
//!
//! `SegmentationError` is the only error shape that leaves the [`MaskGenerator`]
//! boundary. Every message it carries is already sanitized for end users: no stack
//! traces, no language-level error prefixes, no raw technical tokens, and always an
//! actionable hint.
//!
//! [`MaskGenerator`]: crate::generator::MaskGenerator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for mask generation operations
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Substituted whenever a raw message cannot be shown to a user
pub const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong while generating the mask. Please try again.";

/// Shown when a generation is canceled through `abort`
pub const CANCELED_MESSAGE: &str = "Mask generation was canceled. Please try again when ready.";

/// Upper bound for user-facing messages
pub const MAX_MESSAGE_LEN: usize = 200;

const MIN_MESSAGE_LEN: usize = 8;

const TECHNICAL_PREFIXES: &[&str] = &[
    "Error:",
    "Exception:",
    "TypeError:",
    "ReferenceError:",
    "NetworkError:",
];

const TECHNICAL_WORDS: &[&str] = &["undefined", "null"];
const TECHNICAL_FRAGMENTS: &[&str] = &[
    "{}",
    "[object Object]",
    "`",
    "::",
    " at line ",
    " column ",
];

const ACTIONABLE_WORDS: &[&str] = &[
    "please",
    "try",
    "retry",
    "check",
    "use",
    "regenerate",
    "upload",
    "wait",
];

const ACTIONABLE_PHRASES: &[&str] = &["will appear"];

/// Error category, used by callers to pick UI treatment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad input, never retryable
    Validation,
    /// Classified failure reported by the inference service
    RemoteService,
    /// Transport or connectivity failure
    Network,
    /// Failure while fetching the generated mask
    Download,
    /// Polling or decoding exceeded its bound
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::RemoteService => write!(f, "remote-service"),
            Self::Network => write!(f, "network"),
            Self::Download => write!(f, "download"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors surfaced by the mask generation pipeline
///
/// `Display` renders only the sanitized message, so the error can be shown as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    /// Input rejected before any network activity
    #[error("{message}")]
    Validation { message: String },

    /// Failure reported by the remote segmentation service
    #[error("{message}")]
    RemoteService {
        message: String,
        retryable: bool,
        /// Seconds the caller should wait before retrying
        retry_after: Option<u64>,
    },

    /// Connectivity failure or unavailable service
    #[error("{message}")]
    Network { message: String },

    /// Mask download failure
    #[error("{message}")]
    Download { message: String },

    /// Poll or decode deadline exceeded
    #[error("{message}")]
    Timeout { message: String },
}

impl SegmentationError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation {
            message: user_facing(&msg.into()),
        }
    }

    /// Create a new remote service error
    pub fn remote_service<S: Into<String>>(msg: S, retryable: bool) -> Self {
        Self::RemoteService {
            message: user_facing(&msg.into()),
            retryable,
            retry_after: None,
        }
    }

    /// Create a rate-limit error carrying the server's retry hint
    pub fn rate_limited<S: Into<String>>(msg: S, retry_after: Option<u64>) -> Self {
        Self::RemoteService {
            message: user_facing(&msg.into()),
            retryable: true,
            retry_after,
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network {
            message: user_facing(&msg.into()),
        }
    }

    /// Create a new download error
    pub fn download<S: Into<String>>(msg: S) -> Self {
        Self::Download {
            message: user_facing(&msg.into()),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout {
            message: user_facing(&msg.into()),
        }
    }

    /// Error returned to callers whose generation was aborted
    #[must_use]
    pub fn canceled() -> Self {
        Self::remote_service(CANCELED_MESSAGE, true)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::RemoteService { .. } => ErrorKind::RemoteService,
            Self::Network { .. } => ErrorKind::Network,
            Self::Download { .. } => ErrorKind::Download,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Sanitized, user-facing message
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message }
            | Self::RemoteService { message, .. }
            | Self::Network { message }
            | Self::Download { message }
            | Self::Timeout { message } => message,
        }
    }

    /// Whether offering a "Retry" action makes sense
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation { .. } => false,
            Self::RemoteService { retryable, .. } => *retryable,
            Self::Network { .. } | Self::Download { .. } | Self::Timeout { .. } => true,
        }
    }

    /// Seconds to wait before retrying, when the service said so
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RemoteService { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Reduce a raw failure message to something safe to show a user
///
/// Keeps only the first non-empty line, strips language-level error prefixes and
/// capitalizes the first letter. Falls back to [`GENERIC_ERROR_MESSAGE`] when the
/// result is empty, too short, or still contains raw technical tokens.
#[must_use]
pub fn sanitize_message(raw: &str) -> String {
    let first_line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let mut message = first_line;
    while let Some(rest) = TECHNICAL_PREFIXES
        .iter()
        .find_map(|prefix| message.strip_prefix(prefix))
    {
        message = rest.trim_start();
    }
    let message = message.trim();

    if message.chars().count() < MIN_MESSAGE_LEN || contains_technical_tokens(message) {
        return GENERIC_ERROR_MESSAGE.to_string();
    }

    capitalize_first(message)
}

/// Whether a message tells the user what to do next
#[must_use]
pub fn is_actionable(message: &str) -> bool {
    let lower = message.to_lowercase();
    if ACTIONABLE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| ACTIONABLE_WORDS.contains(&word))
}

fn contains_technical_tokens(message: &str) -> bool {
    if TECHNICAL_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
    {
        return true;
    }
    message
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| {
            TECHNICAL_WORDS
                .iter()
                .any(|token| word.eq_ignore_ascii_case(token))
        })
}

fn capitalize_first(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sanitize, bound the length, and make sure the message is actionable
fn user_facing(raw: &str) -> String {
    const SUFFIX: &str = " Please try again.";

    let mut message = sanitize_message(raw);
    let actionable = is_actionable(&message);
    let budget = if actionable {
        MAX_MESSAGE_LEN - 2
    } else {
        MAX_MESSAGE_LEN - 2 - SUFFIX.len()
    };

    if message.chars().count() > budget {
        let cut: String = message.chars().take(budget).collect();
        let cut = match cut.rfind(' ') {
            Some(idx) if idx > budget / 2 => cut.get(..idx).unwrap_or(&cut).to_string(),
            _ => cut,
        };
        message = cut.trim_end_matches(|c: char| c.is_ascii_punctuation()).to_string();
        message.push('.');
    }

    if !is_actionable(&message) {
        if !message.ends_with(['.', '!', '?']) {
            message.push('.');
        }
        message.push_str(SUFFIX);
    }

    message
}
