//! Error types for shortcut.

use thiserror::Error;

use crate::subnet::Subnet;

#[derive(Error, Debug)]
pub enum ShortcutError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Overlapping ip ranges detected, {container} contains {contained}")]
    Overlap { container: Subnet, contained: Subnet },

    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("Context canceled")]
    Canceled,

    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    #[error("Dial error: {0}")]
    Dial(#[from] std::io::Error),
}

impl ShortcutError {
    /// Whether the error came from the context rather than the resolver.
    pub fn is_context_error(&self) -> bool {
        matches!(self, ShortcutError::Canceled | ShortcutError::DeadlineExceeded)
    }

    pub(crate) fn resolution(host: &str, reason: impl ToString) -> Self {
        ShortcutError::Resolution {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = ShortcutError> = std::result::Result<T, E>;
