//! Error taxonomy shared by the ticket manager and platform adapters.
//!
//! Operators get the `Display` text in logs; requesters only ever see
//! [`TicketError::user_message`].

use crate::types::{ChannelId, TicketKind};

/// A failed remote call to the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("rate limited by the platform")]
    RateLimited,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient platform failure: {0}")]
    Transient(String),
}

impl PlatformError {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` exceeds {max} characters")]
    TooLong { field: &'static str, max: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("no category configured for {0} tickets")]
    CategoryNotConfigured(TicketKind),
    #[error("invalid submission: {0}")]
    InvalidForm(#[from] FormError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("channel {0} is already being closed")]
    AlreadyClosing(ChannelId),
    #[error("failed to write transcript: {0}")]
    Transcript(#[source] std::io::Error),
}

impl TicketError {
    /// Short, non-technical text for the requester.
    pub fn user_message(&self) -> String {
        match self {
            Self::CategoryNotConfigured(kind) => format!(
                "⚠️ The {} category is not configured. Please contact an administrator.",
                kind.label().to_lowercase()
            ),
            Self::InvalidForm(_) => "⚠️ Please fill in every field and try again.".to_owned(),
            Self::AlreadyClosing(_) => "⏳ This ticket is already being closed.".to_owned(),
            Self::Platform(_) | Self::Transcript(_) => {
                "❌ Something went wrong. Please try again or contact an administrator."
                    .to_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(PlatformError::RateLimited.is_retryable());
        assert!(PlatformError::Transient("reset".to_owned()).is_retryable());
        assert!(!PlatformError::PermissionDenied("no".to_owned()).is_retryable());
        assert!(!PlatformError::NotFound("gone".to_owned()).is_retryable());
    }

    #[test]
    fn user_messages_hide_details() {
        let err = TicketError::Platform(PlatformError::PermissionDenied(
            "Missing Permissions (50013)".to_owned(),
        ));
        assert!(!err.user_message().contains("50013"));

        let err = TicketError::CategoryNotConfigured(TicketKind::Partnership);
        assert!(err.user_message().contains("partnerships"));
    }
}
