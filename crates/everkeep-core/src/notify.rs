//! Notification transport seam.
//!
//! The engine decides what to send, to whom and when; the actual SMS or
//! email gateway sits behind [`NotificationChannel`]. Implementations
//! should return quickly -- the dispatcher owns retry and backoff.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nominee::Nominee;

/// A notification to one nominee of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub user_id: String,
    pub subject: String,
    pub body: String,
}

impl NotificationMessage {
    /// Legacy notification sent to nominees after an approved review.
    pub fn legacy_notice(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            subject: "Important: please contact Everkeep".to_string(),
            body: format!(
                "You are listed as a trusted nominee for an Everkeep member \
                 (reference {user_id}). The member has been unreachable for an \
                 extended period and an administrator has approved contacting \
                 you. Please follow the instructions previously shared with \
                 you, or reply to this message for assistance."
            ),
        }
    }
}

/// Delivery failure reported by the transport.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery timed out")]
    Timeout,

    #[error("Rejected by gateway: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// One delivery transport (SMS gateway, email service, console...).
pub trait NotificationChannel: Send + Sync {
    /// Deliver `message` to `nominee`. A returned error is retried by
    /// the dispatcher up to its configured attempt cap.
    fn send(&self, nominee: &Nominee, message: &NotificationMessage) -> Result<(), DeliveryError>;
}
