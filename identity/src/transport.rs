//! # Outbound Transport
//!
//! The email/SMS sender is an external collaborator per spec.md §1 - this
//! crate only defines the trait shape the MFA Engine dispatches OTP codes
//! through (§1.1 expansion). A host supplies SMTP/SNS/Twilio-backed
//! implementations; tests supply an in-memory fake that captures the last
//! code sent.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport send failed: {0}")]
    SendFailed(String),
}

/// Dispatches a one-time code (or any short notification) to a user's
/// email address or phone number. Implementations MUST treat `to` as
/// opaque - it is an email address for EMAIL channel enrollment/challenge
/// flows and a phone number for an SMS-capable implementation.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Captures every dispatched message instead of sending it anywhere,
    /// so tests can pull the OTP code back out without a live transport.
    #[derive(Default)]
    pub struct CapturingSender {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl CapturingSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last_body(&self) -> Option<String> {
            self.sent.lock().last().map(|(_, _, body)| body.clone())
        }

        pub fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl Sender for CapturingSender {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError> {
            self.sent
                .lock()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn capturing_sender_records_messages() {
        let sender = CapturingSender::new();
        sender.send("alice@example.com", "Your code", "123456").await.unwrap();
        assert_eq!(sender.count(), 1);
        assert_eq!(sender.last_body(), Some("123456".to_string()));
    }
}
