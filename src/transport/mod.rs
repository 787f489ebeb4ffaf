//! Delivery transport abstraction and the HTTP implementation
//!
//! A transport sends one message and always hands back a [`SendOutcome`]:
//! retries, backoff and destination pacing happen inside [`DeliveryTransport::send`],
//! and the outcome records the attempts actually consumed.

use crate::types::{AttachmentDescriptor, SendOutcome};
use async_trait::async_trait;
use std::collections::HashMap;

pub mod http;
pub mod message;
pub mod pacing;

pub use http::HttpTransport;
pub use message::{OutgoingMessage, html_to_text};
pub use pacing::{Pacing, StrictProviderPolicy};

/// Everything needed to deliver one message
#[derive(Clone, Debug, PartialEq)]
pub struct SendRequest {
    /// Address the message is delivered to (a demo address in demo mode)
    pub destination: String,
    /// Recipient's real address, exposed to templates as `email`
    pub original_address: String,
    /// Subject template
    pub subject: String,
    /// HTML body template
    pub html: String,
    /// Optional plain-text template
    pub text: Option<String>,
    /// Personalisation context
    pub context: HashMap<String, String>,
    /// Files to attach
    pub attachments: Vec<AttachmentDescriptor>,
    /// Attempt budget for this message
    pub max_attempts: u32,
}

impl SendRequest {
    /// Request addressed directly to `address`
    pub fn new(
        address: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let address = address.into();
        Self {
            destination: address.clone(),
            original_address: address,
            subject: subject.into(),
            html: html.into(),
            text: None,
            context: HashMap::new(),
            attachments: Vec::new(),
            max_attempts,
        }
    }
}

/// A delivery channel for rendered messages
///
/// Implementations must never panic or return early without an outcome; a
/// failure is a [`SendOutcome`] with `success == false`.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Render and deliver one message, retrying per the request's budget
    async fn send(&self, request: SendRequest) -> SendOutcome;

    /// Short name for logs
    fn name(&self) -> &str;
}
