//! SendGrid v3 style HTTP delivery

use crate::config::{Config, DeliveryConfig, RetryConfig};
use crate::error::{Result, TransportError};
use crate::retry::send_with_retry;
use crate::transport::message::OutgoingMessage;
use crate::transport::pacing::StrictProviderPolicy;
use crate::transport::{DeliveryTransport, SendRequest};
use crate::types::{AttachmentDescriptor, SendOutcome};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Status codes that mean the API accepted the message
pub const ACCEPTED_STATUS: &[u16] = &[200, 202];

/// Longest response body kept in an error
const MAX_ERROR_BODY: usize = 500;

/// Delivery through a SendGrid-compatible JSON API
///
/// `POST {api_base_url}/v3/mail/send` with the API key as a bearer token.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    delivery: DeliveryConfig,
    retry: RetryConfig,
    policy: StrictProviderPolicy,
}

impl HttpTransport {
    /// Build a transport from the delivery, retry and pacing settings
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.delivery.request_timeout)
            .build()?;

        Ok(Self {
            client,
            delivery: config.delivery.clone(),
            retry: config.retry.clone(),
            policy: StrictProviderPolicy::from_config(&config.delivery, &config.retry),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.delivery.api_base_url.trim_end_matches('/'), path)
    }

    /// Check the API key against `GET /v3/scopes`
    pub async fn validate_api_key(&self) -> std::result::Result<(), TransportError> {
        if self.delivery.api_key.is_empty() {
            return Err(TransportError::InvalidRequest(
                "API key is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .get(self.endpoint("/v3/scopes"))
            .bearer_auth(&self.delivery.api_key)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 200 {
            tracing::debug!("delivery API key is valid");
            Ok(())
        } else {
            Err(TransportError::Http {
                status,
                body: truncate(response.text().await.unwrap_or_default()),
            })
        }
    }

    /// Send a one-off test message straight to `address`
    ///
    /// `sample_data` stands in for a recipient's personalisation context.
    pub async fn send_test(
        &self,
        address: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
        sample_data: HashMap<String, String>,
        attachments: Vec<AttachmentDescriptor>,
    ) -> SendOutcome {
        let mut request = SendRequest::new(address, subject, html, self.retry.max_attempts);
        request.text = text.map(str::to_string);
        request.context = sample_data;
        request.attachments = attachments;
        self.send(request).await
    }

    async fn post(&self, body: &MailSendBody<'_>) -> std::result::Result<u16, TransportError> {
        if self.delivery.api_key.is_empty() {
            return Err(TransportError::InvalidRequest(
                "API key is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.endpoint("/v3/mail/send"))
            .bearer_auth(&self.delivery.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if ACCEPTED_STATUS.contains(&status) {
            Ok(status)
        } else {
            Err(TransportError::Http {
                status,
                body: truncate(response.text().await.unwrap_or_default()),
            })
        }
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn send(&self, request: SendRequest) -> SendOutcome {
        let message = OutgoingMessage::compose(&request, &self.delivery).await;
        let body = MailSendBody::from(&message);
        let pacing = self.policy.pacing_for(&request.destination);

        if !pacing.pre_send_delay.is_zero() {
            tracing::debug!(
                destination = %request.destination,
                delay_ms = pacing.pre_send_delay.as_millis(),
                "strict provider, pacing send"
            );
            tokio::time::sleep(pacing.pre_send_delay).await;
        }

        let retried = send_with_retry(&self.retry, request.max_attempts, pacing.base_delay, || {
            self.post(&body)
        })
        .await;

        match retried.result {
            Ok(status) => {
                tracing::debug!(
                    destination = %request.destination,
                    status,
                    attempts = retried.attempts,
                    "message accepted"
                );
                SendOutcome::delivered(request.original_address, status, retried.attempts)
            }
            Err(e) => SendOutcome::failed(request.original_address, e, retried.attempts),
        }
    }

    fn name(&self) -> &str {
        "sendgrid-http"
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct Attachment<'a> {
    content: &'a str,
    filename: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    disposition: &'static str,
}

/// JSON body of `POST /v3/mail/send`
#[derive(Serialize)]
struct MailSendBody<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
    headers: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a OutgoingMessage> for MailSendBody<'a> {
    fn from(message: &'a OutgoingMessage) -> Self {
        Self {
            personalizations: vec![Personalization {
                to: vec![Address {
                    email: &message.to,
                    name: None,
                }],
            }],
            from: Address {
                email: &message.from_email,
                name: Some(&message.from_name).filter(|n| !n.is_empty()).map(String::as_str),
            },
            subject: &message.subject,
            content: message
                .parts
                .iter()
                .map(|p| Content {
                    content_type: p.content_type,
                    value: &p.value,
                })
                .collect(),
            attachments: message
                .attachments
                .iter()
                .map(|a| Attachment {
                    content: &a.content,
                    filename: &a.filename,
                    content_type: a.content_type,
                    disposition: "attachment",
                })
                .collect(),
            headers: &message.headers,
        }
    }
}
