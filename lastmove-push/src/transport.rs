//! Push transport.
//!
//! Message encryption and VAPID signing are delegated to a web-push gateway
//! sidecar; this side only hands it the subscription, payload and options.

use std::time::Duration;

use async_trait::async_trait;
use lastmove_core::PushSubscription;
use serde::Serialize;

use crate::credentials::VapidCredentials;
use crate::error::TransportError;
use crate::payload::SendOptions;

pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8787/send";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
}

impl PushResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Names of the credential parts this transport still needs. Empty when
    /// ready to send.
    fn missing_credentials(&self) -> Vec<&'static str>;

    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        options: SendOptions,
    ) -> Result<PushResponse, TransportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VapidDetails<'a> {
    subject: &'a str,
    public_key: &'a str,
    private_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayOptions<'a> {
    #[serde(rename = "TTL")]
    ttl: u32,
    urgency: &'static str,
    vapid_details: VapidDetails<'a>,
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    subscription: &'a PushSubscription,
    payload: &'a str,
    options: GatewayOptions<'a>,
}

/// POSTs each message to a web-push gateway over HTTP.
pub struct GatewayTransport {
    client: reqwest::Client,
    url: String,
    vapid: VapidCredentials,
}

impl GatewayTransport {
    pub fn new(
        url: impl Into<String>,
        vapid: VapidCredentials,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            vapid,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for GatewayTransport {
    fn missing_credentials(&self) -> Vec<&'static str> {
        self.vapid.missing()
    }

    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        options: SendOptions,
    ) -> Result<PushResponse, TransportError> {
        let missing = self.vapid.missing();
        if !missing.is_empty() {
            return Err(TransportError::MissingCredentials(missing));
        }
        let payload =
            std::str::from_utf8(payload).map_err(|e| TransportError::InvalidPayload(e.to_string()))?;

        let body = GatewayRequest {
            subscription,
            payload,
            options: GatewayOptions {
                ttl: options.ttl_seconds,
                urgency: options.urgency.as_str(),
                vapid_details: VapidDetails {
                    subject: &self.vapid.subject,
                    public_key: &self.vapid.public_key,
                    private_key: &self.vapid.private_key,
                },
            },
        };

        tracing::debug!(endpoint = %subscription.endpoint, urgency = options.urgency.as_str(), "sending push via gateway");
        let resp = self
            .client
            .post(&self.url)
            .header("TTL", options.ttl_seconds.to_string())
            .header("Urgency", options.urgency.as_str())
            .json(&body)
            .send()
            .await?;

        Ok(PushResponse {
            status: resp.status().as_u16(),
        })
    }
}
