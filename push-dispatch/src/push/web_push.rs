//! HTTP Web Push client.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::debug;

use super::ece::{EncryptedBody, ReceiverKeys};
use super::keys::{VapidKeys, encode_b64url};
use super::payload::truncate_chars;
use super::transport::{PushError, PushMessage, PushTarget, PushTransport};
use super::vapid::VapidSigner;
use crate::{Error, Result};

const ERROR_BODY_MAX_CHARS: usize = 300;

/// [`PushTransport`] that posts encrypted messages to the browser's push service.
#[derive(Debug)]
pub struct WebPushClient {
    client: reqwest::Client,
    signer: VapidSigner,
}

impl WebPushClient {
    /// `timeout` bounds each individual request, not a whole retry sequence.
    pub fn new(timeout: Duration) -> Result<Self> {
        install_rustls_provider();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build push HTTP client: {}", e)))?;
        Ok(Self {
            client,
            signer: VapidSigner::new(),
        })
    }

    fn build_request(
        &self,
        target: &PushTarget<'_>,
        message: &PushMessage<'_>,
        keys: &VapidKeys,
    ) -> std::result::Result<reqwest::RequestBuilder, PushError> {
        let receiver = ReceiverKeys::parse(target.p256dh, target.auth)
            .map_err(|e| PushError::rejected(e.to_string()))?;
        let sealed = EncryptedBody::seal(message.payload, &receiver)
            .map_err(|e| PushError::rejected(e.to_string()))?;
        let authorization = self
            .signer
            .authorization(target.endpoint, keys)
            .map_err(|e| PushError::rejected(e.to_string()))?;
        let urgency: &'static str = message.urgency.into();

        Ok(self
            .client
            .post(target.endpoint)
            .header("TTL", message.ttl_secs)
            .header("Urgency", urgency)
            .header(CONTENT_ENCODING, "aes128gcm")
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(AUTHORIZATION, authorization)
            // Legacy headers some push services still read alongside the aes128gcm header block.
            .header("Encryption", format!("salt={}", encode_b64url(&sealed.salt)))
            .header(
                "Crypto-Key",
                format!(
                    "dh={}; p256ecdsa={}",
                    encode_b64url(&sealed.sender_public),
                    keys.public_key()
                ),
            )
            .body(sealed.body))
    }
}

#[async_trait]
impl PushTransport for WebPushClient {
    async fn send(
        &self,
        target: &PushTarget<'_>,
        message: &PushMessage<'_>,
        keys: &VapidKeys,
    ) -> std::result::Result<(), PushError> {
        let response = self
            .build_request(target, message, keys)?
            .send()
            .await
            .map_err(|e| PushError::transport(format!("Push request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PushError::status(
            status.as_u16(),
            format!(
                "Push service returned {}: {}",
                status,
                truncate_chars(&body, ERROR_BODY_MAX_CHARS)
            ),
        ))
    }
}

/// reqwest is built without a bundled crypto provider.
fn install_rustls_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}
