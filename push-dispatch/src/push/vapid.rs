//! VAPID request signing (RFC 8292).
//!
//! Tokens are ES256 JWTs scoped to one push service origin. A dispatch sends
//! many requests to the same few origins, so signed tokens are reused until
//! they are close to expiry.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use p256::ecdsa::Signature;
use p256::ecdsa::signature::Signer;
use serde::Serialize;
use url::{Host, Url};

use super::keys::{VapidKeys, encode_b64url};
use crate::{Error, Result};

const TOKEN_LIFETIME: Duration = Duration::hours(12);
/// Tokens this close to expiry are re-signed.
const REFRESH_MARGIN: Duration = Duration::minutes(1);

/// Base64url of `{"typ":"JWT","alg":"ES256"}`.
const JWT_HEADER: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJFUzI1NiJ9";

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

#[derive(Debug, Clone)]
struct SignedToken {
    jwt: String,
    expires_at: DateTime<Utc>,
}

/// Signs and caches VAPID tokens per (origin, public key).
#[derive(Debug, Default)]
pub struct VapidSigner {
    tokens: DashMap<(String, String), SignedToken>,
}

impl VapidSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Authorization` header value for a request to `endpoint`.
    pub fn authorization(&self, endpoint: &str, keys: &VapidKeys) -> Result<String> {
        let audience = audience_for(endpoint)?;
        let jwt = self.token(&audience, keys, Utc::now())?;
        Ok(format!("vapid t={}, k={}", jwt, keys.public_key()))
    }

    fn token(&self, audience: &str, keys: &VapidKeys, now: DateTime<Utc>) -> Result<String> {
        // Rotated keys must not reuse a token signed by the old key.
        let cache_key = (audience.to_string(), keys.public_key().to_string());
        if let Some(cached) = self.tokens.get(&cache_key)
            && cached.expires_at - REFRESH_MARGIN > now
        {
            return Ok(cached.jwt.clone());
        }

        let expires_at = now + TOKEN_LIFETIME;
        let jwt = sign(audience, keys, expires_at)?;
        self.tokens.insert(
            cache_key,
            SignedToken {
                jwt: jwt.clone(),
                expires_at,
            },
        );
        Ok(jwt)
    }
}

fn sign(audience: &str, keys: &VapidKeys, expires_at: DateTime<Utc>) -> Result<String> {
    let claims = Claims {
        aud: audience,
        exp: expires_at.timestamp(),
        sub: keys.subject(),
    };
    let signing_input = format!(
        "{}.{}",
        JWT_HEADER,
        encode_b64url(&serde_json::to_vec(&claims)?)
    );
    let signature: Signature = keys.signing_key().sign(signing_input.as_bytes());
    Ok(format!(
        "{}.{}",
        signing_input,
        encode_b64url(&signature.to_bytes())
    ))
}

/// Origin of the push service, used as the `aud` claim.
pub fn audience_for(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::validation(format!("Invalid push endpoint URL: {}", e)))?;
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => format!("[{}]", ip),
        None => return Err(Error::validation("Push endpoint has no host")),
    };

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}
