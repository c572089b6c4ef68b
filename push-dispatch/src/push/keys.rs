//! VAPID signing keys.
//!
//! The `KeyProvider` hands the Delivery Engine the keypair used to sign
//! outbound push requests. Keys come from the environment override when
//! present, otherwise from the system settings store. Cached keys are reused
//! until the settings version changes or the cache entry ages out, so writes
//! made by another process are picked up too.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{DEFAULT_VAPID_SUBJECT, SettingsService, VapidEnvOverride};
use crate::database::models::keys;
use crate::{Error, Result};

/// Length of an uncompressed P-256 public point.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of a P-256 private scalar.
pub const PRIVATE_KEY_LEN: usize = 32;

/// A validated VAPID keypair plus the contact subject.
#[derive(Clone)]
pub struct VapidKeys {
    public_key_b64: String,
    signing_key: SigningKey,
    subject: String,
}

impl VapidKeys {
    /// Parse base64url keys and check that they form a pair.
    pub fn from_b64(public_key: &str, private_key: &str, subject: &str) -> Result<Self> {
        let public_key = public_key.trim();
        let public_raw = decode_b64url(public_key)
            .map_err(|e| Error::config(format!("Invalid VAPID public key: {}", e)))?;
        let private_raw = decode_b64url(private_key.trim())
            .map_err(|e| Error::config(format!("Invalid VAPID private key: {}", e)))?;

        let public_raw: [u8; PUBLIC_KEY_LEN] = public_raw.try_into().map_err(|_| {
            Error::config(format!(
                "VAPID public key must decode to {} bytes",
                PUBLIC_KEY_LEN
            ))
        })?;
        let private_raw: [u8; PRIVATE_KEY_LEN] = private_raw.try_into().map_err(|_| {
            Error::config(format!(
                "VAPID private key must decode to {} bytes",
                PRIVATE_KEY_LEN
            ))
        })?;

        let signing_key = SigningKey::from_bytes((&private_raw).into())
            .map_err(|_| Error::config("Invalid VAPID private key"))?;
        let derived = VerifyingKey::from(&signing_key).to_encoded_point(false);
        if derived.as_bytes() != public_raw.as_slice() {
            return Err(Error::config(
                "VAPID public key does not match the private key",
            ));
        }

        let subject = subject.trim();
        Ok(Self {
            public_key_b64: public_key.to_string(),
            signing_key,
            subject: if subject.is_empty() {
                DEFAULT_VAPID_SUBJECT.to_string()
            } else {
                subject.to_string()
            },
        })
    }

    /// Base64url (unpadded) uncompressed public key, as given to browsers.
    pub fn public_key(&self) -> &str {
        &self.public_key_b64
    }

    /// Contact URI put in the JWT `sub` claim.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key", &self.public_key_b64)
            .field("private_key", &"<redacted>")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Generate a fresh keypair as (public, private) base64url strings.
pub fn generate_vapid_keys() -> (String, String) {
    let signing_key = SigningKey::random(&mut OsRng);
    let public = VerifyingKey::from(&signing_key).to_encoded_point(false);
    (
        encode_b64url(public.as_bytes()),
        encode_b64url(signing_key.to_bytes().as_slice()),
    )
}

/// Source of the signing keypair.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Current keys. Fails with `VapidKeysNotSet` when none are configured.
    async fn current_keys(&self) -> Result<Arc<VapidKeys>>;

    /// Drop any cached keys.
    fn invalidate(&self) {}
}

/// Fixed keys, e.g. when only the environment configures them.
pub struct StaticKeyProvider {
    keys: Arc<VapidKeys>,
}

impl StaticKeyProvider {
    pub fn new(keys: VapidKeys) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn current_keys(&self) -> Result<Arc<VapidKeys>> {
        Ok(self.keys.clone())
    }
}

/// How long keys read from the settings store are trusted without a re-read.
pub const KEY_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CachedKeys {
    version: u64,
    loaded_at: Instant,
    keys: Arc<VapidKeys>,
}

/// Environment override first, then the settings store.
pub struct SettingsKeyProvider {
    settings: Arc<SettingsService>,
    env_override: Option<VapidEnvOverride>,
    cache: RwLock<Option<CachedKeys>>,
}

impl SettingsKeyProvider {
    pub fn new(settings: Arc<SettingsService>, env_override: Option<VapidEnvOverride>) -> Self {
        Self {
            settings,
            env_override,
            cache: RwLock::new(None),
        }
    }

    async fn load(&self) -> Result<VapidKeys> {
        if let Some(env) = &self.env_override {
            debug!("Using VAPID keys from environment");
            return VapidKeys::from_b64(&env.public_key, &env.private_key, &env.subject);
        }

        let public = self.settings.get(keys::VAPID_PUBLIC_KEY).await?;
        let private = self.settings.get(keys::VAPID_PRIVATE_KEY).await?;
        let (public, private) = match (public, private) {
            (Some(public), Some(private)) => (public, private),
            (None, None) => return Err(Error::VapidKeysNotSet),
            _ => {
                warn!("Only one of the VAPID keys is present in system settings");
                return Err(Error::VapidKeysNotSet);
            }
        };
        let subject = self
            .settings
            .get(keys::VAPID_SUBJECT)
            .await?
            .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string());

        VapidKeys::from_b64(&public, &private, &subject)
    }
}

#[async_trait]
impl KeyProvider for SettingsKeyProvider {
    async fn current_keys(&self) -> Result<Arc<VapidKeys>> {
        let version = self.settings.version();
        if let Some(cached) = self.cache.read().as_ref()
            && cached.version == version
            && cached.loaded_at.elapsed() < KEY_CACHE_TTL
        {
            return Ok(cached.keys.clone());
        }

        let keys = Arc::new(self.load().await?);
        *self.cache.write() = Some(CachedKeys {
            version,
            loaded_at: Instant::now(),
            keys: keys.clone(),
        });
        Ok(keys)
    }

    fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

pub(crate) fn decode_b64url(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input.trim_end_matches('=').as_bytes())
}

pub(crate) fn encode_b64url(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::tests::MemorySettings;
    use crate::database::repositories::SettingsRepository;

    fn settings() -> Arc<SettingsService> {
        Arc::new(SettingsService::new(Arc::new(MemorySettings::default())))
    }

    #[test]
    fn test_generated_keys_parse() {
        let (public, private) = generate_vapid_keys();
        let keys = VapidKeys::from_b64(&public, &private, "").unwrap();
        assert_eq!(keys.public_key(), public);
        assert_eq!(keys.subject(), DEFAULT_VAPID_SUBJECT);
        assert!(!format!("{:?}", keys).contains(&private));
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let (public, _) = generate_vapid_keys();
        let (_, other_private) = generate_vapid_keys();
        let err = VapidKeys::from_b64(&public, &other_private, "mailto:a@b.c").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = VapidKeys::from_b64("AAAA", "AAAA", "mailto:a@b.c").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_keys_reported() {
        let provider = SettingsKeyProvider::new(settings(), None);
        let err = provider.current_keys().await.unwrap_err();
        assert!(matches!(err, Error::VapidKeysNotSet));
    }

    #[tokio::test]
    async fn test_keys_from_settings_are_cached_until_change() {
        let settings = settings();
        let (public, private) = generate_vapid_keys();
        settings.set(keys::VAPID_PUBLIC_KEY, &public).await.unwrap();
        settings.set(keys::VAPID_PRIVATE_KEY, &private).await.unwrap();

        let provider = SettingsKeyProvider::new(settings.clone(), None);
        let first = provider.current_keys().await.unwrap();
        let again = provider.current_keys().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.public_key(), public);

        let (public2, private2) = generate_vapid_keys();
        settings.set(keys::VAPID_PUBLIC_KEY, &public2).await.unwrap();
        settings.set(keys::VAPID_PRIVATE_KEY, &private2).await.unwrap();
        let rotated = provider.current_keys().await.unwrap();
        assert_eq!(rotated.public_key(), public2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_by_another_writer_is_seen_after_ttl() {
        let repo = Arc::new(MemorySettings::default());
        let settings = Arc::new(SettingsService::new(repo.clone()));
        let (public, private) = generate_vapid_keys();
        settings.set(keys::VAPID_PUBLIC_KEY, &public).await.unwrap();
        settings.set(keys::VAPID_PRIVATE_KEY, &private).await.unwrap();

        let provider = SettingsKeyProvider::new(settings, None);
        assert_eq!(provider.current_keys().await.unwrap().public_key(), public);

        // Written straight to the store, so the in-process version stays put.
        let (public2, private2) = generate_vapid_keys();
        repo.set(keys::VAPID_PUBLIC_KEY, &public2).await.unwrap();
        repo.set(keys::VAPID_PRIVATE_KEY, &private2).await.unwrap();
        assert_eq!(provider.current_keys().await.unwrap().public_key(), public);

        tokio::time::advance(KEY_CACHE_TTL + Duration::from_secs(1)).await;
        assert_eq!(provider.current_keys().await.unwrap().public_key(), public2);
    }

    #[tokio::test]
    async fn test_env_override_wins() {
        let settings = settings();
        let (public, private) = generate_vapid_keys();
        let (env_public, env_private) = generate_vapid_keys();
        settings.set(keys::VAPID_PUBLIC_KEY, &public).await.unwrap();
        settings.set(keys::VAPID_PRIVATE_KEY, &private).await.unwrap();

        let provider = SettingsKeyProvider::new(
            settings,
            Some(VapidEnvOverride {
                public_key: env_public.clone(),
                private_key: env_private,
                subject: "mailto:ops@farm.example".to_string(),
            }),
        );
        let keys = provider.current_keys().await.unwrap();
        assert_eq!(keys.public_key(), env_public);
        assert_eq!(keys.subject(), "mailto:ops@farm.example");
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let settings = settings();
        let (public, private) = generate_vapid_keys();
        settings.set(keys::VAPID_PUBLIC_KEY, &public).await.unwrap();
        settings.set(keys::VAPID_PRIVATE_KEY, &private).await.unwrap();

        let provider = SettingsKeyProvider::new(settings, None);
        let first = provider.current_keys().await.unwrap();
        provider.invalidate();
        let second = provider.current_keys().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.public_key(), second.public_key());
    }
}
