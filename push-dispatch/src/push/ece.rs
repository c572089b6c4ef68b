//! Message encryption for Web Push (RFC 8291, `aes128gcm` content coding).
//!
//! Each message gets a fresh salt and a fresh ephemeral ECDH key, and is
//! sent as a single record.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use hkdf::Hkdf;
use p256::PublicKey;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha256;

use super::keys::{PUBLIC_KEY_LEN, decode_b64url};

const SALT_LEN: usize = 16;
const AUTH_SECRET_LEN: usize = 16;
const TAG_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
/// Padding delimiter that marks the final record.
const LAST_RECORD: u8 = 0x02;

const IKM_INFO: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

#[derive(Debug, thiserror::Error)]
pub enum EceError {
    #[error("invalid p256dh key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid auth secret: {0}")]
    InvalidAuthSecret(String),
    #[error("payload cannot be empty")]
    EmptyPayload,
    #[error("payload does not fit in one 4096-byte record")]
    PayloadTooLarge,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encryption,
}

/// The browser side of the key agreement, from a subscription's `keys`.
pub struct ReceiverKeys {
    public_key: PublicKey,
    public_raw: [u8; PUBLIC_KEY_LEN],
    auth_secret: [u8; AUTH_SECRET_LEN],
}

impl ReceiverKeys {
    pub fn parse(p256dh: &str, auth: &str) -> Result<Self, EceError> {
        let public_raw: [u8; PUBLIC_KEY_LEN] = decode_b64url(p256dh)
            .map_err(|e| EceError::InvalidPublicKey(e.to_string()))?
            .try_into()
            .map_err(|raw: Vec<u8>| {
                EceError::InvalidPublicKey(format!("{} bytes, expected {}", raw.len(), PUBLIC_KEY_LEN))
            })?;
        let public_key = PublicKey::from_sec1_bytes(&public_raw)
            .map_err(|_| EceError::InvalidPublicKey("not a P-256 point".to_string()))?;
        let auth_secret: [u8; AUTH_SECRET_LEN] = decode_b64url(auth)
            .map_err(|e| EceError::InvalidAuthSecret(e.to_string()))?
            .try_into()
            .map_err(|raw: Vec<u8>| {
                EceError::InvalidAuthSecret(format!("{} bytes, expected {}", raw.len(), AUTH_SECRET_LEN))
            })?;

        Ok(Self {
            public_key,
            public_raw,
            auth_secret,
        })
    }
}

/// An encrypted request body, header block included.
pub struct EncryptedBody {
    pub body: Vec<u8>,
    /// Raw ephemeral public key, also carried in the header block.
    pub sender_public: [u8; PUBLIC_KEY_LEN],
    pub salt: [u8; SALT_LEN],
}

impl EncryptedBody {
    /// Encrypt `plaintext` for `receiver` with a fresh salt and sender key.
    pub fn seal(plaintext: &[u8], receiver: &ReceiverKeys) -> Result<Self, EceError> {
        if plaintext.is_empty() {
            return Err(EceError::EmptyPayload);
        }
        if plaintext.len() + 1 + TAG_LEN > RECORD_SIZE as usize {
            return Err(EceError::PayloadTooLarge);
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let sender = EphemeralSecret::random(&mut OsRng);

        let sender_point = PublicKey::from(&sender).to_encoded_point(false);
        let sender_public: [u8; PUBLIC_KEY_LEN] = sender_point
            .as_bytes()
            .try_into()
            .map_err(|_| EceError::KeyDerivation)?;
        let shared = sender.diffie_hellman(&receiver.public_key);

        let mut key_info = Vec::with_capacity(IKM_INFO.len() + 2 * PUBLIC_KEY_LEN);
        key_info.extend_from_slice(IKM_INFO);
        key_info.extend_from_slice(&receiver.public_raw);
        key_info.extend_from_slice(&sender_public);
        let ikm: [u8; 32] = expand(
            &receiver.auth_secret,
            shared.raw_secret_bytes().as_slice(),
            &key_info,
        )?;

        let cek: [u8; 16] = expand(&salt, &ikm, CEK_INFO)?;
        // Single record, so the sequence number is zero and the nonce is used as-is.
        let nonce: [u8; 12] = expand(&salt, &ikm, NONCE_INFO)?;

        let mut record = Vec::with_capacity(plaintext.len() + 1);
        record.extend_from_slice(plaintext);
        record.push(LAST_RECORD);

        let ciphertext = Aes128Gcm::new(&cek.into())
            .encrypt(&nonce.into(), record.as_slice())
            .map_err(|_| EceError::Encryption)?;

        let mut body = Vec::with_capacity(SALT_LEN + 5 + PUBLIC_KEY_LEN + ciphertext.len());
        body.extend_from_slice(&salt);
        body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
        body.push(PUBLIC_KEY_LEN as u8);
        body.extend_from_slice(&sender_public);
        body.extend_from_slice(&ciphertext);

        Ok(Self {
            body,
            sender_public,
            salt,
        })
    }
}

fn expand<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N], EceError> {
    let mut okm = [0u8; N];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|_| EceError::KeyDerivation)?;
    Ok(okm)
}
