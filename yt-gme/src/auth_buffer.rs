//! AuthBuffer generation and verification.
//!
//! An AuthBuffer binds a user id, a voice room id, and an expiry into an
//! opaque TEA-encrypted token. The voice backend accepts it as raw bytes or
//! as standard base64.

use base64::Engine;
use tracing::debug;

use yt_core::config::GmeConfig;
use yt_core::error::{YtError, YtResult};

use crate::codec::AuthBufferPlaintext;
use crate::tea::TeaCipher;

/// Encode the plaintext struct for a token expiring `ttl_secs` from now.
pub fn build_plaintext(
    user_id: &str,
    room_id: &str,
    sdk_app_id: u32,
    ttl_secs: u32,
) -> YtResult<Vec<u8>> {
    AuthBufferPlaintext::new(user_id, room_id, sdk_app_id, ttl_secs)?.encode()
}

/// Encrypt an encoded plaintext with a 16-byte key.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> YtResult<Vec<u8>> {
    Ok(TeaCipher::new(key)?.encrypt(plaintext))
}

/// Decrypt a token back to its encoded plaintext.
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> YtResult<Vec<u8>> {
    TeaCipher::new(key)?.decrypt(ciphertext)
}

/// Decrypt a token and parse its fields.
pub fn verify(buffer: &[u8], key: &[u8]) -> YtResult<AuthBufferPlaintext> {
    let plaintext = decrypt(buffer, key)?;
    AuthBufferPlaintext::decode(&plaintext)
}

/// Mints AuthBuffers for one GME application.
///
/// Every call produces a fresh token with a new expiry and new random
/// padding; tokens are single-use and never cached.
#[derive(Debug, Clone)]
pub struct AuthBufferGenerator {
    sdk_app_id: u32,
    ttl_secs: u32,
    cipher: TeaCipher,
}

impl AuthBufferGenerator {
    pub fn new(sdk_app_id: u32, key: &[u8], ttl_secs: u32) -> YtResult<Self> {
        Ok(Self {
            sdk_app_id,
            ttl_secs,
            cipher: TeaCipher::new(key)?,
        })
    }

    /// Build a generator from the `[gme]` config section.
    pub fn from_config(config: &GmeConfig) -> YtResult<Self> {
        config.validate()?;
        Self::new(config.sdk_app_id, config.secret_key.as_bytes(), config.ttl_secs)
    }

    pub fn sdk_app_id(&self) -> u32 {
        self.sdk_app_id
    }

    /// Raw token bytes.
    pub fn generate(&self, user_id: &str, room_id: &str) -> YtResult<Vec<u8>> {
        let plaintext = build_plaintext(user_id, room_id, self.sdk_app_id, self.ttl_secs)?;
        let token = self.cipher.encrypt(&plaintext);
        debug!(
            user_id,
            room_id,
            len = token.len(),
            "generated authbuffer"
        );
        Ok(token)
    }

    /// Token as standard base64.
    pub fn generate_base64(&self, user_id: &str, room_id: &str) -> YtResult<String> {
        let token = self.generate(user_id, room_id)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(token))
    }

    /// Decrypt and parse a raw token.
    pub fn verify(&self, buffer: &[u8]) -> YtResult<AuthBufferPlaintext> {
        AuthBufferPlaintext::decode(&self.cipher.decrypt(buffer)?)
    }

    /// Decrypt and parse a base64 token.
    pub fn verify_base64(&self, encoded: &str) -> YtResult<AuthBufferPlaintext> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| YtError::InvalidValue(format!("base64 decode failed: {e}")))?;
        self.verify(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"IWajGHr5VTo3fd63";

    #[test]
    fn test_generate_verify_roundtrip() {
        let generator = AuthBufferGenerator::new(1_400_113_874, KEY, 300).unwrap();
        let token = generator.generate("352080", "7868145").unwrap();
        let fields = generator.verify(&token).unwrap();
        assert_eq!(fields.user_id, "352080");
        assert_eq!(fields.room_id, "7868145");
        assert!(!fields.is_expired());
    }

    #[test]
    fn test_base64_roundtrip() {
        let generator = AuthBufferGenerator::new(1_400_113_874, KEY, 300).unwrap();
        let encoded = generator.generate_base64("352080", "7868145").unwrap();
        let fields = generator.verify_base64(&encoded).unwrap();
        assert_eq!(fields.sdk_app_id, 1_400_113_874);
    }

    #[test]
    fn test_verify_base64_rejects_garbage() {
        let generator = AuthBufferGenerator::new(1, KEY, 300).unwrap();
        assert!(matches!(
            generator.verify_base64("not-valid-base64!!!"),
            Err(YtError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = GmeConfig::default();
        assert!(matches!(
            AuthBufferGenerator::from_config(&config),
            Err(YtError::MissingConfig(_))
        ));

        let config = GmeConfig {
            secret_key: "IWajGHr5VTo3fd63".into(),
            ..GmeConfig::default()
        };
        let generator = AuthBufferGenerator::from_config(&config).unwrap();
        assert_eq!(generator.sdk_app_id(), 1_400_113_874);
    }

    #[test]
    fn test_wrong_key_does_not_verify_ids() {
        let token = encrypt(&build_plaintext("352080", "7868145", 1, 300).unwrap(), KEY).unwrap();
        match verify(&token, b"0123456789abcdef") {
            Err(_) => {}
            Ok(fields) => assert!(fields.user_id != "352080" || fields.room_id != "7868145"),
        }
    }
}
