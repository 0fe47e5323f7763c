//! AuthBuffer plaintext layout.
//!
//! Big-endian, length-prefixed struct consumed by the TEA cipher:
//!
//! ```text
//! | cVer u8 = 1 | openid len u16 | openid | sdk app id u32 | reserved1 u32 = 0 |
//! | expiry u32  | reserved2 u32 = 0xFFFFFFFF | reserved3 u32 = 0 | room len u16 | room |
//! ```

use chrono::Utc;
use yt_core::error::{YtError, YtResult};

/// Layout version written into every buffer.
pub const AUTH_BUFFER_VERSION: u8 = 1;

const RESERVED2: u32 = 0xFFFF_FFFF;

/// Bytes taken by everything except the two id strings.
const FIXED_LEN: usize = 1 + 2 + 4 * 5 + 2;

/// Decoded AuthBuffer fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBufferPlaintext {
    pub version: u8,
    pub user_id: String,
    pub sdk_app_id: u32,
    pub reserved1: u32,
    /// Unix timestamp after which the token is rejected.
    pub expires_at: u32,
    pub reserved2: u32,
    pub reserved3: u32,
    pub room_id: String,
}

impl AuthBufferPlaintext {
    /// Fields for a fresh token expiring `ttl_secs` from now.
    pub fn new(user_id: &str, room_id: &str, sdk_app_id: u32, ttl_secs: u32) -> YtResult<Self> {
        let now = u32::try_from(Utc::now().timestamp())
            .map_err(|_| YtError::InvalidValue("system clock outside u32 range".into()))?;
        Self::with_expiry(user_id, room_id, sdk_app_id, now.saturating_add(ttl_secs))
    }

    /// Fields with an explicit expiry timestamp.
    pub fn with_expiry(
        user_id: &str,
        room_id: &str,
        sdk_app_id: u32,
        expires_at: u32,
    ) -> YtResult<Self> {
        check_id_len("user id", user_id)?;
        check_id_len("room id", room_id)?;
        Ok(Self {
            version: AUTH_BUFFER_VERSION,
            user_id: user_id.to_string(),
            sdk_app_id,
            reserved1: 0,
            expires_at,
            reserved2: RESERVED2,
            reserved3: 0,
            room_id: room_id.to_string(),
        })
    }

    /// Exact encoded size.
    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.user_id.len() + self.room_id.len()
    }

    pub fn encode(&self) -> YtResult<Vec<u8>> {
        let user_len = id_len("user id", &self.user_id)?;
        let room_len = id_len("room id", &self.room_id)?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.version);
        buf.extend_from_slice(&user_len.to_be_bytes());
        buf.extend_from_slice(self.user_id.as_bytes());
        buf.extend_from_slice(&self.sdk_app_id.to_be_bytes());
        buf.extend_from_slice(&self.reserved1.to_be_bytes());
        buf.extend_from_slice(&self.expires_at.to_be_bytes());
        buf.extend_from_slice(&self.reserved2.to_be_bytes());
        buf.extend_from_slice(&self.reserved3.to_be_bytes());
        buf.extend_from_slice(&room_len.to_be_bytes());
        buf.extend_from_slice(self.room_id.as_bytes());
        Ok(buf)
    }

    /// Parse a decrypted buffer. Every length prefix must fit the data and
    /// the buffer must end exactly after the room id.
    pub fn decode(data: &[u8]) -> YtResult<Self> {
        let mut reader = Reader { data, pos: 0 };

        let version = reader.u8()?;
        let user_len = reader.u16()? as usize;
        let user_id = reader.string(user_len, "user id")?;
        let sdk_app_id = reader.u32()?;
        let reserved1 = reader.u32()?;
        let expires_at = reader.u32()?;
        let reserved2 = reader.u32()?;
        let reserved3 = reader.u32()?;
        let room_len = reader.u16()? as usize;
        let room_id = reader.string(room_len, "room id")?;

        if reader.pos != data.len() {
            return Err(YtError::InvalidValue(format!(
                "{} trailing bytes after room id",
                data.len() - reader.pos
            )));
        }

        Ok(Self {
            version,
            user_id,
            sdk_app_id,
            reserved1,
            expires_at,
            reserved2,
            reserved3,
            room_id,
        })
    }

    /// Seconds of validity left, negative once expired.
    pub fn remaining_validity(&self) -> i64 {
        i64::from(self.expires_at) - Utc::now().timestamp()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_validity() <= 0
    }
}

fn check_id_len(what: &str, id: &str) -> YtResult<()> {
    id_len(what, id).map(|_| ())
}

fn id_len(what: &str, id: &str) -> YtResult<u16> {
    u16::try_from(id.len()).map_err(|_| {
        YtError::InvalidValue(format!("{what} is {} bytes, limit is 65535", id.len()))
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> YtResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                YtError::InvalidValue(format!(
                    "need {n} bytes at offset {}, buffer has {}",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> YtResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> YtResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> YtResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, n: usize, what: &str) -> YtResult<String> {
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| YtError::InvalidValue(format!("{what} is not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuthBufferPlaintext {
        AuthBufferPlaintext::with_expiry("352080", "7868145", 1_400_113_874, 1_700_000_000)
            .unwrap()
    }

    #[test]
    fn test_encoded_length_matches_layout() {
        let plain = sample();
        let bytes = plain.encode().unwrap();
        assert_eq!(bytes.len(), 1 + 2 + 6 + 4 + 4 + 4 + 4 + 4 + 2 + 7);
        assert_eq!(bytes.len(), plain.encoded_len());
    }

    #[test]
    fn test_big_endian_field_positions() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..3], &[0x00, 0x06]);
        assert_eq!(&bytes[3..9], b"352080");
        assert_eq!(&bytes[9..13], &1_400_113_874u32.to_be_bytes());
        assert_eq!(&bytes[13..17], &[0, 0, 0, 0]);
        assert_eq!(&bytes[17..21], &1_700_000_000u32.to_be_bytes());
        assert_eq!(&bytes[21..25], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[25..29], &[0, 0, 0, 0]);
        assert_eq!(&bytes[29..31], &[0x00, 0x07]);
        assert_eq!(&bytes[31..], b"7868145");
    }

    #[test]
    fn test_decode_recovers_fields() {
        let plain = sample();
        let decoded = AuthBufferPlaintext::decode(&plain.encode().unwrap()).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_oversized_id_rejected() {
        let huge = "x".repeat(65_536);
        let err = AuthBufferPlaintext::with_expiry(&huge, "1", 1, 0).unwrap_err();
        assert!(matches!(err, YtError::InvalidValue(_)));

        let max = "x".repeat(65_535);
        assert!(AuthBufferPlaintext::with_expiry("1", &max, 1, 0).is_ok());
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let bytes = sample().encode().unwrap();
        let err = AuthBufferPlaintext::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, YtError::InvalidValue(_)));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert!(AuthBufferPlaintext::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_length_prefix_overflow() {
        let mut bytes = sample().encode().unwrap();
        bytes[1] = 0xFF;
        assert!(AuthBufferPlaintext::decode(&bytes).is_err());
    }

    #[test]
    fn test_fresh_token_not_expired() {
        let plain = AuthBufferPlaintext::new("352080", "7868145", 1_400_113_874, 300).unwrap();
        assert!(!plain.is_expired());
        assert!(plain.remaining_validity() <= 300);
        assert!(plain.remaining_validity() > 290);
    }
}
