//! Integration tests for AuthBuffer generation and verification.
//!
//! Covers the full build -> encrypt -> verify path, ciphertext sizing,
//! padding randomness, and tamper detection.

use rand::rngs::StdRng;
use rand::SeedableRng;

use yt_core::error::YtError;
use yt_gme::{build_plaintext, decrypt, encrypt, verify, AuthBufferPlaintext, TeaCipher};

const KEY: &[u8] = b"IWajGHr5VTo3fd63";
const APP_ID: u32 = 1_400_113_874;

#[test]
fn end_to_end_known_credentials() {
    let plaintext = build_plaintext("352080", "7868145", APP_ID, 300).unwrap();
    let token = encrypt(&plaintext, KEY).unwrap();
    let fields = verify(&token, KEY).unwrap();

    assert_eq!(fields.version, 1);
    assert_eq!(fields.user_id, "352080");
    assert_eq!(fields.room_id, "7868145");
    assert_eq!(fields.sdk_app_id, APP_ID);
    assert_eq!(fields.reserved1, 0);
    assert_eq!(fields.reserved2, 0xFFFF_FFFF);
    assert_eq!(fields.reserved3, 0);
    assert!(fields.remaining_validity() > 0);
}

#[test]
fn decrypt_inverts_encrypt_for_many_ids() {
    let cases = [
        ("1", "1"),
        ("352080", "7868145"),
        ("", "room-without-user"),
        ("user-without-room", ""),
        ("957EE518-04A7-4A03-947F-A10F95D0F285", "6965a05c9f268d0013cde203"),
        ("ผู้ใช้", "ห้อง"),
    ];
    for (ttl, (user, room)) in cases.iter().enumerate() {
        let plaintext = build_plaintext(user, room, APP_ID, ttl as u32 * 60).unwrap();
        let token = encrypt(&plaintext, KEY).unwrap();
        assert_eq!(decrypt(&token, KEY).unwrap(), plaintext, "user={user} room={room}");
    }
}

#[test]
fn ciphertext_length_bounds() {
    for room_len in 0..24 {
        let room = "9".repeat(room_len);
        let plaintext = build_plaintext("352080", &room, APP_ID, 300).unwrap();
        let token = encrypt(&plaintext, KEY).unwrap();

        let lower = (plaintext.len() + 9 + 7) / 8 * 8;
        assert_eq!(token.len() % 8, 0);
        assert!(token.len() >= 16);
        assert!(token.len() >= lower, "len {} below {lower}", token.len());
        assert!(token.len() < plaintext.len() + 17);
    }
}

#[test]
fn plaintext_length_matches_layout() {
    let plaintext = build_plaintext("352080", "7868145", APP_ID, 300).unwrap();
    assert_eq!(plaintext.len(), 1 + 2 + 6 + 4 + 4 + 4 + 4 + 4 + 2 + 7);
}

#[test]
fn successive_tokens_differ_but_carry_same_fields() {
    let plaintext = build_plaintext("352080", "7868145", APP_ID, 300).unwrap();
    let a = encrypt(&plaintext, KEY).unwrap();
    let b = encrypt(&plaintext, KEY).unwrap();
    assert_ne!(a, b, "random padding should make tokens unique");

    assert_eq!(verify(&a, KEY).unwrap(), verify(&b, KEY).unwrap());
}

#[test]
fn flipped_byte_never_passes_with_matching_ids() {
    let cipher = TeaCipher::new(KEY).unwrap();
    let plaintext = AuthBufferPlaintext::with_expiry("352080", "7868145", APP_ID, 1_900_000_000)
        .unwrap()
        .encode()
        .unwrap();
    let token = cipher.encrypt_with_rng(&plaintext, &mut StdRng::seed_from_u64(2024));

    // Corruption propagates to every later block, so any flip before the
    // final block reaches the room id.
    for pos in 0..token.len() - 8 {
        for bit in [0x01u8, 0x80] {
            let mut tampered = token.clone();
            tampered[pos] ^= bit;
            match verify(&tampered, KEY) {
                Err(e) => assert!(
                    matches!(e, YtError::InvalidValue(_) | YtError::Decrypt(_)),
                    "unexpected error kind: {e}"
                ),
                Ok(fields) => assert!(
                    fields.user_id != "352080" || fields.room_id != "7868145",
                    "flip at {pos} passed verification"
                ),
            }
        }
    }
}

#[test]
fn verify_rejects_malformed_ciphertext() {
    assert!(matches!(verify(&[0u8; 8], KEY), Err(YtError::Decrypt(_))));
    assert!(matches!(verify(&[0u8; 20], KEY), Err(YtError::Decrypt(_))));
}

#[test]
fn wrong_key_length_is_rejected() {
    let plaintext = build_plaintext("352080", "7868145", APP_ID, 300).unwrap();
    assert!(matches!(
        encrypt(&plaintext, b"IWajGHr5VTo3fd6"),
        Err(YtError::InvalidValue(_))
    ));
    assert!(matches!(
        decrypt(&[0u8; 16], b"IWajGHr5VTo3fd634"),
        Err(YtError::InvalidValue(_))
    ));
}

#[test]
fn concurrent_generation_is_independent() {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            std::thread::spawn(move || {
                let user = format!("user-{i}");
                let plaintext = build_plaintext(&user, "7868145", APP_ID, 300).unwrap();
                let token = encrypt(&plaintext, KEY).unwrap();
                (user, verify(&token, KEY).unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (user, fields) = handle.join().unwrap();
        assert_eq!(fields.user_id, user);
        assert_eq!(fields.room_id, "7868145");
    }
}
