//! YelloTalk GME - AuthBuffer tokens for the voice backend.
//!
//! This crate provides:
//! - The big-endian AuthBuffer plaintext layout
//! - TEA block encryption with QQ-style chaining and padding
//! - A generator that mints and verifies base64 or raw tokens
//!
//! Everything here is pure and stateless apart from the caller's key.

pub mod auth_buffer;
pub mod codec;
pub mod tea;

// Re-export key types
pub use auth_buffer::{build_plaintext, decrypt, encrypt, verify, AuthBufferGenerator};
pub use codec::AuthBufferPlaintext;
pub use tea::TeaCipher;
