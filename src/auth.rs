//! Session password exchange: plain text or CRAM-MD5 challenge/response.

use md5::{Digest, Md5};
use tracing::debug;

/// Digest block size.
const BLOCK_SIZE: usize = 64;
/// The pads are one byte wider than the block; only `BLOCK_SIZE` bytes are hashed.
const PAD_SIZE: usize = BLOCK_SIZE + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    PlainText,
    CramMd5,
}

/// Challenge state for one session.
#[derive(Debug, Default, Clone)]
pub struct Cram {
    challenge: Option<String>,
}

impl Cram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the challenge the first time; later calls return the same token.
    pub fn generate_challenge(&mut self) -> &str {
        self.challenge.get_or_insert_with(|| {
            let bytes: [u8; 16] = rand::random();
            let challenge = hex::encode(bytes);
            debug!("generated CRAM challenge: {}", challenge);
            challenge
        })
    }

    /// Store the challenge offered by the peer.
    /// Adopt the challenge the answering side offered. The first one wins;
    /// returns `false` when a challenge was already in place.
    pub fn set_challenge(&mut self, challenge: impl Into<String>) -> bool {
        if self.challenge.is_some() {
            return false;
        }
        self.challenge = Some(challenge.into());
        true
    }

    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    /// Keyed MD5 of `secret`, using `challenge` as the key. Lowercase hex.
    pub fn hash(challenge: &str, secret: &str) -> String {
        let mut key = challenge.as_bytes().to_vec();
        if key.len() > BLOCK_SIZE {
            key = Md5::digest(&key).to_vec();
        }

        let mut ipad = [0u8; PAD_SIZE];
        let mut opad = [0u8; PAD_SIZE];
        ipad[..key.len()].copy_from_slice(&key);
        opad[..key.len()].copy_from_slice(&key);
        for (i, o) in ipad.iter_mut().zip(opad.iter_mut()) {
            *i ^= 0x36;
            *o ^= 0x5c;
        }

        let inner = Md5::new()
            .chain_update(&ipad[..BLOCK_SIZE])
            .chain_update(secret.as_bytes())
            .finalize();
        let outer = Md5::new()
            .chain_update(&opad[..BLOCK_SIZE])
            .chain_update(inner)
            .finalize();
        hex::encode(outer)
    }

    pub fn validate(challenge: &str, expected_secret: &str, received_hash: &str) -> bool {
        Self::hash(challenge, expected_secret) == received_hash
    }
}
