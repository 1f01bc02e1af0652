//! Chunk decryption
//!
//! The cipher itself lives outside the engine. The engine derives the IV,
//! hands over key material and cipher bytes, and appends whatever comes back.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// AES-128 CBC decryptor for encrypted chunks
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(&self, cipher: Bytes, key: [u8; 16], iv: [u8; 16]) -> Result<Bytes>;
}
