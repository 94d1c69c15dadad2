// src/services/decrypt.rs

//! Decryption of obfuscated inline images.
//!
//! Some sites serve images AES-CBC encrypted with a static key embedded in
//! their scripts as char codes (`"102_53_100_..."`). Bytes that already
//! look like an image pass through untouched.

use aes::{Aes128, Aes256};
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::error::{AppError, Result};
use crate::models::DecryptConfig;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Whether the bytes start with a JPEG, PNG, GIF or WEBP signature.
pub fn is_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47])
        || bytes.starts_with(b"GIF8")
        || (bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP")
}

/// Parse `"102_53_..."` into the bytes of the encoded characters.
pub fn parse_char_codes(encoded: &str) -> Result<Vec<u8>> {
    encoded
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|e| AppError::Decrypt(format!("bad char code '{part}': {e}")))
        })
        .collect()
}

/// AES-CBC image decryptor with a static key.
#[derive(Debug, Clone, Default)]
pub struct ImageDecryptor {
    key: Option<Vec<u8>>,
    iv: Option<Vec<u8>>,
}

impl ImageDecryptor {
    pub fn new(key: Vec<u8>, iv: Vec<u8>) -> Self {
        Self {
            key: Some(key),
            iv: Some(iv),
        }
    }

    /// Build from configuration; missing key material disables decryption.
    pub fn from_config(config: &DecryptConfig) -> Result<Self> {
        match (&config.key, &config.iv) {
            (Some(key), Some(iv)) => Ok(Self::new(parse_char_codes(key)?, parse_char_codes(iv)?)),
            (None, None) => Ok(Self::default()),
            _ => Err(AppError::config("decrypt.key and decrypt.iv must be set together")),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some() && self.iv.is_some()
    }

    /// Decrypt raw ciphertext.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (Some(key), Some(iv)) = (&self.key, &self.iv) else {
            return Err(AppError::Decrypt("no key configured".into()));
        };
        let mut buffer = data.to_vec();
        let len = match key.len() {
            16 => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|e| AppError::Decrypt(format!("init: {e}")))?
                .decrypt_padded_mut::<Pkcs7>(&mut buffer)
                .map_err(|e| AppError::Decrypt(format!("unpad: {e}")))?
                .len(),
            32 => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|e| AppError::Decrypt(format!("init: {e}")))?
                .decrypt_padded_mut::<Pkcs7>(&mut buffer)
                .map_err(|e| AppError::Decrypt(format!("unpad: {e}")))?
                .len(),
            n => return Err(AppError::Decrypt(format!("unsupported key length {n}"))),
        };
        buffer.truncate(len);
        Ok(buffer)
    }

    /// Return decrypted image bytes, or the input when it is already an
    /// image or decryption does not yield one.
    pub fn decrypt_image(&self, bytes: Vec<u8>) -> Vec<u8> {
        if is_image(&bytes) || !self.is_enabled() {
            return bytes;
        }
        match self.decrypt(&bytes) {
            Ok(plain) if is_image(&plain) => plain,
            Ok(_) => {
                log::debug!("Decrypted payload is not an image, keeping original bytes");
                bytes
            }
            Err(e) => {
                log::debug!("Image decryption failed, keeping original bytes: {}", e);
                bytes
            }
        }
    }
}
