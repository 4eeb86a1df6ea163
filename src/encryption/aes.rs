//! AES-CBC helpers for the standard security handler.
//!
//! Object data uses PKCS#7 padding with the IV prepended; key-wrapping
//! steps of revisions 5 and 6 use raw CBC without padding.

use crate::error::{Error, Result};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};

fn cipher_error<E: std::fmt::Debug>(e: E) -> Error {
    Error::Encryption(format!("AES failure: {:?}", e))
}

/// CBC-encrypt block-aligned data without padding.
pub fn cbc_encrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 16 != 0 {
        return Err(Error::Encryption("unpadded AES input must be block aligned".into()));
    }
    let mut buffer = data.to_vec();
    let len = buffer.len();
    match key.len() {
        16 => {
            cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(cipher_error)?
                .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
                .map_err(cipher_error)?;
        },
        32 => {
            cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(cipher_error)?
                .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
                .map_err(cipher_error)?;
        },
        other => return Err(Error::Encryption(format!("invalid AES key length {}", other))),
    }
    Ok(buffer)
}

/// CBC-decrypt block-aligned data without removing padding.
pub fn cbc_decrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 16 != 0 {
        return Err(Error::Encryption("AES ciphertext must be block aligned".into()));
    }
    let mut buffer = data.to_vec();
    match key.len() {
        16 => {
            cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(cipher_error)?
                .decrypt_padded_mut::<NoPadding>(&mut buffer)
                .map_err(cipher_error)?;
        },
        32 => {
            cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(cipher_error)?
                .decrypt_padded_mut::<NoPadding>(&mut buffer)
                .map_err(cipher_error)?;
        },
        other => return Err(Error::Encryption(format!("invalid AES key length {}", other))),
    }
    Ok(buffer)
}

/// Encrypt object data: random IV, PKCS#7 padding, IV prepended.
pub fn encrypt_object_data(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let iv: [u8; 16] = rand::random();
    let pad = 16 - data.len() % 16;
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat(pad as u8).take(pad));
    let mut out = iv.to_vec();
    out.extend(cbc_encrypt_raw(key, &iv, &padded)?);
    Ok(out)
}

/// Decrypt object data produced by [`encrypt_object_data`].
pub fn decrypt_object_data(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 16 {
        return Err(Error::Encryption("AES data shorter than its IV".into()));
    }
    let (iv, body) = data.split_at(16);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut plain = cbc_decrypt_raw(key, iv, body)?;
    let pad = plain.last().copied().unwrap_or(0) as usize;
    if pad == 0 || pad > 16 || pad > plain.len() || !plain[plain.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(Error::Encryption("invalid PKCS#7 padding".into()));
    }
    plain.truncate(plain.len() - pad);
    Ok(plain)
}
