use crypto::aes::{cbc_decryptor, cbc_encryptor, KeySize};
use crypto::blockmodes::PkcsPadding;
use crypto::buffer::{BufferResult, ReadBuffer, RefReadBuffer, RefWriteBuffer, WriteBuffer};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{WaError, WaResult};

const IV_LEN: usize = 16;
const HMAC_LEN: usize = 32;

/// Encrypts `plaintext` with AES-256-CBC under a random IV, then signs the
/// resulting ciphertext (IV included) with HMAC-SHA256. Returns
/// `hmac(32) || iv(16) || ciphertext`, matching the on-wire binary envelope.
pub(crate) fn seal(plaintext: &[u8], enc_key: &[u8; 32], mac_key: &[u8; 32]) -> WaResult<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(WaError::Crypto)?;

    let ciphertext = aes_cbc_encrypt(plaintext, enc_key, &iv)?;
    let mut full_ciphertext = Vec::with_capacity(IV_LEN + ciphertext.len());
    full_ciphertext.extend_from_slice(&iv);
    full_ciphertext.extend_from_slice(&ciphertext);

    let key = hmac::SigningKey::new(&hmac::HMAC_SHA256, mac_key);
    let tag = hmac::sign(&key, &full_ciphertext);

    let mut out = Vec::with_capacity(HMAC_LEN + full_ciphertext.len());
    out.extend_from_slice(tag.as_ref());
    out.extend_from_slice(&full_ciphertext);
    Ok(out)
}

/// Verifies and decrypts a `hmac(32) || iv(16) || ciphertext` envelope.
pub(crate) fn open(frame: &[u8], enc_key: &[u8; 32], mac_key: &[u8; 32]) -> WaResult<Vec<u8>> {
    if frame.len() < HMAC_LEN + IV_LEN {
        return Err(WaError::BadMac);
    }
    let (tag, full_ciphertext) = frame.split_at(HMAC_LEN);

    let key = hmac::VerificationKey::new(&hmac::HMAC_SHA256, mac_key);
    hmac::verify(&key, full_ciphertext, tag).map_err(|_| WaError::BadMac)?;

    let (iv, ciphertext) = full_ciphertext.split_at(IV_LEN);
    aes_cbc_decrypt(ciphertext, enc_key, iv)
}

fn aes_cbc_encrypt(data: &[u8], key: &[u8; 32], iv: &[u8]) -> WaResult<Vec<u8>> {
    let mut encryptor = cbc_encryptor(KeySize::KeySize256, key, iv, PkcsPadding);
    let mut out = Vec::new();
    let mut read_buf = RefReadBuffer::new(data);
    let mut buf = [0u8; 4096];
    loop {
        let mut write_buf = RefWriteBuffer::new(&mut buf);
        let result = encryptor
            .encrypt(&mut read_buf, &mut write_buf, true)
            .map_err(|_| WaError::BadPadding)?;
        out.extend(write_buf.take_read_buffer().take_remaining());
        match result {
            BufferResult::BufferUnderflow => break,
            BufferResult::BufferOverflow => continue,
        }
    }
    Ok(out)
}

fn aes_cbc_decrypt(data: &[u8], key: &[u8; 32], iv: &[u8]) -> WaResult<Vec<u8>> {
    let mut decryptor = cbc_decryptor(KeySize::KeySize256, key, iv, PkcsPadding);
    let mut out = Vec::new();
    let mut read_buf = RefReadBuffer::new(data);
    let mut buf = [0u8; 4096];
    loop {
        let mut write_buf = RefWriteBuffer::new(&mut buf);
        let result = decryptor
            .decrypt(&mut read_buf, &mut write_buf, true)
            .map_err(|_| WaError::BadPadding)?;
        out.extend(write_buf.take_read_buffer().take_remaining());
        match result {
            BufferResult::BufferUnderflow => break,
            BufferResult::BufferOverflow => continue,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_undoes_seal() {
        let enc_key = [7u8; 32];
        let mac_key = [9u8; 32];
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let sealed = seal(plaintext, &enc_key, &mac_key).unwrap();
        let opened = open(&sealed, &enc_key, &mac_key).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_frame_fails_mac() {
        let enc_key = [1u8; 32];
        let mac_key = [2u8; 32];
        let mut sealed = seal(b"hello", &enc_key, &mac_key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(open(&sealed, &enc_key, &mac_key).is_err());
    }

    #[test]
    fn zero_keys_ciphertext_is_block_aligned() {
        let enc_key = [0u8; 32];
        let mac_key = [0u8; 32];
        let sealed = seal(b"[\"action\",{},[]]", &enc_key, &mac_key).unwrap();
        let ciphertext_len = sealed.len() - HMAC_LEN - IV_LEN;
        assert_eq!(ciphertext_len % 16, 0);
    }
}
