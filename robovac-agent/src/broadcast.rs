//! Discovery broadcast decoding
//!
//! Devices announce themselves on UDP 6666 (plaintext) and 6667 (encrypted).
//! Each datagram is a 20-byte header, a body and an 8-byte trailer. Encrypted
//! bodies are AES-128-ECB under a fixed, publicly known key with PKCS#7
//! padding; the body itself is a JSON object describing the device.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use serde_json::{Map, Value};

use crate::error::{Result, RobovacError};

/// MD5 of the vendor seed `yGAdlopoPVldABfn`.
pub const BROADCAST_KEY: [u8; 16] = [
    0x6c, 0x1e, 0xc8, 0xe2, 0xbb, 0x9b, 0xb5, 0x9a, 0xb5, 0x0b, 0x0d, 0xaf, 0x64, 0x9b, 0x41,
    0x0a,
];

pub const HEADER_LEN: usize = 20;
pub const TRAILER_LEN: usize = 8;

const BLOCK_LEN: usize = 16;

/// Strip the fixed framing from a datagram. `None` when too short to hold any body.
pub fn strip_framing(datagram: &[u8]) -> Option<&[u8]> {
    if datagram.len() <= HEADER_LEN + TRAILER_LEN {
        return None;
    }
    Some(&datagram[HEADER_LEN..datagram.len() - TRAILER_LEN])
}

/// AES-128-ECB decrypt and unpad a broadcast body, yielding UTF-8 text.
pub fn decrypt_body(body: &[u8]) -> Result<String> {
    let plain = ecb_decrypt(body, &BROADCAST_KEY)?;
    String::from_utf8(plain).map_err(|e| RobovacError::Decode(format!("body is not UTF-8: {e}")))
}

/// Decode one datagram into its JSON record.
///
/// Tries the encrypted variant first, then the stripped body as plaintext.
/// Returns `None` for anything that is neither; foreign traffic on the same
/// ports is expected.
pub fn decode_datagram(datagram: &[u8]) -> Option<Map<String, Value>> {
    let body = strip_framing(datagram)?;

    if let Some(fields) = decrypt_body(body).ok().as_deref().and_then(parse_record) {
        return Some(fields);
    }
    std::str::from_utf8(body).ok().and_then(parse_record)
}

fn parse_record(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => Some(fields),
        _ => None,
    }
}

/// AES-128-ECB decryption followed by PKCS#7 unpadding.
pub fn ecb_decrypt(ciphertext: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(RobovacError::Decode(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
            ciphertext.len()
        )));
    }

    let cipher = Aes128::new(key.into());
    let mut output = ciphertext.to_vec();
    for chunk in output.chunks_mut(BLOCK_LEN) {
        cipher.decrypt_block(chunk.into());
    }

    let pad = usize::from(output[output.len() - 1]);
    if pad == 0 || pad > BLOCK_LEN || pad > output.len() {
        return Err(RobovacError::Decode(format!("invalid padding length {pad}")));
    }
    output.truncate(output.len() - pad);
    Ok(output)
}

/// PKCS#7 padding followed by AES-128-ECB encryption.
pub fn ecb_encrypt(plaintext: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let pad = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
    let mut output = Vec::with_capacity(plaintext.len() + pad);
    output.extend_from_slice(plaintext);
    output.resize(plaintext.len() + pad, pad as u8);

    let cipher = Aes128::new(key.into());
    for chunk in output.chunks_mut(BLOCK_LEN) {
        cipher.encrypt_block(chunk.into());
    }
    output
}

/// Encrypt a plaintext body under the broadcast key. Devices do this; the
/// devkit uses it to forge announcements.
pub fn encrypt_body(plaintext: &[u8]) -> Vec<u8> {
    ecb_encrypt(plaintext, &BROADCAST_KEY)
}
