//! Forged discovery announcements
//!
//! Real devices wrap the announcement in a LAN protocol frame: 16-byte frame
//! header, 4-byte return code, body, CRC and suffix. That is exactly the
//! 20-byte header and 8-byte trailer the discovery decoder strips.

use robovac_agent::broadcast;
use robovac_agent::transport::tuya::encode_frame;
use serde_json::{json, Value};

/// Frame command used by plaintext announcements on port 6666.
pub const UDP_PLAINTEXT: u32 = 0x12;
/// Frame command used by encrypted announcements on port 6667.
pub const UDP_ENCRYPTED: u32 = 0x13;

/// Typical announcement fields for an S1 Pro.
pub fn announcement(device_id: &str, ip: &str) -> Value {
    json!({
        "ip": ip,
        "gwId": device_id,
        "active": 2,
        "ability": 0,
        "mode": 0,
        "encrypt": true,
        "productKey": "lnrjpbuwfd1tmqkv",
        "version": "3.3",
    })
}

fn framed(command: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(body);
    encode_frame(0, command, &payload)
}

pub fn plaintext_datagram(fields: &Value) -> Vec<u8> {
    framed(UDP_PLAINTEXT, fields.to_string().as_bytes())
}

pub fn encrypted_datagram(fields: &Value) -> Vec<u8> {
    let body = broadcast::encrypt_body(fields.to_string().as_bytes());
    framed(UDP_ENCRYPTED, &body)
}
