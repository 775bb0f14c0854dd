//! Vendor LAN protocol, version 3.3
//!
//! Frames are `0x000055AA | seq | command | length | payload | crc32 | 0x0000AA55`
//! with big-endian integers. `length` counts the payload plus the CRC and
//! suffix. Payloads are AES-128-ECB under the device's local key. CONTROL
//! payloads carry a 15-byte `3.3` version header in front of the ciphertext;
//! device replies start with a 4-byte return code.
//!
//! One TCP connection is opened per operation, bounded by a timeout.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{DeviceEndpoint, LocalTransport, TransportConnector};
use crate::broadcast::{ecb_decrypt, ecb_encrypt};
use crate::dps::{DataPointSnapshot, DpsBatch};
use crate::error::{Result, RobovacError};

pub const DEFAULT_PORT: u16 = 6668;

const PREFIX: u32 = 0x0000_55AA;
const SUFFIX: u32 = 0x0000_AA55;
const HEADER_LEN: usize = 16;
const FOOTER_LEN: usize = 8;
const MAX_FRAME_LEN: usize = 64 * 1024;
const RETCODE_LEN: usize = 4;
const VERSION: &[u8] = b"3.3";
const VERSION_HEADER_LEN: usize = 15;
/// Frames read per operation before giving up on a useful reply.
const MAX_REPLIES: usize = 4;

/// Frame command numbers.
pub mod command {
    pub const CONTROL: u32 = 0x07;
    pub const STATUS: u32 = 0x08;
    pub const HEART_BEAT: u32 = 0x09;
    pub const DP_QUERY: u32 = 0x0a;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u32,
    pub command: u32,
    pub payload: Vec<u8>,
}

pub fn encode_frame(seq: u32, command: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER_LEN);
    buf.extend_from_slice(&PREFIX.to_be_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&command.to_be_bytes());
    buf.extend_from_slice(&((payload.len() + FOOTER_LEN) as u32).to_be_bytes());
    buf.extend_from_slice(payload);

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&SUFFIX.to_be_bytes());
    buf
}

/// Decode one complete frame, checking prefix, length, CRC and suffix.
pub fn decode_frame(buf: &[u8]) -> Result<Frame> {
    if buf.len() < HEADER_LEN + FOOTER_LEN {
        return Err(RobovacError::transport(format!(
            "frame too short: {} bytes",
            buf.len()
        )));
    }
    if be_u32(&buf[0..4]) != PREFIX {
        return Err(RobovacError::transport("bad frame prefix"));
    }

    let seq = be_u32(&buf[4..8]);
    let command = be_u32(&buf[8..12]);
    let declared = be_u32(&buf[12..16]) as usize;
    if declared < FOOTER_LEN || buf.len() != HEADER_LEN + declared {
        return Err(RobovacError::transport(format!(
            "frame length {declared} does not match {} received bytes",
            buf.len()
        )));
    }

    let payload_end = buf.len() - FOOTER_LEN;
    let crc = be_u32(&buf[payload_end..payload_end + 4]);
    if crc != crc32fast::hash(&buf[..payload_end]) {
        return Err(RobovacError::transport("frame CRC mismatch"));
    }
    if be_u32(&buf[payload_end + 4..]) != SUFFIX {
        return Err(RobovacError::transport("bad frame suffix"));
    }

    Ok(Frame {
        seq,
        command,
        payload: buf[HEADER_LEN..payload_end].to_vec(),
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Prefix a ciphertext with the `3.3` version header used on CONTROL frames.
pub fn with_version_header(ciphertext: Vec<u8>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(VERSION_HEADER_LEN + ciphertext.len());
    payload.extend_from_slice(VERSION);
    payload.resize(VERSION_HEADER_LEN, 0);
    payload.extend(ciphertext);
    payload
}

/// Parse a device reply payload. `Ok(None)` is an empty acknowledgement.
pub fn parse_reply(payload: &[u8], key: &[u8; 16]) -> Result<Option<Value>> {
    if payload.len() < RETCODE_LEN {
        return Err(RobovacError::transport("reply without return code"));
    }
    let retcode = be_u32(&payload[..RETCODE_LEN]);
    if retcode != 0 {
        return Err(RobovacError::transport(format!(
            "device returned code {retcode}"
        )));
    }

    let mut body = &payload[RETCODE_LEN..];
    if body.starts_with(VERSION) && body.len() >= VERSION_HEADER_LEN {
        body = &body[VERSION_HEADER_LEN..];
    }
    if body.is_empty() {
        return Ok(None);
    }

    let plain = ecb_decrypt(body, key).map_err(|e| {
        RobovacError::transport(format!("cannot decrypt reply, wrong local key? {e}"))
    })?;
    let value = serde_json::from_slice(&plain)
        .map_err(|e| RobovacError::transport(format!("reply is not JSON: {e}")))?;
    Ok(Some(value))
}

/// v3.3 client for one device.
pub struct TuyaTransport {
    endpoint: DeviceEndpoint,
    key: [u8; 16],
    port: u16,
    timeout: Duration,
    seq: u32,
}

impl TuyaTransport {
    pub fn new(endpoint: DeviceEndpoint, port: u16, timeout: Duration) -> Result<Self> {
        let key: [u8; 16] = endpoint.local_key.as_bytes().try_into().map_err(|_| {
            RobovacError::Config(format!(
                "local key for {} must be 16 bytes",
                endpoint.device_id
            ))
        })?;

        Ok(Self {
            endpoint,
            key,
            port,
            timeout,
            seq: 0,
        })
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    fn timestamp() -> String {
        chrono::Utc::now().timestamp().to_string()
    }

    fn query_payload(&self) -> Result<Vec<u8>> {
        let id = &self.endpoint.device_id;
        let body = json!({
            "gwId": id,
            "devId": id,
            "uid": id,
            "t": Self::timestamp(),
        });
        Ok(ecb_encrypt(&serde_json::to_vec(&body)?, &self.key))
    }

    fn control_payload(&self, batch: &DpsBatch) -> Result<Vec<u8>> {
        let id = &self.endpoint.device_id;
        let body = json!({
            "devId": id,
            "uid": id,
            "t": Self::timestamp(),
            "dps": batch,
        });
        Ok(with_version_header(ecb_encrypt(
            &serde_json::to_vec(&body)?,
            &self.key,
        )))
    }

    /// Send one request and collect replies until `accept` yields a result.
    async fn exchange<T>(
        &mut self,
        command: u32,
        payload: Vec<u8>,
        accept: impl Fn(u32, Option<Value>) -> Option<T>,
    ) -> Result<T> {
        self.seq = self.seq.wrapping_add(1);
        let address = (self.endpoint.ip_address.as_str(), self.port);

        let mut stream = timeout(self.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| self.failure("connect timed out"))?
            .map_err(|e| self.failure(format!("connect failed: {e}")))?;

        let frame = encode_frame(self.seq, command, &payload);
        timeout(self.timeout, stream.write_all(&frame))
            .await
            .map_err(|_| self.failure("send timed out"))?
            .map_err(|e| self.failure(format!("send failed: {e}")))?;

        for _ in 0..MAX_REPLIES {
            let reply = timeout(self.timeout, read_frame(&mut stream))
                .await
                .map_err(|_| self.failure("no reply before timeout"))??;

            debug!(
                "Frame from {}: command {:#04x}, {} bytes",
                self.endpoint.device_id,
                reply.command,
                reply.payload.len()
            );
            if reply.command == command::HEART_BEAT {
                continue;
            }
            let value = parse_reply(&reply.payload, &self.key)?;
            if let Some(result) = accept(reply.command, value) {
                return Ok(result);
            }
        }

        Err(self.failure("no usable reply"))
    }

    fn failure(&self, message: impl std::fmt::Display) -> RobovacError {
        RobovacError::transport(format!(
            "{} ({}): {message}",
            self.endpoint.device_id, self.endpoint.ip_address
        ))
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| RobovacError::transport(format!("read failed: {e}")))?;

    let declared = be_u32(&header[12..16]) as usize;
    if declared > MAX_FRAME_LEN {
        return Err(RobovacError::transport(format!(
            "frame length {declared} exceeds limit"
        )));
    }

    let mut buf = header.to_vec();
    buf.resize(HEADER_LEN + declared, 0);
    stream
        .read_exact(&mut buf[HEADER_LEN..])
        .await
        .map_err(|e| RobovacError::transport(format!("read failed: {e}")))?;
    decode_frame(&buf)
}

fn dps_of(value: Option<Value>) -> Option<DataPointSnapshot> {
    let dps = value?.get("dps")?.clone();
    serde_json::from_value(dps).ok()
}

impl LocalTransport for TuyaTransport {
    async fn read(&mut self) -> Result<DataPointSnapshot> {
        let payload = self.query_payload()?;
        self.exchange(command::DP_QUERY, payload, |_, value| dps_of(value))
            .await
    }

    async fn write(&mut self, batch: DpsBatch) -> Result<()> {
        let payload = self.control_payload(&batch)?;
        // Any error-free reply acknowledges the write; status pushes count too.
        self.exchange(command::CONTROL, payload, |_, _| Some(()))
            .await
    }
}

/// Builds [`TuyaTransport`]s on a fixed port and timeout.
#[derive(Debug, Clone)]
pub struct TuyaConnector {
    pub port: u16,
    pub timeout: Duration,
}

impl TransportConnector for TuyaConnector {
    type Transport = TuyaTransport;

    fn connect(&self, endpoint: &DeviceEndpoint) -> Result<TuyaTransport> {
        TuyaTransport::new(endpoint.clone(), self.port, self.timeout)
    }
}
