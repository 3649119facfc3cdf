//! UDP realtime framing for LED controller firmware.
//!
//! Two payload layouts are supported, chosen per deployment:
//!
//! Legacy (2-byte header):
//! - byte 0: protocol id
//! - byte 1: timeout in seconds
//! - RGB triples
//!
//! Extended (10-byte header):
//! - byte 0: protocol id
//! - byte 1: timeout in seconds
//! - byte 2: sequence number (wraps)
//! - byte 3: option flags
//! - bytes 4-7: reserved, zero
//! - bytes 8-9: payload length, big-endian u16
//! - RGB triples
//!
//! Sends are best-effort. Nothing is read back and nothing is retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::config::TransportConfig;
use crate::installation::Device;

pub const LEGACY_HEADER_LEN: usize = 2;
pub const EXTENDED_HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    #[default]
    Legacy,
    Extended,
}

impl Framing {
    pub fn header_len(self) -> usize {
        match self {
            Framing::Legacy => LEGACY_HEADER_LEN,
            Framing::Extended => EXTENDED_HEADER_LEN,
        }
    }
}

/// Fixed per-deployment header fields.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub framing: Framing,
    pub protocol_id: u8,
    pub timeout_secs: u8,
    pub options: u8,
}

impl From<&TransportConfig> for FrameHeader {
    fn from(config: &TransportConfig) -> Self {
        Self {
            framing: config.framing,
            protocol_id: config.protocol_id,
            timeout_secs: config.timeout_secs,
            options: config.options,
        }
    }
}

/// Builds one datagram. Returns `None` for an extended frame whose payload
/// does not fit the 16-bit length field.
pub fn encode_frame(header: &FrameHeader, sequence: u8, rgb: &[u8]) -> Option<Vec<u8>> {
    let mut buf = Vec::with_capacity(header.framing.header_len() + rgb.len());
    buf.push(header.protocol_id);
    buf.push(header.timeout_secs);

    if header.framing == Framing::Extended {
        let len = u16::try_from(rgb.len()).ok()?;
        buf.push(sequence);
        buf.push(header.options);
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&len.to_be_bytes());
    }

    buf.extend_from_slice(rgb);
    Some(buf)
}

/// Where rendered device frames go once per tick.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Deliver one frame. Implementations swallow their own failures.
    async fn send_frame(&self, device: &Device, rgb: &[u8]);
}

/// Production sink: one socket per engine, resolved addresses cached per IP.
pub struct UdpTransmitter {
    socket: UdpSocket,
    header: FrameHeader,
    port: u16,
    io_timeout: Duration,
    resolve_timeout: Duration,
    addresses: Mutex<HashMap<String, Option<SocketAddr>>>,
    sequences: Mutex<HashMap<String, u8>>,
}

impl UdpTransmitter {
    pub async fn bind(config: &TransportConfig) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding UDP socket for device frames")?;
        info!(
            "UDP transmitter bound to {:?}, port {}, {:?} framing",
            socket.local_addr().ok(),
            config.port,
            config.framing
        );

        Ok(Self {
            socket,
            header: FrameHeader::from(config),
            port: config.port,
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            resolve_timeout: Duration::from_millis(config.resolve_timeout_ms),
            addresses: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves once per IP for the lifetime of the transmitter. Failed and
    /// timed-out lookups are cached too, so a bad address costs one lookup,
    /// not one per frame.
    async fn resolve(&self, ip: &str) -> Option<SocketAddr> {
        if let Some(cached) = self.lock_addresses().get(ip) {
            return *cached;
        }

        let resolved = match ip.parse::<std::net::IpAddr>() {
            Ok(addr) => Some(SocketAddr::new(addr, self.port)),
            Err(_) => {
                let lookup = tokio::net::lookup_host((ip, self.port));
                match tokio::time::timeout(self.resolve_timeout, lookup).await {
                    Ok(Ok(mut addrs)) => addrs.next(),
                    Ok(Err(e)) => {
                        warn!("Failed to resolve device {}: {}", ip, e);
                        None
                    }
                    Err(_) => {
                        warn!("Resolving device {} timed out after {:?}", ip, self.resolve_timeout);
                        None
                    }
                }
            }
        };

        self.lock_addresses().insert(ip.to_string(), resolved);
        resolved
    }

    fn next_sequence(&self, ip: &str) -> u8 {
        let mut sequences = self.sequences.lock().unwrap_or_else(|e| e.into_inner());
        let seq = sequences.entry(ip.to_string()).or_insert(0);
        let current = *seq;
        *seq = seq.wrapping_add(1);
        current
    }

    fn lock_addresses(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<SocketAddr>>> {
        self.addresses.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl FrameSink for UdpTransmitter {
    async fn send_frame(&self, device: &Device, rgb: &[u8]) {
        let Some(addr) = self.resolve(&device.ip).await else {
            return;
        };

        let sequence = self.next_sequence(&device.ip);
        let Some(payload) = encode_frame(&self.header, sequence, rgb) else {
            warn!(
                "Frame for {} is {} bytes, over the extended length limit; skipped",
                device.ip,
                rgb.len()
            );
            return;
        };

        match tokio::time::timeout(self.io_timeout, self.socket.send_to(&payload, addr)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Send to {} failed: {}", addr, e),
            Err(_) => debug!("Send to {} timed out", addr),
        }
    }
}
