//! Typed views over the 64-byte payload of an `Address`.
//!
//! Each view decodes from and encodes into the raw payload at fixed byte
//! offsets, in native byte order, matching the native component's union
//! layout. Nothing here aliases typed structs over the record's memory.

use crate::network::address::Layer;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Size in bytes of the per-layer payload region.
pub const PAYLOAD_LEN: usize = 64;

fn read_u16(buf: &[u8; PAYLOAD_LEN], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&buf[at..at + 2]);
    u16::from_ne_bytes(raw)
}

fn read_u32(buf: &[u8; PAYLOAD_LEN], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_ne_bytes(raw)
}

fn read_u64(buf: &[u8; PAYLOAD_LEN], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(raw)
}

fn read_ip(buf: &[u8; PAYLOAD_LEN], at: usize) -> [u8; 16] {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&buf[at..at + 16]);
    raw
}

fn write(buf: &mut [u8; PAYLOAD_LEN], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}

/// Network and network-forward layer data.
///
/// Process ids are not available at these layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkData {
    pub interface_index: u32,
    pub sub_interface_index: u32,
}

impl NetworkData {
    const IF_IDX: usize = 0;
    const SUB_IF_IDX: usize = 4;

    pub fn decode(buf: &[u8; PAYLOAD_LEN]) -> Self {
        Self {
            interface_index: read_u32(buf, Self::IF_IDX),
            sub_interface_index: read_u32(buf, Self::SUB_IF_IDX),
        }
    }

    pub fn encode(&self, buf: &mut [u8; PAYLOAD_LEN]) {
        write(buf, Self::IF_IDX, &self.interface_index.to_ne_bytes());
        write(buf, Self::SUB_IF_IDX, &self.sub_interface_index.to_ne_bytes());
    }
}

/// Socket and flow layer data.
///
/// Addresses are 16 bytes: native IPv6, or IPv4 mapped into IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketData {
    pub endpoint_id: u64,
    pub parent_endpoint_id: u64,
    pub process_id: u32,
    pub local_address: [u8; 16],
    pub remote_address: [u8; 16],
    pub local_port: u16,
    pub remote_port: u16,
    pub protocol: u8,
}

/// Flow events carry exactly the socket payload.
pub type FlowData = SocketData;

impl SocketData {
    const ENDPOINT: usize = 0;
    const PARENT: usize = 8;
    const PID: usize = 16;
    const LOCAL_ADDR: usize = 20;
    const REMOTE_ADDR: usize = 36;
    const LOCAL_PORT: usize = 52;
    const REMOTE_PORT: usize = 54;
    const PROTOCOL: usize = 56;

    pub fn decode(buf: &[u8; PAYLOAD_LEN]) -> Self {
        Self {
            endpoint_id: read_u64(buf, Self::ENDPOINT),
            parent_endpoint_id: read_u64(buf, Self::PARENT),
            process_id: read_u32(buf, Self::PID),
            local_address: read_ip(buf, Self::LOCAL_ADDR),
            remote_address: read_ip(buf, Self::REMOTE_ADDR),
            local_port: read_u16(buf, Self::LOCAL_PORT),
            remote_port: read_u16(buf, Self::REMOTE_PORT),
            protocol: buf[Self::PROTOCOL],
        }
    }

    pub fn encode(&self, buf: &mut [u8; PAYLOAD_LEN]) {
        write(buf, Self::ENDPOINT, &self.endpoint_id.to_ne_bytes());
        write(buf, Self::PARENT, &self.parent_endpoint_id.to_ne_bytes());
        write(buf, Self::PID, &self.process_id.to_ne_bytes());
        write(buf, Self::LOCAL_ADDR, &self.local_address);
        write(buf, Self::REMOTE_ADDR, &self.remote_address);
        write(buf, Self::LOCAL_PORT, &self.local_port.to_ne_bytes());
        write(buf, Self::REMOTE_PORT, &self.remote_port.to_ne_bytes());
        buf[Self::PROTOCOL] = self.protocol;
    }

    pub fn local_ip(&self) -> IpAddr {
        decode_ip(self.local_address)
    }

    pub fn remote_ip(&self) -> IpAddr {
        decode_ip(self.remote_address)
    }

    pub fn with_local_ip(mut self, ip: IpAddr) -> Self {
        self.local_address = encode_ip(ip);
        self
    }

    pub fn with_remote_ip(mut self, ip: IpAddr) -> Self {
        self.remote_address = encode_ip(ip);
        self
    }
}

// The native component stores each address as four host-order 32-bit words,
// least significant word first.
fn decode_ip(raw: [u8; 16]) -> IpAddr {
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().enumerate() {
        let mut chunk = [0u8; 4];
        chunk.copy_from_slice(&raw[i * 4..i * 4 + 4]);
        *word = u32::from_ne_bytes(chunk);
    }

    if words[3] == 0 && words[2] == 0 && words[1] == 0xffff {
        return IpAddr::V4(Ipv4Addr::from(words[0]));
    }

    let mut octets = [0u8; 16];
    for (i, word) in words.iter().rev().enumerate() {
        octets[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    IpAddr::V6(Ipv6Addr::from(octets))
}

fn encode_ip(ip: IpAddr) -> [u8; 16] {
    let words: [u32; 4] = match ip {
        IpAddr::V4(v4) => [u32::from(v4), 0xffff, 0, 0],
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut words = [0u32; 4];
            for (i, word) in words.iter_mut().rev().enumerate() {
                let mut chunk = [0u8; 4];
                chunk.copy_from_slice(&octets[i * 4..i * 4 + 4]);
                *word = u32::from_be_bytes(chunk);
            }
            words
        }
    };

    let mut raw = [0u8; 16];
    for (i, word) in words.iter().enumerate() {
        raw[i * 4..i * 4 + 4].copy_from_slice(&word.to_ne_bytes());
    }
    raw
}

/// Reflect layer data: describes another handle being opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReflectData {
    pub timestamp: i64,
    pub process_id: u32,
    /// Raw layer tag of the reflected handle
    pub layer: u32,
    pub flags: u64,
    pub priority: i16,
}

impl ReflectData {
    const TIMESTAMP: usize = 0;
    const PID: usize = 8;
    const LAYER: usize = 12;
    const FLAGS: usize = 16;
    const PRIORITY: usize = 24;

    pub fn decode(buf: &[u8; PAYLOAD_LEN]) -> Self {
        Self {
            timestamp: read_u64(buf, Self::TIMESTAMP) as i64,
            process_id: read_u32(buf, Self::PID),
            layer: read_u32(buf, Self::LAYER),
            flags: read_u64(buf, Self::FLAGS),
            priority: read_u16(buf, Self::PRIORITY) as i16,
        }
    }

    pub fn encode(&self, buf: &mut [u8; PAYLOAD_LEN]) {
        write(buf, Self::TIMESTAMP, &self.timestamp.to_ne_bytes());
        write(buf, Self::PID, &self.process_id.to_ne_bytes());
        write(buf, Self::LAYER, &self.layer.to_ne_bytes());
        write(buf, Self::FLAGS, &self.flags.to_ne_bytes());
        write(buf, Self::PRIORITY, &self.priority.to_ne_bytes());
    }

    /// The reflected handle's layer, if the tag is one this crate knows.
    pub fn reflected_layer(&self) -> Option<Layer> {
        Layer::from_raw(self.layer)
    }
}
