//! The fixed-layout address record exchanged with the native component.
//!
//! Every receive fills one `Address` per packet or event, and every send
//! needs one describing where the packet is injected. The record is 80 bytes:
//! a timestamp, a layer tag, an event tag, a flags byte, a shifted length
//! word, and a 64-byte payload whose meaning depends on the layer tag.

use crate::error::{DivertError, Result};
use crate::network::payload::{NetworkData, ReflectData, SocketData, PAYLOAD_LEN};

/// Size in bytes of one `Address` as the native component lays it out.
pub const ADDRESS_LEN: usize = 80;

/// Bits of `Address::length` below the stored length.
const LENGTH_SHIFT: u32 = 12;

/// Largest logical length that survives the 12-bit shift.
pub const LENGTH_MAX: u32 = u32::MAX >> LENGTH_SHIFT;

/// Interception point a handle is opened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Layer {
    /// Packets to and from the local machine
    #[default]
    Network = 0,
    /// Packets passing through the local machine
    NetworkForward = 1,
    /// Flow established/deleted events
    Flow = 2,
    /// Socket operation events
    Socket = 3,
    /// Events about other WinDivert handles
    Reflect = 4,
}

impl Layer {
    /// Decodes a wire tag, rejecting values the native component never emits.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Network),
            1 => Some(Self::NetworkForward),
            2 => Some(Self::Flow),
            3 => Some(Self::Socket),
            4 => Some(Self::Reflect),
            _ => None,
        }
    }

    /// Whether packets at this layer can be injected with `send`.
    pub fn can_inject(self) -> bool {
        matches!(self, Self::Network | Self::NetworkForward)
    }
}

/// Occurrence reported within a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Event {
    #[default]
    NetworkPacket = 0,
    FlowEstablished = 1,
    FlowDeleted = 2,
    SocketBind = 3,
    SocketConnect = 4,
    SocketListen = 5,
    SocketAccept = 6,
    SocketClose = 7,
    ReflectOpen = 8,
    ReflectClose = 9,
}

impl Event {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::NetworkPacket,
            1 => Self::FlowEstablished,
            2 => Self::FlowDeleted,
            3 => Self::SocketBind,
            4 => Self::SocketConnect,
            5 => Self::SocketListen,
            6 => Self::SocketAccept,
            7 => Self::SocketClose,
            8 => Self::ReflectOpen,
            9 => Self::ReflectClose,
            _ => return None,
        })
    }

    /// The layer that reports this event.
    pub fn layer(self) -> Layer {
        match self {
            Self::NetworkPacket => Layer::Network,
            Self::FlowEstablished | Self::FlowDeleted => Layer::Flow,
            Self::SocketBind
            | Self::SocketConnect
            | Self::SocketListen
            | Self::SocketAccept
            | Self::SocketClose => Layer::Socket,
            Self::ReflectOpen | Self::ReflectClose => Layer::Reflect,
        }
    }
}

/// Per-packet flag bits of an `Address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressFlags(u8);

impl AddressFlags {
    pub const SNIFFED: u8 = 0x01;
    pub const OUTBOUND: u8 = 0x02;
    pub const LOOPBACK: u8 = 0x04;
    pub const IMPOSTOR: u8 = 0x08;
    pub const IPV6: u8 = 0x10;
    pub const IP_CHECKSUM: u8 = 0x20;
    pub const TCP_CHECKSUM: u8 = 0x40;
    pub const UDP_CHECKSUM: u8 = 0x80;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn is_outbound(self) -> bool {
        self.contains(Self::OUTBOUND)
    }

    pub fn is_loopback(self) -> bool {
        self.contains(Self::LOOPBACK)
    }

    pub fn is_ipv6(self) -> bool {
        self.contains(Self::IPV6)
    }
}

/// One capture/inject address record.
///
/// The layer and event tags are stored as raw bytes so that a record filled by
/// the native component never holds an invalid Rust enum; the typed accessors
/// decode them. Payload views come in two flavours: `network()`, `socket()`,
/// `flow()` and `reflect()` reinterpret the payload unconditionally, while the
/// `try_*` variants fail with `LayerMismatch` when the tag disagrees.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Address {
    /// Performance-counter timestamp taken by the native component
    pub timestamp: i64,
    layer: u8,
    event: u8,
    flags: u8,
    reserved: u8,
    length: u32,
    payload: [u8; PAYLOAD_LEN],
}

const _: () = assert!(std::mem::size_of::<Address>() == ADDRESS_LEN);

impl Default for Address {
    fn default() -> Self {
        Self {
            timestamp: 0,
            layer: Layer::Network as u8,
            event: Event::NetworkPacket as u8,
            flags: 0,
            reserved: 0,
            length: 0,
            payload: [0; PAYLOAD_LEN],
        }
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("timestamp", &self.timestamp)
            .field("layer", &self.raw_layer())
            .field("event", &self.raw_event())
            .field("flags", &self.flags)
            .field("length", &self.length())
            .finish_non_exhaustive()
    }
}

impl Address {
    /// Creates a zeroed record tagged with `layer`.
    pub fn new(layer: Layer) -> Self {
        let mut address = Self::default();
        address.set_layer(layer);
        address
    }

    /// The raw layer tag, exactly as the native component wrote it.
    pub fn raw_layer(&self) -> u8 {
        self.layer
    }

    /// The decoded layer tag. Unknown tags decode as `Network`; callers that
    /// pick a payload view from the tag should use `known_layer` instead.
    pub fn layer(&self) -> Layer {
        self.known_layer().unwrap_or_default()
    }

    /// The layer tag, or `None` when the native component wrote one this
    /// crate does not know.
    pub fn known_layer(&self) -> Option<Layer> {
        Layer::from_raw(u32::from(self.layer))
    }

    pub fn set_layer(&mut self, layer: Layer) {
        self.layer = layer as u8;
    }

    pub fn raw_event(&self) -> u8 {
        self.event
    }

    /// The decoded event tag. Unknown tags decode as `NetworkPacket`.
    pub fn event(&self) -> Event {
        self.known_event().unwrap_or_default()
    }

    pub fn known_event(&self) -> Option<Event> {
        Event::from_raw(self.event)
    }

    pub fn set_event(&mut self, event: Event) {
        self.event = event as u8;
    }

    pub fn flags(&self) -> AddressFlags {
        AddressFlags::from_bits(self.flags)
    }

    pub fn set_flags(&mut self, flags: AddressFlags) {
        self.flags = flags.bits();
    }

    /// Logical length: the stored word shifted right by 12 bits.
    pub fn length(&self) -> u32 {
        self.length >> LENGTH_SHIFT
    }

    /// Stores `n << 12`.
    ///
    /// Values above `LENGTH_MAX` are silently truncated: their top 12 bits
    /// fall off the stored word.
    pub fn set_length(&mut self, n: u32) {
        self.length = n << LENGTH_SHIFT;
    }

    /// The raw 64-byte payload region.
    pub fn payload(&self) -> &[u8; PAYLOAD_LEN] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8; PAYLOAD_LEN] {
        &mut self.payload
    }

    fn expect_layer(&self, accepted: &[Layer], expected: Layer) -> Result<()> {
        let actual = self.layer();
        if Layer::from_raw(u32::from(self.layer)).is_some() && accepted.contains(&actual) {
            return Ok(());
        }
        Err(DivertError::LayerMismatch { expected, actual })
    }

    /// Reads the payload as network-layer data, whatever the tag says.
    pub fn network(&self) -> NetworkData {
        NetworkData::decode(&self.payload)
    }

    /// Reads the payload as network-layer data if the record is tagged
    /// `Network` or `NetworkForward`.
    pub fn try_network(&self) -> Result<NetworkData> {
        self.expect_layer(&[Layer::Network, Layer::NetworkForward], Layer::Network)?;
        Ok(self.network())
    }

    pub fn set_network(&mut self, data: &NetworkData) {
        data.encode(&mut self.payload);
    }

    /// Reads the payload as socket-layer data, whatever the tag says.
    pub fn socket(&self) -> SocketData {
        SocketData::decode(&self.payload)
    }

    pub fn try_socket(&self) -> Result<SocketData> {
        self.expect_layer(&[Layer::Socket], Layer::Socket)?;
        Ok(self.socket())
    }

    pub fn set_socket(&mut self, data: &SocketData) {
        data.encode(&mut self.payload);
    }

    /// Reads the payload as flow-layer data, whatever the tag says.
    pub fn flow(&self) -> SocketData {
        SocketData::decode(&self.payload)
    }

    pub fn try_flow(&self) -> Result<SocketData> {
        self.expect_layer(&[Layer::Flow], Layer::Flow)?;
        Ok(self.flow())
    }

    pub fn set_flow(&mut self, data: &SocketData) {
        data.encode(&mut self.payload);
    }

    /// Reads the payload as reflect-layer data, whatever the tag says.
    pub fn reflect(&self) -> ReflectData {
        ReflectData::decode(&self.payload)
    }

    pub fn try_reflect(&self) -> Result<ReflectData> {
        self.expect_layer(&[Layer::Reflect], Layer::Reflect)?;
        Ok(self.reflect())
    }

    pub fn set_reflect(&mut self, data: &ReflectData) {
        data.encode(&mut self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_layout_matches_native_record() {
        assert_eq!(std::mem::size_of::<Address>(), 80);
        assert_eq!(std::mem::align_of::<Address>(), 8);
    }

    #[test]
    fn test_length_round_trip() {
        let mut address = Address::default();
        for n in [0, 1, 1500, 0xffff, LENGTH_MAX] {
            address.set_length(n);
            assert_eq!(address.length(), n);
        }
    }

    #[test]
    fn test_length_truncates_above_range() {
        let mut address = Address::default();
        address.set_length(LENGTH_MAX + 1);
        assert_eq!(address.length(), 0);

        address.set_length(0xfff0_0042);
        assert_eq!(address.length(), 0x42);
    }

    #[test]
    fn test_layer_and_event_round_trip() {
        let mut address = Address::default();
        for layer in [
            Layer::Network,
            Layer::NetworkForward,
            Layer::Flow,
            Layer::Socket,
            Layer::Reflect,
        ] {
            address.set_layer(layer);
            assert_eq!(address.layer(), layer);
        }

        address.set_event(Event::SocketAccept);
        assert_eq!(address.event(), Event::SocketAccept);
        assert_eq!(address.event().layer(), Layer::Socket);
    }

    #[test]
    fn test_checked_view_matches_tag() {
        let mut address = Address::new(Layer::Socket);
        let data = SocketData {
            endpoint_id: 7,
            parent_endpoint_id: 3,
            process_id: 4242,
            local_port: 5353,
            remote_port: 443,
            protocol: 6,
            ..SocketData::default()
        }
        .with_local_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        address.set_socket(&data);

        assert_eq!(address.try_socket(), Ok(data));
        assert_eq!(
            address.try_flow(),
            Err(DivertError::LayerMismatch {
                expected: Layer::Flow,
                actual: Layer::Socket,
            })
        );
        assert!(address.try_network().is_err());
        assert!(address.try_reflect().is_err());
    }

    #[test]
    fn test_unchecked_view_reinterprets_payload() {
        let mut address = Address::new(Layer::Socket);
        address.set_network(&NetworkData {
            interface_index: 12,
            sub_interface_index: 1,
        });

        // Still tagged Socket: the unchecked view reads the same bytes.
        let socket = address.socket();
        assert_eq!(socket.endpoint_id, 12 | (1 << 32));
        assert_eq!(address.network().interface_index, 12);
    }

    #[test]
    fn test_forward_layer_accepts_network_view() {
        let mut address = Address::new(Layer::NetworkForward);
        address.set_network(&NetworkData {
            interface_index: 4,
            sub_interface_index: 0,
        });
        assert_eq!(address.try_network().unwrap().interface_index, 4);
    }

    #[test]
    fn test_unknown_raw_layer_rejected_by_checked_views() {
        let mut address = Address::default();
        address.layer = 9;
        assert_eq!(address.raw_layer(), 9);
        assert!(address.try_network().is_err());
    }

    #[test]
    fn test_unknown_tags_are_not_known() {
        let mut address = Address::new(Layer::Flow);
        assert_eq!(address.known_layer(), Some(Layer::Flow));

        address.layer = 9;
        address.event = 200;
        assert_eq!(address.known_layer(), None);
        assert_eq!(address.known_event(), None);
        assert_eq!(address.layer(), Layer::Network);
        assert_eq!(address.event(), Event::NetworkPacket);
    }

    #[test]
    fn test_flags() {
        let mut flags = AddressFlags::default();
        flags.set(AddressFlags::OUTBOUND, true);
        flags.set(AddressFlags::IPV6, true);
        assert!(flags.is_outbound());
        assert!(flags.is_ipv6());
        assert!(!flags.is_loopback());

        let mut address = Address::default();
        address.set_flags(flags);
        assert_eq!(address.flags().bits(), 0x12);
    }
}
