//! Open-time flags, checksum flags and shutdown directions.

use serde::{Deserialize, Serialize};

/// Flags passed to the native open call.
///
/// Built the same way as the other option types: start from `new()` and
/// chain setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenFlags(u64);

impl OpenFlags {
    pub const SNIFF: u64 = 0x0001;
    pub const DROP: u64 = 0x0002;
    pub const RECV_ONLY: u64 = 0x0004;
    pub const SEND_ONLY: u64 = 0x0008;
    pub const NO_INSTALL: u64 = 0x0010;
    pub const FRAGMENTS: u64 = 0x0020;

    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, bit: u64) -> bool {
        self.0 & bit == bit
    }

    const fn with(self, bit: u64, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    /// Copy packets instead of diverting them.
    pub const fn set_sniff(self, on: bool) -> Self {
        self.with(Self::SNIFF, on)
    }

    /// Silently drop matching packets.
    pub const fn set_drop(self, on: bool) -> Self {
        self.with(Self::DROP, on)
    }

    pub const fn set_recv_only(self, on: bool) -> Self {
        self.with(Self::RECV_ONLY, on)
    }

    pub const fn set_send_only(self, on: bool) -> Self {
        self.with(Self::SEND_ONLY, on)
    }

    /// Fail instead of installing the driver when it is missing.
    pub const fn set_no_install(self, on: bool) -> Self {
        self.with(Self::NO_INSTALL, on)
    }

    /// Also capture IP fragments.
    pub const fn set_fragments(self, on: bool) -> Self {
        self.with(Self::FRAGMENTS, on)
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Selects which checksums `calc_checksums` leaves untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumFlags(u64);

impl ChecksumFlags {
    pub const NO_IP: u64 = 1;
    pub const NO_ICMP: u64 = 2;
    pub const NO_ICMPV6: u64 = 4;
    pub const NO_TCP: u64 = 8;
    pub const NO_UDP: u64 = 16;

    /// Recalculate every checksum.
    pub const fn all() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn skip(self, bit: u64) -> Self {
        Self(self.0 | bit)
    }
}

/// Direction(s) closed by `Handle::shutdown`. Values are the native
/// `WINDIVERT_SHUTDOWN_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Shutdown {
    Recv = 1,
    Send = 2,
    Both = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_combine() {
        let flags = OpenFlags::new().set_sniff(true).set_recv_only(true);
        assert_eq!(flags.bits(), 0x5);
        assert!(flags.contains(OpenFlags::SNIFF));
        assert!(!flags.contains(OpenFlags::DROP));

        let flags = flags.set_sniff(false);
        assert_eq!(flags.bits(), OpenFlags::RECV_ONLY);

        let both = OpenFlags::from_bits(OpenFlags::NO_INSTALL) | OpenFlags::new().set_fragments(true);
        assert_eq!(both.bits(), 0x30);
    }

    #[test]
    fn test_checksum_flags() {
        let flags = ChecksumFlags::all()
            .skip(ChecksumFlags::NO_TCP)
            .skip(ChecksumFlags::NO_UDP);
        assert_eq!(flags.bits(), 24);
    }

    #[test]
    fn test_shutdown_values_match_native() {
        assert_eq!(Shutdown::Recv as u32, 1);
        assert_eq!(Shutdown::Send as u32, 2);
        assert_eq!(Shutdown::Both as u32, 3);
    }
}
