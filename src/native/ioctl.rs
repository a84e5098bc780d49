//! Device control codes of the WinDivert driver.
//!
//! The user-mode library talks to the driver through these codes. Nothing in
//! this crate issues them; the table is exposed for tooling that inspects or
//! labels driver traffic.

use std::fmt;

pub const FILE_DEVICE_NETWORK: u32 = 0x12;

pub const METHOD_IN_DIRECT: u32 = 1;
pub const METHOD_OUT_DIRECT: u32 = 2;

pub const FILE_READ_DATA: u32 = 1;
pub const FILE_WRITE_DATA: u32 = 2;

/// A Win32 `CTL_CODE` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtlCode(pub u32);

/// Packs the four `CTL_CODE` fields.
pub const fn ctl_code(device: u32, function: u32, method: u32, access: u32) -> CtlCode {
    CtlCode((device << 16) | (access << 14) | (function << 2) | method)
}

const READ_WRITE: u32 = FILE_READ_DATA | FILE_WRITE_DATA;

pub const INITIALIZE: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x921, METHOD_OUT_DIRECT, READ_WRITE);
pub const STARTUP: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x922, METHOD_IN_DIRECT, READ_WRITE);
pub const RECV: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x923, METHOD_OUT_DIRECT, FILE_READ_DATA);
pub const SEND: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x924, METHOD_IN_DIRECT, READ_WRITE);
pub const SET_PARAM: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x925, METHOD_IN_DIRECT, READ_WRITE);
pub const GET_PARAM: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x926, METHOD_OUT_DIRECT, FILE_READ_DATA);
pub const SHUTDOWN: CtlCode = ctl_code(FILE_DEVICE_NETWORK, 0x927, METHOD_IN_DIRECT, READ_WRITE);

impl CtlCode {
    pub fn device(self) -> u32 {
        self.0 >> 16
    }

    pub fn access(self) -> u32 {
        (self.0 >> 14) & 0x3
    }

    pub fn function(self) -> u32 {
        (self.0 >> 2) & 0xfff
    }

    pub fn method(self) -> u32 {
        self.0 & 0x3
    }

    /// Symbolic name of a WinDivert code.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            INITIALIZE => "IOCTL_WINDIVERT_INITIALIZE",
            STARTUP => "IOCTL_WINDIVERT_STARTUP",
            RECV => "IOCTL_WINDIVERT_RECV",
            SEND => "IOCTL_WINDIVERT_SEND",
            SET_PARAM => "IOCTL_WINDIVERT_SET_PARAM",
            GET_PARAM => "IOCTL_WINDIVERT_GET_PARAM",
            SHUTDOWN => "IOCTL_WINDIVERT_SHUTDOWN",
            _ => return None,
        })
    }
}

impl fmt::Display for CtlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(INITIALIZE.0, 0x12E486);
        assert_eq!(RECV.0, 0x12648E);
        assert_eq!(SHUTDOWN.0, 0x12E49D);
    }

    #[test]
    fn test_fields_unpack() {
        assert_eq!(SEND.device(), FILE_DEVICE_NETWORK);
        assert_eq!(SEND.function(), 0x924);
        assert_eq!(SEND.method(), METHOD_IN_DIRECT);
        assert_eq!(GET_PARAM.access(), FILE_READ_DATA);
    }

    #[test]
    fn test_display() {
        assert_eq!(STARTUP.to_string(), "IOCTL_WINDIVERT_STARTUP");
        assert_eq!(CtlCode(0x10).to_string(), "0x10");
    }
}
