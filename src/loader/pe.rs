//! Minimal PE header checks for in-memory module images.
//!
//! Only what is needed to reject bytes that can never load into this
//! process: the DOS and PE signatures, the machine type and the DLL bit.

use crate::error::{DivertError, Result};

pub const MACHINE_I386: u16 = 0x014c;
pub const MACHINE_AMD64: u16 = 0x8664;
pub const MACHINE_ARM64: u16 = 0xaa64;

const DOS_SIGNATURE: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const E_LFANEW_OFFSET: usize = 0x3c;
const FILE_HEADER_LEN: usize = 20;
const IMAGE_FILE_DLL: u16 = 0x2000;

/// What the header says about an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeImage {
    pub machine: u16,
    pub characteristics: u16,
}

impl PeImage {
    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }
}

/// Machine type a module must have to load into this process.
pub fn host_machine() -> Option<u16> {
    if cfg!(target_arch = "x86_64") {
        Some(MACHINE_AMD64)
    } else if cfg!(target_arch = "x86") {
        Some(MACHINE_I386)
    } else if cfg!(target_arch = "aarch64") {
        Some(MACHINE_ARM64)
    } else {
        None
    }
}

fn u16_at(bytes: &[u8], at: usize) -> Option<u16> {
    let raw = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn u32_at(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Parses the headers of `bytes` without checking the machine type.
pub fn parse_header(bytes: &[u8]) -> Result<PeImage> {
    let malformed = |what: &str| DivertError::MalformedModule(what.to_string());

    if bytes.get(..2) != Some(&DOS_SIGNATURE[..]) {
        return Err(malformed("missing DOS signature"));
    }

    let pe_offset = u32_at(bytes, E_LFANEW_OFFSET).ok_or_else(|| malformed("truncated DOS header"))? as usize;
    let file_header = pe_offset
        .checked_add(PE_SIGNATURE.len())
        .ok_or_else(|| malformed("PE header offset out of range"))?;
    if bytes.get(pe_offset..file_header) != Some(&PE_SIGNATURE[..]) {
        return Err(malformed("missing PE signature"));
    }

    if bytes.len() < file_header + FILE_HEADER_LEN {
        return Err(malformed("truncated file header"));
    }

    Ok(PeImage {
        machine: u16_at(bytes, file_header).ok_or_else(|| malformed("truncated file header"))?,
        characteristics: u16_at(bytes, file_header + 18)
            .ok_or_else(|| malformed("truncated file header"))?,
    })
}

/// Checks that `bytes` is a DLL built for `machine`.
pub fn validate_image_for(bytes: &[u8], machine: u16) -> Result<PeImage> {
    let image = parse_header(bytes)?;

    if image.machine != machine {
        return Err(DivertError::MalformedModule(format!(
            "module targets machine {:#06x}, process needs {:#06x}",
            image.machine, machine
        )));
    }
    if !image.is_dll() {
        return Err(DivertError::MalformedModule(
            "image is not a DLL".to_string(),
        ));
    }
    Ok(image)
}

/// Checks that `bytes` is a DLL this process can load.
pub fn validate_image(bytes: &[u8]) -> Result<PeImage> {
    let machine = host_machine().ok_or_else(|| {
        DivertError::UnsupportedPlatform(format!(
            "no PE machine type for {}",
            std::env::consts::ARCH
        ))
    })?;
    validate_image_for(bytes, machine)
}

#[cfg(test)]
pub(crate) fn fake_image(machine: u16, characteristics: u16) -> Vec<u8> {
    let pe_offset = 0x80usize;
    let mut bytes = vec![0u8; pe_offset + 4 + FILE_HEADER_LEN];
    bytes[..2].copy_from_slice(DOS_SIGNATURE);
    bytes[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4].copy_from_slice(&(pe_offset as u32).to_le_bytes());
    bytes[pe_offset..pe_offset + 4].copy_from_slice(PE_SIGNATURE);
    bytes[pe_offset + 4..pe_offset + 6].copy_from_slice(&machine.to_le_bytes());
    bytes[pe_offset + 22..pe_offset + 24].copy_from_slice(&characteristics.to_le_bytes());
    bytes
}
