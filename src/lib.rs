//! # divert - WinDivert without a link-time dependency
//!
//! This crate attaches to the WinDivert packet interception driver. The
//! driver's user-mode library is never linked at build time: it is loaded on
//! first use from an installed `WinDivert.dll`, from a resource of the running
//! executable, or from an image compiled into the binary.
//!
//! ## Features
//!
//! * Lazy, exactly-once loading of the native module and its exports
//! * Handles with synchronous and overlapped receive/send, batching,
//!   parameters and shutdown
//! * A run-once version gate that rejects unsupported driver versions
//! * The 80-byte address record with checked and unchecked payload views
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use divert::prelude::*;
//!
//! let handle = divert::open("tcp.DstPort == 443", Layer::Network, 0, OpenFlags::new().set_sniff(true))?;
//! let mut packet = vec![0u8; MTU_MAX];
//! let mut addr = Address::default();
//! let len = handle.recv(&mut packet, &mut addr)?;
//! println!("{} bytes, outbound: {}", len, addr.flags().is_outbound());
//! handle.close()?;
//! # Ok::<(), divert::DivertError>(())
//! ```

/// Centralized error handling
pub mod error;
/// Loading the native module and calling into it
pub mod loader;
/// The native WinDivert entry points
pub mod native;
/// Handles, address records and option types
pub mod network;
/// Host OS services
pub mod platform;
/// Prelude for convenient imports
pub mod prelude;
/// Loader and queue configuration
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{DivertError, ErrorKind, Result};
pub use network::address::{Address, Event, Layer};
pub use network::core::{DivertContext, Handle, Version};

use lazy_static::lazy_static;
use network::types::flags::{ChecksumFlags, OpenFlags};
use settings::LoaderSettings;

lazy_static! {
    static ref GLOBAL: Result<DivertContext> =
        LoaderSettings::load().and_then(|settings| DivertContext::from_settings(&settings));
}

/// The process-wide context, configured from `LoaderSettings::load()` on
/// first use. A broken configuration is reported on every call.
pub fn global() -> Result<&'static DivertContext> {
    GLOBAL.as_ref().map_err(Clone::clone)
}

/// Opens a handle through the process-wide context.
pub fn open(filter: &str, layer: Layer, priority: i16, flags: OpenFlags) -> Result<Handle> {
    global()?.open(filter, layer, priority, flags)
}

/// Version of the native component, checked against the supported set.
pub fn version() -> Result<Version> {
    global()?.version()
}

/// Recomputes the checksums of `packet` in place through the process-wide
/// context.
pub fn calc_checksums(
    packet: &mut [u8],
    addr: Option<&mut Address>,
    flags: ChecksumFlags,
) -> Result<bool> {
    global()?.calc_checksums(packet, addr, flags)
}
