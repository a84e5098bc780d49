//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types from the crate, allowing users
//! to import everything they need with a single use statement:
//!
//! ```rust
//! use divert::prelude::*;
//! ```

// Error handling
pub use crate::error::{DivertError, ErrorKind, Result};

// Address records
pub use crate::network::address::{Address, AddressFlags, Event, Layer};
pub use crate::network::payload::{FlowData, NetworkData, ReflectData, SocketData};

// Handles
pub use crate::network::core::{
    DivertContext, Handle, HandleConfig, HandleManager, Version, BATCH_MAX, MTU_MAX,
};

// Option types
pub use crate::network::types::{ChecksumFlags, OpenFlags, Param, Priority, Shutdown};

// Settings
pub use crate::settings::{LoaderSettings, QueueOptions};
