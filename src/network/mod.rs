//! Handles, address records and the types they are configured with.
//!
//! This module contains everything a caller touches to capture and inject
//! packets: the 80-byte address record and its payload views, handles and
//! their lifecycle, and the open-time option types.

pub mod address;
pub mod core;
pub mod payload;
pub mod types;
