//! Core handle functionality.
//!
//! This module contains the handle itself, its overlapped contexts, the
//! process-scoped context with its version gate, and handle management.

pub mod context;
pub mod gate;
pub mod handle;
pub mod handle_manager;
pub mod overlapped;

// Re-export commonly used types
pub use context::DivertContext;
pub use gate::{Version, VersionGate, SUPPORTED_VERSIONS};
pub use handle::{Handle, BATCH_MAX, MTU_MAX};
pub use handle_manager::{HandleConfig, HandleManager};
pub use overlapped::{Overlapped, OverlappedPair};
