//! Configuration for loading the native module and tuning handle queues.
//!
//! # Example
//!
//! ```rust
//! use divert::settings::LoaderSettings;
//!
//! let settings = LoaderSettings::from_toml(
//!     r#"
//!     [module]
//!     source = "file"
//!     path = "WinDivert.dll"
//!
//!     [queue]
//!     length = 8192
//!     time_ms = 1024
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(settings.queue.unwrap().length, Some(8192));
//! ```

pub mod loader;
pub mod queue;

// Re-export commonly used types
pub use loader::{LoaderSettings, ModuleConfig, CONFIG_ENV};
pub use queue::QueueOptions;
