//! Host OS services the core depends on.
//!
//! Everything Windows-specific lives in `windows.rs`. Other hosts get
//! fallbacks that report `UnsupportedPlatform`, so the codec, the lazy
//! loading machinery and the session logic stay buildable and testable
//! everywhere.

use crate::error::{DivertError, Result};
use log::debug;
use std::cell::Cell;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::*;

/// Last OS error of the calling thread.
#[cfg(not(windows))]
pub fn last_error() -> u32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .map_or(0, |code| code as u32)
}

#[cfg(not(windows))]
pub fn check_architecture() -> Result<()> {
    Err(DivertError::UnsupportedPlatform(format!(
        "WinDivert requires Windows, running on {}",
        std::env::consts::OS
    )))
}

#[cfg(not(windows))]
pub fn create_event() -> Result<isize> {
    Ok(0)
}

#[cfg(not(windows))]
pub fn close_event(_event: isize) {}

#[cfg(not(windows))]
pub fn overlapped_result(
    _handle: isize,
    _overlapped: *mut crate::network::core::overlapped::RawOverlapped,
    _timeout_ms: Option<u32>,
) -> Result<u32> {
    Err(unsupported("overlapped I/O"))
}

#[cfg(not(windows))]
pub fn cancel_io(
    _handle: isize,
    _overlapped: Option<*mut crate::network::core::overlapped::RawOverlapped>,
) -> Result<()> {
    Err(unsupported("I/O cancellation"))
}

#[cfg(not(windows))]
pub fn load_library(_path: &std::path::Path) -> Result<isize> {
    Err(unsupported("loading native modules"))
}

#[cfg(not(windows))]
pub fn proc_address(_module: isize, _name: &str) -> Option<usize> {
    None
}

#[cfg(not(windows))]
pub fn read_resource(name: &str) -> Result<Vec<u8>> {
    Err(DivertError::ModuleNotFound(format!(
        "resource {} (executable resources need Windows)",
        name
    )))
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    false
}

#[cfg(not(windows))]
fn unsupported(what: &str) -> DivertError {
    DivertError::UnsupportedPlatform(format!("{} is only available on Windows", what))
}

thread_local! {
    static PIN_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Keeps a native call bracketed on the thread that started it.
///
/// The native open call depends on thread-local OS state. Rust threads never
/// migrate between OS threads, so the guard is a scope marker: it records the
/// owning thread, is `!Send`, and is released on every exit path when it
/// drops, including unwinding.
pub struct ThreadPin {
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl ThreadPin {
    pub fn acquire() -> Self {
        PIN_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread currently holds a pin.
    pub fn is_pinned() -> bool {
        PIN_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for ThreadPin {
    fn drop(&mut self) {
        debug_assert_eq!(self.thread, thread::current().id());
        PIN_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        if !Self::is_pinned() {
            debug!("Released native call thread pin");
        }
    }
}
