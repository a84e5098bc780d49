//! Overlapped I/O contexts owned by a handle.

use crate::error::{DivertError, Result};
use crate::platform;
use std::sync::{Mutex, MutexGuard};

/// Layout-compatible with the Win32 `OVERLAPPED` structure.
#[derive(Debug, Default)]
#[repr(C)]
pub struct RawOverlapped {
    pub internal: usize,
    pub internal_high: usize,
    pub offset: u32,
    pub offset_high: u32,
    pub event: isize,
}

// The native component writes the transfer length and the address byte count
// when the operation completes, so both live next to the OVERLAPPED in one
// heap slot that never moves while an operation is in flight.
#[derive(Debug, Default)]
#[repr(C)]
struct Slot {
    raw: RawOverlapped,
    io_len: u32,
    addr_len: u32,
}

/// One overlapped context with its own wait object.
#[derive(Debug)]
pub struct Overlapped {
    slot: Box<Slot>,
}

impl Overlapped {
    /// Creates a context with a fresh event object.
    pub fn new() -> Result<Self> {
        let event = platform::create_event()?;
        let mut slot = Box::<Slot>::default();
        slot.raw.event = event;
        Ok(Self { slot })
    }

    /// Clears the state of a previous operation, keeping the event.
    pub fn reset(&mut self) {
        let event = self.slot.raw.event;
        *self.slot = Slot::default();
        self.slot.raw.event = event;
    }

    pub fn event(&self) -> isize {
        self.slot.raw.event
    }

    pub fn as_raw(&mut self) -> *mut RawOverlapped {
        &mut self.slot.raw
    }

    pub fn io_len_ptr(&mut self) -> *mut u32 {
        &mut self.slot.io_len
    }

    pub fn addr_len_ptr(&mut self) -> *mut u32 {
        &mut self.slot.addr_len
    }

    pub fn io_len(&self) -> u32 {
        self.slot.io_len
    }

    pub fn set_io_len(&mut self, len: u32) {
        self.slot.io_len = len;
    }

    /// Address bytes the native component reported, for receives.
    pub fn addr_len(&self) -> u32 {
        self.slot.addr_len
    }

    pub fn set_addr_len(&mut self, len: u32) {
        self.slot.addr_len = len;
    }
}

impl Drop for Overlapped {
    fn drop(&mut self) {
        platform::close_event(self.slot.raw.event);
    }
}

/// The receive and send contexts of an asynchronous handle.
///
/// Each direction sits behind its own mutex: a second asynchronous
/// operation in the same direction waits until the first has completed.
#[derive(Debug)]
pub struct OverlappedPair {
    recv: Mutex<Overlapped>,
    send: Mutex<Overlapped>,
}

impl OverlappedPair {
    pub fn new() -> Result<Self> {
        Ok(Self {
            recv: Mutex::new(Overlapped::new()?),
            send: Mutex::new(Overlapped::new()?),
        })
    }

    pub fn recv(&self) -> Result<MutexGuard<'_, Overlapped>> {
        self.recv
            .lock()
            .map_err(|_| DivertError::lock_poisoned("receive overlapped context"))
    }

    pub fn send(&self) -> Result<MutexGuard<'_, Overlapped>> {
        self.send
            .lock()
            .map_err(|_| DivertError::lock_poisoned("send overlapped context"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_layout() {
        let word = std::mem::size_of::<usize>();
        assert_eq!(std::mem::size_of::<RawOverlapped>(), 3 * word + 8);
    }

    #[test]
    fn test_reset_keeps_event() {
        let mut ov = Overlapped::new().unwrap();
        let event = ov.event();
        ov.set_addr_len(160);
        ov.set_io_len(60);
        ov.reset();
        assert_eq!(ov.addr_len(), 0);
        assert_eq!(ov.io_len(), 0);
        assert_eq!(ov.event(), event);
    }

    #[test]
    fn test_slot_pointers_are_stable() {
        let mut ov = Overlapped::new().unwrap();
        let before = ov.as_raw();
        let mut moved = ov;
        assert_eq!(moved.as_raw(), before);
    }
}
