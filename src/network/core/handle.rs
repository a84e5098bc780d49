//! One open WinDivert handle.
//!
//! A `Handle` owns the native handle and, when opened for overlapped I/O, one
//! overlapped context per direction. It is released by `close`, or on drop.

use crate::error::{DivertError, Result};
use crate::native::{DivertApi, RawHandle};
use crate::network::address::{Address, Layer, ADDRESS_LEN};
use crate::network::core::overlapped::{Overlapped, OverlappedPair};
use crate::network::types::flags::{OpenFlags, Shutdown};
use crate::network::types::param::Param;
use crate::network::types::priority::Priority;
use crate::platform::ThreadPin;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Most address records one batched call may carry.
pub const BATCH_MAX: usize = 0xff;

/// Largest packet the native component delivers: an IPv6 header plus the
/// largest IP payload.
pub const MTU_MAX: usize = 40 + 0xffff;

fn check_batch(len: usize) -> Result<()> {
    if len > BATCH_MAX {
        return Err(DivertError::BatchTooLarge(len));
    }
    Ok(())
}

/// An open WinDivert handle.
///
/// Synchronous operations may run from several threads at once. The
/// asynchronous ones serialize per direction on the handle's overlapped
/// contexts. `close` consumes the handle, so a handle can never be closed
/// twice.
pub struct Handle {
    api: Arc<dyn DivertApi>,
    raw: RawHandle,
    layer: Layer,
    overlapped: Option<OverlappedPair>,
    closed: bool,
}

impl Handle {
    /// Opens a native handle without consulting the version gate.
    ///
    /// `priority` has already been range-checked by its type. The native open
    /// runs inside a `ThreadPin`.
    pub(crate) fn open_raw(
        api: Arc<dyn DivertApi>,
        filter: &str,
        layer: Layer,
        priority: Priority,
        flags: OpenFlags,
        overlapped: bool,
    ) -> Result<Self> {
        // Wait objects first, so a failure here leaves no native handle behind.
        let overlapped = if overlapped {
            Some(OverlappedPair::new()?)
        } else {
            None
        };

        let raw = {
            let _pin = ThreadPin::acquire();
            api.open(filter, layer, priority.value(), flags)?
        };

        info!(
            "Opened WinDivert handle {} at {:?} layer (priority {}, filter: {})",
            raw, layer, priority, filter
        );

        Ok(Self {
            api,
            raw,
            layer,
            overlapped,
            closed: false,
        })
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Whether the handle was opened with overlapped contexts.
    pub fn is_overlapped(&self) -> bool {
        self.overlapped.is_some()
    }

    /// Receives one packet and its address. Blocks until a packet arrives.
    pub fn recv(&self, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        self.api.recv(self.raw, packet, addr)
    }

    /// Receives a batch of packets, blocking until at least one arrives.
    ///
    /// Returns the packet bytes written and the number of records filled.
    pub fn recv_ex(&self, packet: &mut [u8], addrs: &mut [Address]) -> Result<(usize, usize)> {
        check_batch(addrs.len())?;
        // No overlapped context: the call completes before it returns.
        unsafe { self.api.recv_ex(self.raw, packet, addrs, None) }
    }

    /// Receives through the overlapped receive context.
    ///
    /// Waits for completion up to `timeout` (`None` waits forever). On timeout
    /// the operation is cancelled and waited for, so the buffers are free
    /// again when this returns, and the error is `WAIT_TIMEOUT`.
    pub fn recv_async(
        &self,
        packet: &mut [u8],
        addrs: &mut [Address],
        timeout: Option<Duration>,
    ) -> Result<(usize, usize)> {
        check_batch(addrs.len())?;
        let pair = self.overlapped.as_ref().ok_or(DivertError::NotOverlapped)?;
        let mut ov = pair.recv()?;

        let started = unsafe { self.api.recv_ex(self.raw, packet, addrs, Some(&mut *ov)) };
        match started {
            Err(e) if e.is_io_pending() => {
                let len = self.complete(&mut ov, timeout)?;
                Ok((len as usize, ov.addr_len() as usize / ADDRESS_LEN))
            }
            other => other,
        }
    }

    /// Injects one packet described by `addr`.
    pub fn send(&self, packet: &[u8], addr: &Address) -> Result<usize> {
        self.api.send(self.raw, packet, addr)
    }

    /// Injects a batch of packets, one address record per packet.
    pub fn send_ex(&self, packet: &[u8], addrs: &[Address]) -> Result<usize> {
        check_batch(addrs.len())?;
        unsafe { self.api.send_ex(self.raw, packet, addrs, None) }
    }

    /// Injects through the overlapped send context, with the same timeout
    /// handling as `recv_async`.
    pub fn send_async(
        &self,
        packet: &[u8],
        addrs: &[Address],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        check_batch(addrs.len())?;
        let pair = self.overlapped.as_ref().ok_or(DivertError::NotOverlapped)?;
        let mut ov = pair.send()?;

        let started = unsafe { self.api.send_ex(self.raw, packet, addrs, Some(&mut *ov)) };
        match started {
            Err(e) if e.is_io_pending() => Ok(self.complete(&mut ov, timeout)? as usize),
            other => other,
        }
    }

    // The caller's buffers are part of the pending operation, so this never
    // returns while the operation may still write to them.
    fn complete(&self, ov: &mut Overlapped, timeout: Option<Duration>) -> Result<u32> {
        match self.api.overlapped_result(self.raw, ov, timeout) {
            Err(e) if e.is_timeout() => {
                debug!("Overlapped operation on {} timed out, cancelling", self.raw);
                if let Err(cancel) = self.api.cancel_io(self.raw, Some(&mut *ov)) {
                    warn!("Failed to cancel I/O on {}: {}", self.raw, cancel);
                }
                match self.api.overlapped_result(self.raw, ov, None) {
                    // Completed before the cancellation took effect.
                    Ok(len) => Ok(len),
                    Err(_) => Err(e),
                }
            }
            other => other,
        }
    }

    /// Cancels every outstanding operation on the handle.
    pub fn cancel(&self) -> Result<()> {
        self.api.cancel_io(self.raw, None)
    }

    /// Stops receiving, sending, or both. Queued packets can still be read.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        debug!("Shutting down {} ({:?})", self.raw, how);
        self.api.shutdown(self.raw, how)
    }

    pub fn get_param(&self, param: Param) -> Result<u64> {
        self.api.get_param(self.raw, param.id())
    }

    /// Reads a parameter by id. Unknown ids go to the native component,
    /// which reports its own error.
    pub fn get_param_raw(&self, id: u32) -> Result<u64> {
        self.api.get_param(self.raw, id)
    }

    /// Sets a queue parameter after checking it against its documented range.
    pub fn set_param(&self, param: Param, value: u64) -> Result<()> {
        param.validate(value)?;
        self.api.set_param(self.raw, param.id(), value)?;
        debug!("Set {} to {} on {}", param, value, self.raw);
        Ok(())
    }

    /// Sets a parameter by id. Unknown and read-only ids fail with
    /// `UnsupportedParam` before any native call.
    pub fn set_param_raw(&self, id: u32, value: u64) -> Result<()> {
        let param = Param::from_id(id).ok_or(DivertError::UnsupportedParam(id))?;
        self.set_param(param, value)
    }

    /// Closes the handle and frees its wait objects.
    ///
    /// A failed native close is reported, but the handle is gone either way.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        match self.api.close(self.raw) {
            Ok(()) => {
                info!("Closed WinDivert handle {}", self.raw);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to close WinDivert handle {}: {}", self.raw, e);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &self.raw)
            .field("layer", &self.layer)
            .field("overlapped", &self.is_overlapped())
            .finish()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.api.close(self.raw) {
            error!("Error closing WinDivert handle {} on drop: {}", self.raw, e);
        } else {
            debug!("Closed WinDivert handle {} on drop", self.raw);
        }
    }
}
