//! The native WinDivert entry points.
//!
//! `DivertApi` is the transport a `Handle` drives. `NativeApi` implements it
//! over the exports of a lazily loaded module; tests substitute a scripted
//! double.

pub mod ioctl;

use crate::error::{DivertError, Result};
use crate::loader::{ArgList, CallResult, LazyModule, LazySymbol, ModuleSource};
use crate::network::address::{Address, Layer, ADDRESS_LEN};
use crate::network::core::overlapped::Overlapped;
use crate::network::types::flags::{ChecksumFlags, OpenFlags, Shutdown};
use crate::platform;
use std::ffi::CString;
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// A native WinDivert handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

impl RawHandle {
    /// Win32 `INVALID_HANDLE_VALUE`.
    pub const INVALID: RawHandle = RawHandle(-1);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID && self.0 != 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The operations a handle needs from the native component.
///
/// Failures carry the OS last-error code verbatim as `DivertError::NativeIo`.
pub trait DivertApi: Send + Sync {
    fn open(&self, filter: &str, layer: Layer, priority: i16, flags: OpenFlags)
        -> Result<RawHandle>;

    /// Receives one packet. Returns the packet length.
    fn recv(&self, handle: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize>;

    /// Receives a batch. Returns the packet bytes and the number of address
    /// records filled.
    ///
    /// With an overlapped context the call may fail with `ERROR_IO_PENDING`;
    /// the transfer then completes into `packet`, `addrs` and the context.
    ///
    /// # Safety
    ///
    /// When `overlapped` is given, `packet`, `addrs` and the context must stay
    /// valid and untouched until the operation has completed or has been
    /// cancelled and waited for.
    unsafe fn recv_ex(
        &self,
        handle: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        overlapped: Option<&mut Overlapped>,
    ) -> Result<(usize, usize)>;

    /// Injects one packet. Returns the bytes sent.
    fn send(&self, handle: RawHandle, packet: &[u8], addr: &Address) -> Result<usize>;

    /// Injects a batch. Returns the bytes sent.
    ///
    /// # Safety
    ///
    /// Same contract as `recv_ex`.
    unsafe fn send_ex(
        &self,
        handle: RawHandle,
        packet: &[u8],
        addrs: &[Address],
        overlapped: Option<&mut Overlapped>,
    ) -> Result<usize>;

    fn shutdown(&self, handle: RawHandle, how: Shutdown) -> Result<()>;

    fn close(&self, handle: RawHandle) -> Result<()>;

    fn get_param(&self, handle: RawHandle, param: u32) -> Result<u64>;

    fn set_param(&self, handle: RawHandle, param: u32, value: u64) -> Result<()>;

    /// Recomputes the checksums of `packet` in place.
    fn calc_checksums(
        &self,
        packet: &mut [u8],
        addr: Option<&mut Address>,
        flags: ChecksumFlags,
    ) -> Result<bool>;

    /// Waits for an overlapped operation to complete. `None` waits forever.
    fn overlapped_result(
        &self,
        handle: RawHandle,
        overlapped: &mut Overlapped,
        timeout: Option<Duration>,
    ) -> Result<u32> {
        let timeout_ms = timeout.map(|t| t.as_millis().min(u32::MAX as u128 - 1) as u32);
        platform::overlapped_result(handle.0, overlapped.as_raw(), timeout_ms)
    }

    /// Cancels one outstanding operation, or all of them.
    fn cancel_io(&self, handle: RawHandle, overlapped: Option<&mut Overlapped>) -> Result<()> {
        platform::cancel_io(handle.0, overlapped.map(|ov| ov.as_raw()))
    }
}

fn check(result: CallResult) -> Result<CallResult> {
    if result.succeeded() {
        Ok(result)
    } else {
        Err(DivertError::native(result.last_error))
    }
}

fn byte_len(len: usize) -> u32 {
    len.min(u32::MAX as usize) as u32
}

/// `DivertApi` over the exports of the WinDivert library.
#[derive(Debug)]
pub struct NativeApi {
    module: Arc<LazyModule>,
    open: LazySymbol,
    recv: LazySymbol,
    recv_ex: LazySymbol,
    send: LazySymbol,
    send_ex: LazySymbol,
    shutdown: LazySymbol,
    close: LazySymbol,
    set_param: LazySymbol,
    get_param: LazySymbol,
    calc_checksums: LazySymbol,
}

impl NativeApi {
    pub fn new(module: Arc<LazyModule>) -> Self {
        Self {
            open: module.symbol("WinDivertOpen"),
            recv: module.symbol("WinDivertRecv"),
            recv_ex: module.symbol("WinDivertRecvEx"),
            send: module.symbol("WinDivertSend"),
            send_ex: module.symbol("WinDivertSendEx"),
            shutdown: module.symbol("WinDivertShutdown"),
            close: module.symbol("WinDivertClose"),
            set_param: module.symbol("WinDivertSetParam"),
            get_param: module.symbol("WinDivertGetParam"),
            calc_checksums: module.symbol("WinDivertHelperCalcChecksums"),
            module,
        }
    }

    /// Loads the library from `source` through the host OS loader.
    pub fn from_source(source: ModuleSource) -> Self {
        Self::new(Arc::new(LazyModule::system(source)))
    }

    pub fn module(&self) -> &Arc<LazyModule> {
        &self.module
    }
}

impl DivertApi for NativeApi {
    fn open(
        &self,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<RawHandle> {
        let filter = CString::new(filter).map_err(|e| DivertError::InvalidFilter(e.nul_position()))?;
        let args = ArgList::new()
            .ptr(filter.as_ptr())
            .u32(layer as u32)
            .i32(priority as i32)
            .u64(flags.bits());

        let result = unsafe { self.open.call(&args)? };
        let handle = RawHandle(result.r1 as isize);
        if !handle.is_valid() {
            return Err(DivertError::native(result.last_error));
        }
        Ok(handle)
    }

    fn recv(&self, handle: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        let mut recv_len = 0u32;
        let args = ArgList::new()
            .word(handle.0 as usize)
            .ptr_mut(packet.as_mut_ptr())
            .u32(byte_len(packet.len()))
            .ptr_mut(&mut recv_len as *mut u32)
            .ptr_mut(addr as *mut Address);

        check(unsafe { self.recv.call(&args)? })?;
        Ok(recv_len as usize)
    }

    unsafe fn recv_ex(
        &self,
        handle: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        overlapped: Option<&mut Overlapped>,
    ) -> Result<(usize, usize)> {
        let mut recv_len = 0u32;
        let mut addr_len = byte_len(addrs.len() * ADDRESS_LEN);

        let (recv_len_ptr, addr_len_ptr, ov_ptr) = match overlapped {
            Some(ov) => {
                ov.reset();
                ov.set_addr_len(addr_len);
                (ov.io_len_ptr(), ov.addr_len_ptr(), ov.as_raw())
            }
            None => (
                &mut recv_len as *mut u32,
                &mut addr_len as *mut u32,
                ptr::null_mut(),
            ),
        };

        let args = ArgList::new()
            .word(handle.0 as usize)
            .ptr_mut(packet.as_mut_ptr())
            .u32(byte_len(packet.len()))
            .ptr_mut(recv_len_ptr)
            .u64(0)
            .ptr_mut(addrs.as_mut_ptr())
            .ptr_mut(addr_len_ptr)
            .ptr_mut(ov_ptr);

        check(self.recv_ex.call(&args)?)?;
        Ok((
            *recv_len_ptr as usize,
            *addr_len_ptr as usize / ADDRESS_LEN,
        ))
    }

    fn send(&self, handle: RawHandle, packet: &[u8], addr: &Address) -> Result<usize> {
        let mut send_len = 0u32;
        let args = ArgList::new()
            .word(handle.0 as usize)
            .ptr(packet.as_ptr())
            .u32(byte_len(packet.len()))
            .ptr_mut(&mut send_len as *mut u32)
            .ptr(addr as *const Address);

        check(unsafe { self.send.call(&args)? })?;
        Ok(send_len as usize)
    }

    unsafe fn send_ex(
        &self,
        handle: RawHandle,
        packet: &[u8],
        addrs: &[Address],
        overlapped: Option<&mut Overlapped>,
    ) -> Result<usize> {
        let mut send_len = 0u32;
        let (send_len_ptr, ov_ptr) = match overlapped {
            Some(ov) => {
                ov.reset();
                (ov.io_len_ptr(), ov.as_raw())
            }
            None => (&mut send_len as *mut u32, ptr::null_mut()),
        };

        let args = ArgList::new()
            .word(handle.0 as usize)
            .ptr(packet.as_ptr())
            .u32(byte_len(packet.len()))
            .ptr_mut(send_len_ptr)
            .u64(0)
            .ptr(addrs.as_ptr())
            .u32(byte_len(addrs.len() * ADDRESS_LEN))
            .ptr_mut(ov_ptr);

        check(self.send_ex.call(&args)?)?;
        Ok(*send_len_ptr as usize)
    }

    fn shutdown(&self, handle: RawHandle, how: Shutdown) -> Result<()> {
        let args = ArgList::new().word(handle.0 as usize).u32(how as u32);
        check(unsafe { self.shutdown.call(&args)? }).map(|_| ())
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        let args = ArgList::new().word(handle.0 as usize);
        check(unsafe { self.close.call(&args)? }).map(|_| ())
    }

    fn get_param(&self, handle: RawHandle, param: u32) -> Result<u64> {
        let mut value = 0u64;
        let args = ArgList::new()
            .word(handle.0 as usize)
            .u32(param)
            .ptr_mut(&mut value as *mut u64);

        check(unsafe { self.get_param.call(&args)? })?;
        Ok(value)
    }

    fn set_param(&self, handle: RawHandle, param: u32, value: u64) -> Result<()> {
        let args = ArgList::new()
            .word(handle.0 as usize)
            .u32(param)
            .u64(value);
        check(unsafe { self.set_param.call(&args)? }).map(|_| ())
    }

    fn calc_checksums(
        &self,
        packet: &mut [u8],
        addr: Option<&mut Address>,
        flags: ChecksumFlags,
    ) -> Result<bool> {
        let addr = addr.map_or(ptr::null_mut(), |a| a as *mut Address);
        let args = ArgList::new()
            .ptr_mut(packet.as_mut_ptr())
            .u32(byte_len(packet.len()))
            .ptr_mut(addr)
            .u64(flags.bits());

        // A FALSE here means "nothing to fix", not a failure.
        let result = unsafe { self.calc_checksums.call(&args)? };
        Ok(result.succeeded())
    }
}
