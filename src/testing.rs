//! Test doubles for the native transport and the module loader.

use crate::error::{DivertError, Result, ERROR_IO_PENDING, ERROR_OPERATION_ABORTED, WAIT_TIMEOUT};
use crate::loader::{Module, ModuleLoader, ModuleSource};
use crate::native::{DivertApi, RawHandle};
use crate::network::address::{Address, Layer, ADDRESS_LEN};
use crate::network::core::overlapped::Overlapped;
use crate::network::types::flags::{ChecksumFlags, OpenFlags, Shutdown};
use crate::network::types::param::Param;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Operations counted by `FakeApi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Call {
    Open,
    Recv,
    RecvEx,
    Send,
    SendEx,
    Shutdown,
    Close,
    GetParam,
    SetParam,
    Checksums,
    Wait,
    Cancel,
}

/// Arguments of the last successful `open`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpenArgs {
    pub filter: String,
    pub layer: Layer,
    pub priority: i16,
    pub flags: OpenFlags,
}

/// How overlapped operations behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The call completes before returning
    Immediate,
    /// The call returns `ERROR_IO_PENDING` and the wait succeeds
    Pending,
    /// The call returns `ERROR_IO_PENDING` and nothing completes until cancelled
    Hang,
}

/// A scripted `DivertApi` with per-operation call counters.
pub(crate) struct FakeApi {
    version: Mutex<(u64, u64)>,
    open_error: Mutex<Option<DivertError>>,
    close_error: Mutex<Option<DivertError>>,
    completion: Mutex<Completion>,
    packet: Vec<u8>,
    params: Mutex<HashMap<u32, u64>>,
    last_open: Mutex<Option<OpenArgs>>,
    last_shutdown: Mutex<Option<u32>>,
    calls: Mutex<HashMap<Call, usize>>,
    next_handle: AtomicIsize,
    cancelled: AtomicBool,
}

impl FakeApi {
    /// A transport reporting WinDivert 2.2.
    pub fn new() -> Self {
        Self::with_version(2, 2)
    }

    pub fn with_version(major: u64, minor: u64) -> Self {
        // Minimal IPv4/UDP datagram, enough to look like a packet.
        let mut packet = vec![0u8; 28];
        packet[0] = 0x45;
        packet[3] = 28;
        packet[9] = 17;

        Self {
            version: Mutex::new((major, minor)),
            open_error: Mutex::new(None),
            close_error: Mutex::new(None),
            completion: Mutex::new(Completion::Immediate),
            packet,
            params: Mutex::new(HashMap::new()),
            last_open: Mutex::new(None),
            last_shutdown: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
            next_handle: AtomicIsize::new(0x100),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn set_version(&self, major: u64, minor: u64) {
        *self.version.lock().unwrap() = (major, minor);
    }

    pub fn fail_open(&self, err: DivertError) {
        *self.open_error.lock().unwrap() = Some(err);
    }

    pub fn fail_close(&self, err: DivertError) {
        *self.close_error.lock().unwrap() = Some(err);
    }

    pub fn set_completion(&self, completion: Completion) {
        *self.completion.lock().unwrap() = completion;
    }

    pub fn calls(&self, call: Call) -> usize {
        self.calls.lock().unwrap().get(&call).copied().unwrap_or(0)
    }

    /// Every call that crossed into the transport.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn last_open(&self) -> Option<OpenArgs> {
        self.last_open.lock().unwrap().clone()
    }

    /// The raw direction value passed to the last `shutdown`.
    pub fn last_shutdown(&self) -> Option<u32> {
        *self.last_shutdown.lock().unwrap()
    }

    pub fn param(&self, param: Param) -> Option<u64> {
        self.params.lock().unwrap().get(&param.id()).copied()
    }

    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    fn count(&self, call: Call) {
        *self.calls.lock().unwrap().entry(call).or_insert(0) += 1;
    }

    fn completion(&self) -> Completion {
        *self.completion.lock().unwrap()
    }

    fn fill(&self, packet: &mut [u8], addr: &mut Address) -> usize {
        let n = self.packet.len().min(packet.len());
        packet[..n].copy_from_slice(&self.packet[..n]);
        *addr = Address::new(Layer::Network);
        addr.set_length(n as u32);
        n
    }
}

impl DivertApi for FakeApi {
    fn open(
        &self,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<RawHandle> {
        self.count(Call::Open);
        if let Some(err) = self.open_error.lock().unwrap().clone() {
            return Err(err);
        }
        if filter.contains('\0') {
            return Err(DivertError::InvalidFilter(filter.find('\0').unwrap_or(0)));
        }

        *self.last_open.lock().unwrap() = Some(OpenArgs {
            filter: filter.to_string(),
            layer,
            priority,
            flags,
        });
        Ok(RawHandle(self.next_handle.fetch_add(4, Ordering::SeqCst)))
    }

    fn recv(&self, _handle: RawHandle, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        self.count(Call::Recv);
        Ok(self.fill(packet, addr))
    }

    unsafe fn recv_ex(
        &self,
        _handle: RawHandle,
        packet: &mut [u8],
        addrs: &mut [Address],
        overlapped: Option<&mut Overlapped>,
    ) -> Result<(usize, usize)> {
        self.count(Call::RecvEx);
        let mut filled = 0;
        let mut len = 0;
        if let Some(first) = addrs.first_mut() {
            len = self.fill(packet, first);
            filled = 1;
        }

        match (overlapped, self.completion()) {
            (Some(ov), Completion::Pending) => {
                ov.reset();
                ov.set_io_len(len as u32);
                ov.set_addr_len((filled * ADDRESS_LEN) as u32);
                Err(DivertError::native(ERROR_IO_PENDING))
            }
            (Some(ov), Completion::Hang) => {
                ov.reset();
                self.cancelled.store(false, Ordering::SeqCst);
                Err(DivertError::native(ERROR_IO_PENDING))
            }
            _ => Ok((len, filled)),
        }
    }

    fn send(&self, _handle: RawHandle, packet: &[u8], _addr: &Address) -> Result<usize> {
        self.count(Call::Send);
        Ok(packet.len())
    }

    unsafe fn send_ex(
        &self,
        _handle: RawHandle,
        packet: &[u8],
        _addrs: &[Address],
        overlapped: Option<&mut Overlapped>,
    ) -> Result<usize> {
        self.count(Call::SendEx);
        match (overlapped, self.completion()) {
            (Some(ov), Completion::Pending) => {
                ov.reset();
                ov.set_io_len(packet.len() as u32);
                Err(DivertError::native(ERROR_IO_PENDING))
            }
            (Some(ov), Completion::Hang) => {
                ov.reset();
                self.cancelled.store(false, Ordering::SeqCst);
                Err(DivertError::native(ERROR_IO_PENDING))
            }
            _ => Ok(packet.len()),
        }
    }

    fn shutdown(&self, _handle: RawHandle, how: Shutdown) -> Result<()> {
        self.count(Call::Shutdown);
        *self.last_shutdown.lock().unwrap() = Some(how as u32);
        Ok(())
    }

    fn close(&self, _handle: RawHandle) -> Result<()> {
        self.count(Call::Close);
        match self.close_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn get_param(&self, _handle: RawHandle, param: u32) -> Result<u64> {
        self.count(Call::GetParam);
        let (major, minor) = *self.version.lock().unwrap();
        match Param::from_id(param) {
            Some(Param::VersionMajor) => Ok(major),
            Some(Param::VersionMinor) => Ok(minor),
            Some(p) => Ok(self
                .params
                .lock()
                .unwrap()
                .get(&param)
                .copied()
                .or_else(|| p.range().map(|r| r.default))
                .unwrap_or(0)),
            // ERROR_INVALID_PARAMETER
            None => Err(DivertError::native(87)),
        }
    }

    fn set_param(&self, _handle: RawHandle, param: u32, value: u64) -> Result<()> {
        self.count(Call::SetParam);
        self.params.lock().unwrap().insert(param, value);
        Ok(())
    }

    fn calc_checksums(
        &self,
        _packet: &mut [u8],
        _addr: Option<&mut Address>,
        _flags: ChecksumFlags,
    ) -> Result<bool> {
        self.count(Call::Checksums);
        Ok(true)
    }

    fn overlapped_result(
        &self,
        _handle: RawHandle,
        overlapped: &mut Overlapped,
        timeout: Option<Duration>,
    ) -> Result<u32> {
        self.count(Call::Wait);
        if self.completion() != Completion::Hang {
            return Ok(overlapped.io_len());
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DivertError::native(ERROR_OPERATION_ABORTED));
        }
        match timeout {
            Some(t) => {
                thread::sleep(t);
                Err(DivertError::native(WAIT_TIMEOUT))
            }
            None => panic!("waiting forever on an operation that never completes"),
        }
    }

    fn cancel_io(&self, _handle: RawHandle, _overlapped: Option<&mut Overlapped>) -> Result<()> {
        self.count(Call::Cancel);
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeModule {
    symbols: Vec<(String, usize)>,
}

impl Module for FakeModule {
    fn base(&self) -> usize {
        0x1000_0000
    }

    fn symbol(&self, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, addr)| *addr)
    }
}

/// A `ModuleLoader` that counts how often it runs.
pub(crate) struct CountingLoader {
    loads: AtomicUsize,
    outcome: std::result::Result<Vec<(String, usize)>, DivertError>,
    delay: Duration,
}

impl CountingLoader {
    /// Exports `names` at distinct placeholder addresses that must never be called.
    pub fn exporting(names: &[&str]) -> Self {
        Self::with_symbols(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), 0x1000_1000 + i * 0x10))
                .collect(),
        )
    }

    pub fn with_symbols(symbols: Vec<(String, usize)>) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            outcome: Ok(symbols),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(err: DivertError) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            outcome: Err(err),
            delay: Duration::ZERO,
        }
    }

    /// Makes each load take `delay`, widening the window for racing callers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for CountingLoader {
    fn load(&self, _source: &ModuleSource) -> Result<Box<dyn Module>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match &self.outcome {
            Ok(symbols) => Ok(Box::new(FakeModule {
                symbols: symbols.clone(),
            })),
            Err(e) => Err(e.clone()),
        }
    }
}
