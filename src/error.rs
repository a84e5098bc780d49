use crate::network::address::Layer;
use crate::network::types::param::Param;
use thiserror::Error;

/// Win32 `ERROR_IO_PENDING`: an overlapped operation was queued.
pub const ERROR_IO_PENDING: u32 = 997;
/// Win32 `ERROR_OPERATION_ABORTED`: the operation was cancelled.
pub const ERROR_OPERATION_ABORTED: u32 = 995;
/// Win32 `WAIT_TIMEOUT`: a wait elapsed before the object was signalled.
pub const WAIT_TIMEOUT: u32 = 258;

/// Broad classes of failure, used to decide whether a caller can recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed a value the service never accepts. Never retried.
    Configuration,
    /// The process cannot use the service on this host at all.
    Platform,
    /// The installed native component has a version this crate does not speak.
    Compatibility,
    /// The native component or one of its exports could not be resolved.
    Resolution,
    /// A native call failed with an OS error code.
    NativeIo,
    /// A payload view was requested that does not match the record's layer.
    LayerMismatch,
    /// Internal synchronization failure.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DivertError {
    /// Priority outside `[-3000, 3000]`
    #[error("priority {0} is outside the range -3000..=3000")]
    InvalidPriority(i16),

    /// Parameter value outside its documented range
    #[error("value {value} for {param} is outside the range {min}..={max}")]
    InvalidParamValue {
        param: Param,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Parameter id that cannot be set
    #[error("parameter id {0} is not supported")]
    UnsupportedParam(u32),

    /// Filter string that cannot be handed to the native component
    #[error("filter contains an interior NUL byte at offset {0}")]
    InvalidFilter(usize),

    /// More address records than one batched call may carry
    #[error("batch of {0} addresses exceeds the maximum of 255")]
    BatchTooLarge(usize),

    /// Asynchronous I/O requested on a handle opened without overlapped contexts
    #[error("handle was opened without overlapped I/O contexts")]
    NotOverlapped,

    /// Malformed configuration file
    #[error("configuration error: {0}")]
    Config(String),

    /// The running process cannot use the service on this host
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Native component version outside the supported set
    #[error("unsupported WinDivert version: {found}")]
    UnsupportedNativeVersion { found: String },

    /// The module source does not exist
    #[error("native module not found: {0}")]
    ModuleNotFound(String),

    /// The module source exists but could not be read or staged
    #[error("failed to read native module {name}: {reason}")]
    ModuleRead { name: String, reason: String },

    /// The module bytes are not a loadable image for this process
    #[error("malformed native module: {0}")]
    MalformedModule(String),

    /// The module does not export a required entry point
    #[error("symbol {0} not found in native module")]
    SymbolNotFound(String),

    /// A native call failed; `code` is the OS last-error value, verbatim
    #[error("native call failed with OS error {code}")]
    NativeIo { code: u32 },

    /// A payload view inconsistent with the record's layer was requested
    #[error("address payload is tagged {actual:?}, not {expected:?}")]
    LayerMismatch { expected: Layer, actual: Layer },

    /// Error when a mutex is poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// A convenient Result type alias using `DivertError`.
pub type Result<T> = std::result::Result<T, DivertError>;

impl DivertError {
    /// Creates a new lock poisoned error with a descriptive message.
    pub fn lock_poisoned(resource: &str) -> Self {
        Self::LockPoisoned(format!("Failed to acquire lock on {}", resource))
    }

    /// Wraps an OS last-error value.
    pub fn native(code: u32) -> Self {
        Self::NativeIo { code }
    }

    /// Classifies the error according to how a caller may react to it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPriority(_)
            | Self::InvalidParamValue { .. }
            | Self::UnsupportedParam(_)
            | Self::InvalidFilter(_)
            | Self::BatchTooLarge(_)
            | Self::NotOverlapped
            | Self::Config(_) => ErrorKind::Configuration,
            Self::UnsupportedPlatform(_) => ErrorKind::Platform,
            Self::UnsupportedNativeVersion { .. } => ErrorKind::Compatibility,
            Self::ModuleNotFound(_)
            | Self::ModuleRead { .. }
            | Self::MalformedModule(_)
            | Self::SymbolNotFound(_) => ErrorKind::Resolution,
            Self::NativeIo { .. } => ErrorKind::NativeIo,
            Self::LayerMismatch { .. } => ErrorKind::LayerMismatch,
            Self::LockPoisoned(_) => ErrorKind::Internal,
        }
    }

    /// The OS error code, if this error came from a failed native call.
    pub fn os_code(&self) -> Option<u32> {
        match self {
            Self::NativeIo { code } => Some(*code),
            _ => None,
        }
    }

    /// True when an overlapped operation was queued rather than completed.
    pub fn is_io_pending(&self) -> bool {
        self.os_code() == Some(ERROR_IO_PENDING)
    }

    /// True when an overlapped wait elapsed.
    pub fn is_timeout(&self) -> bool {
        self.os_code() == Some(WAIT_TIMEOUT)
    }
}
