//! Calls into resolved native addresses with 0 to 15 word-sized arguments.
//!
//! The native entry points take different numbers of arguments, so calls go
//! through one dispatcher instead of a bespoke call site per export. The
//! dispatcher transmutes the address to a `extern "system"` function pointer
//! of exactly the requested arity: every argument lands in the register or
//! stack slot the calling convention assigns to its position, and callee-
//! cleanup conventions (32-bit stdcall) pop exactly what was pushed.

use crate::platform;
use std::mem;

/// Most arguments a single native call may take.
pub const MAX_ARGS: usize = 15;

#[cfg(target_pointer_width = "64")]
type RawReturn = usize;
#[cfg(target_pointer_width = "32")]
type RawReturn = u64;

// On 32-bit targets the secondary result comes back in edx.
#[cfg(target_pointer_width = "64")]
fn split(ret: RawReturn) -> (usize, usize) {
    (ret, 0)
}

#[cfg(target_pointer_width = "32")]
fn split(ret: RawReturn) -> (usize, usize) {
    (ret as u32 as usize, (ret >> 32) as u32 as usize)
}

/// Outcome of one native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResult {
    /// Primary return register
    pub r1: usize,
    /// Secondary return register; always 0 on 64-bit targets
    pub r2: usize,
    /// OS last-error value read immediately after the call
    pub last_error: u32,
}

impl CallResult {
    /// Win32 `BOOL` convention: any non-zero primary result is success.
    pub fn succeeded(&self) -> bool {
        self.r1 != 0
    }
}

/// A bounded list of machine-word arguments.
///
/// Pushing a sixteenth word is a programming error and panics.
#[derive(Debug, Clone, Default)]
pub struct ArgList {
    words: [usize; MAX_ARGS],
    len: usize,
}

impl ArgList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word(mut self, word: usize) -> Self {
        assert!(
            self.len < MAX_ARGS,
            "native call takes at most {} arguments",
            MAX_ARGS
        );
        self.words[self.len] = word;
        self.len += 1;
        self
    }

    pub fn ptr<T>(self, ptr: *const T) -> Self {
        self.word(ptr as usize)
    }

    pub fn ptr_mut<T>(self, ptr: *mut T) -> Self {
        self.word(ptr as usize)
    }

    pub fn u32(self, value: u32) -> Self {
        self.word(value as usize)
    }

    /// Sign-extends to a full word.
    pub fn i32(self, value: i32) -> Self {
        self.word(value as isize as usize)
    }

    /// A 64-bit value takes one word on 64-bit targets and two, low word
    /// first, on 32-bit targets.
    pub fn u64(self, value: u64) -> Self {
        if mem::size_of::<usize>() >= 8 {
            self.word(value as usize)
        } else {
            self.word(value as u32 as usize).word((value >> 32) as u32 as usize)
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.words[..self.len]
    }
}

macro_rules! call_with_arity {
    (@word $i:tt) => { usize };
    ($addr:expr, $args:expr; $($n:literal => ($($i:tt)*)),+ $(,)?) => {
        match $args.len() {
            $(
                $n => {
                    let f: unsafe extern "system" fn($(call_with_arity!(@word $i)),*) -> RawReturn =
                        mem::transmute::<usize, _>($addr);
                    f($($args[$i]),*)
                }
            )+
            n => unreachable!("arity {} was checked against MAX_ARGS", n),
        }
    };
}

unsafe fn dispatch(addr: usize, args: &[usize]) -> RawReturn {
    call_with_arity!(addr, args;
        0 => (),
        1 => (0),
        2 => (0 1),
        3 => (0 1 2),
        4 => (0 1 2 3),
        5 => (0 1 2 3 4),
        6 => (0 1 2 3 4 5),
        7 => (0 1 2 3 4 5 6),
        8 => (0 1 2 3 4 5 6 7),
        9 => (0 1 2 3 4 5 6 7 8),
        10 => (0 1 2 3 4 5 6 7 8 9),
        11 => (0 1 2 3 4 5 6 7 8 9 10),
        12 => (0 1 2 3 4 5 6 7 8 9 10 11),
        13 => (0 1 2 3 4 5 6 7 8 9 10 11 12),
        14 => (0 1 2 3 4 5 6 7 8 9 10 11 12 13),
        15 => (0 1 2 3 4 5 6 7 8 9 10 11 12 13 14),
    )
}

/// Calls the function at `addr` with `args` and captures the OS last error.
///
/// # Panics
///
/// If `args` holds more than `MAX_ARGS` words or `addr` is null.
///
/// # Safety
///
/// `addr` must point to a function using the platform `system` calling
/// convention that takes exactly `args.len()` word-sized arguments (64-bit
/// values split as `ArgList::u64` does), and every pointer in `args` must be
/// valid for whatever the callee does with it.
pub unsafe fn invoke(addr: usize, args: &[usize]) -> CallResult {
    assert!(
        args.len() <= MAX_ARGS,
        "native call with {} arguments exceeds the maximum of {}",
        args.len(),
        MAX_ARGS
    );
    assert_ne!(addr, 0, "native call to a null address");

    let ret = dispatch(addr, args);
    let last_error = platform::last_error();
    let (r1, r2) = split(ret);

    CallResult { r1, r2, last_error }
}
