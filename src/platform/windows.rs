use crate::error::{DivertError, Result};
use crate::network::core::overlapped::RawOverlapped;
use std::ffi::{c_void, CString, OsStr};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use windows::core::{PCSTR, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, GetLastError, BOOL, HANDLE, HMODULE};
use windows::Win32::System::LibraryLoader::{
    FindResourceW, GetProcAddress, LoadLibraryW, LoadResource, LockResource, SizeofResource,
};
use windows::Win32::System::Threading::{CreateEventW, GetCurrentProcess, IsWow64Process};
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResultEx, OVERLAPPED};

const INFINITE: u32 = u32::MAX;
const ERROR_FILE_NOT_FOUND: u32 = 2;
const ERROR_PATH_NOT_FOUND: u32 = 3;
const ERROR_MOD_NOT_FOUND: u32 = 126;
const ERROR_BAD_EXE_FORMAT: u32 = 193;

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

fn handle(raw: isize) -> HANDLE {
    HANDLE(raw as *mut c_void)
}

/// Last OS error of the calling thread.
pub fn last_error() -> u32 {
    unsafe { GetLastError() }.0
}

/// Rejects a 32-bit process running on a 64-bit host.
///
/// The driver speaks the host's pointer width, so a WOW64 process would hand
/// it mis-sized records.
pub fn check_architecture() -> Result<()> {
    let mut wow64 = BOOL::default();
    unsafe { IsWow64Process(GetCurrentProcess(), &mut wow64) }.map_err(|e| {
        DivertError::UnsupportedPlatform(format!(
            "unable to determine whether the process is running under WOW64: {}",
            e
        ))
    })?;

    if wow64.as_bool() {
        return Err(DivertError::UnsupportedPlatform(
            "32-bit process on a 64-bit host; use a 64-bit build".to_string(),
        ));
    }
    Ok(())
}

/// Creates a manual-reset, unsignalled event for an overlapped context.
pub fn create_event() -> Result<isize> {
    let event = unsafe {
        CreateEventW(
            None,
            BOOL::from(true),
            BOOL::from(false),
            PCWSTR::null(),
        )
    }
    .map_err(|_| DivertError::native(last_error()))?;
    Ok(event.0 as isize)
}

pub fn close_event(event: isize) {
    if event != 0 {
        let _ = unsafe { CloseHandle(handle(event)) };
    }
}

/// Waits for an overlapped operation and returns the bytes it transferred.
///
/// `None` waits forever. An elapsed wait fails with `WAIT_TIMEOUT`.
pub fn overlapped_result(
    raw: isize,
    overlapped: *mut RawOverlapped,
    timeout_ms: Option<u32>,
) -> Result<u32> {
    let mut transferred = 0u32;
    unsafe {
        GetOverlappedResultEx(
            handle(raw),
            overlapped as *const OVERLAPPED,
            &mut transferred,
            timeout_ms.unwrap_or(INFINITE),
            BOOL::from(false),
        )
    }
    .map_err(|_| DivertError::native(last_error()))?;
    Ok(transferred)
}

/// Cancels one outstanding operation, or all of them when `overlapped` is `None`.
pub fn cancel_io(raw: isize, overlapped: Option<*mut RawOverlapped>) -> Result<()> {
    unsafe { CancelIoEx(handle(raw), overlapped.map(|ov| ov as *const OVERLAPPED)) }
        .map_err(|_| DivertError::native(last_error()))
}

/// Loads a library through the normal OS search path.
pub fn load_library(path: &Path) -> Result<isize> {
    let name = wide(path.as_os_str());
    match unsafe { LoadLibraryW(PCWSTR(name.as_ptr())) } {
        Ok(module) => Ok(module.0 as isize),
        Err(e) => Err(match last_error() {
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND | ERROR_MOD_NOT_FOUND => {
                DivertError::ModuleNotFound(path.display().to_string())
            }
            ERROR_BAD_EXE_FORMAT => DivertError::MalformedModule(format!(
                "{} is not a module for this architecture",
                path.display()
            )),
            _ => DivertError::ModuleRead {
                name: path.display().to_string(),
                reason: e.to_string(),
            },
        }),
    }
}

/// Looks up an export of a loaded module.
pub fn proc_address(module: isize, name: &str) -> Option<usize> {
    let name = CString::new(name).ok()?;
    let proc = unsafe { GetProcAddress(HMODULE(module as *mut c_void), PCSTR(name.as_ptr() as *const u8)) };
    proc.map(|f| f as usize)
}

/// Copies an `RT_RCDATA` resource out of the running executable.
pub fn read_resource(name: &str) -> Result<Vec<u8>> {
    let rt_rcdata = PCWSTR(10 as *const u16);
    let resource_name = wide(OsStr::new(name));
    let module = HMODULE::default();

    let info = unsafe { FindResourceW(module, PCWSTR(resource_name.as_ptr()), rt_rcdata) };
    if info.0.is_null() {
        return Err(DivertError::ModuleNotFound(format!("resource {}", name)));
    }

    let read_error = |reason: String| DivertError::ModuleRead {
        name: format!("resource {}", name),
        reason,
    };

    let data = unsafe { LoadResource(module, info) }.map_err(|e| read_error(e.to_string()))?;
    let size = unsafe { SizeofResource(module, info) };
    let ptr = unsafe { LockResource(data) };
    if ptr.is_null() || size == 0 {
        return Err(read_error("resource is empty".to_string()));
    }

    // Resource memory stays mapped for the life of the process.
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, size as usize) };
    Ok(bytes.to_vec())
}

/// Check if the current process is running with administrator privileges
///
/// Opening a handle requires them, so callers use this to fail early with a
/// readable message.
pub fn is_elevated() -> bool {
    use winapi::um::securitybaseapi::{AllocateAndInitializeSid, CheckTokenMembership, FreeSid};
    use winapi::um::winnt::{
        DOMAIN_ALIAS_RID_ADMINS, SECURITY_BUILTIN_DOMAIN_RID, SECURITY_NT_AUTHORITY,
    };

    unsafe {
        let mut sid = std::ptr::null_mut();

        if AllocateAndInitializeSid(
            &SECURITY_NT_AUTHORITY as *const _ as *mut _,
            2,
            SECURITY_BUILTIN_DOMAIN_RID,
            DOMAIN_ALIAS_RID_ADMINS,
            0,
            0,
            0,
            0,
            0,
            0,
            &mut sid,
        ) == 0
        {
            return false;
        }

        let mut is_member = 0;
        let elevated =
            CheckTokenMembership(std::ptr::null_mut(), sid, &mut is_member) != 0 && is_member != 0;

        FreeSid(sid);
        elevated
    }
}
