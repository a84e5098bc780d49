//! Lazy resolution of the native WinDivert module.
//!
//! The module can come from an installed library, an `RT_RCDATA` resource of
//! the running executable, or bytes compiled into the binary. Nothing is
//! linked at build time: `LazyModule` loads the source on first use and
//! `LazySymbol` resolves each export on first call, both exactly once per
//! process, and `invoke` dispatches calls to the resolved addresses.

pub mod invoke;
pub mod lazy;
pub mod pe;
pub mod system;

pub use invoke::{invoke, ArgList, CallResult, MAX_ARGS};
pub use lazy::{LazyModule, LazySymbol};
pub use system::SystemLoader;

use crate::error::Result;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Library name the installed component is published under.
pub const DEFAULT_LIBRARY: &str = "WinDivert.dll";

/// Where the native module's bytes come from.
#[derive(Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// A library found through the OS search path, or an explicit path
    File(PathBuf),
    /// An `RT_RCDATA` resource of the running executable
    Resource(String),
    /// A module image held in memory
    Embedded(Cow<'static, [u8]>),
}

impl ModuleSource {
    /// The installed library, looked up by name.
    pub fn installed() -> Self {
        Self::File(PathBuf::from(DEFAULT_LIBRARY))
    }

    /// The module compiled in through `DIVERT_EMBED_DLL`, if this build has one.
    pub fn embedded_default() -> Option<Self> {
        #[cfg(divert_embedded)]
        {
            static IMAGE: &[u8] = include_bytes!(env!("DIVERT_EMBED_DLL"));
            Some(Self::Embedded(Cow::Borrowed(IMAGE)))
        }
        #[cfg(not(divert_embedded))]
        {
            None
        }
    }

    /// Short name used in logs and error messages.
    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Resource(name) => format!("resource {}", name),
            Self::Embedded(bytes) => format!("embedded image ({} bytes)", bytes.len()),
        }
    }
}

impl Default for ModuleSource {
    fn default() -> Self {
        Self::installed()
    }
}

impl fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Resource(name) => f.debug_tuple("Resource").field(name).finish(),
            Self::Embedded(bytes) => f
                .debug_tuple("Embedded")
                .field(&format_args!("{} bytes", bytes.len()))
                .finish(),
        }
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A loaded executable module.
pub trait Module: Send + Sync {
    /// Base address the module is mapped at.
    fn base(&self) -> usize;

    /// Address of an exported symbol.
    fn symbol(&self, name: &str) -> Option<usize>;
}

/// Turns a `ModuleSource` into a loaded module.
///
/// Failures use the resolution error kinds: `ModuleNotFound`, `ModuleRead`
/// and `MalformedModule`.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, source: &ModuleSource) -> Result<Box<dyn Module>>;
}
