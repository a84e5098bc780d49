use super::invoke::{invoke, ArgList, CallResult};
use super::{Module, ModuleLoader, ModuleSource, SystemLoader};
use crate::error::{DivertError, Result};
use log::{debug, info};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A native module that is loaded on first use and kept for the life of the
/// process.
///
/// Concurrent first callers block until exactly one of them has run the
/// loader, then all observe the same outcome. Once the slot is filled every
/// later call is a lock-free read. Failures are cached too: the source is
/// static, so a second attempt would fail the same way.
pub struct LazyModule {
    source: ModuleSource,
    loader: Arc<dyn ModuleLoader>,
    module: OnceLock<Result<Box<dyn Module>>>,
}

impl LazyModule {
    pub fn new(source: ModuleSource, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            source,
            loader,
            module: OnceLock::new(),
        }
    }

    /// A module loaded by the host OS loader.
    pub fn system(source: ModuleSource) -> Self {
        Self::new(source, Arc::new(SystemLoader::new()))
    }

    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// Loads the module if no caller has done so yet.
    pub fn load(&self) -> Result<()> {
        self.module().map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.module.get(), Some(Ok(_)))
    }

    /// Base address of the loaded module.
    pub fn base(&self) -> Result<usize> {
        self.module().map(|module| module.base())
    }

    /// Creates a lazily resolved handle to one export of this module.
    pub fn symbol(self: &Arc<Self>, name: &'static str) -> LazySymbol {
        LazySymbol::new(Arc::clone(self), name)
    }

    fn module(&self) -> Result<&dyn Module> {
        match self.module.get_or_init(|| self.load_now()) {
            Ok(module) => Ok(module.as_ref()),
            Err(e) => Err(e.clone()),
        }
    }

    fn load_now(&self) -> Result<Box<dyn Module>> {
        debug!("Loading native module from {}", self.source);
        match self.loader.load(&self.source) {
            Ok(module) => {
                info!(
                    "Loaded native module from {} at {:#x}",
                    self.source,
                    module.base()
                );
                Ok(module)
            }
            Err(e) => {
                debug!("Native module {} failed to load: {}", self.source, e);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for LazyModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyModule")
            .field("source", &self.source)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// One export of a `LazyModule`, resolved on first use.
///
/// Resolution loads the module first when needed. A missing export is
/// reported as `SymbolNotFound`; a module that failed to load reports the
/// module's own error.
pub struct LazySymbol {
    module: Arc<LazyModule>,
    name: &'static str,
    addr: OnceLock<Result<usize>>,
}

impl LazySymbol {
    pub fn new(module: Arc<LazyModule>, name: &'static str) -> Self {
        Self {
            module,
            name,
            addr: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn module(&self) -> &Arc<LazyModule> {
        &self.module
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.addr.get(), Some(Ok(_)))
    }

    /// Address of the export.
    pub fn resolve(&self) -> Result<usize> {
        self.addr
            .get_or_init(|| {
                let module = self.module.module()?;
                match module.symbol(self.name) {
                    Some(addr) if addr != 0 => {
                        debug!("Resolved {} at {:#x}", self.name, addr);
                        Ok(addr)
                    }
                    _ => Err(DivertError::SymbolNotFound(self.name.to_string())),
                }
            })
            .clone()
    }

    /// Resolves the export and calls it.
    ///
    /// # Safety
    ///
    /// Same contract as [`invoke`]: `args` must match the export's real
    /// signature and every pointer in it must stay valid for the call.
    pub unsafe fn call(&self, args: &ArgList) -> Result<CallResult> {
        let addr = self.resolve()?;
        Ok(invoke(addr, args.as_slice()))
    }
}

impl fmt::Debug for LazySymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySymbol")
            .field("name", &self.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
