use super::{pe, Module, ModuleLoader, ModuleSource, DEFAULT_LIBRARY};
use crate::error::{DivertError, Result};
use crate::platform;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// A module mapped by the host OS loader. Never unloaded.
#[derive(Debug)]
struct NativeModule {
    handle: isize,
}

impl Module for NativeModule {
    fn base(&self) -> usize {
        self.handle as usize
    }

    fn symbol(&self, name: &str) -> Option<usize> {
        platform::proc_address(self.handle, name)
    }
}

/// Loads modules through the host OS loader.
///
/// Images held in memory (resources and embedded bytes) are checked with
/// `pe::validate_image`, written once into a per-user cache directory and
/// loaded from there.
///
/// Staging means an embedded or resource image does touch the disk at run
/// time, in the cache directory rather than next to the executable. The OS
/// loader only maps files; mapping the image straight from memory would need
/// a hand-written PE loader, which this crate does not carry. Staged names
/// are derived from a SHA-256 of the image, so the same image always maps to
/// the same file across builds and toolchains.
#[derive(Debug, Clone, Default)]
pub struct SystemLoader {
    cache_dir: Option<PathBuf>,
}

impl SystemLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages in-memory images under `dir` instead of the user cache directory.
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(dir.into()),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("divert")
        })
    }

    fn load_file(&self, path: &Path) -> Result<Box<dyn Module>> {
        let handle = platform::load_library(path)?;
        Ok(Box::new(NativeModule { handle }))
    }

    fn load_image(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn Module>> {
        let image = pe::validate_image(bytes)?;
        debug!(
            "Validated {} (machine {:#06x}, {} bytes)",
            name,
            image.machine,
            bytes.len()
        );

        let path = self.stage(name, bytes)?;
        self.load_file(&path)
    }

    /// Writes `bytes` to a content-addressed file, reusing an identical copy.
    fn stage(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let read_error = |e: std::io::Error| DivertError::ModuleRead {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let dir = self.staging_dir();
        fs::create_dir_all(&dir).map_err(read_error)?;

        let path = dir.join(staged_name(bytes));

        // A copy that is already loaded elsewhere cannot be rewritten.
        if let Ok(existing) = fs::read(&path) {
            if existing == bytes {
                debug!("Reusing staged module {}", path.display());
                return Ok(path);
            }
        }

        let partial = path.with_extension(format!("{}.tmp", std::process::id()));
        fs::write(&partial, bytes).map_err(read_error)?;
        if let Err(e) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(read_error(e));
        }

        info!("Staged {} at {}", name, path.display());
        Ok(path)
    }
}

/// `WinDivert-<first 8 bytes of SHA-256, hex>.dll`
fn staged_name(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}.dll", DEFAULT_LIBRARY.trim_end_matches(".dll"), hex)
}

impl ModuleLoader for SystemLoader {
    fn load(&self, source: &ModuleSource) -> Result<Box<dyn Module>> {
        match source {
            ModuleSource::File(path) => self.load_file(path),
            ModuleSource::Resource(name) => {
                let bytes = platform::read_resource(name)?;
                self.load_image(&source.name(), &bytes)
            }
            ModuleSource::Embedded(bytes) => self.load_image(&source.name(), bytes),
        }
    }
}
