use crate::error::{DivertError, Result};
use log::{error, info};
use std::fmt;
use std::sync::OnceLock;

/// Native component versions this crate speaks, as `"major.minor"`.
pub const SUPPORTED_VERSIONS: &[&str] = &["2.0", "2.1", "2.2"];

/// Version reported by the native component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    pub fn is_supported(&self) -> bool {
        let joined = self.to_string();
        SUPPORTED_VERSIONS.contains(&joined.as_str())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Run-once compatibility check shared by every open of a context.
///
/// The first caller runs the probe; concurrent callers wait for it. The
/// outcome, pass or fail, is kept and returned to every later caller without
/// probing again.
#[derive(Debug, Default)]
pub struct VersionGate {
    state: OnceLock<Result<Version>>,
}

impl VersionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `probe` if the gate has not been decided yet, then checks the
    /// version it reports against `SUPPORTED_VERSIONS`.
    pub fn check<F>(&self, probe: F) -> Result<Version>
    where
        F: FnOnce() -> Result<Version>,
    {
        self.state
            .get_or_init(|| {
                let outcome = probe().and_then(|version| {
                    if version.is_supported() {
                        Ok(version)
                    } else {
                        Err(DivertError::UnsupportedNativeVersion {
                            found: version.to_string(),
                        })
                    }
                });
                match &outcome {
                    Ok(version) => info!("WinDivert {} passed the version check", version),
                    Err(e) => error!("WinDivert version check failed: {}", e),
                }
                outcome
            })
            .clone()
    }

    /// The cached outcome, if the gate has run.
    pub fn outcome(&self) -> Option<&Result<Version>> {
        self.state.get()
    }

    pub fn is_passed(&self) -> bool {
        matches!(self.state.get(), Some(Ok(_)))
    }
}
