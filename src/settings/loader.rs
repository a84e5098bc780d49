use crate::error::{DivertError, Result};
use crate::loader::{ModuleSource, DEFAULT_LIBRARY};
use crate::settings::queue::QueueOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "DIVERT_CONFIG";

/// File name of the configuration inside the per-user config directory.
pub const CONFIG_FILE: &str = "divert.toml";

fn default_library() -> PathBuf {
    PathBuf::from(DEFAULT_LIBRARY)
}

/// Where the native module comes from.
///
/// ```toml
/// [module]
/// source = "resource"
/// name = "WINDIVERT"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ModuleConfig {
    /// An installed library, by name or path
    File {
        #[serde(default = "default_library")]
        path: PathBuf,
    },
    /// An `RT_RCDATA` resource of the running executable
    Resource { name: String },
    /// The image compiled in through `DIVERT_EMBED_DLL`
    Embedded,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::File {
            path: default_library(),
        }
    }
}

impl ModuleConfig {
    pub fn to_source(&self) -> Result<ModuleSource> {
        match self {
            Self::File { path } => Ok(ModuleSource::File(path.clone())),
            Self::Resource { name } => Ok(ModuleSource::Resource(name.clone())),
            Self::Embedded => ModuleSource::embedded_default().ok_or_else(|| {
                DivertError::Config(
                    "this build has no embedded module; rebuild with DIVERT_EMBED_DLL set"
                        .to_string(),
                )
            }),
        }
    }
}

/// Process-wide loader configuration.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct LoaderSettings {
    /// Source of the native module
    #[serde(default)]
    pub module: ModuleConfig,

    /// Queue presets applied to every handle the process context opens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueOptions>,
}

impl LoaderSettings {
    /// `$DIVERT_CONFIG`, or `divert/divert.toml` in the user config directory.
    pub fn default_path() -> Option<PathBuf> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => dirs::config_dir().map(|dir| dir.join("divert").join(CONFIG_FILE)),
        }
    }

    /// Loads the configuration from `default_path`.
    ///
    /// A missing file in the config directory means defaults. A file named by
    /// `DIVERT_CONFIG` must exist.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV).map_or(false, |p| !p.is_empty());
        match Self::default_path() {
            Some(path) if explicit || path.exists() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DivertError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| DivertError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| DivertError::Config(e.to_string()))?;
        if let Some(queue) = &settings.queue {
            queue.validate()?;
        }
        Ok(settings)
    }

    /// Saves the configuration to a TOML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| DivertError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DivertError::Config(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(path, content).map_err(|e| {
            DivertError::Config(format!("failed to write {}: {}", path.display(), e))
        })
    }

    pub fn module_source(&self) -> Result<ModuleSource> {
        self.module.to_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_installed_library() {
        let settings = LoaderSettings::from_toml("").unwrap();
        assert_eq!(settings, LoaderSettings::default());
        assert_eq!(settings.module_source().unwrap(), ModuleSource::installed());
    }

    #[test]
    fn test_parse_sources() {
        let settings = LoaderSettings::from_toml(
            r#"
            [module]
            source = "resource"
            name = "WINDIVERT"
            "#,
        )
        .unwrap();
        assert_eq!(
            settings.module_source().unwrap(),
            ModuleSource::Resource("WINDIVERT".into())
        );

        let settings = LoaderSettings::from_toml(
            r#"
            [module]
            source = "file"
            path = 'C:\Tools\WinDivert.dll'
            "#,
        )
        .unwrap();
        assert_eq!(
            settings.module,
            ModuleConfig::File {
                path: PathBuf::from(r"C:\Tools\WinDivert.dll")
            }
        );
    }

    #[cfg(not(divert_embedded))]
    #[test]
    fn test_embedded_needs_build_support() {
        let settings = LoaderSettings::from_toml("[module]\nsource = \"embedded\"\n").unwrap();
        assert!(matches!(
            settings.module_source(),
            Err(DivertError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_files_are_config_errors() {
        assert!(matches!(
            LoaderSettings::from_toml("[module]\nsource = \"floppy\"\n"),
            Err(DivertError::Config(_))
        ));
        assert!(matches!(
            LoaderSettings::from_toml("[queue]\nlength = 5\n"),
            Err(DivertError::InvalidParamValue { .. })
        ));
        assert!(matches!(
            LoaderSettings::load_from_file("/nonexistent/divert.toml"),
            Err(DivertError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("divert-settings-{}", std::process::id()))
            .join(CONFIG_FILE);
        let settings = LoaderSettings {
            module: ModuleConfig::Resource {
                name: "WINDIVERT".into(),
            },
            queue: Some(QueueOptions {
                length: Some(8192),
                ..Default::default()
            }),
        };

        settings.save_to_file(&path).unwrap();
        assert_eq!(LoaderSettings::load_from_file(&path).unwrap(), settings);

        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }
}
