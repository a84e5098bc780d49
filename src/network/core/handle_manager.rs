//! Handle lifecycle management.
//!
//! `HandleManager` keeps at most one open handle for a configuration that may
//! change over time, reopening only when the configuration actually changes.

use crate::error::Result;
use crate::network::address::Layer;
use crate::network::core::context::DivertContext;
use crate::network::core::handle::Handle;
use crate::network::types::flags::OpenFlags;
use crate::network::types::priority::Priority;
use crate::settings::QueueOptions;
use log::{debug, error, info};

/// Configuration for opening a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleConfig {
    /// Filter expression, passed to the native component unmodified
    pub filter: String,
    /// Layer the handle attaches to
    pub layer: Layer,
    /// Priority for the handle (higher = earlier interception)
    pub priority: Priority,
    /// Open-time flags
    pub flags: OpenFlags,
    /// Whether to create overlapped contexts for asynchronous I/O
    pub overlapped: bool,
    /// Queue parameters applied right after opening
    pub queue: Option<QueueOptions>,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            filter: "true".to_string(),
            layer: Layer::Network,
            priority: Priority::DEFAULT,
            flags: OpenFlags::new(),
            overlapped: false,
            queue: None,
        }
    }
}

impl HandleConfig {
    /// Creates a new HandleConfig with the given filter.
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Default::default()
        }
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    /// Sets the priority for the handle.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets whether the handle should be receive-only.
    pub fn recv_only(mut self, recv_only: bool) -> Self {
        self.flags = self.flags.set_recv_only(recv_only);
        self
    }

    pub fn overlapped(mut self, overlapped: bool) -> Self {
        self.overlapped = overlapped;
        self
    }

    pub fn queue(mut self, queue: QueueOptions) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// Manages the lifecycle of one handle.
///
/// Dropping the manager closes its handle.
pub struct HandleManager<'ctx> {
    context: &'ctx DivertContext,
    handle: Option<Handle>,
    current_config: Option<HandleConfig>,
}

impl<'ctx> HandleManager<'ctx> {
    /// Creates a new HandleManager without an active handle.
    pub fn new(context: &'ctx DivertContext) -> Self {
        Self {
            context,
            handle: None,
            current_config: None,
        }
    }

    /// Returns whether a handle is currently active.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the current configuration, if any.
    pub fn config(&self) -> Option<&HandleConfig> {
        self.current_config.as_ref()
    }

    /// Opens a new handle with the given configuration.
    ///
    /// If a handle is already open, it is closed first.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the handle was created successfully
    /// * `Err(DivertError)` - If closing the old handle or opening the new one failed
    pub fn open(&mut self, config: HandleConfig) -> Result<()> {
        if self.handle.is_some() {
            self.close()?;
        }

        info!("Opening WinDivert handle with filter: {}", config.filter);
        match self.context.open_with(&config) {
            Ok(handle) => {
                debug!("WinDivert handle {} opened successfully", handle.raw());
                self.handle = Some(handle);
                self.current_config = Some(config);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open WinDivert handle: {}", e);
                Err(e)
            }
        }
    }

    /// Updates the handle with a new filter, only reopening if the filter changed.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the handle was reopened
    /// * `Ok(false)` - If no update was needed (filter unchanged)
    /// * `Err(DivertError)` - If reopening failed
    pub fn update_filter(&mut self, filter: &str) -> Result<bool> {
        let needs_update = match (&self.current_config, &self.handle) {
            (Some(config), Some(_)) => config.filter != filter,
            _ => true,
        };

        if !needs_update {
            return Ok(false);
        }

        let config = self
            .current_config
            .clone()
            .map(|mut c| {
                c.filter = filter.to_string();
                c
            })
            .unwrap_or_else(|| HandleConfig::with_filter(filter));

        self.open(config)?;
        Ok(true)
    }

    /// Closes the current handle if one is open.
    ///
    /// The handle is released even when the native close reports an error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            debug!("Closing WinDivert handle {}", handle.raw());
            self.current_config = None;
            handle.close()?;
        }
        Ok(())
    }

    /// Returns the open handle, if any.
    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }
}

impl Drop for HandleManager<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Error closing WinDivert handle on drop: {}", e);
        }
    }
}
