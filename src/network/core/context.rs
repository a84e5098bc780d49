use crate::error::Result;
use crate::loader::ModuleSource;
use crate::native::{DivertApi, NativeApi};
use crate::network::address::{Address, Layer};
use crate::network::core::gate::{Version, VersionGate};
use crate::network::core::handle::Handle;
use crate::network::core::handle_manager::HandleConfig;
use crate::network::types::flags::{ChecksumFlags, OpenFlags};
use crate::network::types::param::Param;
use crate::network::types::priority::Priority;
use crate::platform;
use crate::settings::{LoaderSettings, QueueOptions};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Filter of the throwaway handle the version gate opens. Matches nothing.
const PROBE_FILTER: &str = "false";

/// Process-scoped state shared by every handle opened through it: the native
/// transport, the version gate and the default queue presets.
///
/// Most programs use the process-wide context behind [`crate::open`]; tests
/// and embedders build their own so that each one starts from a fresh gate.
pub struct DivertContext {
    api: Arc<dyn DivertApi>,
    gate: VersionGate,
    arch_check: fn() -> Result<()>,
    queue: Option<QueueOptions>,
}

impl DivertContext {
    pub fn new(api: Arc<dyn DivertApi>) -> Self {
        Self {
            api,
            gate: VersionGate::new(),
            arch_check: platform::check_architecture,
            queue: None,
        }
    }

    /// A context over the WinDivert library loaded from `source`.
    pub fn native(source: ModuleSource) -> Self {
        Self::new(Arc::new(NativeApi::from_source(source)))
    }

    /// A context over the module source named by `settings`, carrying its
    /// `[queue]` presets.
    pub fn from_settings(settings: &LoaderSettings) -> Result<Self> {
        let context = Self::native(settings.module_source()?);
        match &settings.queue {
            Some(queue) => context.with_queue(queue.clone()),
            None => Ok(context),
        }
    }

    /// Sets the queue presets applied to every handle this context opens,
    /// unless a `HandleConfig` brings its own.
    pub fn with_queue(mut self, queue: QueueOptions) -> Result<Self> {
        queue.validate()?;
        self.queue = (!queue.is_empty()).then_some(queue);
        Ok(self)
    }

    pub fn queue(&self) -> Option<&QueueOptions> {
        self.queue.as_ref()
    }

    /// Replaces the host architecture probe the gate runs first.
    pub fn with_arch_check(mut self, check: fn() -> Result<()>) -> Self {
        self.arch_check = check;
        self
    }

    pub fn api(&self) -> &Arc<dyn DivertApi> {
        &self.api
    }

    pub fn gate(&self) -> &VersionGate {
        &self.gate
    }

    /// Runs the compatibility check if it has not run yet and returns the
    /// native version, or the cached failure.
    pub fn version(&self) -> Result<Version> {
        self.gate.check(|| self.probe_version())
    }

    fn probe_version(&self) -> Result<Version> {
        (self.arch_check)()?;

        let handle = Handle::open_raw(
            Arc::clone(&self.api),
            PROBE_FILTER,
            Layer::default(),
            Priority::default(),
            OpenFlags::default(),
            false,
        )?;

        let version = handle
            .get_param(Param::VersionMajor)
            .and_then(|major| Ok(Version::new(major, handle.get_param(Param::VersionMinor)?)));
        let closed = handle.close();

        let version = version?;
        closed?;
        debug!("Native component reports version {}", version);
        Ok(version)
    }

    /// Opens a handle.
    ///
    /// The priority is range-checked before anything else; the first open of
    /// the context then runs the version gate.
    pub fn open(&self, filter: &str, layer: Layer, priority: i16, flags: OpenFlags) -> Result<Handle> {
        let priority = Priority::new(priority)?;
        self.version()?;
        let handle = Handle::open_raw(Arc::clone(&self.api), filter, layer, priority, flags, false)?;
        self.apply_queue(&handle, None)?;
        Ok(handle)
    }

    /// Like `open`, with overlapped contexts for `recv_async` / `send_async`.
    pub fn open_overlapped(
        &self,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<Handle> {
        let priority = Priority::new(priority)?;
        self.version()?;
        let handle = Handle::open_raw(Arc::clone(&self.api), filter, layer, priority, flags, true)?;
        self.apply_queue(&handle, None)?;
        Ok(handle)
    }

    /// Opens a handle from a `HandleConfig` and applies its queue presets, or
    /// the context's when the config has none.
    pub fn open_with(&self, config: &HandleConfig) -> Result<Handle> {
        if let Some(queue) = &config.queue {
            queue.validate()?;
        }
        self.version()?;

        let handle = Handle::open_raw(
            Arc::clone(&self.api),
            &config.filter,
            config.layer,
            config.priority,
            config.flags,
            config.overlapped,
        )?;
        self.apply_queue(&handle, config.queue.as_ref())?;
        Ok(handle)
    }

    fn apply_queue(&self, handle: &Handle, preset: Option<&QueueOptions>) -> Result<()> {
        match preset.or(self.queue.as_ref()) {
            Some(queue) => queue.apply(handle),
            None => Ok(()),
        }
    }

    /// Recomputes the checksums of a packet in place. Returns false when the
    /// packet had nothing to fix.
    pub fn calc_checksums(
        &self,
        packet: &mut [u8],
        addr: Option<&mut Address>,
        flags: ChecksumFlags,
    ) -> Result<bool> {
        self.api.calc_checksums(packet, addr, flags)
    }
}

impl fmt::Debug for DivertContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DivertContext")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DivertError, ErrorKind};
    use crate::settings::QueueOptions;
    use crate::testing::{Call, FakeApi};

    fn host_ok() -> Result<()> {
        Ok(())
    }

    fn wow64() -> Result<()> {
        Err(DivertError::UnsupportedPlatform("32-bit process on a 64-bit host".into()))
    }

    fn context(fake: &Arc<FakeApi>) -> DivertContext {
        DivertContext::new(Arc::clone(fake) as Arc<dyn DivertApi>).with_arch_check(host_ok)
    }

    #[test]
    fn test_priority_checked_before_transport() {
        let fake = Arc::new(FakeApi::new());
        let ctx = context(&fake);

        let err = ctx
            .open("true", Layer::Network, 3001, OpenFlags::new())
            .unwrap_err();
        assert_eq!(err, DivertError::InvalidPriority(3001));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(fake.total_calls(), 0);
        assert!(ctx.gate().outcome().is_none());

        for priority in [3000, -3000] {
            let handle = ctx
                .open("true", Layer::Network, priority, OpenFlags::new())
                .unwrap();
            assert_eq!(fake.last_open().unwrap().priority, priority);
            handle.close().unwrap();
        }
    }

    #[test]
    fn test_gate_accepts_supported_version() {
        let fake = Arc::new(FakeApi::with_version(2, 2));
        let ctx = context(&fake);

        assert_eq!(ctx.version().unwrap().to_string(), "2.2");
        // Throwaway handle: open, two reads, close.
        assert_eq!(fake.calls(Call::Open), 1);
        assert_eq!(fake.calls(Call::GetParam), 2);
        assert_eq!(fake.calls(Call::Close), 1);
        let probe = fake.last_open().unwrap();
        assert_eq!(probe.filter, "false");
        assert_eq!(probe.layer, Layer::Network);
        assert_eq!(probe.priority, 0);
        assert_eq!(probe.flags, OpenFlags::new());

        let handle = ctx
            .open("tcp", Layer::Network, 0, OpenFlags::new().set_sniff(true))
            .unwrap();
        assert_eq!(fake.calls(Call::Open), 2);
        assert_eq!(fake.calls(Call::GetParam), 2);
        assert_eq!(fake.last_open().unwrap().filter, "tcp");
        handle.close().unwrap();
    }

    #[test]
    fn test_gate_failure_replays_without_requery() {
        let fake = Arc::new(FakeApi::with_version(1, 9));
        let ctx = context(&fake);
        let expected = DivertError::UnsupportedNativeVersion {
            found: "1.9".into(),
        };

        let err = ctx.open("true", Layer::Network, 0, OpenFlags::new()).unwrap_err();
        assert_eq!(err, expected);
        assert_eq!(err.kind(), ErrorKind::Compatibility);
        let calls = fake.total_calls();

        // Even a fixed transport is not consulted again.
        fake.set_version(2, 2);
        for _ in 0..3 {
            assert_eq!(
                ctx.open("true", Layer::Network, 0, OpenFlags::new()).unwrap_err(),
                expected
            );
        }
        assert_eq!(ctx.version().unwrap_err(), expected);
        assert_eq!(fake.total_calls(), calls);
        assert_eq!(fake.calls(Call::GetParam), 2);
    }

    #[test]
    fn test_architecture_mismatch_is_fatal() {
        let fake = Arc::new(FakeApi::new());
        let ctx = DivertContext::new(Arc::clone(&fake) as Arc<dyn DivertApi>).with_arch_check(wow64);

        let err = ctx.open("true", Layer::Network, 0, OpenFlags::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Platform);
        assert_eq!(fake.total_calls(), 0);
        assert_eq!(ctx.version().unwrap_err(), err);
    }

    #[test]
    fn test_probe_open_failure_is_cached() {
        let fake = Arc::new(FakeApi::new());
        fake.fail_open(DivertError::native(5));
        let ctx = context(&fake);

        assert_eq!(ctx.version().unwrap_err(), DivertError::native(5));
        assert_eq!(
            ctx.open("true", Layer::Network, 0, OpenFlags::new()).unwrap_err(),
            DivertError::native(5)
        );
        assert_eq!(fake.calls(Call::Open), 1);
    }

    #[test]
    fn test_concurrent_first_opens_probe_once() {
        let fake = Arc::new(FakeApi::new());
        let ctx = context(&fake);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    ctx.open("udp", Layer::Network, 0, OpenFlags::new())
                        .unwrap()
                        .close()
                        .unwrap();
                });
            }
        });

        assert_eq!(fake.calls(Call::GetParam), 2);
        assert_eq!(fake.calls(Call::Open), 9);
    }

    #[test]
    fn test_open_with_applies_queue_presets() {
        let fake = Arc::new(FakeApi::new());
        let ctx = context(&fake);
        let config = HandleConfig::with_filter("tcp").queue(QueueOptions {
            length: Some(8192),
            time_ms: Some(1024),
            size_bytes: None,
        });

        let handle = ctx.open_with(&config).unwrap();
        assert_eq!(fake.param(Param::QueueLength), Some(8192));
        assert_eq!(fake.param(Param::QueueTime), Some(1024));
        handle.close().unwrap();

        let bad = HandleConfig::with_filter("tcp").queue(QueueOptions {
            length: Some(1),
            ..Default::default()
        });
        let opens = fake.calls(Call::Open);
        assert!(ctx.open_with(&bad).is_err());
        assert_eq!(fake.calls(Call::Open), opens);
    }

    #[test]
    fn test_settings_queue_applied_on_open() {
        let fake = Arc::new(FakeApi::new());
        let settings = LoaderSettings::from_toml("[queue]\nlength = 4096\nsize_bytes = 8388608\n").unwrap();
        let ctx = context(&fake).with_queue(settings.queue.clone().unwrap()).unwrap();

        let handle = ctx.open("tcp", Layer::Network, 0, OpenFlags::new()).unwrap();
        assert_eq!(fake.param(Param::QueueLength), Some(4096));
        assert_eq!(fake.param(Param::QueueSize), Some(8388608));
        assert_eq!(fake.param(Param::QueueTime), None);
        handle.close().unwrap();

        // The probe handle is left alone; only the real open sets parameters.
        assert_eq!(fake.calls(Call::SetParam), 2);

        let handle = ctx
            .open_overlapped("udp", Layer::Network, 0, OpenFlags::new())
            .unwrap();
        assert_eq!(fake.calls(Call::SetParam), 4);
        handle.close().unwrap();
    }

    #[test]
    fn test_from_settings_keeps_queue_presets() {
        let settings = LoaderSettings::from_toml("[queue]\ntime_ms = 250\n").unwrap();
        let ctx = DivertContext::from_settings(&settings).unwrap();
        assert_eq!(ctx.queue().and_then(|q| q.time_ms), Some(250));

        let ctx = DivertContext::from_settings(&LoaderSettings::default()).unwrap();
        assert!(ctx.queue().is_none());
    }

    #[test]
    fn test_config_queue_overrides_context_queue() {
        let fake = Arc::new(FakeApi::new());
        let ctx = context(&fake)
            .with_queue(QueueOptions {
                length: Some(4096),
                ..Default::default()
            })
            .unwrap();
        let config = HandleConfig::with_filter("tcp").queue(QueueOptions {
            time_ms: Some(512),
            ..Default::default()
        });

        let handle = ctx.open_with(&config).unwrap();
        assert_eq!(fake.param(Param::QueueTime), Some(512));
        assert_eq!(fake.param(Param::QueueLength), None);
        handle.close().unwrap();

        let handle = ctx.open_with(&HandleConfig::with_filter("udp")).unwrap();
        assert_eq!(fake.param(Param::QueueLength), Some(4096));
        handle.close().unwrap();
    }

    #[test]
    fn test_invalid_context_queue_rejected() {
        let fake = Arc::new(FakeApi::new());
        let err = context(&fake)
            .with_queue(QueueOptions {
                length: Some(1),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(fake.total_calls(), 0);
    }

    #[test]
    fn test_checksums_forwarded() {
        let fake = Arc::new(FakeApi::new());
        let ctx = context(&fake);
        let mut packet = fake.packet().to_vec();
        assert!(ctx
            .calc_checksums(&mut packet, None, ChecksumFlags::all())
            .unwrap());
        assert_eq!(fake.calls(Call::Checksums), 1);
    }
}
