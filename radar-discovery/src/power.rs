use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerMode {
    Default,
    DefaultRestricted,
    PowerSaving,
}

impl std::fmt::Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use PowerMode::{Default, DefaultRestricted, PowerSaving};
        match self {
            Default => write!(f, "default"),
            DefaultRestricted => write!(f, "default-restricted"),
            PowerSaving => write!(f, "power-saving"),
        }
    }
}

/// Scan cadence and filtering parameters for one power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerModeSettings {
    pub scan_duration: Duration,
    pub scan_interval: Duration,
    pub use_restricted_filter: bool,
    pub try_to_wake_display: bool,
    pub filter_cache_ttl: Duration,
    pub filter_cache_capacity: usize,
}

pub const DEFAULT_FILTER_CACHE_CAPACITY: usize = 64;

impl PowerMode {
    pub fn default_settings(&self) -> PowerModeSettings {
        match self {
            PowerMode::Default => PowerModeSettings {
                scan_duration: Duration::from_secs(5),
                scan_interval: Duration::from_secs(5),
                use_restricted_filter: false,
                try_to_wake_display: false,
                filter_cache_ttl: Duration::from_secs(3 * 60),
                filter_cache_capacity: DEFAULT_FILTER_CACHE_CAPACITY,
            },
            PowerMode::DefaultRestricted => PowerModeSettings {
                scan_duration: Duration::from_secs(5),
                scan_interval: Duration::from_secs(10),
                use_restricted_filter: true,
                try_to_wake_display: true,
                filter_cache_ttl: Duration::from_secs(5 * 60),
                filter_cache_capacity: DEFAULT_FILTER_CACHE_CAPACITY,
            },
            PowerMode::PowerSaving => PowerModeSettings {
                scan_duration: Duration::from_secs(2),
                scan_interval: Duration::from_secs(15),
                use_restricted_filter: true,
                try_to_wake_display: false,
                filter_cache_ttl: Duration::from_secs(10 * 60),
                filter_cache_capacity: DEFAULT_FILTER_CACHE_CAPACITY,
            },
        }
    }
}

/// Settings for every mode, overridable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerModeTable {
    pub default: PowerModeSettings,
    pub default_restricted: PowerModeSettings,
    pub power_saving: PowerModeSettings,
}

impl Default for PowerModeTable {
    fn default() -> Self {
        PowerModeTable {
            default: PowerMode::Default.default_settings(),
            default_restricted: PowerMode::DefaultRestricted.default_settings(),
            power_saving: PowerMode::PowerSaving.default_settings(),
        }
    }
}

impl PowerModeTable {
    pub fn get(&self, mode: PowerMode) -> PowerModeSettings {
        match mode {
            PowerMode::Default => self.default,
            PowerMode::DefaultRestricted => self.default_restricted,
            PowerMode::PowerSaving => self.power_saving,
        }
    }

    pub fn get_mut(&mut self, mode: PowerMode) -> &mut PowerModeSettings {
        match mode {
            PowerMode::Default => &mut self.default,
            PowerMode::DefaultRestricted => &mut self.default_restricted,
            PowerMode::PowerSaving => &mut self.power_saving,
        }
    }
}

/// Instantaneous device power state.
pub trait DeviceStateProbe: Send + Sync {
    fn is_power_save_mode(&self) -> bool;
    /// Screen on and unlocked.
    fn is_interactive(&self) -> bool;
}

/// Probe with fixed answers, for hosts that have no power management to ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDeviceState {
    pub power_save: bool,
    pub interactive: bool,
}

impl DeviceStateProbe for StaticDeviceState {
    fn is_power_save_mode(&self) -> bool {
        self.power_save
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Something that can keep the display awake while held.
pub trait WakeLockProvider: Send + Sync {
    fn acquire(&self, tag: &str);
    fn release(&self, tag: &str);
}

/// Releases its wake lock when dropped.
pub struct WakeLockGuard {
    provider: Arc<dyn WakeLockProvider>,
    tag: &'static str,
}

impl WakeLockGuard {
    pub fn acquire(provider: Arc<dyn WakeLockProvider>, tag: &'static str) -> WakeLockGuard {
        provider.acquire(tag);
        WakeLockGuard { provider, tag }
    }
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        self.provider.release(self.tag);
    }
}

const WAKE_LOCK_TAG: &str = "radar:temporary-wake";

pub struct PowerModePolicy {
    probe: Arc<dyn DeviceStateProbe>,
    wake_locks: Option<Arc<dyn WakeLockProvider>>,
    table: PowerModeTable,
    cached: Mutex<PowerMode>,
}

impl PowerModePolicy {
    pub fn new(probe: Arc<dyn DeviceStateProbe>, table: PowerModeTable) -> PowerModePolicy {
        PowerModePolicy {
            probe,
            wake_locks: None,
            table,
            cached: Mutex::new(PowerMode::Default),
        }
    }

    #[must_use]
    pub fn with_wake_locks(mut self, wake_locks: Arc<dyn WakeLockProvider>) -> PowerModePolicy {
        self.wake_locks = Some(wake_locks);
        self
    }

    /// Power saving beats non-interactive, which beats default. With
    /// `use_cached` the last computed mode is returned without asking the
    /// device again.
    pub fn current_mode(&self, use_cached: bool) -> PowerMode {
        let mut cached = self.cached.lock();
        if !use_cached {
            *cached = if self.probe.is_power_save_mode() {
                PowerMode::PowerSaving
            } else if !self.probe.is_interactive() {
                PowerMode::DefaultRestricted
            } else {
                PowerMode::Default
            };
        }
        *cached
    }

    pub fn current_settings(&self, use_cached: bool) -> PowerModeSettings {
        self.table.get(self.current_mode(use_cached))
    }

    pub fn settings(&self, mode: PowerMode) -> PowerModeSettings {
        self.table.get(mode)
    }

    /// Holds a display wake lock for `duration`. The lock is released when the
    /// returned task finishes or is aborted, and also if the runtime drops it.
    /// Does nothing when the display is already on or no provider is set.
    pub fn wake_display_temporarily(&self, duration: Duration) -> Option<JoinHandle<()>> {
        if self.probe.is_interactive() {
            return None;
        }
        let provider = self.wake_locks.clone()?;
        info!("Waking display for {duration:?}");
        let guard = WakeLockGuard::acquire(provider, WAKE_LOCK_TAG);
        Some(tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(duration).await;
            debug!("Releasing display wake lock");
        }))
    }
}
