use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use radar_discovery::power::{PowerMode, PowerModeSettings, PowerModeTable, StaticDeviceState};
use radar_heatmap::{
    PADDING_METERS, TILE_SIZE_METERS, WIDTH_PX_CORE, engine::DEFAULT_CACHE_CAPACITY,
    render::RenderParams,
};
use radar_service::scheduler::SchedulerConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PowerModeChoice {
    /// Follow the probe values.
    #[default]
    Auto,
    Default,
    DefaultRestricted,
    PowerSaving,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeOverride {
    pub scan_duration_ms: Option<u64>,
    pub scan_interval_ms: Option<u64>,
    pub filter_cache_ttl_ms: Option<u64>,
    pub filter_cache_capacity: Option<usize>,
}

impl ModeOverride {
    fn apply(&self, settings: &mut PowerModeSettings) {
        if let Some(ms) = self.scan_duration_ms {
            settings.scan_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = self.scan_interval_ms {
            settings.scan_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.filter_cache_ttl_ms {
            settings.filter_cache_ttl = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.filter_cache_capacity {
            settings.filter_cache_capacity = capacity;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub mode: PowerModeChoice,
    /// Probe answers used in `auto` mode.
    pub power_save: bool,
    pub interactive: bool,
    pub default: ModeOverride,
    pub default_restricted: ModeOverride,
    pub power_saving: ModeOverride,
}

impl Default for PowerConfig {
    fn default() -> Self {
        PowerConfig {
            mode: PowerModeChoice::Auto,
            power_save: false,
            interactive: true,
            default: ModeOverride::default(),
            default_restricted: ModeOverride::default(),
            power_saving: ModeOverride::default(),
        }
    }
}

impl PowerConfig {
    pub fn table(&self) -> PowerModeTable {
        let mut table = PowerModeTable::default();
        self.default.apply(table.get_mut(PowerMode::Default));
        self.default_restricted
            .apply(table.get_mut(PowerMode::DefaultRestricted));
        self.power_saving.apply(table.get_mut(PowerMode::PowerSaving));
        table
    }

    /// Device state that makes the policy pick the configured mode.
    pub fn device_state(&self) -> StaticDeviceState {
        match self.mode {
            PowerModeChoice::Auto => StaticDeviceState {
                power_save: self.power_save,
                interactive: self.interactive,
            },
            PowerModeChoice::Default => StaticDeviceState {
                power_save: false,
                interactive: true,
            },
            PowerModeChoice::DefaultRestricted => StaticDeviceState {
                power_save: false,
                interactive: false,
            },
            PowerModeChoice::PowerSaving => StaticDeviceState {
                power_save: true,
                interactive: true,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    pub tile_size_m: f64,
    pub padding_m: f64,
    pub width_px: u32,
    pub downsample: u32,
    pub blur_sigma: f64,
    pub cache_capacity: usize,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        HeatmapConfig {
            tile_size_m: TILE_SIZE_METERS,
            padding_m: PADDING_METERS,
            width_px: WIDTH_PX_CORE,
            downsample: 4,
            blur_sigma: 1.5,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl HeatmapConfig {
    pub fn render_params(&self) -> RenderParams {
        RenderParams {
            width_px: self.width_px,
            padding_m: self.padding_m,
            downsample: self.downsample,
            blur_sigma: self.blur_sigma,
            debug_border: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// SQLite file; in-memory store when absent.
    pub db: Option<PathBuf>,
    pub power: PowerConfig,
    pub location: Option<LocationConfig>,
    pub notification_throttle_ms: u64,
    pub wake_display_while_scanning: bool,
    pub heatmap: HeatmapConfig,
}

impl Default for RadarConfig {
    fn default() -> Self {
        RadarConfig {
            db: None,
            power: PowerConfig::default(),
            location: None,
            notification_throttle_ms: 5 * 60 * 1000,
            wake_display_while_scanning: false,
            heatmap: HeatmapConfig::default(),
        }
    }
}

impl RadarConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading radar config {}", path_ref.display()))?;
        let config: RadarConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing radar config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            notification_throttle: Duration::from_millis(self.notification_throttle_ms),
            wake_display: self.wake_display_while_scanning,
        }
    }
}
