mod config;

use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use humantime::{FormattedDuration, format_duration, parse_duration};
use tracing::info;

use radar_discovery::{local::LocalBackend, power::PowerModePolicy, session::ScanSession};
use radar_domain::{
    chrono_extra::DurationExt,
    journal::JournalReport,
    known_device::KnownDevice,
    profile::{Filter, RadarProfile},
};
use radar_heatmap::{
    engine::HeatmapTileEngine,
    geo::HeatPoint,
    tile::{Tile, build_tiles, sort_tiles},
};
use radar_service::{env::FixedLocation, scheduler::ScanScheduler};
use radar_sinks::{StoreFormat, store::RadarStore};

use config::{PowerModeChoice, RadarConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// path to SQLite db file, overrides the config
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// power mode, overrides the config
    #[arg(short, long)]
    power_mode: Option<PowerModeChoice>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background scanner until interrupted
    Scan,
    /// Manage radar profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Print recent journal entries
    Journal {
        /// how far back to look
        #[arg(long, default_value = "1day", value_parser = parse_duration)]
        since: Duration,

        /// print error traces as well as titles
        #[arg(long)]
        traces: bool,

        /// delete entries older than this before printing
        #[arg(long, value_parser = parse_duration)]
        gc_older_than: Option<Duration>,
    },
    /// Render heat tiles of recorded locations to PNG files
    #[command(group(ArgGroup::new("source").required(true).args(["address", "profile"])))]
    Heatmap {
        /// locations where this device was seen
        #[arg(long)]
        address: Option<String>,

        /// locations where this profile triggered
        #[arg(long)]
        profile: Option<i64>,

        /// output directory
        #[arg(short, long)]
        out: PathBuf,

        /// outline each tile
        #[arg(long)]
        debug_border: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    /// Add a profile; the filter is YAML or JSON, e.g. '{type: min_rssi, rssi: -60}'
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        filter: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
    List,
    Delete {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = config(&args)?;
    let store = store(&config).await?;

    match args.command {
        Command::Scan => scan(&config, store).await,
        Command::Profile { command } => profile(command, store).await,
        Command::Journal {
            since,
            traces,
            gc_older_than,
        } => journal(store, since, traces, gc_older_than).await,
        Command::Heatmap {
            address,
            profile,
            out,
            debug_border,
        } => heatmap(&config, store, address, profile, out, debug_border).await,
    }
}

fn config(args: &Args) -> anyhow::Result<RadarConfig> {
    let mut config = match &args.config {
        Some(path) => RadarConfig::load(path)?,
        None => RadarConfig::default(),
    };
    if let Some(db) = &args.db {
        config.db = Some(db.clone());
    }
    if let Some(mode) = args.power_mode {
        config.power.mode = mode;
    }
    Ok(config)
}

async fn store(config: &RadarConfig) -> anyhow::Result<Arc<dyn RadarStore>> {
    let format = match &config.db {
        Some(path) => StoreFormat::create_from_file(path)?,
        None => StoreFormat::MEMORY,
    };
    format
        .to_store()
        .await
        .with_context(|| format!("opening store {format:?}"))
}

async fn scan(config: &RadarConfig, store: Arc<dyn RadarStore>) -> anyhow::Result<()> {
    let backend = LocalBackend::new()
        .await
        .context("opening Bluetooth adapter")?;
    let power = Arc::new(PowerModePolicy::new(
        Arc::new(config.power.device_state()),
        config.power.table(),
    ));
    info!("Power mode: {}", power.current_mode(false));
    let session = Arc::new(ScanSession::new(Arc::new(backend)).with_power_policy(power.clone()));

    let mut scheduler =
        ScanScheduler::new(session, power, store.clone(), config.scheduler_config());
    if let Some(location) = config.location {
        scheduler = scheduler.with_location(Arc::new(FixedLocation::new(location.lat, location.lng)));
    }
    let handle = scheduler.handle();
    let start = Utc::now();
    let mut running = tokio::spawn(scheduler.run());

    tokio::select! {
        finished = &mut running => finished.context("background scanner panicked")?,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("waiting for Ctrl-C")?;
            handle.stop().await;
            running.await.context("background scanner panicked")?;
        }
    }

    let mut devices = store.all_devices().await?;
    devices.retain(|device| device.last_seen >= start);
    print_devices(&devices, Utc::now());
    Ok(())
}

fn print_devices(devices: &[KnownDevice], now: DateTime<Utc>) {
    let mut devices: Vec<&KnownDevice> = devices.iter().collect();
    devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.address.cmp(&b.address)));

    println!("\n=== Devices seen this run ===");
    println!(
        "{:<20} {:<24} {:>4} {:>8} {:>8}",
        "Address", "Name", "RSSI", "Seen", "Last"
    );
    println!("{}", "-".repeat(68));
    for device in &devices {
        println!(
            "{:<20} {:<24} {:>4} {:>8} {:>8}",
            device.address,
            device.display_name().unwrap_or("-"),
            device.rssi,
            device.detect_count,
            age(now - device.last_seen)
        );
    }
    println!("\nTotal devices: {}", devices.len());
}

fn age(duration: chrono::Duration) -> FormattedDuration {
    format_duration(duration.truncate_to_seconds().to_std_saturating())
}

async fn profile(command: ProfileCommand, store: Arc<dyn RadarStore>) -> anyhow::Result<()> {
    match command {
        ProfileCommand::Add {
            name,
            filter,
            description,
            disabled,
        } => {
            let filter: Filter = serde_yaml::from_str(&filter).context("parsing filter")?;
            let mut profile = RadarProfile::new(name, filter);
            profile.description = description;
            profile.enabled = !disabled;
            let id = store.save_profile(&profile).await?;
            println!("Saved profile {id}");
        }
        ProfileCommand::List => {
            for profile in store.profiles().await? {
                println!(
                    "{:>4} {:<8} {:<24} {}",
                    profile.id.unwrap_or_default(),
                    if profile.enabled { "enabled" } else { "disabled" },
                    profile.name,
                    serde_json::to_string(&profile.filter)?
                );
            }
        }
        ProfileCommand::Delete { id } => {
            if !store.delete_profile(id).await? {
                bail!("no profile with id {id}");
            }
            println!("Deleted profile {id}");
        }
    }
    Ok(())
}

async fn journal(
    store: Arc<dyn RadarStore>,
    since: Duration,
    traces: bool,
    gc_older_than: Option<Duration>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    if let Some(older_than) = gc_older_than {
        let cutoff = now - chrono::Duration::from_std(older_than)?;
        let deleted = store.delete_before(cutoff).await?;
        println!("Deleted {deleted} journal entries before {cutoff}");
    }

    let from = now - chrono::Duration::from_std(since)?;
    for entry in store.entries(from, now).await? {
        println!("{} ({} ago) {}", entry.time, age(now - entry.time), entry.report);
        if let (true, JournalReport::Error { stack_trace, .. }) = (traces, &entry.report) {
            for line in stack_trace.lines() {
                println!("    {line}");
            }
        }
    }
    Ok(())
}

async fn heatmap(
    config: &RadarConfig,
    store: Arc<dyn RadarStore>,
    address: Option<String>,
    profile: Option<i64>,
    out: PathBuf,
    debug_border: bool,
) -> anyhow::Result<()> {
    let locations = match (address, profile) {
        (Some(address), _) => store.locations_for_device(&address).await?,
        (None, Some(profile_id)) => store.locations_for_profile(profile_id).await?,
        (None, None) => bail!("either --address or --profile is required"),
    };
    if locations.is_empty() {
        bail!("no locations recorded");
    }
    let points: Vec<HeatPoint> = locations.iter().map(HeatPoint::from).collect();

    let settings = &config.heatmap;
    let params = radar_heatmap::render::RenderParams {
        debug_border,
        ..settings.render_params()
    };
    let mut tiles: Vec<Tile> = build_tiles(&points, settings.tile_size_m, settings.padding_m)?
        .into_iter()
        .collect();
    sort_tiles(&mut tiles);

    fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;
    let engine = HeatmapTileEngine::new(settings.cache_capacity);
    for (tile, image) in engine.render_all(&tiles, &points, &params) {
        let name = format!(
            "tile_{}_{}.png",
            (tile.left() / settings.tile_size_m).round() as i64,
            (tile.bottom() / settings.tile_size_m).round() as i64
        );
        let path = out.join(name);
        image?
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    println!(
        "Rendered {} tile(s) from {} location(s) into {}",
        tiles.len(),
        points.len(),
        out.display()
    );
    Ok(())
}
