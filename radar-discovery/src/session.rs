use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::oneshot,
    time::{self, Instant},
};
use tracing::{debug, error, warn};

use radar_domain::scan::ScanBatch;

use crate::{
    BackendEvent, BleBackend, ScanError, ScanFilterSpec,
    power::{PowerModePolicy, PowerModeSettings},
    service_cache::ServiceUuidCache,
};

/// Parameters for one scan window. Scans always run in low-latency mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub duration: Duration,
    pub restricted: bool,
    pub wake_display: bool,
    pub filter_cache_ttl: Duration,
    pub filter_cache_capacity: usize,
}

impl ScanConfig {
    /// `wake_display_enabled` is the user's opt-in; the mode decides whether
    /// waking is attempted at all. A woken display gets the open filter.
    pub fn from_settings(settings: &PowerModeSettings, wake_display_enabled: bool) -> ScanConfig {
        let wake_display = settings.try_to_wake_display && wake_display_enabled;
        ScanConfig {
            duration: settings.scan_duration,
            restricted: settings.use_restricted_filter && !wake_display,
            wake_display,
            filter_cache_ttl: settings.filter_cache_ttl,
            filter_cache_capacity: settings.filter_cache_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Batch(ScanBatch),
    Cancelled,
}

enum WindowEnd {
    Elapsed,
    Failed(i32),
    Cancelled,
}

/// Owns the scan cycle against one backend. At most one window is open at a
/// time; the batch being collected is private to the running `scan` call.
pub struct ScanSession {
    backend: Arc<dyn BleBackend>,
    power: Option<Arc<PowerModePolicy>>,
    service_cache: Mutex<ServiceUuidCache>,
    in_progress: AtomicBool,
    /// Set by `stop`, so a stop that lands before the window opens still counts.
    stop_requested: AtomicBool,
    stop_signal: Mutex<Option<oneshot::Sender<()>>>,
}

impl ScanSession {
    pub fn new(backend: Arc<dyn BleBackend>) -> ScanSession {
        ScanSession {
            backend,
            power: None,
            service_cache: Mutex::new(ServiceUuidCache::new(
                crate::power::DEFAULT_FILTER_CACHE_CAPACITY,
            )),
            in_progress: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_signal: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_power_policy(mut self, power: Arc<PowerModePolicy>) -> ScanSession {
        self.power = Some(power);
        self
    }

    pub fn backend(&self) -> &Arc<dyn BleBackend> {
        &self.backend
    }

    pub fn is_scanning(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub async fn is_hardware_enabled(&self) -> bool {
        self.backend.is_enabled().await
    }

    /// Runs one scan window and returns its batch, or `Cancelled` if `stop`
    /// was called first.
    pub async fn scan(&self, config: &ScanConfig) -> Result<ScanOutcome, ScanError> {
        self.stop_requested.store(false, Ordering::SeqCst);
        if !self.backend.is_enabled().await {
            return Err(ScanError::HardwareUnavailable);
        }
        if self.in_progress.swap(true, Ordering::SeqCst) {
            error!("BLE Scan failed because previous scan is not finished");
            return Err(ScanError::AlreadyScanning);
        }
        let mut flight = InFlight {
            in_progress: &self.in_progress,
            backend: self.backend.clone(),
            registered: false,
        };

        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.stop_signal.lock() = Some(stop_tx);
        if self.stop_requested.swap(false, Ordering::SeqCst) {
            self.stop_signal.lock().take();
            debug!("BLE Scan cancelled before it started");
            return Ok(ScanOutcome::Cancelled);
        }

        let filter = self.filter_for(config);
        debug!(
            "Start BLE Scan. Restricted mode: {}, filter: {filter:?}",
            config.restricted
        );

        if config.wake_display
            && let Some(power) = &self.power
        {
            power.wake_display_temporarily(config.duration);
        }

        let mut events = self.backend.start_scan(filter).await?;
        flight.registered = true;

        let mut batch = ScanBatch::started_now();
        let timer = time::sleep(config.duration);
        tokio::pin!(timer);
        let mut events_open = true;

        let end = loop {
            tokio::select! {
                _ = &mut timer => break WindowEnd::Elapsed,
                _ = &mut stop_rx => break WindowEnd::Cancelled,
                event = events.recv(), if events_open => match event {
                    Some(BackendEvent::Result(device)) => {
                        self.remember_services(device.service_uuids.iter());
                        batch.upsert(device);
                    }
                    Some(BackendEvent::Failed(code)) => break WindowEnd::Failed(code),
                    None => events_open = false,
                },
            }
        };

        self.stop_signal.lock().take();
        flight.registered = false;
        if let Err(e) = self.backend.stop_scan().await {
            warn!("Failed to stop BLE scan cleanly: {e}");
        }

        match end {
            WindowEnd::Elapsed => {
                debug!("BLE Scan finished {} devices found", batch.len());
                Ok(ScanOutcome::Batch(batch))
            }
            WindowEnd::Failed(code) => {
                error!("BLE Scan failed with error: {code}");
                Err(ScanError::scan_failure(code))
            }
            WindowEnd::Cancelled => {
                debug!("BLE Scan cancelled");
                Ok(ScanOutcome::Cancelled)
            }
        }
    }

    /// Ends the open scan window, if any, without delivering a batch.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(stop) = self.stop_signal.lock().take() {
            let _ = stop.send(());
        }
    }

    fn filter_for(&self, config: &ScanConfig) -> ScanFilterSpec {
        if !config.restricted {
            return ScanFilterSpec::Open;
        }
        let mut cache = self.service_cache.lock();
        cache.set_capacity(config.filter_cache_capacity);
        let services = cache.active(Instant::now(), config.filter_cache_ttl);
        if services.is_empty() {
            debug!("No recently noticed services, falling back to open filter");
            ScanFilterSpec::Open
        } else {
            ScanFilterSpec::Services(services)
        }
    }

    fn remember_services<'a>(&self, uuids: impl Iterator<Item = &'a String>) {
        let now = Instant::now();
        let mut cache = self.service_cache.lock();
        for uuid in uuids {
            cache.record(uuid, now);
        }
    }
}

/// Clears the single-flight flag however the scan ends. If the scan future is
/// dropped while the hardware is still registered, the registration is torn
/// down on the runtime.
struct InFlight<'a> {
    in_progress: &'a AtomicBool,
    backend: Arc<dyn BleBackend>,
    registered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.registered
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let backend = self.backend.clone();
            handle.spawn(async move {
                if let Err(e) = backend.stop_scan().await {
                    warn!("Failed to stop abandoned BLE scan: {e}");
                }
            });
        }
        self.in_progress.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use radar_domain::scan::ScanDevice;

    use crate::{BackendEvent, BleBackend, ScanError, ScanFilterSpec};

    use super::{ScanConfig, ScanOutcome, ScanSession};

    /// Replays a scripted list of `(delay, event)` pairs per scan.
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub disabled: AtomicBool,
        /// How long the hardware check takes.
        pub enabled_check_delay: Mutex<Duration>,
        pub scripts: Mutex<VecDeque<Vec<(Duration, BackendEvent)>>>,
        pub filters: Mutex<Vec<ScanFilterSpec>>,
        pub stops: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn push(&self, script: Vec<(Duration, BackendEvent)>) {
            self.scripts.lock().push_back(script);
        }
    }

    #[async_trait]
    impl BleBackend for ScriptedBackend {
        async fn is_enabled(&self) -> bool {
            let delay = *self.enabled_check_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            !self.disabled.load(Ordering::SeqCst)
        }

        async fn start_scan(
            &self,
            filter: ScanFilterSpec,
        ) -> Result<mpsc::Receiver<BackendEvent>, ScanError> {
            self.filters.lock().push(filter);
            let script = self.scripts.lock().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for (delay, event) in script {
                    tokio::time::sleep(delay).await;
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                // keep the channel open until the window closes
                tx.closed().await;
            });
            Ok(rx)
        }

        async fn stop_scan(&self) -> Result<(), ScanError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn sighting(address: &str, rssi: i16) -> BackendEvent {
        BackendEvent::Result(ScanDevice::new(address, rssi, Utc::now()))
    }

    fn config(restricted: bool) -> ScanConfig {
        ScanConfig {
            duration: Duration::from_secs(5),
            restricted,
            wake_display: false,
            filter_cache_ttl: Duration::from_secs(60),
            filter_cache_capacity: 8,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collects_latest_sighting_per_address() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(vec![
            (Duration::from_millis(100), sighting("AA:BB", -80)),
            (Duration::from_millis(100), sighting("CC:DD", -70)),
            (Duration::from_millis(100), sighting("AA:BB", -60)),
        ]);
        let session = ScanSession::new(backend.clone());

        let outcome = session.scan(&config(false)).await.unwrap();
        let ScanOutcome::Batch(batch) = outcome else {
            panic!("expected a batch");
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get("AA:BB").unwrap().rssi, -60);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert!(!session.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn sightings_after_window_are_ignored() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(vec![
            (Duration::from_secs(1), sighting("AA:BB", -80)),
            (Duration::from_secs(10), sighting("CC:DD", -70)),
        ]);
        let session = ScanSession::new(backend);

        let ScanOutcome::Batch(batch) = session.scan(&config(false)).await.unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.addresses(), vec!["AA:BB".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_failure_ends_window() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(vec![
            (Duration::from_millis(100), sighting("AA:BB", -80)),
            (Duration::from_millis(100), BackendEvent::Failed(2)),
        ]);
        let session = ScanSession::new(backend.clone());

        let result = session.scan(&config(false)).await;
        assert_eq!(result, Err(ScanError::scan_failure(2)));
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn disabled_hardware_is_reported_before_scanning() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.disabled.store(true, Ordering::SeqCst);
        let session = ScanSession::new(backend.clone());

        let result = session.scan(&config(false)).await;
        assert_eq!(result, Err(ScanError::HardwareUnavailable));
        assert!(backend.filters.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_scan_is_rejected_while_in_flight() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = Arc::new(ScanSession::new(backend));

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.scan(&config(false)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.is_scanning());
        assert_eq!(
            session.scan(&config(false)).await,
            Err(ScanError::AlreadyScanning)
        );
        assert!(matches!(
            running.await.unwrap(),
            Ok(ScanOutcome::Batch(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_without_batch() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(vec![(Duration::from_millis(100), sighting("AA:BB", -80))]);
        let session = Arc::new(ScanSession::new(backend.clone()));

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.scan(&config(false)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.stop();

        assert_eq!(running.await.unwrap(), Ok(ScanOutcome::Cancelled));
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert!(!session.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_hardware_check_cancels() {
        let backend = Arc::new(ScriptedBackend::default());
        *backend.enabled_check_delay.lock() = Duration::from_millis(500);
        let session = Arc::new(ScanSession::new(backend.clone()));

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.scan(&config(false)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop();

        assert_eq!(running.await.unwrap(), Ok(ScanOutcome::Cancelled));
        assert!(backend.filters.lock().is_empty());
        assert!(!session.is_scanning());

        // an earlier stop does not cancel the next scan
        *backend.enabled_check_delay.lock() = Duration::ZERO;
        assert!(matches!(
            session.scan(&config(false)).await,
            Ok(ScanOutcome::Batch(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn restricted_scan_uses_noticed_services() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(vec![(
            Duration::from_millis(100),
            BackendEvent::Result(
                ScanDevice::new("AA:BB", -80, Utc::now()).with_services(["0000FEAA-0000-1000-8000-00805F9B34FB"]),
            ),
        )]);
        let session = ScanSession::new(backend.clone());

        session.scan(&config(true)).await.unwrap();
        session.scan(&config(true)).await.unwrap();

        let filters = backend.filters.lock().clone();
        assert_eq!(filters[0], ScanFilterSpec::Open);
        assert_eq!(
            filters[1],
            ScanFilterSpec::Services(vec!["0000feaa-0000-1000-8000-00805f9b34fb".to_string()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn noticed_services_expire() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(vec![(
            Duration::from_millis(100),
            BackendEvent::Result(ScanDevice::new("AA:BB", -80, Utc::now()).with_services(["feaa"])),
        )]);
        let session = ScanSession::new(backend.clone());

        session.scan(&config(true)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        session.scan(&config(true)).await.unwrap();

        assert_eq!(backend.filters.lock()[1], ScanFilterSpec::Open);
    }
}
