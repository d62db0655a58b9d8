use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, watch},
    time,
};
use tracing::{debug, info, warn};

use radar_discovery::{
    ScanError,
    power::PowerModePolicy,
    session::{ScanConfig, ScanOutcome, ScanSession},
};
use radar_domain::{
    chrono_extra::DurationExt,
    scan::ScanBatch,
    state::{NotificationContent, ScannerState},
};
use radar_sinks::store::RadarStore;

use crate::{
    ServiceError,
    env::{Capabilities, FixedLocation, GrantedCapabilities, LocationProvider},
    matcher::{ProfileMatcher, ProfileResult},
    merge::BatchMerger,
    notify::{LogNotifier, Notifier, Warning},
    report::JournalReporter,
};

pub const MAX_FAILURE_SCANS_TO_CLOSE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Repeat matches of a profile inside this window are journaled but not
    /// notified.
    pub notification_throttle: Duration,
    pub wake_display: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            notification_throttle: Duration::from_secs(5 * 60),
            wake_display: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ScanNow,
    Stop,
}

enum Next {
    Reschedule,
    Stop,
}

/// The background scan loop: scan, merge, match, notify, sleep, repeat.
///
/// Owns all per-run state (failure counter, reported causes). Runs until
/// stopped through a [`SchedulerHandle`], until a fatal error, or until
/// [`MAX_FAILURE_SCANS_TO_CLOSE`] consecutive failures.
pub struct ScanScheduler {
    session: Arc<ScanSession>,
    power: Arc<PowerModePolicy>,
    merger: BatchMerger,
    matcher: ProfileMatcher,
    reporter: JournalReporter,
    notifier: Arc<dyn Notifier>,
    capabilities: Arc<dyn Capabilities>,
    location: Arc<dyn LocationProvider>,
    config: SchedulerConfig,
    state: watch::Sender<ScannerState>,
    content: watch::Sender<NotificationContent>,
    commands_tx: mpsc::Sender<Command>,
    commands: mpsc::Receiver<Command>,
    failures: u32,
    reported: HashSet<Warning>,
}

impl ScanScheduler {
    pub fn new(
        session: Arc<ScanSession>,
        power: Arc<PowerModePolicy>,
        store: Arc<dyn RadarStore>,
        config: SchedulerConfig,
    ) -> ScanScheduler {
        let (commands_tx, commands) = mpsc::channel(8);
        ScanScheduler {
            session,
            power,
            merger: BatchMerger::new(store.clone()),
            matcher: ProfileMatcher::new(store.clone()),
            reporter: JournalReporter::new(store),
            notifier: Arc::new(LogNotifier),
            capabilities: Arc::new(GrantedCapabilities),
            location: Arc::new(FixedLocation::none()),
            config,
            state: watch::Sender::new(ScannerState::Disabled),
            content: watch::Sender::new(NotificationContent::NoDataYet),
            commands_tx,
            commands,
            failures: 0,
            reported: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> ScanScheduler {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Arc<dyn Capabilities>) -> ScanScheduler {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> ScanScheduler {
        self.location = location;
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            commands: self.commands_tx.clone(),
            session: self.session.clone(),
            state: self.state.subscribe(),
            content: self.content.subscribe(),
        }
    }

    pub async fn run(mut self) {
        info!("Background scanner launched");
        self.set_state(ScannerState::Idling);
        self.show(NotificationContent::NoDataYet);

        if !self.capabilities.required_permissions_granted() {
            let e = ServiceError::PermissionDenied(
                "BLE Service is started but permissions are not granted".to_string(),
            );
            self.reporter.report_error(&e).await;
            self.set_state(ScannerState::Disabled);
            return;
        }

        loop {
            if let Next::Stop = self.cycle().await {
                break;
            }

            self.set_state(ScannerState::Idling);
            let interval = self.power.current_settings(true).scan_interval;
            tokio::select! {
                _ = time::sleep(interval) => {}
                command = self.commands.recv() => match command {
                    Some(Command::ScanNow) => debug!("Scan now requested"),
                    Some(Command::Stop) | None => {
                        debug!("Background scanner stop requested");
                        break;
                    }
                },
            }
        }

        self.session.stop();
        self.set_state(ScannerState::Disabled);
    }

    async fn cycle(&mut self) -> Next {
        let settings = self.power.current_settings(false);
        let config = ScanConfig::from_settings(&settings, self.config.wake_display);
        self.set_state(ScannerState::Scanning);

        match self.session.scan(&config).await {
            Ok(ScanOutcome::Batch(batch)) if batch.is_empty() => {
                let content = self.handle_empty_batch().await;
                self.show(content);
                Next::Reschedule
            }
            Ok(ScanOutcome::Batch(batch)) => {
                self.reported.clear();
                match self.process_batch(&batch).await {
                    Ok(content) => {
                        self.failures = 0;
                        self.show(content);
                        Next::Reschedule
                    }
                    Err(e) => {
                        self.show(NotificationContent::NoDataYet);
                        self.handle_error(e).await
                    }
                }
            }
            Ok(ScanOutcome::Cancelled) => Next::Reschedule,
            Err(ScanError::HardwareUnavailable) => {
                self.warn_once(Warning::BluetoothIsTurnedOff).await;
                self.show(NotificationContent::BluetoothIsTurnedOff);
                Next::Reschedule
            }
            Err(ScanError::AlreadyScanning) => {
                warn!("Scan skipped, previous scan is not finished");
                Next::Reschedule
            }
            Err(e) => self.handle_error(e.into()).await,
        }
    }

    async fn process_batch(&self, batch: &ScanBatch) -> Result<NotificationContent, ServiceError> {
        self.set_state(ScannerState::Analyzing);
        let location = self.location.current_location();
        let saved = self.merger.merge_batch(batch, location).await?;
        let matched = self
            .matcher
            .check_batch(&saved.saved_batch, batch.scan_time())
            .await?;
        debug!(
            "Background scan result: known_devices_count={}, matched_profiles={}",
            saved.known_devices_count,
            matched.len()
        );
        self.handle_profile_results(batch.scan_time(), &matched).await;

        Ok(if saved.known_devices_count > 0 {
            NotificationContent::KnownDevicesAround(saved.known_devices_count)
        } else {
            NotificationContent::TotalDevicesAround(batch.len())
        })
    }

    async fn handle_profile_results(&self, time: DateTime<Utc>, results: &[ProfileResult]) {
        let mut fresh = vec![];
        for result in results {
            self.reporter.report_profile(time, result).await;
            if self.is_throttled(time, result) {
                debug!("Notification for profile {} throttled", result.profile_name);
            } else {
                fresh.push(result.clone());
            }
        }
        if !fresh.is_empty() {
            self.notifier.notify_profiles(&fresh);
        }
    }

    fn is_throttled(&self, now: DateTime<Utc>, result: &ProfileResult) -> bool {
        match result.last_triggered {
            Some(last) => (now - last).to_std_saturating() < self.config.notification_throttle,
            None => false,
        }
    }

    /// An empty batch usually means the scanner is blind. Location outranks
    /// bluetooth, which outranks the background permission.
    async fn handle_empty_batch(&mut self) -> NotificationContent {
        let cause = if !self.capabilities.location_available() {
            Some(Warning::LocationIsTurnedOff)
        } else if !self.session.is_hardware_enabled().await {
            Some(Warning::BluetoothIsTurnedOff)
        } else if !self.capabilities.background_location_granted() {
            Some(Warning::BackgroundLocationIsRestricted)
        } else {
            None
        };

        match cause {
            Some(warning) => {
                self.warn_once(warning).await;
                warning.content()
            }
            None => {
                self.reported.clear();
                NotificationContent::NoDataYet
            }
        }
    }

    async fn warn_once(&mut self, warning: Warning) {
        if self.reported.insert(warning) {
            self.notifier.notify_warning(warning);
            self.reporter.report_error(&warning).await;
        }
    }

    async fn handle_error(&mut self, e: ServiceError) -> Next {
        self.reporter.report_error(&e).await;
        if e.is_fatal() {
            return Next::Stop;
        }

        self.failures += 1;
        if self.failures >= MAX_FAILURE_SCANS_TO_CLOSE {
            self.reporter
                .report_error(&ServiceError::FailureLimitReached(MAX_FAILURE_SCANS_TO_CLOSE))
                .await;
            Next::Stop
        } else {
            Next::Reschedule
        }
    }

    fn set_state(&self, state: ScannerState) {
        info!("Scanner state: {state}");
        self.state.send_replace(state);
    }

    fn show(&self, content: NotificationContent) {
        self.notifier.update_content(content);
        self.content.send_replace(content);
    }
}

/// Controls and observes a running [`ScanScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    session: Arc<ScanSession>,
    state: watch::Receiver<ScannerState>,
    content: watch::Receiver<NotificationContent>,
}

impl SchedulerHandle {
    pub fn state(&self) -> ScannerState {
        *self.state.borrow()
    }

    pub fn content(&self) -> NotificationContent {
        *self.content.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ScannerState> {
        self.state.clone()
    }

    pub fn subscribe_content(&self) -> watch::Receiver<NotificationContent> {
        self.content.clone()
    }

    /// Skips the rest of the current idle interval. Requests made while a scan
    /// is running start the next scan as soon as it finishes.
    pub fn scan_now(&self) {
        if self.commands.try_send(Command::ScanNow).is_err() {
            debug!("Scan now already pending");
        }
    }

    /// Cancels any open scan window and ends the loop.
    pub async fn stop(&self) {
        self.session.stop();
        if self.commands.send(Command::Stop).await.is_err() {
            debug!("Background scanner already stopped");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use radar_discovery::{
        BackendEvent, BleBackend, ScanError, ScanFilterSpec,
        power::{PowerModePolicy, PowerModeTable, StaticDeviceState},
        session::ScanSession,
    };
    use radar_domain::{
        journal::{JournalEntry, JournalReport},
        known_device::KnownDevice,
        location::LocationPoint,
        profile::{Filter, ProfileDetectEvent, RadarProfile},
        scan::ScanDevice,
        state::{NotificationContent, ScannerState},
    };
    use radar_sinks::{
        StoreError,
        memory::MemoryStore,
        store::{DeviceStore, JournalStore, LocationStore, ProfileStore, RadarStore},
    };

    use crate::{
        env::Capabilities,
        matcher::ProfileResult,
        notify::{Notifier, Warning},
    };

    use super::{ScanScheduler, SchedulerConfig};

    #[derive(Debug, Clone)]
    enum Step {
        Devices(Vec<&'static str>),
        Fail(i32),
        /// The backend refuses to start the scan at all.
        Broken,
    }

    struct FakeBackend {
        enabled: AtomicBool,
        steps: Mutex<VecDeque<Step>>,
        scans: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> FakeBackend {
            FakeBackend {
                enabled: AtomicBool::new(true),
                steps: Mutex::new(VecDeque::new()),
                scans: AtomicUsize::new(0),
            }
        }

        fn push(&self, step: Step, times: usize) {
            let mut steps = self.steps.lock();
            for _ in 0..times {
                steps.push_back(step.clone());
            }
        }

        fn scans(&self) -> usize {
            self.scans.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BleBackend for FakeBackend {
        async fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn start_scan(
            &self,
            _: ScanFilterSpec,
        ) -> Result<mpsc::Receiver<BackendEvent>, ScanError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .pop_front()
                .unwrap_or(Step::Devices(vec![]));
            let (tx, rx) = mpsc::channel(16);
            match step {
                Step::Devices(addresses) => {
                    for address in addresses {
                        let device = ScanDevice::new(address, -60, Utc::now());
                        tx.try_send(BackendEvent::Result(device)).unwrap();
                    }
                }
                Step::Fail(code) => tx.try_send(BackendEvent::Failed(code)).unwrap(),
                Step::Broken => return Err(ScanError::Backend("adapter gone".to_string())),
            }
            Ok(rx)
        }

        async fn stop_scan(&self) -> Result<(), ScanError> {
            Ok(())
        }
    }

    /// Journals into a [MemoryStore] but fails every batch write.
    struct FullDisk(Arc<MemoryStore>);

    fn disk_full() -> StoreError {
        StoreError::Corrupt("disk full".to_string())
    }

    #[async_trait]
    impl DeviceStore for FullDisk {
        async fn device(&self, address: &str) -> Result<Option<KnownDevice>, StoreError> {
            self.0.device(address).await
        }
        async fn devices(&self, addresses: &[String]) -> Result<Vec<KnownDevice>, StoreError> {
            self.0.devices(addresses).await
        }
        async fn all_devices(&self) -> Result<Vec<KnownDevice>, StoreError> {
            self.0.all_devices().await
        }
        async fn save_batch(
            &self,
            _: &[KnownDevice],
            _: Option<&LocationPoint>,
        ) -> Result<(), StoreError> {
            Err(disk_full())
        }
        async fn update_device(&self, _: &KnownDevice) -> Result<(), StoreError> {
            Err(disk_full())
        }
    }

    #[async_trait]
    impl ProfileStore for FullDisk {
        async fn save_profile(&self, profile: &RadarProfile) -> Result<i64, StoreError> {
            self.0.save_profile(profile).await
        }
        async fn profile(&self, id: i64) -> Result<Option<RadarProfile>, StoreError> {
            self.0.profile(id).await
        }
        async fn profiles(&self) -> Result<Vec<RadarProfile>, StoreError> {
            self.0.profiles().await
        }
        async fn enabled_profiles(&self) -> Result<Vec<RadarProfile>, StoreError> {
            self.0.enabled_profiles().await
        }
        async fn delete_profile(&self, id: i64) -> Result<bool, StoreError> {
            self.0.delete_profile(id).await
        }
        async fn insert_detect(&self, event: &ProfileDetectEvent) -> Result<i64, StoreError> {
            self.0.insert_detect(event).await
        }
        async fn last_detect(
            &self,
            profile_id: i64,
        ) -> Result<Option<ProfileDetectEvent>, StoreError> {
            self.0.last_detect(profile_id).await
        }
        async fn detects_in_range(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<ProfileDetectEvent>, StoreError> {
            self.0.detects_in_range(from, to).await
        }
    }

    #[async_trait]
    impl JournalStore for FullDisk {
        async fn append(&self, entry: &JournalEntry) -> Result<i64, StoreError> {
            self.0.append(entry).await
        }
        async fn entries(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<JournalEntry>, StoreError> {
            self.0.entries(from, to).await
        }
        async fn entry(&self, id: i64) -> Result<Option<JournalEntry>, StoreError> {
            self.0.entry(id).await
        }
        async fn delete_before(&self, time: DateTime<Utc>) -> Result<u64, StoreError> {
            self.0.delete_before(time).await
        }
    }

    #[async_trait]
    impl LocationStore for FullDisk {
        async fn insert_location(&self, point: &LocationPoint) -> Result<i64, StoreError> {
            self.0.insert_location(point).await
        }
        async fn locations_in_range(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<LocationPoint>, StoreError> {
            self.0.locations_in_range(from, to).await
        }
        async fn locations_for_device(
            &self,
            address: &str,
        ) -> Result<Vec<LocationPoint>, StoreError> {
            self.0.locations_for_device(address).await
        }
        async fn locations_for_profile(
            &self,
            profile_id: i64,
        ) -> Result<Vec<LocationPoint>, StoreError> {
            self.0.locations_for_profile(profile_id).await
        }
    }

    struct SwitchableCapabilities {
        permissions: AtomicBool,
        background: AtomicBool,
        location: AtomicBool,
    }

    impl Default for SwitchableCapabilities {
        fn default() -> Self {
            SwitchableCapabilities {
                permissions: AtomicBool::new(true),
                background: AtomicBool::new(true),
                location: AtomicBool::new(true),
            }
        }
    }

    impl Capabilities for SwitchableCapabilities {
        fn required_permissions_granted(&self) -> bool {
            self.permissions.load(Ordering::SeqCst)
        }
        fn background_location_granted(&self) -> bool {
            self.background.load(Ordering::SeqCst)
        }
        fn location_available(&self) -> bool {
            self.location.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        contents: Mutex<Vec<NotificationContent>>,
        warnings: Mutex<Vec<Warning>>,
        profiles: Mutex<Vec<ProfileResult>>,
    }

    impl Notifier for RecordingNotifier {
        fn update_content(&self, content: NotificationContent) {
            self.contents.lock().push(content);
        }
        fn notify_warning(&self, warning: Warning) {
            self.warnings.lock().push(warning);
        }
        fn notify_profiles(&self, results: &[ProfileResult]) {
            self.profiles.lock().extend_from_slice(results);
        }
    }

    struct Harness {
        backend: Arc<FakeBackend>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        capabilities: Arc<SwitchableCapabilities>,
        table: PowerModeTable,
    }

    impl Harness {
        fn new() -> Harness {
            Harness {
                backend: Arc::new(FakeBackend::new()),
                store: Arc::new(MemoryStore::new()),
                notifier: Arc::new(RecordingNotifier::default()),
                capabilities: Arc::new(SwitchableCapabilities::default()),
                table: PowerModeTable::default(),
            }
        }

        fn scheduler(&self) -> ScanScheduler {
            self.scheduler_over(self.store.clone())
        }

        fn scheduler_over(&self, store: Arc<dyn RadarStore>) -> ScanScheduler {
            let session = Arc::new(ScanSession::new(self.backend.clone()));
            let power = Arc::new(PowerModePolicy::new(
                Arc::new(StaticDeviceState {
                    power_save: false,
                    interactive: true,
                }),
                self.table,
            ));
            ScanScheduler::new(session, power, store, SchedulerConfig::default())
                .with_notifier(self.notifier.clone())
                .with_capabilities(self.capabilities.clone())
        }

        async fn journal(&self) -> Vec<JournalEntry> {
            self.store
                .entries(Utc.timestamp_opt(0, 0).unwrap(), Utc::now() + chrono::Duration::days(1))
                .await
                .unwrap()
        }

        async fn error_titles(&self) -> Vec<String> {
            self.journal()
                .await
                .into_iter()
                .filter_map(|entry| match entry.report {
                    JournalReport::Error { title, .. } => Some(title),
                    _ => None,
                })
                .collect()
        }
    }

    async fn run_to_end(scheduler: ScanScheduler) {
        tokio::time::timeout(Duration::from_secs(24 * 3600), scheduler.run())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ten_consecutive_failures_disable_the_scanner() {
        let h = Harness::new();
        h.backend.push(Step::Fail(2), 10);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();

        run_to_end(scheduler).await;

        assert_eq!(handle.state(), ScannerState::Disabled);
        assert_eq!(h.backend.scans(), 10);
        let titles = h.error_titles().await;
        assert_eq!(titles.len(), 11);
        assert_eq!(
            titles.last().unwrap(),
            "[BLE Service Error]: Ble Scan service has been stopped after 10 errors"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successful_batch_resets_failure_counter() {
        let h = Harness::new();
        h.backend.push(Step::Fail(3), 9);
        h.backend.push(Step::Devices(vec!["AA:BB"]), 1);
        h.backend.push(Step::Fail(3), 10);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();

        run_to_end(scheduler).await;

        // without the reset the tenth scan would have been the last
        assert_eq!(h.backend.scans(), 20);
        assert_eq!(handle.state(), ScannerState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn nineteen_failures_around_a_success_keep_running() {
        let h = Harness::new();
        h.backend.push(Step::Fail(3), 9);
        h.backend.push(Step::Devices(vec!["AA:BB"]), 1);
        h.backend.push(Step::Fail(3), 9);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(handle.state().is_active());
        assert!(h.backend.scans() > 19);

        handle.stop().await;
        task.await.unwrap();
        assert_eq!(handle.state(), ScannerState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_saves_count_toward_the_limit() {
        let h = Harness::new();
        h.backend.push(Step::Fail(3), 5);
        h.backend.push(Step::Devices(vec!["AA:BB"]), 5);
        let scheduler = h.scheduler_over(Arc::new(FullDisk(h.store.clone())));
        let handle = scheduler.handle();

        run_to_end(scheduler).await;

        // a batch that could not be stored is no success
        assert_eq!(handle.state(), ScannerState::Disabled);
        assert_eq!(h.backend.scans(), 10);
        let titles = h.error_titles().await;
        assert_eq!(titles.len(), 11);
        assert_eq!(
            titles
                .iter()
                .filter(|t| t.as_str() == "[BLE Service Error]: failed to persist scan results")
                .count(),
            5
        );
        assert!(h.store.device("AA:BB").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn backend_errors_are_counted() {
        let h = Harness::new();
        h.backend.push(Step::Fail(3), 9);
        h.backend.push(Step::Broken, 1);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();

        run_to_end(scheduler).await;

        assert_eq!(handle.state(), ScannerState::Disabled);
        assert_eq!(h.backend.scans(), 10);
        let titles = h.error_titles().await;
        assert_eq!(titles.len(), 11);
        assert!(titles[9].contains("adapter gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_empty_batch_is_merged_and_counted() {
        let h = Harness::new();
        h.backend.push(Step::Devices(vec!["AA:BB", "CC:DD"]), 2);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.stop().await;
        task.await.unwrap();

        assert_eq!(h.store.device("AA:BB").await.unwrap().unwrap().detect_count, 2);
        let contents = h.notifier.contents.lock().clone();
        assert!(contents.contains(&NotificationContent::TotalDevicesAround(2)));
        assert!(contents.contains(&NotificationContent::KnownDevicesAround(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn blind_scanner_is_reported_once_per_streak() {
        let h = Harness::new();
        h.capabilities.location.store(false, Ordering::SeqCst);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(*h.notifier.warnings.lock(), vec![Warning::LocationIsTurnedOff]);
        assert_eq!(handle.content(), NotificationContent::LocationIsTurnedOff);
        assert_eq!(h.error_titles().await.len(), 1);

        h.capabilities.location.store(true, Ordering::SeqCst);
        h.backend.push(Step::Devices(vec!["AA:BB"]), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.capabilities.location.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(
            *h.notifier.warnings.lock(),
            vec![Warning::LocationIsTurnedOff, Warning::LocationIsTurnedOff]
        );
        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn location_outranks_missing_background_permission() {
        let h = Harness::new();
        h.capabilities.location.store(false, Ordering::SeqCst);
        h.capabilities.background.store(false, Ordering::SeqCst);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.stop().await;
        task.await.unwrap();

        assert_eq!(*h.notifier.warnings.lock(), vec![Warning::LocationIsTurnedOff]);
    }

    #[tokio::test(start_paused = true)]
    async fn bluetooth_off_is_retried_not_counted() {
        let h = Harness::new();
        h.backend.enabled.store(false, Ordering::SeqCst);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(handle.state().is_active());
        assert_eq!(handle.content(), NotificationContent::BluetoothIsTurnedOff);
        assert_eq!(*h.notifier.warnings.lock(), vec![Warning::BluetoothIsTurnedOff]);
        assert_eq!(h.error_titles().await.len(), 1);
        assert_eq!(h.backend.scans(), 0);

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_permissions_stop_immediately() {
        let h = Harness::new();
        h.capabilities.permissions.store(false, Ordering::SeqCst);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();

        run_to_end(scheduler).await;

        assert_eq!(handle.state(), ScannerState::Disabled);
        assert_eq!(h.backend.scans(), 0);
        assert_eq!(h.error_titles().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_profile_match_is_throttled() {
        let h = Harness::new();
        let profile_id = h
            .store
            .save_profile(&RadarProfile::new("Everything", Filter::AllOf { filters: vec![] }))
            .await
            .unwrap();
        h.backend.push(Step::Devices(vec!["AA:BB"]), 2);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.stop().await;
        task.await.unwrap();

        let notified = h.notifier.profiles.lock().clone();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].profile_id, profile_id);
        let reports = h
            .journal()
            .await
            .into_iter()
            .filter(|entry| matches!(entry.report, JournalReport::ProfileReport { .. }))
            .count();
        assert_eq!(reports, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_running_scan() {
        let h = Harness::new();
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), ScannerState::Scanning);
        handle.stop().await;
        task.await.unwrap();

        assert_eq!(handle.state(), ScannerState::Disabled);
        assert_eq!(h.backend.scans(), 1);
        assert!(h.notifier.contents.lock().iter().all(|c| *c == NotificationContent::NoDataYet));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_now_skips_the_interval() {
        let mut h = Harness::new();
        h.table.default.scan_interval = Duration::from_secs(3600);
        let scheduler = h.scheduler();
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.backend.scans(), 1);
        assert_eq!(handle.state(), ScannerState::Idling);

        handle.scan_now();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.backend.scans(), 2);

        handle.stop().await;
        task.await.unwrap();
    }
}
