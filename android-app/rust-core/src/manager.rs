//! # Polling Context
//!
//! `SensorDeviceManager` owns the sampling loop. Startup probes every
//! candidate synchronously, then moves the devices onto a dedicated
//! `sensor-poll` thread running a current-thread tokio runtime:
//!
//! ```text
//!            ┌──────────── sensor-poll thread ─────────────┐
//!            │                                             │
//!            │  status due? ── Failover::refresh (x2)      │
//!            │       │                                     │
//!            │  poll biosignal + inertial devices          │
//!            │       │                                     │
//!            │  FrameExchange::publish ──► Deque (4)       │──► next_frame()
//!            │       │                                     │    (consumer)
//!            │  DriftScheduler::next_tick                  │
//!            │       │                                     │
//!            │  sleep_until(deadline)  ◄── or stop signal  │
//!            └─────────────────────────────────────────────┘
//! ```
//!
//! Device switches happen on the polling thread between ticks, so a tick
//! never reads a device that is being closed. Shutdown signals the loop,
//! joins the thread and only then closes the devices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use sensor_shared::{
    BiosignalSample, CytonParser, DriftScheduler, ExchangeStats, Failover, FrameExchange,
    InertialBoardProtocol, InertialSample, MotionRecord, Publish, RateReport, Selection,
    SelectionError, SensorDevice,
};

use crate::clock::MonotonicClock;
use crate::config::SamplerConfig;
use crate::error::{BridgeError, Result};
use crate::inertial::{PlatformInertialDevice, SensorKind, SharedInertialSample};
use crate::serial::UsbSerialDevice;

/// Candidates per category
pub const MAX_CANDIDATES: usize = 4;

pub type BiosignalDevice = Box<dyn SensorDevice<Sample = BiosignalSample> + Send>;
pub type InertialDevice = Box<dyn SensorDevice<Sample = InertialSample> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered candidates for both sensor categories
pub struct DeviceSet {
    pub biosignal: Failover<BiosignalDevice, MAX_CANDIDATES>,
    pub inertial: Failover<InertialDevice, MAX_CANDIDATES>,
}

impl DeviceSet {
    pub fn new<B, I>(biosignal: B, inertial: I) -> Result<Self>
    where
        B: IntoIterator<Item = BiosignalDevice>,
        I: IntoIterator<Item = InertialDevice>,
    {
        let too_many = |_: SelectionError| {
            BridgeError::InvalidConfig(format!("more than {} devices in a category", MAX_CANDIDATES))
        };
        Ok(Self {
            biosignal: Failover::new(biosignal).map_err(too_many)?,
            inertial: Failover::new(inertial).map_err(too_many)?,
        })
    }

    /// Serial amplifier; serial IMU board, then platform sensors
    pub fn from_config(
        config: &SamplerConfig,
        platform: &Arc<SharedInertialSample>,
        clock: MonotonicClock,
    ) -> Result<Self> {
        let mut biosignal: Vec<BiosignalDevice> = Vec::new();
        if config.biosignal_board.enabled {
            biosignal.push(Box::new(UsbSerialDevice::new(
                "cyton",
                config.biosignal_board.clone(),
                CytonParser::with_gain(config.amplifier_gain),
                clock,
            )));
        }

        let mut inertial: Vec<InertialDevice> = Vec::new();
        if config.inertial_board.enabled {
            inertial.push(Box::new(UsbSerialDevice::new(
                "imu-board",
                config.inertial_board.clone(),
                InertialBoardProtocol::new(),
                clock,
            )));
        }
        if config.platform_inertial {
            inertial.push(Box::new(PlatformInertialDevice::new(platform.clone())));
        }

        Self::new(biosignal, inertial)
    }

    /// Reevaluate both categories; `true` if an active device changed
    pub fn check_status(&mut self) -> bool {
        let biosignal = self.biosignal.refresh();
        log_selection("biosignal", &self.biosignal, biosignal);
        let inertial = self.inertial.refresh();
        log_selection("inertial", &self.inertial, inertial);
        biosignal != Selection::Unchanged || inertial != Selection::Unchanged
    }

    pub fn close_all(&mut self) {
        self.biosignal.close_active();
        self.inertial.close_active();
    }

    fn active_names(&self) -> (Option<String>, Option<String>) {
        (
            self.biosignal.active_name().map(str::to_owned),
            self.inertial.active_name().map(str::to_owned),
        )
    }
}

fn device_name<D: SensorDevice, const N: usize>(selector: &Failover<D, N>, index: usize) -> &str {
    selector.candidates()[index].name()
}

fn log_selection<D: SensorDevice, const N: usize>(
    category: &str,
    selector: &Failover<D, N>,
    selection: Selection,
) {
    match selection {
        Selection::Unchanged => {}
        Selection::Switched { from: None, to } => {
            info!("{} device: {}", category, device_name(selector, to));
        }
        Selection::Switched { from: Some(from), to } => {
            info!(
                "{} device: {} -> {}",
                category,
                device_name(selector, from),
                device_name(selector, to)
            );
        }
        Selection::OpenFailed { attempted, retained } => {
            warn!(
                "{} device: failed to open {}, keeping {}",
                category,
                device_name(selector, attempted),
                retained.map_or("none", |index| device_name(selector, index))
            );
        }
        Selection::NoneAvailable { retained } => {
            debug!(
                "{} device: none available, keeping {}",
                category,
                device_name(selector, retained)
            );
        }
        Selection::Lost { index } => {
            warn!(
                "{} device: {} closed, none available",
                category,
                device_name(selector, index)
            );
        }
    }
}

/// Figures reported by `getStats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct SamplerStats {
    pub running: bool,
    pub target_rate_hz: f32,
    /// Last achieved-rate report
    pub achieved: Option<RateReport>,
    pub status_checks: u64,
    pub biosignal_device: Option<String>,
    pub inertial_device: Option<String>,
    pub exchange: ExchangeStats,
}

/// State moved onto the polling thread
struct PollContext {
    devices: DeviceSet,
    exchange: Arc<Mutex<FrameExchange>>,
    stats: Arc<Mutex<SamplerStats>>,
    clock: MonotonicClock,
    scheduler: DriftScheduler,
    status_interval_ms: u64,
    next_status_ms: u64,
    sequence: u8,
}

impl PollContext {
    fn check_status(&mut self, now_ms: u64) {
        let changed = self.devices.check_status();
        self.next_status_ms = now_ms + self.status_interval_ms;

        let mut stats = lock(&self.stats);
        stats.status_checks += 1;
        if changed {
            (stats.biosignal_device, stats.inertial_device) = self.devices.active_names();
        }
    }

    /// Poll every active device and publish one frame
    fn tick(&mut self, now_ms: u64) {
        if now_ms >= self.next_status_ms {
            self.check_status(now_ms);
        }

        let biosignal = self.devices.biosignal.poll();
        let inertial = self.devices.inertial.poll();

        let outcome = lock(&self.exchange).publish(
            self.sequence,
            now_ms,
            biosignal.as_ref(),
            inertial.as_ref(),
        );
        match outcome {
            Publish::Queued => self.sequence = self.sequence.wrapping_add(1),
            Publish::PoolExhausted => debug!("frame dropped: pool exhausted"),
            Publish::QueueFull => debug!("frame dropped: queue full"),
        }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) -> DeviceSet {
        while !*stop.borrow() {
            let now_ms = self.clock.now_ms();
            self.tick(now_ms);

            let next = self.scheduler.next_tick(now_ms);
            if let Some(report) = next.report {
                info!("sampling rate : {:.2}/sec", report.rate_hz);
                lock(&self.stats).achieved = Some(report);
            }

            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(self.clock.deadline(next.at_ms)) => {}
            }
        }
        self.devices
    }
}

/// Running sampler: polling thread plus the consumer side of the exchange
pub struct SensorDeviceManager {
    config: SamplerConfig,
    exchange: Arc<Mutex<FrameExchange>>,
    stats: Arc<Mutex<SamplerStats>>,
    platform: Arc<SharedInertialSample>,
    stop: watch::Sender<bool>,
    poller: Option<JoinHandle<DeviceSet>>,
}

impl SensorDeviceManager {
    /// Probe the configured boards and start sampling
    pub fn startup(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        let clock = MonotonicClock::new();
        let platform = Arc::new(SharedInertialSample::new());
        let devices = DeviceSet::from_config(&config, &platform, clock)?;
        Self::start(config, devices, platform, clock)
    }

    /// Start sampling over an explicit device set
    pub fn with_devices(
        config: SamplerConfig,
        devices: DeviceSet,
        platform: Arc<SharedInertialSample>,
    ) -> Result<Self> {
        config.validate()?;
        Self::start(config, devices, platform, MonotonicClock::new())
    }

    fn start(
        config: SamplerConfig,
        mut devices: DeviceSet,
        platform: Arc<SharedInertialSample>,
        clock: MonotonicClock,
    ) -> Result<Self> {
        info!(
            "Starting sampler at {} Hz (sensor-shared {})",
            config.sample_rate_hz,
            sensor_shared::VERSION
        );

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                devices.close_all();
                return Err(e.into());
            }
        };

        devices.check_status();
        let now_ms = clock.now_ms();
        let (biosignal_device, inertial_device) = devices.active_names();

        let exchange = Arc::new(Mutex::new(FrameExchange::new()));
        let stats = Arc::new(Mutex::new(SamplerStats {
            running: true,
            target_rate_hz: config.sample_rate_hz,
            status_checks: 1,
            biosignal_device,
            inertial_device,
            ..SamplerStats::default()
        }));

        let context = PollContext {
            devices,
            exchange: exchange.clone(),
            stats: stats.clone(),
            clock,
            scheduler: DriftScheduler::new(config.sample_rate_hz, config.report_interval_ms, now_ms),
            status_interval_ms: config.status_interval_ms,
            next_status_ms: now_ms + config.status_interval_ms,
            sequence: 0,
        };

        let (stop, stop_rx) = watch::channel(false);
        let poller = std::thread::Builder::new()
            .name("sensor-poll".into())
            .spawn(move || runtime.block_on(context.run(stop_rx)))?;

        Ok(Self {
            config,
            exchange,
            stats,
            platform,
            stop,
            poller: Some(poller),
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Pop the oldest queued frame without blocking
    pub fn next_frame(&self) -> Option<MotionRecord> {
        lock(&self.exchange).next_frame()
    }

    /// Forward a platform sensor event; unknown sensor types are ignored
    pub fn on_sensor_changed(&self, sensor_type: i32, values: &[f32]) -> bool {
        match SensorKind::try_from(sensor_type) {
            Ok(kind) => self.platform.record(kind, values),
            Err(code) => {
                debug!("ignoring sensor type {}", code);
                false
            }
        }
    }

    pub fn stats(&self) -> SamplerStats {
        let mut stats = lock(&self.stats).clone();
        stats.exchange = lock(&self.exchange).stats();
        stats
    }

    pub fn stats_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.stats())?)
    }

    /// Stop the loop, wait for it, then close every device
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_polling()
    }

    fn stop_polling(&mut self) -> Result<()> {
        let Some(poller) = self.poller.take() else {
            return Err(BridgeError::NotRunning);
        };

        // The receiver only disappears if the loop already ended.
        let _ = self.stop.send(true);
        let mut devices = poller
            .join()
            .map_err(|_| BridgeError::PollThread("polling thread panicked".into()))?;
        devices.close_all();

        let drained = lock(&self.exchange).drain();
        lock(&self.stats).running = false;
        info!("Sampler stopped ({} queued frames discarded)", drained);
        Ok(())
    }
}

impl Drop for SensorDeviceManager {
    fn drop(&mut self) {
        if self.poller.is_some() {
            if let Err(e) = self.stop_polling() {
                warn!("Sampler shutdown failed: {}", e);
            }
        }
    }
}
