//! # Android JNI Sensor Bridge
//!
//! Native backend for the sensor capture app. It samples a serial biosignal
//! amplifier and a motion source at a fixed rate, packs each sample into a
//! fixed-layout frame and hands frames to Kotlin on demand.
//!
//! ## JNI Bridge Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Android App (Kotlin)                       │
//! │                                                                 │
//! │  ┌──────────────────┐          ┌─────────────────────────────┐  │
//! │  │ SensorEventLsnr  │          │  Frame consumer (recorder)  │  │
//! │  └────────┬─────────┘          └──────────────┬──────────────┘  │
//! │           │ onSensorChanged        getNextFrame│                 │
//! │           ▼                                    ▼                 │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                 sensor_bridge (this lib)                  │  │
//! │  │                                                           │  │
//! │  │  ┌───────────────┐  ┌──────────────┐  ┌───────────────┐   │  │
//! │  │  │ Platform IMU  │  │ sensor-poll  │  │ FrameExchange │   │  │
//! │  │  │ (per-quantity │─►│ thread+tokio │─►│ pool + queue  │   │  │
//! │  │  │  locks)       │  │  USB serial  │  │  (shared)     │   │  │
//! │  │  └───────────────┘  └──────────────┘  └───────────────┘   │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## JNI Functions Exported
//!
//! - `Java_com_clicked_sensorbridge_SensorBridge_startup`: Start sampling at a rate
//! - `Java_com_clicked_sensorbridge_SensorBridge_startupWithConfig`: Start from JSON config
//! - `Java_com_clicked_sensorbridge_SensorBridge_shutdown`: Stop sampling, close devices
//! - `Java_com_clicked_sensorbridge_SensorBridge_getNextFrame`: Pop one frame or null
//! - `Java_com_clicked_sensorbridge_SensorBridge_onSensorChanged`: Platform sensor event
//! - `Java_com_clicked_sensorbridge_SensorBridge_getPlatformSamplingPeriodUs`: Listener period
//! - `Java_com_clicked_sensorbridge_SensorBridge_getStats`: Sampler statistics as JSON

pub mod clock;
pub mod config;
pub mod error;
pub mod inertial;
pub mod manager;
pub mod serial;

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use jni::objects::{JClass, JFloatArray, JString};
use jni::sys::{jboolean, jbyteArray, jfloat, jint, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use lazy_static::lazy_static;
use log::{debug, error, info, warn, LevelFilter};

pub use config::{SamplerConfig, UsbSerialConfig};
pub use error::{BridgeError, Result};
pub use manager::{DeviceSet, SamplerStats, SensorDeviceManager};

/// Largest sensor event forwarded; Android rotation vectors carry five values
const MAX_EVENT_VALUES: usize = 8;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

lazy_static! {
    static ref STATE: Mutex<Option<SensorDeviceManager>> = Mutex::new(None);
    /// Serializes startup and shutdown; `STATE` stays free for frame reads
    static ref LIFECYCLE: Mutex<()> = Mutex::new(());
}

fn init_logging() {
    INIT_LOGGER.call_once(|| {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(LevelFilter::Debug)
                .with_tag("SensorBridge"),
        );
    });
}

fn state() -> MutexGuard<'static, Option<SensorDeviceManager>> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lifecycle() -> MutexGuard<'static, ()> {
    LIFECYCLE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn start_sampler(config: SamplerConfig) -> Result<()> {
    start_sampler_with(|| SensorDeviceManager::startup(config))
}

fn start_sampler_with<F>(build: F) -> Result<()>
where
    F: FnOnce() -> Result<SensorDeviceManager>,
{
    let _lifecycle = lifecycle();
    if state().is_some() {
        return Err(BridgeError::AlreadyRunning);
    }
    // Opening serial ports can block; sensor callbacks must not wait on it.
    let manager = build()?;
    *state() = Some(manager);
    Ok(())
}

fn stop_sampler() -> Result<()> {
    let _lifecycle = lifecycle();
    // Take the manager out first so the join does not hold the global lock.
    let manager = state().take().ok_or(BridgeError::NotRunning)?;
    manager.shutdown()
}

fn stats_json() -> Result<String> {
    match state().as_ref() {
        Some(manager) => manager.stats_json(),
        None => Ok(serde_json::to_string(&SamplerStats::default())?),
    }
}

fn platform_sampling_period_us() -> u32 {
    state()
        .as_ref()
        .map(|manager| manager.config().platform_sampling_period_us())
        .unwrap_or_else(|| SamplerConfig::default().platform_sampling_period_us())
}

fn read_event_values<'a>(
    env: &mut JNIEnv,
    values: &JFloatArray,
    buf: &'a mut [jfloat; MAX_EVENT_VALUES],
) -> Result<&'a [f32]> {
    let len = (env.get_array_length(values)?.max(0) as usize).min(MAX_EVENT_VALUES);
    env.get_float_array_region(values, 0, &mut buf[..len])?;
    Ok(&buf[..len])
}

fn report(result: Result<()>, action: &str) -> jboolean {
    match result {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            error!("{} failed: {}", action, e);
            JNI_FALSE
        }
    }
}

/// Start sampling with default devices at the given frame rate
///
/// Called from Kotlin:
/// ```kotlin
/// external fun startup(sampleRateHz: Float): Boolean
/// ```
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_startup(
    _env: JNIEnv,
    _class: JClass,
    sample_rate_hz: jfloat,
) -> jboolean {
    init_logging();
    report(start_sampler(SamplerConfig::with_rate(sample_rate_hz)), "startup")
}

/// Start sampling from a JSON configuration
///
/// Called from Kotlin:
/// ```kotlin
/// external fun startupWithConfig(json: String): Boolean
/// ```
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_startupWithConfig(
    mut env: JNIEnv,
    _class: JClass,
    json: JString,
) -> jboolean {
    init_logging();

    let json: String = match env.get_string(&json) {
        Ok(s) => s.into(),
        Err(e) => {
            error!("Failed to get config string: {:?}", e);
            return JNI_FALSE;
        }
    };

    let result = SamplerConfig::from_json(&json).and_then(start_sampler);
    report(result, "startupWithConfig")
}

/// Stop sampling and close every device
///
/// Called from Kotlin:
/// ```kotlin
/// external fun shutdown()
/// ```
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_shutdown(
    _env: JNIEnv,
    _class: JClass,
) {
    match stop_sampler() {
        Ok(()) => info!("Shutdown complete"),
        Err(BridgeError::NotRunning) => warn!("shutdown called but sampler not running"),
        Err(e) => error!("shutdown failed: {}", e),
    }
}

/// Pop the oldest frame
///
/// Called from Kotlin:
/// ```kotlin
/// external fun getNextFrame(): ByteArray?
/// ```
///
/// Returns null when no frame is ready or the sampler is stopped.
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_getNextFrame(
    env: JNIEnv,
    _class: JClass,
) -> jbyteArray {
    let Some(frame) = state().as_ref().and_then(SensorDeviceManager::next_frame) else {
        return std::ptr::null_mut();
    };

    match env.byte_array_from_slice(frame.as_bytes()) {
        Ok(array) => array.into_raw(),
        Err(e) => {
            error!("Failed to create frame array: {:?}", e);
            std::ptr::null_mut()
        }
    }
}

/// Forward a platform sensor event
///
/// Called from Kotlin:
/// ```kotlin
/// external fun onSensorChanged(sensorType: Int, values: FloatArray)
/// ```
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_onSensorChanged(
    mut env: JNIEnv,
    _class: JClass,
    sensor_type: jint,
    values: JFloatArray,
) {
    let mut buf = [0.0; MAX_EVENT_VALUES];
    let values = match read_event_values(&mut env, &values, &mut buf) {
        Ok(values) => values,
        Err(e) => {
            error!("Failed to copy sensor values: {}", e);
            return;
        }
    };

    if let Some(manager) = state().as_ref() {
        if !manager.on_sensor_changed(sensor_type, values) {
            debug!("sensor event {} not stored", sensor_type);
        }
    }
}

/// Period to register platform listeners with, in microseconds
///
/// Called from Kotlin:
/// ```kotlin
/// external fun getPlatformSamplingPeriodUs(): Int
/// ```
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_getPlatformSamplingPeriodUs(
    _env: JNIEnv,
    _class: JClass,
) -> jint {
    platform_sampling_period_us() as jint
}

/// Get sampler statistics as JSON
///
/// Called from Kotlin:
/// ```kotlin
/// external fun getStats(): String
/// ```
#[no_mangle]
pub extern "system" fn Java_com_clicked_sensorbridge_SensorBridge_getStats(
    env: JNIEnv,
    _class: JClass,
) -> jstring {
    let stats_json = match stats_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize stats: {}", e);
            return std::ptr::null_mut();
        }
    };

    match env.new_string(&stats_json) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            error!("Failed to create stats string: {:?}", e);
            std::ptr::null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial_boards_disabled() -> SamplerConfig {
        let mut config = SamplerConfig::with_rate(100.0);
        config.biosignal_board.enabled = false;
        config.inertial_board.enabled = false;
        config
    }

    #[test]
    fn test_sampler_lifecycle() {
        assert!(matches!(stop_sampler(), Err(BridgeError::NotRunning)));
        assert_eq!(platform_sampling_period_us(), 4166);

        start_sampler(serial_boards_disabled()).unwrap();
        assert!(matches!(
            start_sampler(serial_boards_disabled()),
            Err(BridgeError::AlreadyRunning)
        ));
        assert_eq!(platform_sampling_period_us(), 5000);

        let stats: serde_json::Value = serde_json::from_str(&stats_json().unwrap()).unwrap();
        assert_eq!(stats["running"], true);
        assert_eq!(stats["inertial_device"], "platform-imu");
        assert!(stats["biosignal_device"].is_null());

        stop_sampler().unwrap();
        assert!(matches!(stop_sampler(), Err(BridgeError::NotRunning)));

        let stats: serde_json::Value = serde_json::from_str(&stats_json().unwrap()).unwrap();
        assert_eq!(stats["running"], false);

        // Frame readers are not locked out while devices open.
        start_sampler_with(|| {
            assert!(STATE.try_lock().is_ok());
            assert_eq!(platform_sampling_period_us(), 4166);
            SensorDeviceManager::startup(serial_boards_disabled())
        })
        .unwrap();
        assert!(state().is_some());
        stop_sampler().unwrap();
    }
}
