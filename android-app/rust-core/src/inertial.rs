//! Platform motion sensors.
//!
//! The host delivers accelerometer, gyroscope, magnetometer and rotation
//! vector events on its own callback thread. Each quantity sits behind its
//! own lock, so a reader can see a fresh acceleration next to a stale
//! orientation: a snapshot is only eventually consistent across quantities.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sensor_shared::{InertialSample, SensorDevice};

/// Android sensor type codes accepted by `record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Accelerometer,
    MagneticField,
    Gyroscope,
    RotationVector,
}

impl TryFrom<i32> for SensorKind {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        match code {
            1 => Ok(Self::Accelerometer),
            2 => Ok(Self::MagneticField),
            4 => Ok(Self::Gyroscope),
            11 => Ok(Self::RotationVector),
            other => Err(other),
        }
    }
}

fn store<const N: usize>(cell: &Mutex<[f32; N]>, values: [f32; N]) {
    *cell.lock().unwrap_or_else(PoisonError::into_inner) = values;
}

fn load<const N: usize>(cell: &Mutex<[f32; N]>) -> [f32; N] {
    *cell.lock().unwrap_or_else(PoisonError::into_inner)
}

fn vector3(values: &[f32]) -> Option<[f32; 3]> {
    Some([*values.first()?, *values.get(1)?, *values.get(2)?])
}

/// Unit quaternion from a rotation vector; the scalar part is optional
fn quaternion(values: &[f32]) -> Option<[f32; 4]> {
    let [x, y, z] = vector3(values)?;
    let w = match values.get(3) {
        Some(w) => *w,
        None => (1.0 - x * x - y * y - z * z).max(0.0).sqrt(),
    };
    Some([x, y, z, w])
}

/// Latest platform readings, one lock per quantity
#[derive(Debug, Default)]
pub struct SharedInertialSample {
    accepting: AtomicBool,
    acceleration: Mutex<[f32; 3]>,
    angular_velocity: Mutex<[f32; 3]>,
    magnetic_field: Mutex<[f32; 3]>,
    orientation: Mutex<[f32; 4]>,
}

impl SharedInertialSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Store one sensor event
    ///
    /// Returns `false` when the event was ignored: the device is closed, or
    /// the event carries too few values.
    pub fn record(&self, kind: SensorKind, values: &[f32]) -> bool {
        if !self.is_accepting() {
            return false;
        }

        match kind {
            SensorKind::Accelerometer => vector3(values).map(|v| store(&self.acceleration, v)),
            SensorKind::Gyroscope => vector3(values).map(|v| store(&self.angular_velocity, v)),
            SensorKind::MagneticField => vector3(values).map(|v| store(&self.magnetic_field, v)),
            SensorKind::RotationVector => quaternion(values).map(|q| store(&self.orientation, q)),
        }
        .is_some()
    }

    /// Read each quantity in turn
    pub fn snapshot(&self) -> InertialSample {
        InertialSample {
            acceleration: load(&self.acceleration),
            angular_velocity: load(&self.angular_velocity),
            magnetic_field: load(&self.magnetic_field),
            orientation: load(&self.orientation),
        }
    }

    fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    fn reset(&self) {
        store(&self.acceleration, [0.0; 3]);
        store(&self.angular_velocity, [0.0; 3]);
        store(&self.magnetic_field, [0.0; 3]);
        store(&self.orientation, [0.0; 4]);
    }
}

/// The handset's built-in motion sensors
///
/// Always available; open and close only gate whether callback events are
/// stored.
pub struct PlatformInertialDevice {
    shared: Arc<SharedInertialSample>,
}

impl PlatformInertialDevice {
    pub fn new(shared: Arc<SharedInertialSample>) -> Self {
        Self { shared }
    }
}

impl SensorDevice for PlatformInertialDevice {
    type Sample = InertialSample;

    fn name(&self) -> &str {
        "platform-imu"
    }

    fn available(&self) -> bool {
        true
    }

    fn open(&mut self) -> bool {
        self.shared.set_accepting(true);
        true
    }

    fn is_open(&self) -> bool {
        self.shared.is_accepting()
    }

    fn update(&mut self) {}

    fn current_value(&self) -> InertialSample {
        self.shared.snapshot()
    }

    fn close(&mut self) {
        self.shared.set_accepting(false);
        self.shared.reset();
    }

    fn update_device_status(&mut self) {}
}
