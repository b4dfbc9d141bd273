//! # Sensor Sample Types
//!
//! Fixed-layout values carried inside every motion frame. Both types encode
//! to big-endian IEEE-754 floats so the consumer can read them on any host.
//!
//! ```text
//! BiosignalSample (32 bytes)
//! ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┬──────┐
//! │ ch 1 │ ch 2 │ ch 3 │ ch 4 │ ch 5 │ ch 6 │ ch 7 │ ch 8 │   f32 µV each
//! └──────┴──────┴──────┴──────┴──────┴──────┴──────┴──────┘
//!
//! InertialSample (52 bytes)
//! ┌──────────────┬──────────────┬──────────────┬───────────────────┐
//! │ accel x y z  │ gyro x y z   │ mag x y z    │ quat x y z w      │
//! └──────────────┴──────────────┴──────────────┴───────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Number of biosignal channels carried per frame
pub const BIOSIGNAL_CHANNELS: usize = 8;

/// One calibrated reading of every biosignal channel, in microvolts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BiosignalSample {
    pub channels: [f32; BIOSIGNAL_CHANNELS],
}

impl BiosignalSample {
    /// Serialized size in bytes
    pub const SIZE: usize = BIOSIGNAL_CHANNELS * 4;

    pub const fn new(channels: [f32; BIOSIGNAL_CHANNELS]) -> Self {
        Self { channels }
    }

    /// Write the big-endian layout into the first `SIZE` bytes of `out`
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= Self::SIZE);
        write_floats(out, &self.channels);
    }

    /// Read a sample back from its big-endian layout
    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= Self::SIZE);
        let mut channels = [0.0; BIOSIGNAL_CHANNELS];
        read_floats(data, &mut channels);
        Self { channels }
    }
}

/// Accelerometer, gyroscope, magnetometer and orientation readings
///
/// Each quantity is updated independently by its own sensor event, so a
/// sample assembled from a live source is never a snapshot of one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InertialSample {
    /// m/s²
    pub acceleration: [f32; 3],
    /// rad/s
    pub angular_velocity: [f32; 3],
    /// µT
    pub magnetic_field: [f32; 3],
    /// Quaternion as x, y, z, w
    pub orientation: [f32; 4],
}

impl InertialSample {
    /// Serialized size in bytes
    pub const SIZE: usize = 13 * 4;

    pub const ACCELERATION_OFFSET: usize = 0;
    pub const ANGULAR_VELOCITY_OFFSET: usize = 3 * 4;
    pub const MAGNETIC_FIELD_OFFSET: usize = 6 * 4;
    pub const ORIENTATION_OFFSET: usize = 9 * 4;

    /// Write the big-endian layout into the first `SIZE` bytes of `out`
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= Self::SIZE);
        write_floats(&mut out[Self::ACCELERATION_OFFSET..], &self.acceleration);
        write_floats(&mut out[Self::ANGULAR_VELOCITY_OFFSET..], &self.angular_velocity);
        write_floats(&mut out[Self::MAGNETIC_FIELD_OFFSET..], &self.magnetic_field);
        write_floats(&mut out[Self::ORIENTATION_OFFSET..], &self.orientation);
    }

    /// Read a sample back from its big-endian layout
    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= Self::SIZE);
        let mut sample = Self::default();
        read_floats(&data[Self::ACCELERATION_OFFSET..], &mut sample.acceleration);
        read_floats(&data[Self::ANGULAR_VELOCITY_OFFSET..], &mut sample.angular_velocity);
        read_floats(&data[Self::MAGNETIC_FIELD_OFFSET..], &mut sample.magnetic_field);
        read_floats(&data[Self::ORIENTATION_OFFSET..], &mut sample.orientation);
        sample
    }
}

pub(crate) fn write_floats(out: &mut [u8], values: &[f32]) {
    for (chunk, value) in out.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_be_bytes());
    }
}

pub(crate) fn read_floats(data: &[u8], values: &mut [f32]) {
    for (chunk, value) in data.chunks_exact(4).zip(values.iter_mut()) {
        *value = f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}
