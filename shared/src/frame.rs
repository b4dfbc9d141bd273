//! # Motion Frame Definition
//!
//! This module defines the fixed-layout record handed to the consumer. Every
//! frame has the same length: a missing biosignal or inertial source is
//! zero-filled, never omitted.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────┬─────┬──────────────┬──────────────┬───────────┬────────┐
//! │ Header │ Seq │  Biosignal   │   Inertial   │ Timestamp │ Footer │
//! │  0xA0  │ u8  │   32 bytes   │   52 bytes   │  u64 BE   │  0xC7  │
//! └────────┴─────┴──────────────┴──────────────┴───────────┴────────┘
//!  0        1     2              34             86          94
//! ```
//!
//! Header and footer are format sentinels for the downstream consumer, not
//! a checksum.

use core::fmt;

use crate::sample::{read_floats, write_floats, BiosignalSample, InertialSample};

/// Sentinel byte opening every frame
pub const FRAME_HEADER: u8 = 0xA0;

/// Sentinel byte closing every frame
pub const FRAME_FOOTER: u8 = 0xC7;

const SEQUENCE_OFFSET: usize = 1;
const BIOSIGNAL_OFFSET: usize = 2;
const INERTIAL_OFFSET: usize = BIOSIGNAL_OFFSET + BiosignalSample::SIZE;
const TIMESTAMP_OFFSET: usize = INERTIAL_OFFSET + InertialSample::SIZE;
const FOOTER_OFFSET: usize = TIMESTAMP_OFFSET + 8;
const ORIENTATION_OFFSET: usize = INERTIAL_OFFSET + InertialSample::ORIENTATION_OFFSET;

/// Total size of a serialized frame
pub const FRAME_SIZE: usize = FOOTER_OFFSET + 1;

/// Errors when interpreting bytes as a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Input length differs from `FRAME_SIZE`
    InvalidLength(usize),
    /// First byte is not `FRAME_HEADER`
    InvalidHeader(u8),
    /// Last byte is not `FRAME_FOOTER`
    InvalidFooter(u8),
}

/// One motion frame in its wire representation
///
/// Records are preallocated by the frame pool and refilled in place; the
/// sampling path never constructs a new one.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MotionRecord {
    data: [u8; FRAME_SIZE],
}

impl MotionRecord {
    /// Create a zeroed record (no sentinels written yet)
    pub const fn new() -> Self {
        Self {
            data: [0u8; FRAME_SIZE],
        }
    }

    /// Write a complete frame, zero-filling absent sources
    pub fn fill(
        &mut self,
        sequence: u8,
        timestamp_ms: u64,
        biosignal: Option<&BiosignalSample>,
        inertial: Option<&InertialSample>,
    ) {
        self.data[0] = FRAME_HEADER;
        self.data[SEQUENCE_OFFSET] = sequence;

        let bio = &mut self.data[BIOSIGNAL_OFFSET..INERTIAL_OFFSET];
        match biosignal {
            Some(sample) => sample.encode(bio),
            None => bio.fill(0),
        }

        let imu = &mut self.data[INERTIAL_OFFSET..TIMESTAMP_OFFSET];
        match inertial {
            Some(sample) => sample.encode(imu),
            None => imu.fill(0),
        }

        self.set_timestamp_ms(timestamp_ms);
        self.data[FOOTER_OFFSET] = FRAME_FOOTER;
    }

    /// Reset every byte to zero
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Validate and copy a frame received from elsewhere
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != FRAME_SIZE {
            return Err(FrameError::InvalidLength(bytes.len()));
        }
        if bytes[0] != FRAME_HEADER {
            return Err(FrameError::InvalidHeader(bytes[0]));
        }
        if bytes[FOOTER_OFFSET] != FRAME_FOOTER {
            return Err(FrameError::InvalidFooter(bytes[FOOTER_OFFSET]));
        }

        let mut record = Self::new();
        record.data.copy_from_slice(bytes);
        Ok(record)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.data
    }

    #[inline]
    pub fn sequence(&self) -> u8 {
        self.data[SEQUENCE_OFFSET]
    }

    pub fn timestamp_ms(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[TIMESTAMP_OFFSET..FOOTER_OFFSET]);
        u64::from_be_bytes(raw)
    }

    /// Re-stamp the frame, e.g. with the consumer's render clock
    pub fn set_timestamp_ms(&mut self, timestamp_ms: u64) {
        self.data[TIMESTAMP_OFFSET..FOOTER_OFFSET].copy_from_slice(&timestamp_ms.to_be_bytes());
    }

    pub fn biosignal(&self) -> BiosignalSample {
        BiosignalSample::decode(&self.data[BIOSIGNAL_OFFSET..INERTIAL_OFFSET])
    }

    pub fn inertial(&self) -> InertialSample {
        InertialSample::decode(&self.data[INERTIAL_OFFSET..TIMESTAMP_OFFSET])
    }

    /// Orientation quaternion as x, y, z, w
    pub fn orientation(&self) -> [f32; 4] {
        let mut quat = [0.0; 4];
        read_floats(&self.data[ORIENTATION_OFFSET..TIMESTAMP_OFFSET], &mut quat);
        quat
    }

    /// Replace the orientation quaternion without touching other fields
    pub fn set_orientation(&mut self, quat: [f32; 4]) {
        write_floats(&mut self.data[ORIENTATION_OFFSET..TIMESTAMP_OFFSET], &quat);
    }
}

impl Default for MotionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MotionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionRecord")
            .field("sequence", &self.sequence())
            .field("timestamp_ms", &self.timestamp_ms())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for MotionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bio = self.biosignal();
        let imu = self.inertial();
        write!(f, "header: {:X}, sample {:X}, biosignal:", self.data[0], self.sequence())?;
        for ch in bio.channels.iter() {
            write!(f, " {}", ch)?;
        }
        let [ax, ay, az] = imu.acceleration;
        let [gx, gy, gz] = imu.angular_velocity;
        let [mx, my, mz] = imu.magnetic_field;
        let [qx, qy, qz, qw] = imu.orientation;
        write!(
            f,
            ", acceleration: {} {} {}, angular velocities: {} {} {}, \
             magnetic field: {} {} {}, orientation: {} {} {} {}, \
             timeStamp: {}, footer: {:X}",
            ax, ay, az, gx, gy, gz, mx, my, mz, qx, qy, qz, qw,
            self.timestamp_ms(),
            self.data[FOOTER_OFFSET]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inertial() -> InertialSample {
        InertialSample {
            acceleration: [0.1, 9.8, -0.2],
            angular_velocity: [0.01, 0.02, 0.03],
            magnetic_field: [30.0, -12.0, 44.0],
            orientation: [0.0, 0.7071, 0.0, 0.7071],
        }
    }

    #[test]
    fn test_frame_layout() {
        let bio = BiosignalSample::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let imu = sample_inertial();

        let mut record = MotionRecord::new();
        record.fill(42, 0x0102_0304_0506_0708, Some(&bio), Some(&imu));
        let bytes = record.as_bytes();

        assert_eq!(FRAME_SIZE, 95);
        assert_eq!(bytes[0], 0xA0);
        assert_eq!(bytes[1], 42);
        assert_eq!(&bytes[2..6], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[34..38], &0.1f32.to_be_bytes());
        assert_eq!(&bytes[70..74], &0.0f32.to_be_bytes());
        assert_eq!(&bytes[74..78], &0.7071f32.to_be_bytes());
        assert_eq!(&bytes[86..94], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes[94], 0xC7);
    }

    #[test]
    fn test_missing_sources_are_zero_filled() {
        let mut record = MotionRecord::new();
        record.fill(1, 7, Some(&BiosignalSample::new([5.0; 8])), Some(&sample_inertial()));
        record.fill(2, 8, None, None);

        let bytes = record.as_bytes();
        assert!(bytes[2..86].iter().all(|b| *b == 0));
        assert_eq!(record.sequence(), 2);
        assert_eq!(record.timestamp_ms(), 8);
        assert_eq!(bytes[94], FRAME_FOOTER);
    }

    #[test]
    fn test_accessors_read_back_filled_values() {
        let bio = BiosignalSample::new([-1.5, 0.0, 2.25, 0.0, 0.0, 0.0, 0.0, 99.0]);
        let imu = sample_inertial();
        let mut record = MotionRecord::new();
        record.fill(200, 123_456, Some(&bio), Some(&imu));

        assert_eq!(record.biosignal(), bio);
        assert_eq!(record.inertial(), imu);
        assert_eq!(record.orientation(), imu.orientation);
    }

    #[test]
    fn test_set_orientation_and_timestamp_in_place() {
        let mut record = MotionRecord::new();
        record.fill(3, 10, None, Some(&sample_inertial()));

        record.set_orientation([0.5, 0.5, 0.5, 0.5]);
        record.set_timestamp_ms(99);

        assert_eq!(record.orientation(), [0.5, 0.5, 0.5, 0.5]);
        assert_eq!(record.inertial().acceleration, sample_inertial().acceleration);
        assert_eq!(record.timestamp_ms(), 99);
        assert_eq!(record.as_bytes()[94], FRAME_FOOTER);
    }

    #[test]
    fn test_from_bytes_validation() {
        let mut record = MotionRecord::new();
        record.fill(9, 1, None, None);
        let mut bytes = *record.as_bytes();

        assert_eq!(MotionRecord::from_bytes(&bytes), Ok(record));
        assert_eq!(
            MotionRecord::from_bytes(&bytes[..10]),
            Err(FrameError::InvalidLength(10))
        );

        bytes[94] = 0x00;
        assert_eq!(MotionRecord::from_bytes(&bytes), Err(FrameError::InvalidFooter(0)));

        bytes[0] = 0x55;
        assert_eq!(MotionRecord::from_bytes(&bytes), Err(FrameError::InvalidHeader(0x55)));
    }

    #[test]
    fn test_clear_zeroes_everything() {
        let mut record = MotionRecord::new();
        record.fill(1, 2, None, None);
        record.clear();
        assert!(record.as_bytes().iter().all(|b| *b == 0));
    }
}
