//! Sampler configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a
//! valid configuration. Board tables may be partial too; missing keys keep
//! that board's own defaults:
//!
//! ```json
//! {
//!   "sample_rate_hz": 250.0,
//!   "biosignal_board": { "enabled": true, "vendor_id": 1027, "product_id": 24597, "baud_rate": 115200 }
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BridgeError, Result};

/// Gains the amplifier accepts
pub const SUPPORTED_GAINS: [u8; 7] = [1, 2, 4, 6, 8, 12, 24];

pub const MIN_BAUD_RATE: u32 = 19_200;
pub const MAX_BAUD_RATE: u32 = 115_200;
pub const MAX_SAMPLE_RATE_HZ: f32 = 1000.0;

/// A USB serial board identified by vendor and product id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSerialConfig {
    pub enabled: bool,
    pub vendor_id: u16,
    pub product_id: u16,
    pub baud_rate: u32,
}

impl UsbSerialConfig {
    /// FTDI FT231X bridge on the biosignal amplifier dongle
    pub fn biosignal_default() -> Self {
        Self {
            enabled: true,
            vendor_id: 0x0403,
            product_id: 0x6015,
            baud_rate: 115_200,
        }
    }

    /// Arduino-class board carrying the serial IMU
    pub fn inertial_default() -> Self {
        Self {
            enabled: true,
            vendor_id: 0x2A03,
            product_id: 0x0043,
            baud_rate: 19_200,
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        if !(MIN_BAUD_RATE..=MAX_BAUD_RATE).contains(&self.baud_rate) {
            return Err(BridgeError::InvalidConfig(format!(
                "{}.baud_rate {} outside {}..={}",
                field, self.baud_rate, MIN_BAUD_RATE, MAX_BAUD_RATE
            )));
        }
        Ok(())
    }
}

/// A board table with every key optional
#[derive(Deserialize)]
struct BoardOverrides {
    enabled: Option<bool>,
    vendor_id: Option<u16>,
    product_id: Option<u16>,
    baud_rate: Option<u32>,
}

impl BoardOverrides {
    fn over(self, base: UsbSerialConfig) -> UsbSerialConfig {
        UsbSerialConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            vendor_id: self.vendor_id.unwrap_or(base.vendor_id),
            product_id: self.product_id.unwrap_or(base.product_id),
            baud_rate: self.baud_rate.unwrap_or(base.baud_rate),
        }
    }
}

fn biosignal_board<'de, D>(deserializer: D) -> std::result::Result<UsbSerialConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(BoardOverrides::deserialize(deserializer)?.over(UsbSerialConfig::biosignal_default()))
}

fn inertial_board<'de, D>(deserializer: D) -> std::result::Result<UsbSerialConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(BoardOverrides::deserialize(deserializer)?.over(UsbSerialConfig::inertial_default()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Target frame rate
    pub sample_rate_hz: f32,
    /// How often the achieved rate is logged
    pub report_interval_ms: u64,
    /// How often device availability is probed
    pub status_interval_ms: u64,
    pub amplifier_gain: u8,
    #[serde(deserialize_with = "biosignal_board")]
    pub biosignal_board: UsbSerialConfig,
    #[serde(deserialize_with = "inertial_board")]
    pub inertial_board: UsbSerialConfig,
    /// Use the handset's own motion sensors as the last inertial candidate
    pub platform_inertial: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 120.0,
            report_interval_ms: 5000,
            status_interval_ms: 1000,
            amplifier_gain: sensor_shared::openbci::DEFAULT_GAIN,
            biosignal_board: UsbSerialConfig::biosignal_default(),
            inertial_board: UsbSerialConfig::inertial_default(),
            platform_inertial: true,
        }
    }
}

impl SamplerConfig {
    /// Defaults with a different frame rate
    pub fn with_rate(sample_rate_hz: f32) -> Self {
        Self {
            sample_rate_hz,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Written so NaN fails too.
        if !(self.sample_rate_hz > 0.0 && self.sample_rate_hz <= MAX_SAMPLE_RATE_HZ) {
            return Err(BridgeError::InvalidConfig(format!(
                "sample_rate_hz {} outside (0, {}]",
                self.sample_rate_hz, MAX_SAMPLE_RATE_HZ
            )));
        }
        if !SUPPORTED_GAINS.contains(&self.amplifier_gain) {
            return Err(BridgeError::InvalidConfig(format!(
                "amplifier_gain {} not one of {:?}",
                self.amplifier_gain, SUPPORTED_GAINS
            )));
        }
        if self.status_interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "status_interval_ms must be positive".into(),
            ));
        }
        self.biosignal_board.validate("biosignal_board")?;
        self.inertial_board.validate("inertial_board")?;
        Ok(())
    }

    /// Listener period for platform sensors, twice the frame rate
    pub fn platform_sampling_period_us(&self) -> u32 {
        (1_000_000.0 / (2.0 * self.sample_rate_hz as f64)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SamplerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.biosignal_board.vendor_id, 0x0403);
        assert_eq!(config.inertial_board.baud_rate, 19_200);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SamplerConfig::from_json(r#"{"sample_rate_hz": 250.0}"#).unwrap();
        assert_eq!(config.sample_rate_hz, 250.0);
        assert_eq!(config.amplifier_gain, 24);
        assert!(config.platform_inertial);

        let empty = SamplerConfig::from_json("{}").unwrap();
        assert_eq!(empty, SamplerConfig::default());
    }

    #[test]
    fn test_partial_board_tables_keep_board_defaults() {
        let config = SamplerConfig::from_json(r#"{"inertial_board": {"enabled": false}}"#).unwrap();
        assert!(!config.inertial_board.enabled);
        assert_eq!(config.inertial_board.vendor_id, 0x2A03);
        assert_eq!(config.inertial_board.baud_rate, 19_200);
        assert_eq!(config.biosignal_board, UsbSerialConfig::biosignal_default());

        let config = SamplerConfig::from_json(r#"{"biosignal_board": {"baud_rate": 57600}}"#).unwrap();
        assert_eq!(config.biosignal_board.baud_rate, 57_600);
        assert_eq!(config.biosignal_board.vendor_id, 0x0403);
        assert_eq!(config.biosignal_board.product_id, 0x6015);
        assert!(config.biosignal_board.enabled);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(matches!(
            SamplerConfig::with_rate(0.0).validate(),
            Err(BridgeError::InvalidConfig(_))
        ));
        assert!(SamplerConfig::with_rate(f32::NAN).validate().is_err());
        assert!(SamplerConfig::with_rate(1500.0).validate().is_err());

        let gain = SamplerConfig {
            amplifier_gain: 3,
            ..SamplerConfig::default()
        };
        assert!(gain.validate().is_err());

        let mut baud = SamplerConfig::default();
        baud.inertial_board.baud_rate = 9600;
        assert!(baud.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            SamplerConfig::from_json("{not json"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_platform_period_is_half_the_frame_period() {
        assert_eq!(SamplerConfig::with_rate(100.0).platform_sampling_period_us(), 5000);
        assert_eq!(SamplerConfig::with_rate(120.0).platform_sampling_period_us(), 4166);
    }
}
