//! # OpenBCI Cyton Protocol
//!
//! State machine for the Cyton biosignal amplifier serial stream.
//!
//! ## Handshake
//!
//! ```text
//!   open ──► send 'v' ──► Resetting ──"$$$"──► send 'b' ──► Normal
//!                            │  ▲
//!                  >1000 ms  │  │ send 'v' again
//!                            └──┘
//!   close ──► send 's'
//! ```
//!
//! ## Packet Format (33 bytes)
//!
//! ```text
//! ┌──────┬─────┬────────────────────────┬──────────┬────────┐
//! │ 0xA0 │ seq │ 8 × 24-bit signed (BE) │ 6 × aux  │ 0xCx   │
//! └──────┴─────┴────────────────────────┴──────────┴────────┘
//! ```
//!
//! A bad header or footer switches to `Dropping`, which slides one byte at a
//! time until a 33-byte window is framed correctly again.

use embedded_io::Write;
use serde::Serialize;

use crate::sample::{BiosignalSample, BIOSIGNAL_CHANNELS};
use crate::stream::{SerialProtocol, Step};

/// Bytes per data packet
pub const PACKET_SIZE: usize = 33;

/// Channels carried by one Cyton packet
pub const CYTON_CHANNELS: usize = 8;

/// First byte of every data packet
pub const PACKET_HEADER: u8 = 0xA0;

/// Required value of the footer's top five bits
pub const FOOTER_PATTERN: u8 = 0xC0;
const FOOTER_MASK: u8 = 0xF8;

pub const COMMAND_RESET: u8 = b'v';
pub const COMMAND_START: u8 = b'b';
pub const COMMAND_STOP: u8 = b's';

/// Tail of the board's reply to a reset command
pub const ACK_MARKER: &[u8; 3] = b"$$$";

/// Reset is re-sent when no acknowledgement arrives within this window
pub const RESET_TIMEOUT_MS: u64 = 1000;

/// Programmable gain applied when none is configured
pub const DEFAULT_GAIN: u8 = 24;

const AUX_BYTES: usize = 6;
const CHANNEL_BYTES: usize = 3 * CYTON_CHANNELS;

/// Microvolts per count for the given amplifier gain
///
/// Reference voltage 4.5 V over a signed 24-bit full scale.
pub fn scale_factor(gain: u8) -> f32 {
    4.5f32 * 1_000_000.0 / gain as f32 / ((1u32 << 23) - 1) as f32
}

/// Reassemble one big-endian 24-bit two's-complement sample
pub fn sign_extend_24(bytes: [u8; 3]) -> i32 {
    let raw = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
    let word = if raw & 0x0080_0000 != 0 {
        raw | 0xFF00_0000
    } else {
        raw & 0x00FF_FFFF
    };
    word as i32
}

/// Header and footer check on the first packet-sized window of `data`
pub fn packet_framed(data: &[u8]) -> bool {
    data.len() >= PACKET_SIZE
        && data[0] == PACKET_HEADER
        && data[PACKET_SIZE - 1] & FOOTER_MASK == FOOTER_PATTERN
}

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CytonState {
    /// Waiting for the reset acknowledgement
    Resetting {
        /// When the last reset command went out
        sent_at_ms: u64,
    },
    /// Decoding aligned packets
    Normal,
    /// Scanning for the next aligned packet
    Dropping,
}

/// Observability counters; parser faults are never surfaced otherwise
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParserStats {
    pub packets_decoded: u64,
    /// Transitions from `Normal` into `Dropping`
    pub resync_events: u64,
    /// Bytes discarded while `Dropping`
    pub bytes_skipped: u64,
    pub resets_sent: u64,
}

/// Cyton stream decoder
pub struct CytonParser {
    state: CytonState,
    scale: f32,
    last: BiosignalSample,
    stats: ParserStats,
}

impl CytonParser {
    pub fn new() -> Self {
        Self::with_gain(DEFAULT_GAIN)
    }

    pub fn with_gain(gain: u8) -> Self {
        Self {
            state: CytonState::Resetting { sent_at_ms: 0 },
            scale: scale_factor(gain),
            last: BiosignalSample::default(),
            stats: ParserStats::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> CytonState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    fn send_reset<W: Write>(&mut self, link: &mut W, now_ms: u64) -> Result<(), W::Error> {
        link.write_all(&[COMMAND_RESET])?;
        self.state = CytonState::Resetting { sent_at_ms: now_ms };
        self.stats.resets_sent += 1;
        Ok(())
    }

    fn decode_packet(&mut self, packet: &[u8]) {
        // Skip header and sequence; aux bytes and footer are not used.
        let payload = &packet[2..2 + CHANNEL_BYTES];
        let mut channels = [0.0f32; BIOSIGNAL_CHANNELS];
        for (value, raw) in channels.iter_mut().zip(payload.chunks_exact(3)) {
            *value = sign_extend_24([raw[0], raw[1], raw[2]]) as f32 * self.scale;
        }
        self.last = BiosignalSample::new(channels);
        self.stats.packets_decoded += 1;
    }
}

impl Default for CytonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialProtocol for CytonParser {
    type Sample = BiosignalSample;

    fn on_open<W: Write>(&mut self, link: &mut W, now_ms: u64) -> Result<(), W::Error> {
        // A reopened board reads zero until its first packet.
        self.last = BiosignalSample::default();
        self.send_reset(link, now_ms)
    }

    fn on_close<W: Write>(&mut self, link: &mut W) -> Result<(), W::Error> {
        link.write_all(&[COMMAND_STOP])
    }

    fn parse<W: Write>(&mut self, link: &mut W, data: &[u8], now_ms: u64) -> Result<Step, W::Error> {
        match self.state {
            CytonState::Resetting { sent_at_ms } => {
                if data.ends_with(ACK_MARKER) {
                    self.state = CytonState::Normal;
                    link.write_all(&[COMMAND_START])?;
                    return Ok(Step::Continue(data.len()));
                }
                if now_ms.saturating_sub(sent_at_ms) > RESET_TIMEOUT_MS {
                    self.send_reset(link, now_ms)?;
                }
                // Only a marker split across reads can still matter.
                Ok(Step::Done(data.len().saturating_sub(ACK_MARKER.len() - 1)))
            }
            CytonState::Normal => {
                let mut offset = 0;
                while data.len() - offset >= PACKET_SIZE {
                    let packet = &data[offset..offset + PACKET_SIZE];
                    if !packet_framed(packet) {
                        self.state = CytonState::Dropping;
                        self.stats.resync_events += 1;
                        return Ok(Step::Continue(offset));
                    }
                    self.decode_packet(packet);
                    offset += PACKET_SIZE;
                }
                Ok(Step::Done(offset))
            }
            CytonState::Dropping => {
                let mut offset = 0;
                while data.len() - offset >= PACKET_SIZE {
                    if packet_framed(&data[offset..]) {
                        self.state = CytonState::Normal;
                        return Ok(Step::Continue(offset));
                    }
                    offset += 1;
                    self.stats.bytes_skipped += 1;
                }
                Ok(Step::Done(offset))
            }
        }
    }

    fn current_value(&self) -> BiosignalSample {
        self.last
    }
}
