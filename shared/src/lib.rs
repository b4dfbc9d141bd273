//! # Shared Sensor Library
//!
//! This crate provides the allocation-free core of the sensor bridge:
//!
//! - **Samples**: Biosignal and inertial sample types with fixed big-endian layouts
//! - **Frames**: The 95-byte motion record handed to consumers
//! - **Pool & Exchange**: Fixed-capacity record pool and bounded hand-off queue
//! - **Byte Stream**: Sliding-window accumulator feeding serial protocol parsers
//! - **Cyton Protocol**: Reset/start/stop handshake and packet decoding with resync
//! - **Scheduler**: Drift-correcting tick computation
//! - **Devices**: Sensor device trait and per-category failover selection
//!
//! ## Data Flow
//!
//! ```text
//! Serial port ──► ByteStreamReader ──► CytonParser ──► BiosignalSample ─┐
//!                                                                        ├─► MotionRecord ─► FrameExchange ─► consumer
//! Platform sensors ─────────────────────────────────► InertialSample ───┘        ▲
//!                                                                                 │
//!                                                              DriftScheduler tick
//! ```
//!
//! ## Low-Latency Strategy
//!
//! 1. Every record is preallocated in the pool at startup
//! 2. Parsers work on borrowed slices of a fixed receive buffer
//! 3. The hand-off queue is bounded and lossy: freshness over completeness

#![cfg_attr(not(feature = "std"), no_std)]

pub mod device;
pub mod exchange;
pub mod frame;
pub mod inertial_board;
pub mod openbci;
pub mod pool;
pub mod sample;
pub mod scheduler;
pub mod stream;

// Re-export main types for convenience
pub use device::{Failover, Selection, SelectionError, SensorDevice};
pub use exchange::{ExchangeStats, FrameExchange, Publish, QUEUE_CAPACITY};
pub use frame::{FrameError, MotionRecord, FRAME_FOOTER, FRAME_HEADER, FRAME_SIZE};
pub use inertial_board::InertialBoardProtocol;
pub use openbci::{CytonParser, CytonState, ParserStats};
pub use pool::{FrameHandle, FramePool, PoolError, POOL_CAPACITY};
pub use sample::{BiosignalSample, InertialSample, BIOSIGNAL_CHANNELS};
pub use scheduler::{DriftScheduler, RateReport, Tick};
pub use stream::{ByteStreamReader, SerialProtocol, Step, StreamError, RECV_BUFFER_SIZE};

/// Library version reported by the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
