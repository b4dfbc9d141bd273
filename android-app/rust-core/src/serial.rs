//! # USB Serial Devices
//!
//! Host-side transport for the external sensor boards.
//!
//! ```text
//! ┌──────────────────┐   available_ports()   ┌──────────────────────┐
//! │ UsbSerialDevice  │──────────────────────►│ /dev/ttyUSB* by      │
//! │  (vid, pid, baud)│                       │ vendor/product id    │
//! └────────┬─────────┘                       └──────────────────────┘
//!          │ open 8-N-1
//!          ▼
//! ┌──────────────────┐  embedded-io   ┌────────────────┐   ┌──────────────┐
//! │   SerialLink     │──────────────► │ProtocolDriver  │──►│SerialProtocol│
//! │ (serialport)     │ Read/ReadReady │ ByteStreamReader│   │ (Cyton, IMU) │
//! └──────────────────┘     /Write     └────────────────┘   └──────────────┘
//! ```
//!
//! A read-buffer overflow or transport error is fatal for the connection:
//! the port is closed and the device reports itself unavailable until the
//! port disappears from the bus and comes back.

use std::io;
use std::time::Duration;

use embedded_io::{ErrorType, Read, ReadReady, Write};
use log::{debug, error, info, warn};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use sensor_shared::{ByteStreamReader, SensorDevice, SerialProtocol, StreamError};

use crate::clock::MonotonicClock;
use crate::config::UsbSerialConfig;
use crate::error::Result;

/// Blocking read timeout; reads only happen when bytes are pending
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// `serialport` handle adapted to the `embedded-io` traits
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open `port_name` at `baud_rate`, 8 data bits, no parity, 1 stop bit
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self { port })
    }
}

impl ErrorType for SerialLink {
    type Error = io::Error;
}

impl ReadReady for SerialLink {
    fn read_ready(&mut self) -> io::Result<bool> {
        Ok(self.port.bytes_to_read()? > 0)
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(&mut self.port, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.port, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }
}

/// A byte link that can be opened by port name
pub trait SerialTransport: Read + ReadReady + Write + ErrorType<Error = io::Error> + Sized {
    fn connect(port_name: &str, baud_rate: u32) -> Result<Self>;
}

impl SerialTransport for SerialLink {
    fn connect(port_name: &str, baud_rate: u32) -> Result<Self> {
        Self::open(port_name, baud_rate)
    }
}

/// Protocol state plus its receive buffer, independent of the transport
pub struct ProtocolDriver<P> {
    protocol: P,
    reader: Box<ByteStreamReader>,
    clock: MonotonicClock,
}

impl<P: SerialProtocol> ProtocolDriver<P> {
    pub fn new(protocol: P, clock: MonotonicClock) -> Self {
        Self {
            protocol,
            reader: Box::new(ByteStreamReader::new()),
            clock,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Drop stale bytes and run the protocol's opening handshake
    pub fn start<L: Write>(&mut self, link: &mut L) -> std::result::Result<(), L::Error> {
        self.reader.clear();
        self.protocol.on_open(link, self.clock.now_ms())
    }

    /// Read pending bytes and hand them to the protocol
    pub fn pump<L>(&mut self, link: &mut L) -> std::result::Result<usize, StreamError<L::Error>>
    where
        L: Read + ReadReady + Write,
    {
        let now_ms = self.clock.now_ms();
        let protocol = &mut self.protocol;
        self.reader
            .pump(link, |link, data| protocol.parse(link, data, now_ms))
    }

    pub fn stop<L: Write>(&mut self, link: &mut L) -> std::result::Result<(), L::Error> {
        self.protocol.on_close(link)
    }

    pub fn current_value(&self) -> P::Sample {
        self.protocol.current_value()
    }
}

/// A serial board found by USB vendor/product id
pub struct UsbSerialDevice<P: SerialProtocol, L: SerialTransport = SerialLink> {
    name: &'static str,
    config: UsbSerialConfig,
    driver: ProtocolDriver<P>,
    port_name: Option<String>,
    link: Option<L>,
    faulted: bool,
}

impl<P: SerialProtocol> UsbSerialDevice<P> {
    pub fn new(name: &'static str, config: UsbSerialConfig, protocol: P, clock: MonotonicClock) -> Self {
        Self::with_transport(name, config, protocol, clock)
    }
}

impl<P: SerialProtocol, L: SerialTransport> UsbSerialDevice<P, L> {
    /// Same device over a transport other than `serialport`
    pub fn with_transport(
        name: &'static str,
        config: UsbSerialConfig,
        protocol: P,
        clock: MonotonicClock,
    ) -> Self {
        Self {
            name,
            config,
            driver: ProtocolDriver::new(protocol, clock),
            port_name: None,
            link: None,
            faulted: false,
        }
    }

    pub fn protocol(&self) -> &P {
        self.driver.protocol()
    }

    fn find_port(&self) -> Option<String> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                debug!("{}: port enumeration failed: {}", self.name, e);
                return None;
            }
        };

        ports.into_iter().find_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb)
                if usb.vid == self.config.vendor_id && usb.pid == self.config.product_id =>
            {
                Some(port.port_name)
            }
            _ => None,
        })
    }

    fn fault(&mut self, reason: &str) {
        error!("{}: {}, closing connection", self.name, reason);
        self.link = None;
        self.faulted = true;
    }
}

impl<P: SerialProtocol, L: SerialTransport> SensorDevice for UsbSerialDevice<P, L> {
    type Sample = P::Sample;

    fn name(&self) -> &str {
        self.name
    }

    fn available(&self) -> bool {
        self.port_name.is_some() && !self.faulted
    }

    fn open(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }
        if self.faulted {
            return false;
        }
        let Some(port_name) = self.port_name.as_deref() else {
            return false;
        };

        let mut link = match L::connect(port_name, self.config.baud_rate) {
            Ok(link) => link,
            Err(e) => {
                warn!("{}: failed to open {}: {}", self.name, port_name, e);
                return false;
            }
        };

        if let Err(e) = self.driver.start(&mut link) {
            warn!("{}: handshake write failed on {}: {}", self.name, port_name, e);
            return false;
        }

        info!("{}: opened {} at {} baud", self.name, port_name, self.config.baud_rate);
        self.link = Some(link);
        true
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn update(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        match self.driver.pump(link) {
            Ok(_) => {}
            Err(StreamError::Overflow) => self.fault("read buffer overflow"),
            Err(StreamError::Transport(e)) => {
                let reason = format!("transport error: {}", e);
                self.fault(&reason);
            }
        }
    }

    fn current_value(&self) -> P::Sample {
        self.driver.current_value()
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = self.driver.stop(&mut link) {
                debug!("{}: stop command not sent: {}", self.name, e);
            }
            info!("{}: closed", self.name);
        }
    }

    fn update_device_status(&mut self) {
        if !self.config.enabled {
            self.port_name = None;
            return;
        }

        match self.find_port() {
            Some(port_name) => {
                if self.port_name.as_deref() != Some(port_name.as_str()) {
                    debug!("{}: found at {}", self.name, port_name);
                }
                self.port_name = Some(port_name);
            }
            None => {
                if self.port_name.take().is_some() {
                    info!("{}: detached", self.name);
                }
                self.faulted = false;
                self.close();
            }
        }
    }
}

impl<P: SerialProtocol, L: SerialTransport> Drop for UsbSerialDevice<P, L> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_shared::openbci::{COMMAND_RESET, COMMAND_START, COMMAND_STOP};
    use sensor_shared::{CytonParser, CytonState, InertialBoardProtocol, RECV_BUFFER_SIZE};
    use std::collections::VecDeque;

    /// Scripted in-memory link
    #[derive(Default)]
    struct ScriptedLink {
        incoming: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        broken: bool,
    }

    impl ErrorType for ScriptedLink {
        type Error = io::Error;
    }

    impl ReadReady for ScriptedLink {
        fn read_ready(&mut self) -> io::Result<bool> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            Ok(!self.incoming.is_empty())
        }
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.incoming.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.incoming.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialTransport for ScriptedLink {
        fn connect(_port_name: &str, _baud_rate: u32) -> Result<Self> {
            Ok(Self::default())
        }
    }

    /// Device over a scripted link, already discovered on a port
    fn attached<P: SerialProtocol>(protocol: P) -> UsbSerialDevice<P, ScriptedLink> {
        let mut device = UsbSerialDevice::with_transport(
            "board",
            UsbSerialConfig::biosignal_default(),
            protocol,
            MonotonicClock::new(),
        );
        device.port_name = Some("/dev/ttyUSB0".into());
        device
    }

    fn link<P: SerialProtocol>(device: &mut UsbSerialDevice<P, ScriptedLink>) -> &mut ScriptedLink {
        device.link.as_mut().unwrap()
    }

    fn packet(seq: u8, first_channel: [u8; 3]) -> Vec<u8> {
        let mut packet = vec![0u8; 33];
        packet[0] = 0xA0;
        packet[1] = seq;
        packet[2..5].copy_from_slice(&first_channel);
        packet[32] = 0xC0;
        packet
    }

    #[test]
    fn test_driver_runs_cyton_handshake_over_link() {
        let mut link = ScriptedLink::default();
        let mut driver = ProtocolDriver::new(CytonParser::new(), MonotonicClock::new());

        driver.start(&mut link).unwrap();
        assert_eq!(link.written, [COMMAND_RESET]);

        link.incoming.push_back(b"OpenBCI V3 8-16 channel\n$$$".to_vec());
        driver.pump(&mut link).unwrap();
        assert_eq!(driver.protocol().state(), CytonState::Normal);
        assert_eq!(link.written, [COMMAND_RESET, COMMAND_START]);

        link.incoming.push_back(packet(0, [0x00, 0x00, 0x01]));
        driver.pump(&mut link).unwrap();
        assert!(driver.current_value().channels[0] > 0.0);

        driver.stop(&mut link).unwrap();
        assert_eq!(link.written.last(), Some(&COMMAND_STOP));
    }

    #[test]
    fn test_driver_reports_overflow() {
        let mut link = ScriptedLink::default();
        let mut hoarder = ProtocolDriver::new(Hoarder, MonotonicClock::new());
        link.incoming.push_back(vec![0x55; RECV_BUFFER_SIZE]);
        hoarder.pump(&mut link).unwrap();
        link.incoming.push_back(vec![0x55; 1]);
        assert!(matches!(hoarder.pump(&mut link), Err(StreamError::Overflow)));
    }

    #[test]
    fn test_driver_surfaces_transport_errors() {
        let mut link = ScriptedLink {
            broken: true,
            ..ScriptedLink::default()
        };
        let mut driver = ProtocolDriver::new(InertialBoardProtocol::new(), MonotonicClock::new());
        assert!(matches!(driver.pump(&mut link), Err(StreamError::Transport(_))));
    }

    #[test]
    fn test_restart_discards_stale_bytes() {
        let mut link = ScriptedLink::default();
        let mut driver = ProtocolDriver::new(Hoarder, MonotonicClock::new());
        link.incoming.push_back(vec![1, 2, 3]);
        driver.pump(&mut link).unwrap();
        assert_eq!(driver.reader.pending(), &[1, 2, 3]);

        driver.start(&mut link).unwrap();
        assert!(driver.reader.pending().is_empty());
    }

    #[test]
    fn test_disabled_board_is_never_available() {
        let mut config = UsbSerialConfig::inertial_default();
        config.enabled = false;
        let mut device = UsbSerialDevice::new(
            "imu-board",
            config,
            InertialBoardProtocol::new(),
            MonotonicClock::new(),
        );

        device.update_device_status();
        assert!(!device.available());
        assert!(!device.open());
        assert!(!device.is_open());

        // Closed devices tolerate update and close.
        device.update();
        device.close();
    }

    #[test]
    fn test_overflow_closes_device_and_marks_it_unavailable() {
        let mut device = attached(Hoarder);
        assert!(device.available());
        assert!(device.open());

        link(&mut device).incoming.push_back(vec![0x55; RECV_BUFFER_SIZE]);
        device.update();
        assert!(device.is_open());

        link(&mut device).incoming.push_back(vec![0x55; 1]);
        device.update();
        assert!(!device.is_open());
        assert!(!device.available());
        assert!(!device.open());
    }

    #[test]
    fn test_transport_error_closes_device_and_marks_it_unavailable() {
        let mut device = attached(CytonParser::new());
        assert!(device.open());
        assert_eq!(link(&mut device).written, [COMMAND_RESET]);

        link(&mut device).broken = true;
        device.update();
        assert!(!device.is_open());
        assert!(!device.available());

        // Closed devices tolerate update and close.
        device.update();
        device.close();
    }

    /// Keeps every byte it is shown
    struct Hoarder;

    impl SerialProtocol for Hoarder {
        type Sample = u8;

        fn on_open<W: Write>(&mut self, _link: &mut W, _now_ms: u64) -> std::result::Result<(), W::Error> {
            Ok(())
        }

        fn on_close<W: Write>(&mut self, _link: &mut W) -> std::result::Result<(), W::Error> {
            Ok(())
        }

        fn parse<W: Write>(
            &mut self,
            _link: &mut W,
            _data: &[u8],
            _now_ms: u64,
        ) -> std::result::Result<sensor_shared::Step, W::Error> {
            Ok(sensor_shared::Step::Done(0))
        }

        fn current_value(&self) -> u8 {
            0
        }
    }
}
