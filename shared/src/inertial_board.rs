//! Serial inertial sensor board.
//!
//! The board streams at 19200 baud and needs no handshake. Its sample
//! format is not decoded yet: received bytes are counted and dropped, and
//! the reported value stays zeroed so frames keep a well-formed inertial
//! section while this board is the active motion source.

use embedded_io::Write;

use crate::sample::InertialSample;
use crate::stream::{SerialProtocol, Step};

#[derive(Debug, Default)]
pub struct InertialBoardProtocol {
    bytes_discarded: u64,
}

impl InertialBoardProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }
}

impl SerialProtocol for InertialBoardProtocol {
    type Sample = InertialSample;

    fn on_open<W: Write>(&mut self, _link: &mut W, _now_ms: u64) -> Result<(), W::Error> {
        Ok(())
    }

    fn on_close<W: Write>(&mut self, _link: &mut W) -> Result<(), W::Error> {
        Ok(())
    }

    fn parse<W: Write>(&mut self, _link: &mut W, data: &[u8], _now_ms: u64) -> Result<Step, W::Error> {
        self.bytes_discarded += data.len() as u64;
        Ok(Step::Done(data.len()))
    }

    fn current_value(&self) -> InertialSample {
        InertialSample::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mock::MockLink;
    use crate::stream::ByteStreamReader;

    #[test]
    fn test_board_drains_stream_without_writing() {
        let mut link = MockLink::default();
        let mut reader: ByteStreamReader<64> = ByteStreamReader::new();
        let mut board = InertialBoardProtocol::new();

        board.on_open(&mut link, 0).unwrap();
        for _ in 0..10 {
            link.feed(&[0x55; 40]);
            reader
                .pump(&mut link, |link, data| board.parse(link, data, 0))
                .unwrap();
        }

        assert!(link.written.is_empty());
        assert!(reader.pending().is_empty());
        assert_eq!(board.bytes_discarded(), 400);
        assert_eq!(board.current_value(), InertialSample::default());
    }
}
