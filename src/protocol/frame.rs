use itertools::Itertools;
use thiserror::Error;

/// Every frame on the link opens with this marker byte.
pub const FRAME_START: u8 = 0xbb;

/// Direction bytes follow the marker. The module and the mainboard use
/// mirrored values so each side can reject its own transmissions.
pub const HEADER_MCU_TO_AC: [u8; 3] = [FRAME_START, 0x00, 0x01];
pub const HEADER_AC_TO_MCU: [u8; 3] = [FRAME_START, 0x01, 0x00];

/// header(3) + command(1) + length(1) + checksum(1)
pub const FRAME_OVERHEAD: usize = 6;
pub const MAX_PAYLOAD_LEN: usize = 255;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Direction {
    McuToAc,
    AcToMcu,
}

impl Direction {
    pub fn header(self) -> [u8; 3] {
        match self {
            Direction::McuToAc => HEADER_MCU_TO_AC,
            Direction::AcToMcu => HEADER_AC_TO_MCU,
        }
    }

    fn from_header(bytes: &[u8]) -> Option<Direction> {
        match bytes {
            [FRAME_START, 0x00, 0x01] => Some(Direction::McuToAc),
            [FRAME_START, 0x01, 0x00] => Some(Direction::AcToMcu),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Command {
    SetParams,
    Poll,
    TempResponse,
    StatusEcho,
    ShortStatus,
    Power,
    Time,
    Other(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            0x03 => Command::SetParams,
            0x04 => Command::Poll,
            0x05 => Command::TempResponse,
            0x06 => Command::StatusEcho,
            0x09 => Command::ShortStatus,
            0x0a => Command::Power,
            0x0b => Command::Time,
            other => Command::Other(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::SetParams => 0x03,
            Command::Poll => 0x04,
            Command::TempResponse => 0x05,
            Command::StatusEcho => 0x06,
            Command::ShortStatus => 0x09,
            Command::Power => 0x0a,
            Command::Time => 0x0b,
            Command::Other(other) => other,
        }
    }
}

#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    #[error("frame does not start with a valid header")]
    Malformed,
    #[error("frame checksum mismatch: calculated 0x{calculated:02x}, received 0x{received:02x}")]
    ChecksumMismatch { calculated: u8, received: u8 },
    #[error("frame is truncated, need at least {needed} bytes")]
    Truncated { needed: usize },
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum EncodeError {
    #[error("payload of {0} bytes exceeds the one-byte length field")]
    PayloadTooLong(usize),
    #[error(transparent)]
    Temperature(#[from] crate::protocol::types::TemperatureOutOfRange),
}

/// A delimited, checksummed unit of protocol data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub direction: Direction,
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(
        direction: Direction,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<Frame, EncodeError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EncodeError::PayloadTooLong(payload.len()));
        }
        Ok(Frame {
            direction,
            command,
            payload,
        })
    }

    /// XOR over every byte preceding the checksum position.
    pub fn xor_checksum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0, |acc, b| acc ^ b)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        bytes.extend_from_slice(&self.direction.header());
        bytes.push(u8::from(self.command));
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        bytes.push(Self::xor_checksum(&bytes));
        bytes
    }

    /// Decode one frame from the start of `bytes`, returning the frame and the
    /// number of bytes consumed. Malformed input is an error value, never a
    /// panic; the caller decides whether to resync.
    pub fn decode(bytes: &[u8]) -> Result<(Frame, usize), FrameError> {
        if bytes.len() < 5 {
            return Err(FrameError::Truncated { needed: 5 });
        }
        let direction = Direction::from_header(&bytes[..3]).ok_or(FrameError::Malformed)?;
        let command = Command::from(bytes[3]);
        let payload_len = bytes[4] as usize;
        let total = FRAME_OVERHEAD + payload_len;
        if bytes.len() < total {
            return Err(FrameError::Truncated { needed: total });
        }
        let calculated = Self::xor_checksum(&bytes[..total - 1]);
        let received = bytes[total - 1];
        if calculated != received {
            return Err(FrameError::ChecksumMismatch {
                calculated,
                received,
            });
        }
        let frame = Frame {
            direction,
            command,
            payload: bytes[5..total - 1].to_vec(),
        };
        Ok((frame, total))
    }
}

/// Hex rendering for trace logs.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame::new(
            Direction::McuToAc,
            Command::SetParams,
            vec![0x03, 0x01, 0x24, 0x01, 0x56],
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = sample_frame();
        let bytes = frame.encode();
        let (decoded, consumed) = Frame::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn poll_frame_matches_known_encoding() {
        let frame = Frame::new(Direction::McuToAc, Command::Poll, vec![0x00]).unwrap();
        assert_eq!(frame.encode(), vec![0xbb, 0x00, 0x01, 0x04, 0x01, 0x00, 0xbf]);
    }

    #[test]
    fn any_single_corrupted_byte_is_caught() {
        let bytes = sample_frame().encode();
        // headers are rejected as malformed; everything else must fail the checksum
        for position in 3..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[position] ^= 0x10;
            match Frame::decode(&corrupted) {
                Ok((frame, _)) => panic!(
                    "corrupt byte {} decoded as {:?}",
                    position, frame
                ),
                Err(FrameError::ChecksumMismatch { .. })
                | Err(FrameError::Malformed)
                | Err(FrameError::Truncated { .. }) => {}
            }
        }
    }

    #[test]
    fn truncated_input_reports_needed_length() {
        let bytes = sample_frame().encode();
        assert_eq!(
            Frame::decode(&bytes[..4]),
            Err(FrameError::Truncated { needed: 5 })
        );
        assert_eq!(
            Frame::decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::Truncated { needed: bytes.len() })
        );
    }

    #[test]
    fn unknown_header_is_malformed() {
        assert_eq!(
            Frame::decode(&[0xbb, 0x02, 0x02, 0x04, 0x01, 0x00, 0x00]),
            Err(FrameError::Malformed)
        );
        assert_eq!(
            Frame::decode(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]),
            Err(FrameError::Malformed)
        );
    }

    #[test]
    fn both_direction_headers_decode() {
        for direction in [Direction::McuToAc, Direction::AcToMcu] {
            let frame = Frame::new(direction, Command::ShortStatus, vec![0u8; 32]).unwrap();
            let (decoded, _) = Frame::decode(&frame.encode()).unwrap();
            assert_eq!(decoded.direction, direction);
        }
    }
}
