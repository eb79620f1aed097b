use async_stream::stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_stream::Stream;

use crate::protocol::frame::{hex_dump, Frame, FrameError, FRAME_START};

/// Upper bound on buffered bytes while hunting for a frame boundary. Larger
/// than the biggest legal frame (261 bytes) so a valid frame is never evicted
/// mid-accumulation.
pub const MAX_RESYNC_WINDOW: usize = 512;

const READ_CHUNK: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    Valid(Frame),
    Corrupt(FrameError),
}

/// Accumulates raw bytes and carves validated frames out of them,
/// resynchronizing on the start marker after corruption.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> FrameAccumulator {
        FrameAccumulator::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_RESYNC_WINDOW {
            let excess = self.buf.len() - MAX_RESYNC_WINDOW;
            warn!("resync window overflow, dropping {} oldest bytes", excess);
            self.buf.drain(..excess);
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next decodable event, or `None` when more bytes are needed.
    pub fn next_event(&mut self) -> Option<FrameEvent> {
        // skip to the next start-marker candidate; everything before it is junk
        match self.buf.iter().position(|b| *b == FRAME_START) {
            None => {
                if !self.buf.is_empty() {
                    trace!("discarding {} junk bytes with no start marker", self.buf.len());
                    self.buf.clear();
                }
                return None;
            }
            Some(0) => {}
            Some(junk) => {
                trace!("discarding {} junk bytes before start marker", junk);
                self.buf.drain(..junk);
            }
        }

        match Frame::decode(&self.buf) {
            Ok((frame, consumed)) => {
                trace!("decoded frame: {}", hex_dump(&self.buf[..consumed]));
                self.buf.drain(..consumed);
                Some(FrameEvent::Valid(frame))
            }
            Err(FrameError::Truncated { .. }) => None,
            Err(error) => {
                // resync: drop this marker and hunt for the next one
                debug!("frame rejected ({}), resyncing", error);
                self.buf.drain(..1);
                Some(FrameEvent::Corrupt(error))
            }
        }
    }
}

/// Lazy, unbounded sequence of frame events over a raw byte source. Ends when
/// the transport closes or fails.
pub fn frame_stream<R>(mut reader: R) -> impl Stream<Item = FrameEvent>
where
    R: AsyncRead + Unpin,
{
    stream! {
        let mut accumulator = FrameAccumulator::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(event) = accumulator.next_event() {
                yield event;
            }
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    info!("transport closed");
                    break;
                }
                Ok(n) => accumulator.extend(&chunk[..n]),
                Err(e) => {
                    warn!("transport read failed: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{Command, Direction};
    use tokio_stream::StreamExt;

    fn status_frame() -> Frame {
        let mut payload = vec![0u8; 32];
        payload[2] = 0x25; // cool + beeper
        Frame::new(Direction::AcToMcu, Command::ShortStatus, payload).unwrap()
    }

    #[test]
    fn garbage_without_marker_never_reaches_the_codec() {
        let mut accumulator = FrameAccumulator::new();
        let garbage: Vec<u8> = (0..200u8).map(|b| if b == FRAME_START { 0 } else { b }).collect();
        accumulator.extend(&garbage);
        assert_eq!(accumulator.next_event(), None);
        assert_eq!(accumulator.buffered(), 0);
    }

    #[test]
    fn buffer_stays_bounded() {
        let mut accumulator = FrameAccumulator::new();
        // markers everywhere, so nothing can be discarded as plain junk
        accumulator.extend(&[FRAME_START; 2 * MAX_RESYNC_WINDOW]);
        assert!(accumulator.buffered() <= MAX_RESYNC_WINDOW);
    }

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let bytes = status_frame().encode();
        let mut accumulator = FrameAccumulator::new();
        let (first, second) = bytes.split_at(7);
        accumulator.extend(first);
        assert_eq!(accumulator.next_event(), None);
        accumulator.extend(second);
        assert_eq!(
            accumulator.next_event(),
            Some(FrameEvent::Valid(status_frame()))
        );
    }

    #[test]
    fn resync_after_leading_junk() {
        let mut bytes = vec![0x12, 0x34, 0x56];
        bytes.extend(status_frame().encode());
        let mut accumulator = FrameAccumulator::new();
        accumulator.extend(&bytes);
        assert_eq!(
            accumulator.next_event(),
            Some(FrameEvent::Valid(status_frame()))
        );
    }

    #[test]
    fn corrupt_frame_reported_then_next_frame_recovered() {
        let mut corrupted = status_frame().encode();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        corrupted.extend(status_frame().encode());

        let mut accumulator = FrameAccumulator::new();
        accumulator.extend(&corrupted);
        assert!(matches!(
            accumulator.next_event(),
            Some(FrameEvent::Corrupt(FrameError::ChecksumMismatch { .. }))
        ));
        assert_eq!(
            accumulator.next_event(),
            Some(FrameEvent::Valid(status_frame()))
        );
    }

    #[tokio::test]
    async fn stream_yields_frames_until_transport_closes() {
        let (client, mut server) = tokio::io::duplex(1024);
        let frame = status_frame();
        let bytes = frame.encode();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&[0x00, 0x01]).await.unwrap();
            server.write_all(&bytes).await.unwrap();
            server.shutdown().await.unwrap();
            drop(server);
        });

        let stream = frame_stream(client);
        tokio::pin!(stream);
        assert_eq!(stream.next().await, Some(FrameEvent::Valid(frame)));
        assert_eq!(stream.next().await, None);
    }
}
