use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Turns an arbitrarily chunked byte stream into complete frames.
///
/// Incomplete data is buffered across calls. A single chunk may complete
/// any number of frames; all of them are returned, in stream order.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    config: FrameConfig,
}

impl Reassembler {
    /// Create a reassembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a reassembler with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Append `chunk` and return every frame it completes.
    ///
    /// A corrupt header (negative or oversized length) is an error; the
    /// stream is desynchronized and the buffered bytes should be discarded.
    /// Frames completed ahead of the corrupt header are still returned, and
    /// the error is reported by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        match self.feed_each(chunk, |frame| frames.push(frame)) {
            Err(err) if frames.is_empty() => Err(err),
            _ => Ok(frames),
        }
    }

    /// Append `chunk` and hand each completed frame to `on_frame` as it is
    /// decoded.
    ///
    /// Frames ahead of a corrupt header are delivered before the error is
    /// returned. The corrupt header stays buffered.
    pub fn feed_each(&mut self, chunk: &[u8], mut on_frame: impl FnMut(Frame)) -> Result<()> {
        self.extend(chunk);
        while let Some(frame) = self.next_frame()? {
            on_frame(frame);
        }
        Ok(())
    }

    /// Append bytes without decoding.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame from the buffer, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = decode_frame(&mut self.buf, self.config.max_payload_size)?;
        if let Some(frame) = &frame {
            trace!(
                message_id = %frame.message_id,
                command = %frame.command,
                len = frame.payload.len(),
                remaining = self.buf.len(),
                "reassembled frame"
            );
        }
        Ok(frame)
    }

    /// Number of bytes waiting for more data.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, encode_response, MessageId, HEADER_SIZE};
    use crate::command::{Command, ResponseKind};
    use crate::error::FrameError;

    fn wire(id: &MessageId, command: Command, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(id, command, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn single_chunk_single_frame() {
        let id = MessageId::random();
        let mut reassembler = Reassembler::new();

        let frames = reassembler.feed(&wire(&id, Command::Launch, b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_id, id);
        assert_eq!(frames[0].command, Command::Launch);
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn split_inside_header_emits_after_second_piece() {
        let id = MessageId::random();
        let bytes = wire(&id, Command::IpcGetTeamside, br#"{"player":56}"#);

        for split in [1, 20, 36, 40, HEADER_SIZE - 1, HEADER_SIZE, bytes.len() - 1] {
            let mut reassembler = Reassembler::new();
            let first = reassembler.feed(&bytes[..split]).unwrap();
            assert!(first.is_empty(), "split at {split} emitted early");
            assert_eq!(reassembler.buffered_len(), split);

            let second = reassembler.feed(&bytes[split..]).unwrap();
            assert_eq!(second.len(), 1, "split at {split}");
            assert_eq!(second[0].message_id, id);
            assert_eq!(second[0].payload.as_ref(), br#"{"player":56}"#);
            assert_eq!(reassembler.buffered_len(), 0);
        }
    }

    #[test]
    fn two_frames_in_one_chunk_yield_both_in_order() {
        let a = MessageId::random();
        let b = MessageId::random();
        let mut bytes = wire(&a, Command::Stop, b"one");
        bytes.extend(wire(&b, Command::Exit, b"two"));

        let mut reassembler = Reassembler::new();
        let frames = reassembler.feed(&bytes).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message_id, a);
        assert_eq!(frames[0].payload.as_ref(), b"one");
        assert_eq!(frames[1].message_id, b);
        assert_eq!(frames[1].payload.as_ref(), b"two");
    }

    #[test]
    fn trailing_partial_frame_is_retained() {
        let a = MessageId::random();
        let b = MessageId::random();
        let mut bytes = wire(&a, Command::Continue, b"");
        let second = wire(&b, Command::Step, b"payload");
        bytes.extend_from_slice(&second[..10]);

        let mut reassembler = Reassembler::new();
        let frames = reassembler.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(reassembler.buffered_len(), 10);

        let frames = reassembler.feed(&second[10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_id, b);
    }

    #[test]
    fn byte_by_byte_delivery() {
        let id = MessageId::random();
        let bytes = wire(&id, Command::IpcListPlayers, br#"{"includeEnemy":true}"#);

        let mut reassembler = Reassembler::new();
        let mut emitted = Vec::new();
        for byte in &bytes {
            emitted.extend(reassembler.feed(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].message_id, id);
    }

    #[test]
    fn sentinel_frames_are_not_classified_here() {
        let mut buf = BytesMut::new();
        encode_response(
            &MessageId::SENTINEL,
            Command::IpcHitBreakpoint,
            ResponseKind::Success,
            br#"{"owner":3}"#,
            &mut buf,
        )
        .unwrap();

        let frames = Reassembler::new().feed(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_event());
    }

    #[test]
    fn corrupt_length_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_slice(MessageId::random().as_bytes());
        buf.put_i32_le(2);
        buf.put_i32_le(0);
        buf.put_i32_le(-1);

        let mut reassembler = Reassembler::new();
        let err = reassembler.feed(&buf).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(-1)));

        reassembler.clear();
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn frames_ahead_of_corrupt_header_are_kept() {
        let id = MessageId::random();
        let mut bytes = wire(&id, Command::IpcPause, br#"{"firstPlayerID":56}"#);
        bytes.extend_from_slice(MessageId::random().as_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&(-7i32).to_le_bytes());

        let mut reassembler = Reassembler::new();
        let frames = reassembler.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_id, id);

        // The corrupt header is still buffered and surfaces next time.
        let err = reassembler.feed(&[]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(-7)));
    }

    #[test]
    fn feed_each_delivers_frames_before_the_error() {
        let a = MessageId::random();
        let b = MessageId::random();
        let mut bytes = wire(&a, Command::Stop, b"");
        bytes.extend(wire(&b, Command::Step, b""));
        bytes.extend(wire(&MessageId::random(), Command::Launch, &[0u8; 64]));

        let mut reassembler = Reassembler::with_config(FrameConfig {
            max_payload_size: 16,
        });
        let mut seen = Vec::new();
        let err = reassembler
            .feed_each(&bytes, |frame| seen.push(frame.message_id))
            .unwrap_err();

        assert_eq!(seen, vec![a, b]);
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, .. }));
    }

    #[test]
    fn oversized_frame_respects_config() {
        let bytes = wire(&MessageId::random(), Command::Launch, &[0u8; 64]);
        let mut reassembler = Reassembler::with_config(FrameConfig {
            max_payload_size: 16,
        });

        let err = reassembler.feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, max: 16 }));
    }
}
