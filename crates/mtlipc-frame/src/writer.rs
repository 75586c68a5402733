use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, encode_response, Frame, FrameConfig, MessageId};
use crate::command::{Command, ResponseKind};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any blocking `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.check_size(frame.payload.len())?;
        self.buf.clear();
        frame.encode(&mut self.buf)?;
        self.write_buffered()
    }

    /// Encode and send a request.
    pub fn send_request(&mut self, id: &MessageId, command: Command, payload: &[u8]) -> Result<()> {
        self.check_size(payload.len())?;
        self.buf.clear();
        encode_frame(id, command, payload, &mut self.buf)?;
        self.write_buffered()
    }

    /// Encode and send a response (or, on the sentinel id, an event).
    pub fn send_response(
        &mut self,
        id: &MessageId,
        command: Command,
        kind: ResponseKind,
        payload: &[u8],
    ) -> Result<()> {
        self.check_size(payload.len())?;
        self.buf.clear();
        encode_response(id, command, kind, payload, &mut self.buf)?;
        self.write_buffered()
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_frame;

    fn decode_all(bytes: Vec<u8>) -> Vec<Frame> {
        let mut wire = BytesMut::from(bytes.as_slice());
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut wire, usize::MAX).unwrap() {
            frames.push(frame);
        }
        assert!(wire.is_empty());
        frames
    }

    #[test]
    fn request_then_response() {
        let id = MessageId::random();
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));

        writer.send_request(&id, Command::Launch, b"\"\"").unwrap();
        writer
            .send_response(&id, Command::Launch, ResponseKind::Success, br#"{"pid":4}"#)
            .unwrap();

        let frames = decode_all(writer.into_inner().into_inner());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, Command::Launch.code());
        assert_eq!(frames[1].response_kind(), ResponseKind::Success);
        assert_eq!(frames[1].payload.as_ref(), br#"{"pid":4}"#);
    }

    #[test]
    fn write_frame_preserves_fields() {
        let frame = Frame::event(Command::IpcStep, ResponseKind::Success, "{}");
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.write_frame(&frame).unwrap();

        let frames = decode_all(writer.into_inner().into_inner());
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn rejects_payload_over_limit() {
        let mut writer = FrameWriter::with_config(
            Cursor::new(Vec::new()),
            FrameConfig {
                max_payload_size: 4,
            },
        );
        let err = writer
            .send_request(&MessageId::random(), Command::Load, b"too long")
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, max: 4 }));
    }

    #[test]
    fn zero_write_is_connection_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer
            .send_request(&MessageId::random(), Command::Help, b"")
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
