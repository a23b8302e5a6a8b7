//! Controller/worker message protocol.
//!
//! Every message is one frame: a little-endian `u32` length followed by the
//! bincode encoding of the message.

use std::io::{self, BufReader, BufWriter, Read, Write};

use crossbeam::channel::{Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_core::{ModuleId, RunConfig, TestEvent};

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 64 << 20;

/// Controller to worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControllerMessage {
    /// Sent once, right after the worker connects.
    Initialize(RunConfig),
    RunTests { module: ModuleId },
    /// Exit once idle.
    Stop,
}

/// Worker to controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Ready for a module: after initialization and after each module.
    WaitingForTests,
    Event(TestEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the limit of {MAX_FRAME_LEN} bytes")]
    FrameTooLarge(usize),

    #[error("peer disconnected")]
    Disconnected,
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ProtocolError> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge(body.len()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream between
/// frames.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, ProtocolError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    let len = usize::try_from(u32::from_le_bytes(header)).unwrap_or(usize::MAX);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body)?;
    Ok(Some(bincode::deserialize(&body)?))
}

/// Receiving half of a message transport.
pub trait MessageSource<T> {
    /// Next message, or `None` once the peer is gone.
    fn recv(&mut self) -> Result<Option<T>, ProtocolError>;
}

/// Sending half of a message transport.
pub trait MessageSink<T> {
    fn send(&mut self, message: &T) -> Result<(), ProtocolError>;
}

/// Frames read from a byte stream.
pub struct FramedReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        FramedReader {
            inner: BufReader::new(inner),
        }
    }
}

impl<R: Read, T: DeserializeOwned> MessageSource<T> for FramedReader<R> {
    fn recv(&mut self) -> Result<Option<T>, ProtocolError> {
        read_frame(&mut self.inner)
    }
}

/// Frames written to a byte stream.
pub struct FramedWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        FramedWriter {
            inner: BufWriter::new(inner),
        }
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

impl<W: Write, T: Serialize> MessageSink<T> for FramedWriter<W> {
    fn send(&mut self, message: &T) -> Result<(), ProtocolError> {
        write_frame(&mut self.inner, message)
    }
}

impl<T> MessageSource<T> for Receiver<T> {
    fn recv(&mut self) -> Result<Option<T>, ProtocolError> {
        Ok(Receiver::recv(self).ok())
    }
}

impl<T: Clone> MessageSink<T> for Sender<T> {
    fn send(&mut self, message: &T) -> Result<(), ProtocolError> {
        Sender::send(self, message.clone()).map_err(|_| ProtocolError::Disconnected)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::time::Duration;
    use tally_core::TestError;

    #[test]
    fn frames_follow_each_other() {
        let messages = vec![
            WorkerMessage::WaitingForTests,
            WorkerMessage::Event(TestEvent::TestRun {
                module: ModuleId::from("a.rs"),
                path: vec!["outer".to_owned(), "inner".to_owned()],
                duration: Duration::from_micros(1500),
                error: Some(TestError::new("boom").with_stack("at a.rs:3:5")),
            }),
        ];
        let mut writer = FramedWriter::new(Vec::new());
        for message in &messages {
            writer.send(message).unwrap();
        }
        let bytes = writer.inner.into_inner().unwrap();

        let mut reader = FramedReader::new(Cursor::new(bytes));
        let mut decoded: Vec<WorkerMessage> = Vec::new();
        while let Some(message) = reader.recv().unwrap() {
            decoded.push(message);
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn controller_messages_carry_config() {
        let config = RunConfig {
            plugins: vec!["slow-tests".to_owned()],
            filter: Some("math".to_owned()),
            ..RunConfig::in_process()
        };
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &ControllerMessage::Initialize(config.clone())).unwrap();
        let decoded: Option<ControllerMessage> = read_frame(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, Some(ControllerMessage::Initialize(config)));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let result: Result<Option<WorkerMessage>, _> = read_frame(&mut bytes.as_slice());
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut bytes = 16u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2]);
        let result: Result<Option<WorkerMessage>, _> = read_frame(&mut bytes.as_slice());
        assert!(matches!(result, Err(ProtocolError::Io(_))));
    }

    #[test]
    fn channels_are_transports() {
        let (mut tx, mut rx) = crossbeam::channel::unbounded();
        MessageSink::send(&mut tx, &ControllerMessage::Stop).unwrap();
        drop(tx);
        assert_eq!(MessageSource::recv(&mut rx).unwrap(), Some(ControllerMessage::Stop));
        assert_eq!(MessageSource::<ControllerMessage>::recv(&mut rx).unwrap(), None);
    }
}
