// rust/seqview-core/src/prefetch/protocol.rs

//! Control messages between the consumer and a worker process.
//!
//! Frames are a little-endian `u32` length followed by a `bincode` body. Item
//! payloads never travel over the socket; they are written into the shared
//! segment named by the command.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, SeqError};

/// Upper bound on a control frame; anything larger is a corrupt stream.
const MAX_FRAME_LEN: u32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Command {
    /// Evaluate `index` and write the encoded item into `segment`.
    Compute { index: u64, segment: u32 },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Reply {
    Ready { index: u64, segment: u32, len: u64 },
    Failed {
        index: u64,
        kind: FailureKind,
        message: String,
    },
}

/// What went wrong inside the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum FailureKind {
    Index { index: u64, len: u64 },
    Config,
    Transform,
    Shape { group: u64, expected: u64, actual: u64 },
    Worker,
    Panic,
    Oversized,
    Encode,
}

impl Reply {
    /// Describes a failed `view.get` so the consumer can rebuild it.
    pub(crate) fn from_error(index: usize, err: &SeqError) -> Self {
        let (kind, message) = match err {
            SeqError::Index { index, len } => (
                FailureKind::Index {
                    index: *index as u64,
                    len: *len as u64,
                },
                err.to_string(),
            ),
            SeqError::Config { .. } => (FailureKind::Config, err.to_string()),
            SeqError::Transform { source, .. } => (FailureKind::Transform, source.to_string()),
            SeqError::Shape {
                group,
                expected,
                actual,
            } => (
                FailureKind::Shape {
                    group: *group as u64,
                    expected: *expected as u64,
                    actual: *actual as u64,
                },
                err.to_string(),
            ),
            SeqError::Worker { message, .. } => (FailureKind::Worker, message.clone()),
        };
        Self::Failed {
            index: index as u64,
            kind,
            message,
        }
    }
}

impl FailureKind {
    /// Rebuilds the consumer-side error for a failure at `index`.
    pub(crate) fn into_error(self, index: usize, message: String) -> SeqError {
        match self {
            Self::Transform => SeqError::transform(index, RemoteError::new(message)),
            Self::Config => SeqError::config_with_source(
                format!("worker failed at index {index}"),
                RemoteError::new(message),
            ),
            // Nested views report the index they were asked for.
            Self::Index { index, len } => SeqError::index_out_of_range(index as usize, len as usize),
            Self::Shape {
                group,
                expected,
                actual,
            } => SeqError::shape(group as usize, expected as usize, actual as usize),
            Self::Worker => SeqError::worker(index, message),
            Self::Panic => SeqError::worker(index, format!("worker panicked: {message}")),
            Self::Oversized | Self::Encode => {
                SeqError::worker(index, format!("shared-memory transfer failed: {message}"))
            }
        }
    }
}

pub(crate) fn write_frame<W: Write, M: Serialize>(writer: &mut W, message: &M) -> io::Result<()> {
    let body =
        bincode::serialize(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "control frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Reads one frame; `Ok(None)` on a clean end of stream.
pub(crate) fn read_frame<R: Read, M: DeserializeOwned>(reader: &mut R) -> io::Result<Option<M>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("control frame of {len} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    bincode::deserialize(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
