//! Write lifecycle shared by local writers and remote transfers
//!
//! A sink moves through `Idle -> Writing -> {Committed | Aborted}`.
//! `begin_write` may be called again before a commit to discard the partial
//! stream and start over. Whoever drives a transfer issues exactly one
//! terminal call; a sink dropped without one behaves as aborted.

use crate::artifact::{ArtifactDescriptor, ArtifactKey};
use crate::error::{DepotError, DepotResult};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

/// Lifecycle state of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Writing,
    Committed,
    Aborted,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Writing => write!(f, "writing"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Consumer of an artifact's bytes, identified by key
pub trait ArtifactSink {
    /// Key of the artifact this sink receives
    fn artifact_to_be_written(&self) -> &ArtifactKey;

    /// False only for sinks that can never accept a write
    fn can_begin_write(&self) -> bool {
        true
    }

    /// Start (or restart) the write and return the stream to write into
    fn begin_write(&mut self) -> DepotResult<&mut dyn Write>;

    /// Make the written bytes durable and visible
    fn commit_write(&mut self) -> DepotResult<()>;

    /// Discard any partial data
    ///
    /// A no-op when nothing was started or the sink already aborted. Fails
    /// only after a successful commit.
    fn abort_write(&mut self) -> DepotResult<()>;

    fn state(&self) -> SinkState;
}

/// Sink for one specific representation of an artifact
pub trait RawArtifactSink: ArtifactSink {
    fn descriptor_to_be_written(&self) -> &ArtifactDescriptor;
}

/// State transitions common to every sink implementation
#[derive(Debug)]
pub(crate) struct Lifecycle {
    subject: String,
    state: SinkState,
}

impl Lifecycle {
    pub(crate) fn new(subject: impl fmt::Display) -> Self {
        Self {
            subject: subject.to_string(),
            state: SinkState::Idle,
        }
    }

    pub(crate) fn state(&self) -> SinkState {
        self.state
    }

    fn error(&self, operation: &'static str) -> DepotError {
        DepotError::SinkState {
            artifact: self.subject.clone(),
            operation,
            state: self.state.to_string(),
        }
    }

    /// Enter `Writing`; returns true when a previous partial write is discarded
    pub(crate) fn begin(&mut self) -> DepotResult<bool> {
        let restarting = match self.state {
            SinkState::Committed => return Err(self.error("begin writing")),
            SinkState::Writing => {
                debug!("Restarting write for {}", self.subject);
                true
            }
            SinkState::Idle | SinkState::Aborted => false,
        };
        self.state = SinkState::Writing;
        Ok(restarting)
    }

    pub(crate) fn check_commit(&self) -> DepotResult<()> {
        match self.state {
            SinkState::Writing => Ok(()),
            _ => Err(self.error("commit")),
        }
    }

    /// Returns true when there is partial data to discard
    pub(crate) fn check_abort(&self) -> DepotResult<bool> {
        match self.state {
            SinkState::Committed => Err(self.error("abort")),
            SinkState::Writing => Ok(true),
            SinkState::Idle | SinkState::Aborted => Ok(false),
        }
    }

    pub(crate) fn committed(&mut self) {
        self.state = SinkState::Committed;
    }

    pub(crate) fn aborted(&mut self) {
        self.state = SinkState::Aborted;
    }
}

/// Stream everything from `reader` into `sink`, then commit
///
/// Any read or write failure aborts the sink and is returned; exactly one
/// terminal call is made either way.
pub fn pump<S: ArtifactSink + ?Sized>(reader: &mut dyn Read, sink: &mut S) -> DepotResult<u64> {
    match copy_into(reader, sink) {
        Ok(bytes) => {
            sink.commit_write()?;
            Ok(bytes)
        }
        Err(e) => {
            if let Err(abort_err) = sink.abort_write() {
                warn!("Failed to abort sink after error: {}", abort_err);
            }
            Err(e)
        }
    }
}

fn copy_into<S: ArtifactSink + ?Sized>(reader: &mut dyn Read, sink: &mut S) -> DepotResult<u64> {
    let key = sink.artifact_to_be_written().to_string();
    let out = sink.begin_write()?;
    let bytes = io::copy(reader, out).map_err(|e| DepotError::io(format!("transferring {}", key), e))?;
    out.flush()
        .map_err(|e| DepotError::io(format!("flushing {}", key), e))?;
    Ok(bytes)
}

/// Temp-file spool that releases its bytes to an output only on commit
struct Spool<W> {
    lifecycle: Lifecycle,
    buffer: Option<File>,
    output: W,
}

impl<W: Write> Spool<W> {
    fn new(subject: impl fmt::Display, output: W) -> Self {
        Self {
            lifecycle: Lifecycle::new(subject),
            buffer: None,
            output,
        }
    }

    fn begin(&mut self) -> DepotResult<&mut dyn Write> {
        self.lifecycle.begin()?;
        let file = tempfile::tempfile().map_err(|e| DepotError::io("creating spool file", e))?;
        Ok(self.buffer.insert(file))
    }

    fn commit(&mut self) -> DepotResult<()> {
        self.lifecycle.check_commit()?;
        let mut buffer = self
            .buffer
            .take()
            .ok_or_else(|| DepotError::Internal("spool missing while writing".to_string()))?;

        let copied = buffer
            .seek(SeekFrom::Start(0))
            .and_then(|_| io::copy(&mut buffer, &mut self.output))
            .and_then(|_| self.output.flush());
        match copied {
            Ok(()) => {
                self.lifecycle.committed();
                Ok(())
            }
            Err(e) => {
                self.lifecycle.aborted();
                Err(DepotError::io("writing to output stream", e))
            }
        }
    }

    fn abort(&mut self) -> DepotResult<()> {
        if self.lifecycle.check_abort()? {
            self.buffer = None;
            self.lifecycle.aborted();
        }
        Ok(())
    }
}

/// Adapts a plain output stream to the sink protocol for a key
///
/// Bytes are spooled and only reach the output on commit, so an aborted
/// transfer never leaves partial data in it.
pub struct StreamSink<W: Write> {
    key: ArtifactKey,
    spool: Spool<W>,
}

impl<W: Write> StreamSink<W> {
    pub fn new(key: ArtifactKey, output: W) -> Self {
        Self {
            spool: Spool::new(&key, output),
            key,
        }
    }

    /// Recover the wrapped output stream
    pub fn into_inner(self) -> W {
        self.spool.output
    }
}

impl<W: Write> ArtifactSink for StreamSink<W> {
    fn artifact_to_be_written(&self) -> &ArtifactKey {
        &self.key
    }

    fn begin_write(&mut self) -> DepotResult<&mut dyn Write> {
        self.spool.begin()
    }

    fn commit_write(&mut self) -> DepotResult<()> {
        self.spool.commit()
    }

    fn abort_write(&mut self) -> DepotResult<()> {
        self.spool.abort()
    }

    fn state(&self) -> SinkState {
        self.spool.lifecycle.state()
    }
}

/// Adapts a plain output stream to the sink protocol for an exact descriptor
pub struct RawStreamSink<W: Write> {
    descriptor: ArtifactDescriptor,
    spool: Spool<W>,
}

impl<W: Write> RawStreamSink<W> {
    pub fn new(descriptor: ArtifactDescriptor, output: W) -> Self {
        Self {
            spool: Spool::new(&descriptor, output),
            descriptor,
        }
    }

    pub fn into_inner(self) -> W {
        self.spool.output
    }
}

impl<W: Write> ArtifactSink for RawStreamSink<W> {
    fn artifact_to_be_written(&self) -> &ArtifactKey {
        &self.descriptor.key
    }

    fn begin_write(&mut self) -> DepotResult<&mut dyn Write> {
        self.spool.begin()
    }

    fn commit_write(&mut self) -> DepotResult<()> {
        self.spool.commit()
    }

    fn abort_write(&mut self) -> DepotResult<()> {
        self.spool.abort()
    }

    fn state(&self) -> SinkState {
        self.spool.lifecycle.state()
    }
}

impl<W: Write> RawArtifactSink for RawStreamSink<W> {
    fn descriptor_to_be_written(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }
}

/// Sink that refuses every write
///
/// Used to check that a provider rejects unusable sinks before doing any
/// remote work.
pub struct ProbeSink {
    key: ArtifactKey,
}

impl ProbeSink {
    pub fn new(key: ArtifactKey) -> Self {
        Self { key }
    }
}

impl ArtifactSink for ProbeSink {
    fn artifact_to_be_written(&self) -> &ArtifactKey {
        &self.key
    }

    fn can_begin_write(&self) -> bool {
        false
    }

    fn begin_write(&mut self) -> DepotResult<&mut dyn Write> {
        Err(DepotError::SinkUnavailable(self.key.to_string()))
    }

    fn commit_write(&mut self) -> DepotResult<()> {
        Err(DepotError::SinkUnavailable(self.key.to_string()))
    }

    fn abort_write(&mut self) -> DepotResult<()> {
        Ok(())
    }

    fn state(&self) -> SinkState {
        SinkState::Idle
    }
}
