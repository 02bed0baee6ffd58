//! Mutex-guarded output destination shared by a child's stdout and stderr.
//!
//! Both pipes of a supervised process are pumped by independent tasks. Every
//! call on [`SynchronizedSink`] holds the lock for its whole duration, so two
//! chunks never interleave at the byte level. Ordering between the two streams
//! is whatever order the writes arrive in.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard};

/// Errors from sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink destination does not support '{0}'")]
    Unsupported(&'static str),

    #[error("Sink lock poisoned by a panicking writer")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// A destination the supervisor can redirect process output into.
///
/// `snapshot` is an optional capability: destinations that can hand back
/// everything written so far override it; the rest report
/// [`SinkError::Unsupported`].
pub trait SinkTarget: Write + Send {
    fn snapshot(&mut self) -> Result<Vec<u8>> {
        Err(SinkError::Unsupported("snapshot"))
    }
}

impl SinkTarget for Vec<u8> {
    fn snapshot(&mut self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }
}

impl SinkTarget for File {
    fn snapshot(&mut self) -> Result<Vec<u8>> {
        self.flush()?;
        let end = self.stream_position()?;
        self.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::with_capacity(end as usize);
        let read = self.read_to_end(&mut contents);
        // Restore the append position even if the read failed.
        self.seek(SeekFrom::Start(end))?;
        read?;
        Ok(contents)
    }
}

impl SinkTarget for io::Stdout {}

impl SinkTarget for io::Stderr {}

/// Single destination wrapped so exactly one writer at a time touches it.
pub struct SynchronizedSink<W: SinkTarget> {
    inner: Mutex<W>,
}

impl<W: SinkTarget> SynchronizedSink<W> {
    pub fn new(target: W) -> Self {
        Self {
            inner: Mutex::new(target),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, W>> {
        self.inner.lock().map_err(|_| SinkError::Poisoned)
    }

    /// Write a whole chunk while holding the lock.
    pub fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut target = self.lock()?;
        target.write_all(buf)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.lock()?.flush()?;
        Ok(())
    }

    /// Everything written so far, when the destination supports reading back.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.lock()?.snapshot()
    }

    pub fn into_inner(self) -> Result<W> {
        self.inner.into_inner().map_err(|_| SinkError::Poisoned)
    }
}

impl SynchronizedSink<Vec<u8>> {
    /// In-memory capture buffer.
    pub fn capture() -> Self {
        Self::new(Vec::new())
    }
}

impl SynchronizedSink<io::Stdout> {
    /// Forward process output to our own stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}
