//! `monoutils::progress` reports how many bytes have gone through a writer.

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A sink for transfer progress.
///
/// Purely observational: implementations must not block and cannot influence the transfer.
pub trait ProgressTracker: Send + Sync {
    /// Called after each successful write with the running total of bytes written.
    fn update(&self, total_bytes: u64);
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

pin_project! {
    /// Wraps an [`AsyncWrite`] and reports the running byte count to a [`ProgressTracker`].
    pub struct ProgressWriter<W> {
        #[pin]
        inner: W,
        written: u64,
        tracker: Arc<dyn ProgressTracker>,
    }
}

/// A tracker that only remembers the last total it saw.
#[derive(Debug, Default)]
pub struct ByteCounter {
    total: AtomicU64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<W> ProgressWriter<W> {
    /// Creates a new progress writer around `inner`.
    pub fn new(inner: W, tracker: Arc<dyn ProgressTracker>) -> Self {
        Self {
            inner,
            written: 0,
            tracker,
        }
    }

    /// Returns the number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl ByteCounter {
    /// Returns the last reported total.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<W: AsyncWrite> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                *this.written += n as u64;
                this.tracker.update(*this.written);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl ProgressTracker for ByteCounter {
    fn update(&self, total_bytes: u64) {
        self.total.store(total_bytes, Ordering::Relaxed);
    }
}

impl<F> ProgressTracker for F
where
    F: Fn(u64) + Send + Sync,
{
    fn update(&self, total_bytes: u64) {
        self(total_bytes)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
