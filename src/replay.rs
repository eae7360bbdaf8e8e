//! Read-capturing stream adapter used during protocol sniffing.
//!
//! [`ReplayStream`] borrows the client connection mutably, so a sniffer can
//! consume bytes destructively while every byte it reads is retained for
//! replay to the upstream. Reads capture; writes fail; flush and shutdown are
//! inert. The real connection's lifecycle stays with its owner.

use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub struct ReplayStream<'a, S> {
    inner: &'a mut S,
    captured: BytesMut,
}

impl<'a, S> ReplayStream<'a, S> {
    pub fn new(inner: &'a mut S) -> Self {
        Self {
            inner,
            captured: BytesMut::with_capacity(4096),
        }
    }

    /// Bytes read through this wrapper so far, in order
    #[cfg(test)]
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }

    /// Consume the wrapper, releasing the borrow and returning the replay buffer
    pub fn into_captured(self) -> Bytes {
        self.captured.freeze()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<'_, S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut *this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            let read = &buf.filled()[before..];
            if !read.is_empty() {
                this.captured.extend_from_slice(read);
            }
        }
        res
    }
}

impl<S> AsyncWrite for ReplayStream<'_, S> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(not_writable()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    // Closing the wrapper never closes the client connection
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn not_writable() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "stream not writable")
}
