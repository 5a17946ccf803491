use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::io::{AsyncBufRead, AsyncRead, AsyncWrite};

/// Count the bytes going through the inner stream in both directions, to schedule re-keying.
pub struct IoCounter<C> {
    inner: C,
    rx: usize,
    tx: usize,
}

impl<C> IoCounter<C> {
    pub fn new(inner: C) -> Self {
        IoCounter {
            inner,
            rx: 0,
            tx: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.rx + self.tx
    }

    pub fn reset(&mut self) {
        self.rx = 0;
        self.tx = 0;
    }
}

impl<C: AsyncRead + Unpin> AsyncRead for IoCounter<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(bytes)) = poll {
            self.rx += bytes;
        }

        poll
    }
}

impl<C: AsyncBufRead + Unpin> AsyncBufRead for IoCounter<C> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        self.rx += amt;
        Pin::new(&mut self.inner).consume(amt)
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for IoCounter<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);

        if let Poll::Ready(Ok(bytes)) = poll {
            self.tx += bytes;
        }

        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}
