use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures::task;

use crate::{Error, Result};

/// The window we advertised to the peer, consumed by incoming data
/// and credited back only once the data has been read.
#[derive(Debug)]
pub struct LocalWindow {
    inner: AtomicU32,
    unread: AtomicU32,
    initial: u32,
}

impl LocalWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            inner: initial.into(),
            unread: Default::default(),
            initial,
        }
    }

    /// Credit the peer with the bytes read since the last adjustment, once they
    /// amount to half of the initial window, returning the amount of bytes to advertise.
    pub fn adjustable(&self) -> Option<u32> {
        let threshold = self.initial / 2;
        let mut credit = 0;

        self.inner
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |window| {
                credit = self
                    .initial
                    .saturating_sub(window)
                    .saturating_sub(self.unread.load(Ordering::SeqCst));

                (credit > 0 && credit >= threshold).then(|| window + credit)
            })
            .ok()
            .map(|_| credit)
    }

    /// Consume `size` bytes from the window, failing if the peer overflowed it.
    /// The bytes stay accounted as unread until [`LocalWindow::release`]d.
    pub fn consume(&self, size: u32) -> bool {
        // `adjustable` may never observe the shrunk window without its unread bytes.
        self.unread.fetch_add(size, Ordering::SeqCst);

        let consumed = self
            .inner
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |window| {
                window.checked_sub(size)
            })
            .is_ok();

        if !consumed {
            self.release(size);
        }

        consumed
    }

    /// Mark `size` bytes of received data as read.
    pub fn release(&self, size: u32) {
        self.unread
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |unread| {
                Some(unread.saturating_sub(size))
            })
            .ok();
    }

    /// The amount of bytes received and not yet read.
    pub fn unread(&self) -> u32 {
        self.unread.load(Ordering::SeqCst)
    }
}

/// The window the peer advertised to us, which bounds the data we may send.
#[derive(Debug)]
pub struct RemoteWindow {
    inner: AtomicU32,
    closed: AtomicBool,
    waker: task::AtomicWaker,
}

impl RemoteWindow {
    pub fn replenish(&self, bytes_to_add: u32) {
        self.inner
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |window| {
                Some(window.saturating_add(bytes_to_add))
            })
            .ok();
        self.waker.wake();
    }

    /// Wake up the writers waiting on the window, which will fail from now on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.waker.wake();
    }

    fn try_reserve(&self, amount: u32) -> Option<u32> {
        self.inner
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |window| {
                (window > 0).then(|| window - window.min(amount))
            })
            .ok()
            .map(|previous| previous.min(amount))
    }

    /// Reserve up to `amount` bytes from the window, waiting for the peer to replenish it when empty.
    pub fn poll_reserve(&self, cx: &mut task::Context, amount: u32) -> task::Poll<Result<u32>> {
        if self.closed.load(Ordering::SeqCst) {
            return task::Poll::Ready(Err(Error::Cancelled));
        }

        if let Some(size) = self.try_reserve(amount) {
            return task::Poll::Ready(Ok(size));
        }

        self.waker.register(cx.waker());

        // The window may have been replenished before the waker got registered.
        match self.try_reserve(amount) {
            Some(size) => task::Poll::Ready(Ok(size)),
            None if self.closed.load(Ordering::SeqCst) => task::Poll::Ready(Err(Error::Cancelled)),
            None => task::Poll::Pending,
        }
    }
}

impl From<u32> for RemoteWindow {
    fn from(value: u32) -> Self {
        Self {
            inner: value.into(),
            closed: Default::default(),
            waker: Default::default(),
        }
    }
}
