//! Channel primitives the replay engine is built on.
//!
//! A channel is an unbounded FIFO with a single producer ([`Sender`]) and a
//! single consumer ([`Source`]). The consumer side is a local stream: `Some(v)`
//! is a value, `None` means the channel has drained and nothing will ever
//! arrive again.

use std::task::{Context, Poll};

use futures::{
    channel::mpsc,
    stream::{self, LocalBoxStream},
    task::noop_waker_ref,
    Stream, StreamExt,
};

/// Consuming side of a channel.
pub type Source<T> = LocalBoxStream<'static, T>;

/// Producing side of a channel.
pub struct Sender<T> {
    inner: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Sender<T> {
    /// Queues a value. Returns `false` if the channel was closed or the
    /// consumer is gone, in which case the value is dropped.
    pub fn enqueue(&self, value: T) -> bool {
        self.inner.unbounded_send(value).is_ok()
    }

    /// Closes the channel; queued values remain readable, then the consumer
    /// observes the drain.
    pub fn close(&self) {
        self.inner.close_channel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// Creates a new unbounded channel.
pub fn channel<T: 'static>() -> (Sender<T>, Source<T>) {
    let (tx, rx) = mpsc::unbounded();
    (Sender { inner: tx }, rx.boxed_local())
}

/// A pre-filled source that drains after yielding every item.
pub fn from_iter<I>(items: I) -> Source<I::Item>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    I::Item: 'static,
{
    stream::iter(items).boxed_local()
}

/// Polls a stream once without registering interest in future wakeups.
///
/// Under virtual time nothing wakes a consumer; progress is observed by
/// polling again after the clock fires its next tick.
pub fn poll_now<S>(stream: &mut S) -> Poll<Option<S::Item>>
where
    S: Stream + Unpin + ?Sized,
{
    let mut cx = Context::from_waker(noop_waker_ref());
    stream.poll_next_unpin(&mut cx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_values_survive_close() {
        let (tx, mut rx) = channel();
        assert!(tx.enqueue(1));
        assert!(tx.enqueue(2));
        tx.close();
        assert!(!tx.enqueue(3));

        assert_eq!(poll_now(&mut rx), Poll::Ready(Some(1)));
        assert_eq!(poll_now(&mut rx), Poll::Ready(Some(2)));
        assert_eq!(poll_now(&mut rx), Poll::Ready(None));
        assert_eq!(poll_now(&mut rx), Poll::Ready(None));
    }

    #[test]
    fn test_open_empty_channel_is_pending() {
        let (tx, mut rx) = channel::<u8>();
        assert_eq!(poll_now(&mut rx), Poll::Pending);
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.enqueue(1));
    }
}
