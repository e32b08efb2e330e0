//! Turns passive sequences and caller-fed channels into clock-driven traffic.
//!
//! A feeder holds a cursor over its input and keeps exactly one callback in
//! flight: the element it pulled last, scheduled at that element's timestamp.
//! Firing it enqueues the payload and pulls the next element. Once the input is
//! exhausted the target channel is closed one tick after the last element, at
//! the lowest priority, so every same-tick consumer runs before the drain.

use std::{rc::Rc, task::Poll};

use crate::{
    channel::{self, poll_now, Sender, Source},
    clock::{Time, VirtualClock, LOWEST_PRIORITY},
};

/// Maps an element to the logical time it is delivered at.
pub type TimestampFn<E> = Rc<dyn Fn(&E) -> Time>;

/// Maps an element to the value actually transmitted.
pub type PayloadFn<E, T> = Rc<dyn Fn(E) -> T>;

type Cursor<E> = Box<dyn FnMut() -> Poll<Option<E>>>;

struct Feeder<E, T> {
    cursor: Cursor<E>,
    timestamp: TimestampFn<E>,
    payload: PayloadFn<E, T>,
    target: Sender<T>,
}

impl<E: 'static, T: 'static> Feeder<E, T> {
    fn schedule_next(mut self, clock: &VirtualClock) {
        if self.target.is_closed() {
            tracing::debug!(now = clock.now(), "Consumer gone, feeder stops");
            return;
        }
        match (self.cursor)() {
            Poll::Ready(Some(element)) => {
                let at = (self.timestamp)(&element);
                clock.invoke_at(at, move |clock| {
                    let value = (self.payload)(element);
                    self.target.enqueue(value);
                    self.schedule_next(clock);
                    Ok(())
                });
            }
            Poll::Ready(None) => {
                let at = clock.now().saturating_add(1);
                let target = self.target;
                tracing::trace!(close_at = at, "Input exhausted, scheduling close");
                clock.invoke_at_with_priority(at, LOWEST_PRIORITY, move |_| {
                    target.close();
                    Ok(())
                });
            }
            Poll::Pending => {
                // Nothing ready yet; whatever feeds the input can only run
                // inside a tick, so look again once the next one has fired.
                clock.on_next_tick(move |clock| {
                    self.schedule_next(clock);
                    Ok(())
                });
            }
        }
    }
}

/// Feeds a lazy sequence into `target`, one element per clock tick.
pub fn feed_sequence<I, E, T>(
    clock: &VirtualClock,
    sequence: I,
    timestamp: TimestampFn<E>,
    payload: PayloadFn<E, T>,
    target: Sender<T>,
) where
    I: IntoIterator<Item = E>,
    I::IntoIter: 'static,
    E: 'static,
    T: 'static,
{
    let mut iter = sequence.into_iter();
    let feeder = Feeder {
        cursor: Box::new(move || Poll::Ready(iter.next())),
        timestamp,
        payload,
        target,
    };
    feeder.schedule_next(clock);
}

/// Creates a channel fed from `sequence` and returns its consuming side.
pub fn sequence_source<I, E, T>(
    clock: &VirtualClock,
    sequence: I,
    timestamp: TimestampFn<E>,
    payload: PayloadFn<E, T>,
) -> Source<T>
where
    I: IntoIterator<Item = E>,
    I::IntoIter: 'static,
    E: 'static,
    T: 'static,
{
    let (tx, rx) = channel::channel();
    feed_sequence(clock, sequence, timestamp, payload, tx);
    rx
}

/// Re-schedules the traffic of an existing channel onto the clock.
///
/// Every element read from `source` is delivered at `timestamp(element)`, so
/// channels fed directly by a caller obey the same virtual-time discipline as
/// sequence-fed ones.
pub fn defer_source<E, T>(
    clock: &VirtualClock,
    mut source: Source<E>,
    timestamp: TimestampFn<E>,
    payload: PayloadFn<E, T>,
) -> Source<T>
where
    E: 'static,
    T: 'static,
{
    let (tx, rx) = channel::channel();
    let feeder = Feeder {
        cursor: Box::new(move || poll_now(&mut source)),
        timestamp,
        payload,
        target: tx,
    };
    feeder.schedule_next(clock);
    rx
}
