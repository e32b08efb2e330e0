//! Reads the next observable value of one channel, advancing time as needed.

use std::task::{Context, Poll};

use futures::{task::noop_waker_ref, FutureExt, StreamExt};

use crate::{channel::Source, clock::VirtualClock, ReplayError};

/// Outcome of one advancer step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Value(T),
    /// The channel will never produce again.
    Drained,
}

impl<T> Step<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Step::Value(value) => Some(value),
            Step::Drained => None,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, Step::Drained)
    }
}

/// Advances `clock` one tick at a time until `source` yields a value or drains.
///
/// A value that is already queued is returned without advancing. The pending
/// read is re-checked after every single tick, so the clock never moves past
/// the tick that satisfied it. If the clock runs out of ticks first, nothing can
/// feed the channel any more and it is reported as drained.
pub fn advance_until_ready<T>(
    clock: &VirtualClock,
    source: &mut Source<T>,
) -> Result<Step<T>, ReplayError> {
    let mut cx = Context::from_waker(noop_waker_ref());
    let mut pending = source.next();
    loop {
        if let Poll::Ready(item) = pending.poll_unpin(&mut cx) {
            return Ok(item.map_or(Step::Drained, Step::Value));
        }
        if !clock.advance()? {
            tracing::debug!(
                now = clock.now(),
                "Clock exhausted before the read resolved, treating channel as drained"
            );
            return Ok(Step::Drained);
        }
    }
}
