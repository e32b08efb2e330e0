//! Lazy, timestamped result sequences.

use std::{iter::FusedIterator, task::Poll};

use serde::{Deserialize, Serialize};

use crate::{
    advancer::{advance_until_ready, Step},
    channel::{poll_now, Source},
    clock::{Time, VirtualClock},
    ReplayError,
};

/// A value observed on an output channel together with the logical time it
/// was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    pub timestamp: Time,
    pub value: T,
}

/// Result sequence of one query.
///
/// Each call to `next` drives the shared clock just far enough to observe one
/// more value. Because every query of an invocation shares the clock, pulling
/// one sequence may also advance time on behalf of the others.
pub struct Records<T> {
    key: String,
    clock: VirtualClock,
    source: Source<T>,
    done: bool,
}

impl<T> Records<T> {
    pub(crate) fn new(key: String, clock: VirtualClock, source: Source<T>) -> Self {
        Self {
            key,
            clock,
            source,
            done: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Returns a record only if one is observable without advancing the clock.
    pub(crate) fn poll_ready(&mut self) -> Poll<Option<Record<T>>> {
        if self.done {
            return Poll::Ready(None);
        }
        match poll_now(&mut self.source) {
            Poll::Ready(Some(value)) => Poll::Ready(Some(Record {
                timestamp: self.clock.now(),
                value,
            })),
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    pub(crate) fn finish(&mut self) {
        if !self.done {
            tracing::debug!(key = %self.key, now = self.clock.now(), "Result sequence drained");
            self.done = true;
        }
    }
}

impl<T> Iterator for Records<T> {
    type Item = Result<Record<T>, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match advance_until_ready(&self.clock, &mut self.source) {
            Ok(Step::Value(value)) => Some(Ok(Record {
                timestamp: self.clock.now(),
                value,
            })),
            Ok(Step::Drained) => {
                self.finish();
                None
            }
            // The failed tick is already consumed; the next pull resumes the clock.
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Tick failed while reading");
                Some(Err(err))
            }
        }
    }
}

impl<T> FusedIterator for Records<T> {}

impl<T> std::fmt::Debug for Records<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("key", &self.key)
            .field("done", &self.done)
            .finish()
    }
}
