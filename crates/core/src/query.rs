//! Entry points: replay sequences or channels through queries under one clock.
//!
//! ```
//! use tickreplay::{query_seqs, ChainParser, OperatorRegistry, Query, ReplayOptions};
//!
//! let options = ReplayOptions::new()
//!     .with_timestamp(|e: &(u64, &str)| e.0)
//!     .with_payload(|(_, v): (u64, &str)| v);
//! let inputs = vec![(Query::text("abc"), Some(vec![(1, "a"), (3, "c")]))];
//! let mut replay = query_seqs(inputs, options, &ChainParser, &OperatorRegistry::with_builtins())?;
//!
//! let records: Vec<_> = replay.take("abc").unwrap().collect::<Result<_, _>>()?;
//! assert_eq!(records.iter().map(|r| (r.timestamp, r.value)).collect::<Vec<_>>(), vec![(1, "a"), (3, "c")]);
//! # Ok::<(), tickreplay::ReplayError>(())
//! ```

use std::{collections::BTreeMap, iter::FusedIterator, rc::Rc, task::Poll};

use futures::StreamExt;

use crate::{
    binder::{self, ReplayContext, Resolver},
    channel::Source,
    clock::{Time, VirtualClock},
    descriptor::{DescriptorParser, Query},
    feeder::{defer_source, sequence_source, PayloadFn, TimestampFn},
    operators::TransformEngine,
    sequencer::{Record, Records},
    ReplayError,
};

/// Produces a passive sequence for a source pattern.
pub type SeqGenerator<E> = Rc<dyn Fn(&str) -> anyhow::Result<Box<dyn Iterator<Item = E>>>>;

/// Produces a channel for a source pattern.
pub type StreamGenerator<E> = Rc<dyn Fn(&str) -> anyhow::Result<Source<E>>>;

/// Options recognized by the entry points.
///
/// `E` is the element type of inputs, `T` the payload type delivered to the
/// transform engine.
pub struct ReplayOptions<E, T> {
    pub(crate) clock: Option<VirtualClock>,
    pub(crate) timestamp: Option<TimestampFn<E>>,
    pub(crate) payload: PayloadFn<E, T>,
    pub(crate) period: Option<Time>,
    pub(crate) stream_generator: Option<StreamGenerator<E>>,
    pub(crate) seq_generator: Option<SeqGenerator<E>>,
}

impl<T: 'static> ReplayOptions<T, T> {
    /// Options with an identity payload.
    pub fn new() -> Self {
        Self {
            clock: None,
            timestamp: None,
            payload: Rc::new(|element: T| element),
            period: None,
            stream_generator: None,
            seq_generator: None,
        }
    }
}

impl<T: 'static> Default for ReplayOptions<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static, T: 'static> ReplayOptions<E, T> {
    /// Drives the replay with an externally owned clock.
    pub fn with_clock(mut self, clock: VirtualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Fn(&E) -> Time + 'static) -> Self {
        self.timestamp = Some(Rc::new(timestamp));
        self
    }

    pub fn with_payload<U: 'static>(self, payload: impl Fn(E) -> U + 'static) -> ReplayOptions<E, U> {
        ReplayOptions {
            clock: self.clock,
            timestamp: self.timestamp,
            payload: Rc::new(payload),
            period: self.period,
            stream_generator: self.stream_generator,
            seq_generator: self.seq_generator,
        }
    }

    /// Default period forwarded to periodic operators.
    pub fn with_period(mut self, period: Time) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_stream_generator(
        mut self,
        generator: impl Fn(&str) -> anyhow::Result<Source<E>> + 'static,
    ) -> Self {
        self.stream_generator = Some(Rc::new(generator));
        self
    }

    pub fn with_seq_generator<I>(
        mut self,
        generator: impl Fn(&str) -> anyhow::Result<I> + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = E>,
        I::IntoIter: 'static,
    {
        self.seq_generator = Some(Rc::new(
            move |pattern: &str| -> anyhow::Result<Box<dyn Iterator<Item = E>>> {
                let iter: Box<dyn Iterator<Item = E>> = Box::new(generator(pattern)?.into_iter());
                Ok(iter)
            },
        ));
        self
    }

    pub fn period(&self) -> Option<Time> {
        self.period
    }

    fn clock_or_default(&self) -> VirtualClock {
        self.clock.clone().unwrap_or_default()
    }

    /// Converts an input channel into payload traffic on `clock`.
    fn prepare_source(&self, clock: &VirtualClock, source: Source<E>) -> Source<T> {
        match &self.timestamp {
            Some(timestamp) => defer_source(clock, source, timestamp.clone(), self.payload.clone()),
            None => {
                let payload = self.payload.clone();
                source.map(move |element| payload(element)).boxed_local()
            }
        }
    }

    /// Builds the resolver serving patterns that have no explicit input.
    fn resolver(&self, clock: &VirtualClock) -> Option<Resolver<T>> {
        if let (Some(generator), Some(timestamp)) = (&self.seq_generator, &self.timestamp) {
            let (generator, timestamp) = (generator.clone(), timestamp.clone());
            let payload = self.payload.clone();
            let clock = clock.clone();
            let resolver: Resolver<T> = Rc::new(move |pattern: &str| -> Result<Source<T>, ReplayError> {
                let sequence = generator(pattern).map_err(|source| ReplayError::Generator {
                    pattern: pattern.to_owned(),
                    source,
                })?;
                Ok(sequence_source(&clock, sequence, timestamp.clone(), payload.clone()))
            });
            return Some(resolver);
        }
        if let Some(generator) = &self.stream_generator {
            let generator = generator.clone();
            let timestamp = self.timestamp.clone();
            let payload = self.payload.clone();
            let clock = clock.clone();
            let resolver: Resolver<T> = Rc::new(move |pattern: &str| -> Result<Source<T>, ReplayError> {
                let source = generator(pattern).map_err(|source| ReplayError::Generator {
                    pattern: pattern.to_owned(),
                    source,
                })?;
                Ok(match &timestamp {
                    Some(timestamp) => {
                        defer_source(&clock, source, timestamp.clone(), payload.clone())
                    }
                    None => {
                        let payload = payload.clone();
                        source.map(move |element| payload(element)).boxed_local()
                    }
                })
            });
            return Some(resolver);
        }
        None
    }

    fn context(&self, clock: &VirtualClock) -> ReplayContext<T> {
        ReplayContext::new(clock.clone())
            .with_period(self.period)
            .with_resolver(self.resolver(clock))
    }
}

/// Replays passive sequences through queries on a fresh (or supplied) clock.
///
/// Every sequence, explicit or produced by the seq-generator, is fed onto the
/// clock at its elements' timestamps. Fails with
/// [`ReplayError::MissingTimestamp`] before anything is created when no
/// `timestamp` option is set.
pub fn query_seqs<E, T, I, Q>(
    inputs: Q,
    options: ReplayOptions<E, T>,
    parser: &dyn DescriptorParser,
    engine: &dyn TransformEngine<T>,
) -> Result<Replay<T>, ReplayError>
where
    E: 'static,
    T: 'static,
    I: IntoIterator<Item = E>,
    I::IntoIter: 'static,
    Q: IntoIterator<Item = (Query<T>, Option<I>)>,
{
    let timestamp = options
        .timestamp
        .clone()
        .ok_or(ReplayError::MissingTimestamp)?;
    let planned = binder::plan(inputs, parser)?;

    let clock = options.clock_or_default();
    let planned = planned
        .into_iter()
        .map(|p| {
            p.map_input(|sequence| {
                sequence_source(&clock, sequence, timestamp.clone(), options.payload.clone())
            })
        })
        .collect();
    let ctx = options.context(&clock);
    let outputs = binder::bind(planned, &ctx, engine)?;
    tracing::debug!(queries = outputs.len(), "Sequence replay bound");
    Ok(Replay::new(clock, outputs))
}

/// Replays channels through queries.
///
/// With a `timestamp` option every input channel and every generated channel is
/// deferred onto the clock at its elements' timestamps; without one, channel
/// traffic is expected to be produced by callbacks of the supplied clock.
pub fn query_channels<E, T, Q>(
    inputs: Q,
    options: ReplayOptions<E, T>,
    parser: &dyn DescriptorParser,
    engine: &dyn TransformEngine<T>,
) -> Result<Replay<T>, ReplayError>
where
    E: 'static,
    T: 'static,
    Q: IntoIterator<Item = (Query<T>, Option<Source<E>>)>,
{
    let planned = binder::plan(inputs, parser)?;
    let clock = options.clock_or_default();
    let planned = planned
        .into_iter()
        .map(|p| p.map_input(|source| options.prepare_source(&clock, source)))
        .collect();
    let ctx = options.context(&clock);
    let outputs = binder::bind(planned, &ctx, engine)?;
    tracing::debug!(queries = outputs.len(), "Channel replay bound");
    Ok(Replay::new(clock, outputs))
}

/// Result sequences of one invocation, all driven by the same clock.
pub struct Replay<T> {
    clock: VirtualClock,
    records: BTreeMap<String, Records<T>>,
}

impl<T> Replay<T> {
    fn new(clock: VirtualClock, outputs: Vec<(String, Source<T>)>) -> Self {
        let mut records = BTreeMap::new();
        for (key, source) in outputs {
            // Duplicate keys: the last binding wins.
            let sequence = Records::new(key.clone(), clock.clone(), source);
            records.insert(key, sequence);
        }
        Self { clock, records }
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Removes and returns the result sequence for `key`.
    pub fn take(&mut self, key: &str) -> Option<Records<T>> {
        self.records.remove(key)
    }

    pub fn into_records(self) -> BTreeMap<String, Records<T>> {
        self.records
    }

    /// All remaining sequences interleaved in global clock order.
    pub fn merged(self) -> Merged<T> {
        Merged {
            clock: self.clock,
            records: self.records.into_values().collect(),
        }
    }
}

impl<T> std::fmt::Debug for Replay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replay")
            .field("clock", &self.clock)
            .field("keys", &self.records.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over `(key, record)` pairs of every query, in the order the clock
/// made them observable.
pub struct Merged<T> {
    clock: VirtualClock,
    records: Vec<Records<T>>,
}

impl<T> Iterator for Merged<T> {
    type Item = Result<(String, Record<T>), ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut open = false;
            for sequence in self.records.iter_mut() {
                match sequence.poll_ready() {
                    Poll::Ready(Some(record)) => {
                        return Some(Ok((sequence.key().to_owned(), record)));
                    }
                    Poll::Ready(None) => {}
                    Poll::Pending => open = true,
                }
            }
            if !open {
                return None;
            }
            match self.clock.advance() {
                Ok(true) => {}
                Ok(false) => {
                    self.records.iter_mut().for_each(Records::finish);
                    return None;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<T> FusedIterator for Merged<T> {}
