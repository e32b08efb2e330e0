//! Deterministic replay of timestamped data through stream transforms.
//!
//! Inputs are placed on a shared [`VirtualClock`] at their elements' timestamps,
//! bound to transform descriptors, and read back as lazy [`Records`] sequences
//! that advance logical time only as far as each read requires.

/// Shared evaluation scope and query binding.
pub mod binder;

/// Unbounded single-consumer channels used between replay stages.
pub mod channel;

/// Virtual clock and deterministic task queue.
pub mod clock;

/// Replay configuration files and logger setup.
pub mod config;

/// Query descriptors and the default chain parser.
pub mod descriptor;

mod advancer;
mod error;
mod feeder;

/// Transform engine seam and built-in operators.
pub mod operators;

mod query;
mod sequencer;

#[cfg(feature = "trace")]
pub mod tracer;

pub use advancer::{advance_until_ready, Step};
pub use binder::ReplayContext;
pub use channel::{channel, from_iter, Sender, Source};
pub use clock::{ClockConfig, TaskId, Tick, Time, VirtualClock, DEFAULT_PRIORITY, LOWEST_PRIORITY};
pub use config::{set_logger, ConfigError, ReplayConfig};
pub use descriptor::{ChainParser, Descriptor, DescriptorParser, OpCall, ParseError, Query};
pub use error::ReplayError;
pub use feeder::{defer_source, feed_sequence, sequence_source, PayloadFn, TimestampFn};
pub use operators::{OperatorRegistry, TransformEngine};
pub use query::{
    query_channels, query_seqs, Merged, Replay, ReplayOptions, SeqGenerator, StreamGenerator,
};
pub use sequencer::{Record, Records};
