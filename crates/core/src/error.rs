use crate::{clock::Time, descriptor::ParseError};

/// Errors surfaced by binding and replaying queries.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("the `timestamp` option is required for sequence-driven replay")]
    MissingTimestamp,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("no input or stream generator available for pattern `{0}`")]
    NoGenerator(String),
    #[error("stream generator failed for pattern `{pattern}`")]
    Generator {
        pattern: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
    #[error("invalid arguments for operator `{op}`: {reason}")]
    InvalidArguments { op: String, reason: String },
    #[error("transform `{key}` failed")]
    Transform {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("callback scheduled at t={time} failed")]
    Callback {
        time: Time,
        #[source]
        source: anyhow::Error,
    },
}
