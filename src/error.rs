//! Node error types.
//!
//! [`NodeError`] is the error surfaced by packet dispatch, node setup and
//! configuration. The narrower types ([`CodecError`], [`StoreError`],
//! [`PipeError`]) stay in their own layers: services log them and keep
//! serving. Only [`ListenerError`] converts into [`NodeError`].

/// Failure returned by an event handler.
///
/// Handlers signal failure by returning `Err(ListenerError)`. When the
/// emitting source has an `"error"` listener the failure is re-emitted
/// there; otherwise it propagates to the caller of `emit`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("listener failed: {message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    /// Creates a new listener failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Payload codec failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The format string contains a tag the codec does not know.
    #[error("unknown format tag: {0}")]
    UnknownTag(String),

    /// The payload ended before every field of the format was read.
    #[error("payload truncated while reading `{tag}`")]
    Truncated {
        /// Tag being decoded when the payload ran out.
        tag: String,
    },

    /// A value does not fit the width of its tag.
    #[error("value {value} out of range for `{tag}`")]
    OutOfRange {
        /// Tag the value was packed with.
        tag: String,
        /// Offending value.
        value: i64,
    },

    /// A value's kind does not match its tag (e.g. bytes for `u8`).
    #[error("value kind does not match tag `{0}`")]
    Mismatch(String),

    /// Fewer or more values than the format declares.
    #[error("format expects {expected} values, got {actual}")]
    Arity {
        /// Number of fields in the format.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

/// Persistent settings store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The backing file was written with an unsupported snapshot version.
    #[error("unsupported store snapshot version {0}")]
    Version(u32),
}

/// Response pipe failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// The request payload does not start with a pipe descriptor.
    #[error("malformed pipe descriptor: {0}")]
    Descriptor(#[from] CodecError),
}

/// Top-level node error.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// An event handler failed and no `"error"` listener absorbed it.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Every service index on the node is taken.
    #[error("no free service index (limit {0})")]
    ServiceLimit(usize),
}
