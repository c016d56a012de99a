//! Error taxonomy for the transport and wire-protocol core.
//!
//! A malformed frame is a [`CoreError::Protocol`], a dead socket is a
//! [`CoreError::Io`], a local `request` timeout is [`CoreError::Timeout`]
//! and never tears down the link, and misuse of a closed or not-yet-open
//! transport is [`CoreError::State`].

use thiserror::Error;

/// Abbreviation of `Result<T, CoreError>`.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// A list specifying categories of [`CoreError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed frame, unknown type byte, version mismatch, or illegal
    /// sub-type discriminator. Fatal to the link.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket failure, short read, or closed endpoint. Fatal to the link;
    /// triggers failover if a failover layer is present.
    #[error("transport I/O error")]
    Io {
        /// The causing error.
        #[from]
        source: std::io::Error,
    },

    /// A `request` call exceeded its timeout. Local; does not tear down
    /// the link.
    #[error("no valid response received within the requested timeout")]
    Timeout,

    /// `request`/`oneway` was attempted on a closed or not-yet-started
    /// transport, or some other illegal state transition was attempted.
    #[error("illegal state: {0}")]
    State(&'static str),

    /// Application-layer message format error, passed through unchanged.
    #[error("message format error: {0}")]
    MessageFormat(String),

    /// The transport (or correlator) was torn down while this operation
    /// was outstanding; carries the error that caused the teardown.
    #[error("transport interrupted: {0}")]
    Interrupted(String),

    /// Every candidate URI was exhausted without establishing a
    /// connection, or `maxReconnectAttempts`/`startupMaxReconnectAttempts`
    /// was exceeded.
    #[error("failover exhausted: {0}")]
    FailoverExhausted(String),

    /// Erroneous failover/connect URI, e.g. an unknown scheme or option.
    #[error("invalid connection parameters: {0}")]
    ConnParams(String),
}

impl CoreError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        CoreError::Protocol(msg.into())
    }

    /// The synthetic `ExceptionResponse` exception class used by the
    /// correlator's prior-error latch, preserved as `"java.io.IOException"`
    /// for wire compatibility with peers that expect the original
    /// broker's exception naming.
    pub fn as_wire_exception_class(&self) -> &'static str {
        match self {
            CoreError::Io { .. } | CoreError::Interrupted(_) => "java.io.IOException",
            CoreError::Protocol(_) => "java.io.IOException",
            CoreError::Timeout => "java.util.concurrent.TimeoutException",
            CoreError::State(_) => "java.lang.IllegalStateException",
            CoreError::MessageFormat(_) => "javax.jms.MessageFormatException",
            CoreError::FailoverExhausted(_) => "java.io.IOException",
            CoreError::ConnParams(_) => "java.lang.IllegalArgumentException",
        }
    }

    /// Clones the error into a cheaply-shareable copy used to fan the
    /// same prior-error out to every outstanding future.
    pub(crate) fn shallow_clone(&self) -> Self {
        match self {
            CoreError::Io { source } => CoreError::Io {
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            CoreError::Protocol(s) => CoreError::Protocol(s.clone()),
            CoreError::Timeout => CoreError::Timeout,
            CoreError::State(s) => CoreError::State(s),
            CoreError::MessageFormat(s) => CoreError::MessageFormat(s.clone()),
            CoreError::Interrupted(s) => CoreError::Interrupted(s.clone()),
            CoreError::FailoverExhausted(s) => CoreError::FailoverExhausted(s.clone()),
            CoreError::ConnParams(s) => CoreError::ConnParams(s.clone()),
        }
    }
}
