//! Error kinds raised by the stream core.
//!
//! Signal-level errors (overflow, protocol violations) travel to consumers
//! inside a [`Failure`](crate::Failure); setup errors are returned directly.

use crate::emitter::BackpressureStrategy;

/// Message used when a value could not be emitted for lack of demand.
pub const MISSING_REQUESTS_MESSAGE: &str = "create: could not emit value due to lack of requests";

/// A value was produced while the consumer had no outstanding demand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MissingBackpressure {
    message: String,
}

impl MissingBackpressure {
    /// Creates the error with a custom message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error raised by emitters that ran out of requests.
    #[must_use]
    pub fn lack_of_requests() -> Self {
        Self::new(MISSING_REQUESTS_MESSAGE)
    }
}

/// A call sequence that breaks the subscriber protocol.
///
/// These are never returned to the producer; they are delivered as the
/// terminal error or reported as undeliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// `request(n)` with a non-positive amount.
    #[error("n > 0 required but it was {0}")]
    NonPositiveRequest(u64),

    /// A value was emitted after the producer's own terminal signal.
    #[error("onNext called after a terminal signal")]
    NextAfterTerminal,

    /// `on_complete` was called after a terminal signal.
    #[error("onComplete called after a terminal signal")]
    CompleteAfterTerminal,

    /// `on_subscribe` was called more than once.
    #[error("Subscription already set!")]
    DuplicateSubscription,

    /// A signal arrived before `on_subscribe`.
    #[error("signal received before onSubscribe")]
    SignalBeforeSubscribe,
}

/// Placeholder substituted for an absent cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NullCause {
    /// The whole cause collection was absent.
    #[error("errors was null")]
    Collection,

    /// One element of the cause collection was absent.
    #[error("Throwable was null!")]
    Element,
}

/// The producer callback of a flow panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("source panicked: {0}")]
pub struct SourcePanic(pub String);

/// Emitter configuration errors, raised at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A bounded buffer was configured with zero capacity.
    #[error("capacity > 0 required but it was {0}")]
    NonPositiveCapacity(usize),

    /// A capacity bound only applies to the buffer strategy.
    #[error("capacity is only supported by the Buffer strategy, not {0:?}")]
    CapacityWithoutBuffer(BackpressureStrategy),
}
