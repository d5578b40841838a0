//! Producer-facing emitters.
//!
//! An [`Emitter`] bridges a push producer to one demand-driven consumer. Its
//! [`BackpressureStrategy`] decides what happens to values the consumer has
//! not requested yet:
//!
//! | Strategy | No demand |
//! |----------|-----------|
//! | `Missing` | deliver anyway |
//! | `Error`   | fail with `MissingBackpressure` |
//! | `Drop`    | discard the value |
//! | `Latest`  | keep only the newest pending value |
//! | `Buffer`  | queue it (optionally bounded, see [`BufferOverflow`]) |
//!
//! A plain emitter expects its producer calls to be serial. For concurrent
//! producers, [`FlowEmitter::serialize`] wraps it in a lock-free
//! [`SerializedEmitter`].

mod config;
mod policy;
mod serialized;
mod terminal;

pub use self::config::{
    BackpressureStrategy, BufferOverflow, EmitterConfig, EmitterConfigBuilder, OverflowCallback,
    DEFAULT_CAPACITY_HINT,
};
pub use self::policy::Emitter;
pub use self::serialized::SerializedEmitter;

use std::sync::Arc;

use crate::disposable::{Cancellable, Disposable};
use crate::failure::Failure;

/// The producer-facing emission API.
///
/// Protocol violations (signals after a terminal) are never returned to the
/// caller; they are reported to the emitter's undeliverable sink.
pub trait FlowEmitter<T>: Send + Sync {
    /// Emits a value, subject to the overflow strategy.
    fn on_next(&self, value: T);

    /// Terminates with an error.
    ///
    /// If the error cannot be delivered it is reported as undeliverable.
    fn on_error(&self, error: Failure);

    /// Terminates with an error if still possible.
    ///
    /// Returns `false`, without reporting, when the subscription already
    /// terminated or was cancelled.
    fn try_on_error(&self, error: Failure) -> bool;

    /// Terminates successfully.
    fn on_complete(&self);

    /// Attaches a resource released on cancellation or termination,
    /// disposing any previously attached one.
    fn set_disposable(&self, resource: Arc<dyn Disposable>);

    /// Attaches a cancel action, run once on cancellation or termination.
    fn set_cancellable(&self, cancellable: Cancellable);

    /// Returns `true` once the consumer cancelled or the stream terminated.
    fn is_cancelled(&self) -> bool;

    /// Current outstanding demand; [`UNBOUNDED`](crate::UNBOUNDED) when the
    /// consumer accepts everything.
    fn requested(&self) -> u64;

    /// Returns an emitter safe for concurrent producers.
    ///
    /// Serializing an already serialized emitter returns the same emitter.
    fn serialize(&self) -> SerializedEmitter<T>;
}
