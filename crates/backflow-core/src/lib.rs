//! # `Backflow` Core
//!
//! Backpressure-aware reactive stream core: the bridge between an arbitrary,
//! possibly multi-threaded push producer and a single consumer that signals
//! bounded demand.
//!
//! This crate provides:
//! - **Emitters**: five overflow policies (`Missing`, `Error`, `Drop`, `Latest`, `Buffer`)
//! - **Serialization**: lock-free queue-drain wrapper for concurrent producers
//! - **Demand**: atomic outstanding-request counter with an unbounded sentinel
//! - **Disposables**: exactly-once cleanup of producer resources
//! - **Composite errors**: de-duplicated aggregation of racing failures
//! - **Time**: unit normalization, clock drift, virtual clocks
//!
//! ## Design Principles
//!
//! 1. **No locks across consumer callbacks** - consumers may re-enter producers
//! 2. **Exactly one terminal signal** - everything else goes to the undeliverable sink
//! 3. **Never throw across threads** - protocol violations become signals
//!
//! ## Example
//!
//! ```rust,ignore
//! use backflow_core::{BackpressureStrategy, EmitterConfig, Flow};
//! use backflow_core::testing::TestSubscriber;
//!
//! let flow = Flow::create(EmitterConfig::new(BackpressureStrategy::Buffer), |emitter| {
//!     emitter.on_next(1);
//!     emitter.on_complete();
//!     Ok(())
//! });
//!
//! let subscriber = Arc::new(TestSubscriber::unbounded());
//! flow.subscribe(subscriber.clone());
//! subscriber.assert_result(&[1]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)] // Allowed per module where the lock-free slots need it
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod composite;
pub mod demand;
pub mod disposable;
pub mod emitter;
pub mod error;
pub mod failure;
pub mod flow;
pub mod hooks;
pub mod protocol;
pub mod testing;
pub mod time;

// Re-export key types
pub use composite::CompositeError;
pub use demand::{Demand, UNBOUNDED};
pub use disposable::{Disposable, SerialDisposable};
pub use emitter::{
    BackpressureStrategy, BufferOverflow, Emitter, EmitterConfig, FlowEmitter, SerializedEmitter,
};
pub use failure::Failure;
pub use flow::Flow;
pub use hooks::{UndeliverableHook, UndeliverableSink};
pub use protocol::{Signal, Subscriber, Subscription};
pub use time::{compute_clock_drift, TimeUnit};

/// Result type for backflow-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for backflow-core setup and usage
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid emitter configuration
    #[error("Configuration error: {0}")]
    Config(#[from] error::ConfigError),

    /// A composite error needs at least one cause
    #[error("errors is empty")]
    EmptyComposite,
}
