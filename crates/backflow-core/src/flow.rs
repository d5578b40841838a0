//! Cold publisher backed by a producer callback.
//!
//! Every [`Flow::subscribe`] call builds a fresh [`Emitter`] for the
//! configured strategy, hands its subscription to the consumer, then runs
//! the source with the emitter. A source error is signalled through
//! `on_error`; a panicking source is caught and signalled as
//! [`SourcePanic`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::emitter::{Emitter, EmitterConfig, FlowEmitter};
use crate::error::SourcePanic;
use crate::failure::Failure;
use crate::protocol::Subscriber;

type Source<T> = dyn Fn(Emitter<T>) -> Result<(), Failure> + Send + Sync;

/// A stream created from a producer callback.
pub struct Flow<T> {
    config: EmitterConfig,
    source: Arc<Source<T>>,
}

impl<T: Send + 'static> Flow<T> {
    /// Creates a flow running `source` once per subscriber.
    #[must_use]
    pub fn create<F>(config: EmitterConfig, source: F) -> Self
    where
        F: Fn(Emitter<T>) -> Result<(), Failure> + Send + Sync + 'static,
    {
        Self {
            config,
            source: Arc::new(source),
        }
    }

    /// Subscribes `subscriber` and runs the source on the calling thread.
    ///
    /// The source may hand the emitter to other threads and return early;
    /// the subscription stays live until a terminal signal or a cancel.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let emitter = Emitter::new(&self.config, Arc::clone(&subscriber));
        subscriber.on_subscribe(emitter.subscription());

        let handle = emitter.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.source)(handle)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => emitter.on_error(error),
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::warn!(panic = %msg, "flow source panicked");
                emitter.on_error(Failure::new(SourcePanic(msg)));
            }
        }
    }

    /// The emitter configuration used for each subscription.
    #[must_use]
    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("strategy", &self.config.strategy)
            .finish_non_exhaustive()
    }
}
