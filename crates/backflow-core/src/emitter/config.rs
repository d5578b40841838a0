//! Emitter configuration types.
//!
//! This module defines the overflow strategies and the configuration used
//! to build an [`Emitter`](super::Emitter).

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::failure::Failure;
use crate::hooks::{default_sink, UndeliverableSink};

/// Default initial capacity of unbounded buffers.
pub const DEFAULT_CAPACITY_HINT: usize = 128;

/// What an emitter does with values the consumer has not asked for.
///
/// The set is closed; delivery decisions match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureStrategy {
    /// Deliver regardless of demand.
    ///
    /// The producer takes full responsibility for not overwhelming the
    /// consumer.
    Missing,

    /// Deliver while demand lasts, then fail with
    /// [`MissingBackpressure`](crate::error::MissingBackpressure).
    Error,

    /// Deliver while demand lasts, silently discard the rest.
    Drop,

    /// Keep only the most recent undelivered value.
    Latest,

    /// Queue every value until the consumer asks for it.
    ///
    /// Optionally bounded; see [`BufferOverflow`].
    #[default]
    Buffer,
}

/// What a bounded buffer does when a value arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferOverflow {
    /// Fail the subscription with a backpressure error.
    #[default]
    Error,

    /// Evict the oldest buffered value, then enqueue the new one.
    DropOldest,

    /// Evict the newest buffered value, then enqueue the new one.
    DropLatest,
}

/// Callback run once per eviction from a bounded buffer.
pub type OverflowCallback = Arc<dyn Fn() -> Result<(), Failure> + Send + Sync>;

/// Configuration for an emitter.
#[derive(Clone)]
pub struct EmitterConfig {
    /// Overflow strategy.
    pub strategy: BackpressureStrategy,

    /// Buffer bound; `None` means unbounded. Only valid for `Buffer`.
    pub capacity: Option<NonZeroUsize>,

    /// Behavior of a full bounded buffer.
    pub overflow: BufferOverflow,

    /// Called once per eviction from a bounded buffer.
    pub on_overflow: Option<OverflowCallback>,

    /// Initial allocation for buffers.
    pub capacity_hint: usize,

    /// Receives errors that cannot reach the consumer.
    pub sink: Arc<dyn UndeliverableSink>,

    /// Name of the emitter (for logging).
    pub name: Option<String>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::default(),
            capacity: None,
            overflow: BufferOverflow::default(),
            on_overflow: None,
            capacity_hint: DEFAULT_CAPACITY_HINT,
            sink: default_sink(),
            name: None,
        }
    }
}

impl EmitterConfig {
    /// Creates a configuration for `strategy` with default settings.
    #[must_use]
    pub fn new(strategy: BackpressureStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> EmitterConfigBuilder {
        EmitterConfigBuilder::default()
    }

    /// Returns `true` if the buffer has a capacity bound.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.capacity.is_some()
    }
}

impl fmt::Debug for EmitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitterConfig")
            .field("strategy", &self.strategy)
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow)
            .field("on_overflow", &self.on_overflow.is_some())
            .field("capacity_hint", &self.capacity_hint)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder for `EmitterConfig`.
#[derive(Default)]
pub struct EmitterConfigBuilder {
    strategy: Option<BackpressureStrategy>,
    capacity: Option<usize>,
    overflow: Option<BufferOverflow>,
    on_overflow: Option<OverflowCallback>,
    capacity_hint: Option<usize>,
    sink: Option<Arc<dyn UndeliverableSink>>,
    name: Option<String>,
}

impl EmitterConfigBuilder {
    /// Sets the overflow strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: BackpressureStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Bounds the buffer.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the behavior of a full bounded buffer.
    #[must_use]
    pub fn overflow(mut self, overflow: BufferOverflow) -> Self {
        self.overflow = Some(overflow);
        self
    }

    /// Sets the per-eviction callback.
    #[must_use]
    pub fn on_overflow<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<(), Failure> + Send + Sync + 'static,
    {
        self.on_overflow = Some(Arc::new(callback));
        self
    }

    /// Sets the initial buffer allocation.
    #[must_use]
    pub fn capacity_hint(mut self, hint: usize) -> Self {
        self.capacity_hint = Some(hint);
        self
    }

    /// Sets the undeliverable-error sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn UndeliverableSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Names the emitter.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonPositiveCapacity`] for a zero capacity and
    /// [`ConfigError::CapacityWithoutBuffer`] when a capacity is combined
    /// with a strategy other than `Buffer`.
    pub fn build(self) -> Result<EmitterConfig, ConfigError> {
        let strategy = self.strategy.unwrap_or_default();
        let capacity = match self.capacity {
            None => None,
            Some(n) => Some(NonZeroUsize::new(n).ok_or(ConfigError::NonPositiveCapacity(n))?),
        };
        if capacity.is_some() && strategy != BackpressureStrategy::Buffer {
            return Err(ConfigError::CapacityWithoutBuffer(strategy));
        }
        Ok(EmitterConfig {
            strategy,
            capacity,
            overflow: self.overflow.unwrap_or_default(),
            on_overflow: self.on_overflow,
            capacity_hint: self.capacity_hint.unwrap_or(DEFAULT_CAPACITY_HINT),
            sink: self.sink.unwrap_or_else(default_sink),
            name: self.name,
        })
    }
}
