//! Shareable error handle carried by error signals.
//!
//! A [`Failure`] wraps any `std::error::Error` behind an `Arc` so that a
//! single error can be delivered, reported, composed and compared by
//! identity from several threads at once. Cloning a failure never copies
//! the underlying error; two clones are the same failure.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::composite::CompositeError;

/// Boxed error type accepted by [`Failure`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Identity-bearing, cheaply clonable error.
#[derive(Clone)]
pub struct Failure {
    inner: Arc<Inner>,
}

struct Inner {
    kind: &'static str,
    error: BoxError,
    cause: Option<Failure>,
}

/// Free-form error used by [`Failure::msg`].
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

impl Failure {
    /// Wraps an error.
    ///
    /// Wrapping a `Failure` returns it unchanged, so identity survives
    /// generic code that re-wraps errors it did not create.
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let boxed: BoxError = Box::new(error);
        match boxed.downcast::<Failure>() {
            Ok(failure) => *failure,
            Err(boxed) => Self::from_parts(short_type_name::<E>(), boxed, None),
        }
    }

    /// Wraps an error and links an explicit cause.
    #[must_use]
    pub fn with_cause<E>(error: E, cause: Failure) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::from_parts(short_type_name::<E>(), Box::new(error), Some(cause))
    }

    /// Creates a failure from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::from_parts("Error", Box::new(Message(message.into())), None)
    }

    /// Creates a failure from a plain message with an explicit cause.
    #[must_use]
    pub fn msg_with_cause(message: impl Into<String>, cause: Failure) -> Self {
        Self::from_parts("Error", Box::new(Message(message.into())), Some(cause))
    }

    /// Combines two failures of the same operation into one
    /// [`CompositeError`] so that neither is lost.
    #[must_use]
    pub fn compose(primary: Failure, secondary: Failure) -> Self {
        Failure::new(CompositeError::pair(primary, secondary))
    }

    fn from_parts(kind: &'static str, error: BoxError, cause: Option<Failure>) -> Self {
        Self {
            inner: Arc::new(Inner { kind, error, cause }),
        }
    }

    /// Short type name of the wrapped error, used in rendered overviews.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    /// The wrapped error's display message.
    #[must_use]
    pub fn message(&self) -> String {
        self.inner.error.to_string()
    }

    /// The explicitly linked cause, if any.
    #[inline]
    #[must_use]
    pub fn cause(&self) -> Option<&Failure> {
        self.inner.cause.as_ref()
    }

    /// The wrapped error.
    #[must_use]
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.error.as_ref()
    }

    /// Returns `true` if both handles refer to the same failure.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address-based identity, stable for the lifetime of the failure.
    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Attempts to view the wrapped error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.error.downcast_ref::<E>()
    }

    /// Returns `true` if the wrapped error is of type `E`.
    #[must_use]
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.error.is::<E>()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.error, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Failure");
        s.field("kind", &self.inner.kind)
            .field("message", &self.message());
        if let Some(cause) = &self.inner.cause {
            s.field("cause", cause);
        }
        s.finish()
    }
}

/// Failures compare by identity.
impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Failure {}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.inner.cause {
            Some(cause) => Some(cause),
            None => self.inner.error.source(),
        }
    }
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<E>() -> &'static str {
    let full = type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
