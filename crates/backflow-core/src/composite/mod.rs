//! Aggregation of several failures into one.
//!
//! A [`CompositeError`] keeps a flat, insertion-ordered, identity
//! de-duplicated list of causes. Composites passed in as causes are unrolled
//! into the parent list. The rendered [`overview`](CompositeError::overview)
//! walks every cause chain once and back-references any failure it has
//! already expanded, so shared roots and cyclic `source()` chains stay
//! bounded.

mod render;

pub use render::CompositeOverview;

use std::error::Error as StdError;
use std::fmt;
use std::sync::OnceLock;

use fxhash::FxHashSet;
use smallvec::SmallVec;

use crate::error::NullCause;
use crate::failure::Failure;
use crate::{Error, Result};

/// Several failures reported as one.
pub struct CompositeError {
    exceptions: SmallVec<[Failure; 4]>,
    message: String,
    cause: OnceLock<Failure>,
}

impl CompositeError {
    /// Builds a composite from a non-empty collection of failures.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyComposite`] if `errors` yields nothing.
    pub fn new<I>(errors: I) -> Result<Self>
    where
        I: IntoIterator<Item = Failure>,
    {
        let exceptions = flatten(errors);
        if exceptions.is_empty() {
            return Err(Error::EmptyComposite);
        }
        Ok(Self::from_flat(exceptions))
    }

    /// Builds a composite from possibly absent failures.
    ///
    /// An absent collection becomes a single [`NullCause::Collection`]
    /// placeholder, and each absent element a [`NullCause::Element`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyComposite`] for an empty, present collection.
    pub fn from_nullable<I>(errors: Option<I>) -> Result<Self>
    where
        I: IntoIterator<Item = Option<Failure>>,
    {
        match errors {
            None => Ok(Self::single(Failure::new(NullCause::Collection))),
            Some(errors) => Self::new(
                errors
                    .into_iter()
                    .map(|e| e.unwrap_or_else(|| Failure::new(NullCause::Element))),
            ),
        }
    }

    /// Wraps a single failure; [`cause`](Self::cause) returns it unchanged.
    #[must_use]
    pub fn single(error: Failure) -> Self {
        Self::from_flat(flatten([error]))
    }

    /// Composes two failures, flattening either side if it is a composite.
    #[must_use]
    pub fn pair(first: Failure, second: Failure) -> Self {
        Self::from_flat(flatten([first, second]))
    }

    fn from_flat(exceptions: SmallVec<[Failure; 4]>) -> Self {
        let message = format!("{} exceptions occurred. ", exceptions.len());
        Self {
            exceptions,
            message,
            cause: OnceLock::new(),
        }
    }

    /// The flattened causes, in insertion order.
    #[must_use]
    pub fn exceptions(&self) -> &[Failure] {
        &self.exceptions
    }

    /// Number of flattened causes; never zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exceptions.len()
    }

    /// Always `false`; a composite holds at least one cause.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    /// `"<N> exceptions occurred. "`
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The cause of this composite.
    ///
    /// With one flattened cause this is that cause itself. With several it
    /// is a [`CompositeOverview`] whose message is the rendered overview.
    /// Computed once and cached.
    #[must_use]
    pub fn cause(&self) -> &Failure {
        self.cause.get_or_init(|| {
            if let [only] = self.exceptions.as_slice() {
                only.clone()
            } else {
                Failure::new(CompositeOverview::new(self.overview()))
            }
        })
    }

    /// Renders the multi-line overview of every cause chain.
    #[must_use]
    pub fn overview(&self) -> String {
        render::overview(self)
    }
}

/// Unrolls nested composites and drops repeated failures by identity.
fn flatten<I>(errors: I) -> SmallVec<[Failure; 4]>
where
    I: IntoIterator<Item = Failure>,
{
    let mut exceptions = SmallVec::new();
    let mut seen = FxHashSet::default();
    let mut push = |failure: Failure| {
        if seen.insert(failure.id()) {
            exceptions.push(failure);
        }
    };
    for error in errors {
        match error.downcast_ref::<CompositeError>() {
            Some(nested) => nested.exceptions.iter().cloned().for_each(&mut push),
            None => push(error),
        }
    }
    exceptions
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeError")
            .field("exceptions", &self.exceptions.as_slice())
            .finish()
    }
}

impl StdError for CompositeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause())
    }
}
