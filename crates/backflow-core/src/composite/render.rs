//! Overview rendering for composite errors.
//!
//! Output shape:
//!
//! ```text
//! Multiple exceptions (2)
//! |-- TestError: ex1
//!   |-- TestError: ex0
//! |-- TestError: ex2
//!   |-- TestError: ex1
//!       |-- (cause not expanded again) TestError: ex0
//! ```
//!
//! Each level of a cause chain indents by two spaces. A failure met a second
//! time within one render is printed, followed by a one-line back-reference
//! to its cause, and the walk stops there. A composite inside a chain gets
//! its own indented sub-list sharing the same seen set.

use std::error::Error as StdError;

use fxhash::FxHashSet;

use super::CompositeError;
use crate::failure::Failure;

const INDENT: &str = "  ";

/// The rendered overview of a multi-cause composite, exposed as its cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{text}")]
pub struct CompositeOverview {
    text: String,
}

impl CompositeOverview {
    /// Wraps pre-rendered overview text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The overview text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

pub(super) fn overview(composite: &CompositeError) -> String {
    let mut renderer = Renderer::default();
    renderer.composite(composite, 0);
    renderer.out
}

/// One element of a cause chain: either one of ours or an arbitrary
/// `source()` error.
#[derive(Clone, Copy)]
enum Link<'a> {
    Failure(&'a Failure),
    Foreign(&'a (dyn StdError + 'static)),
}

impl<'a> Link<'a> {
    fn of(error: &'a (dyn StdError + 'static)) -> Self {
        match error.downcast_ref::<Failure>() {
            Some(failure) => Link::Failure(failure),
            None => Link::Foreign(error),
        }
    }

    fn id(self) -> usize {
        match self {
            Link::Failure(failure) => failure.id(),
            Link::Foreign(error) => std::ptr::from_ref(error).cast::<()>() as usize,
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Link::Failure(failure) => failure.kind(),
            Link::Foreign(_) => "Error",
        }
    }

    fn message(self) -> String {
        match self {
            Link::Failure(failure) => failure.message(),
            Link::Foreign(error) => error.to_string(),
        }
    }

    fn composite(self) -> Option<&'a CompositeError> {
        match self {
            Link::Failure(failure) => failure.downcast_ref::<CompositeError>(),
            Link::Foreign(error) => error.downcast_ref::<CompositeError>(),
        }
    }

    fn next(self) -> Option<Link<'a>> {
        // A composite's chain is its sub-list.
        if self.composite().is_some() {
            return None;
        }
        match self {
            Link::Failure(failure) => match failure.cause() {
                Some(cause) => Some(Link::Failure(cause)),
                None => failure.get_ref().source().map(Link::of),
            },
            Link::Foreign(error) => error.source().map(Link::of),
        }
    }
}

#[derive(Default)]
struct Renderer {
    out: String,
    seen: FxHashSet<usize>,
}

impl Renderer {
    fn composite(&mut self, composite: &CompositeError, level: usize) {
        self.indent(level);
        self.out
            .push_str(&format!("Multiple exceptions ({})\n", composite.len()));
        for failure in composite.exceptions() {
            self.chain(Link::Failure(failure), level);
        }
    }

    fn chain(&mut self, first: Link<'_>, level: usize) {
        let mut depth = level;
        let mut current = Some(first);
        while let Some(link) = current {
            self.entry(link, depth);
            if !self.seen.insert(link.id()) {
                if let Some(next) = link.next() {
                    self.indent(depth + 2);
                    self.out.push_str(&format!(
                        "|-- (cause not expanded again) {}: {}\n",
                        next.kind(),
                        next.message()
                    ));
                }
                return;
            }
            if let Some(nested) = link.composite() {
                self.composite(nested, depth + 3);
                return;
            }
            current = link.next();
            depth += 1;
        }
    }

    fn entry(&mut self, link: Link<'_>, depth: usize) {
        self.indent(depth);
        self.out.push_str("|-- ");
        self.out.push_str(link.kind());
        self.out.push_str(": ");
        let message = link.message();
        if message.contains('\n') {
            self.out.push('\n');
            for line in message.lines() {
                self.indent(depth + 2);
                self.out.push_str(line);
                self.out.push('\n');
            }
        } else {
            self.out.push_str(&message);
            self.out.push('\n');
        }
    }

    fn indent(&mut self, level: usize) {
        for _ in 0..level {
            self.out.push_str(INDENT);
        }
    }
}
