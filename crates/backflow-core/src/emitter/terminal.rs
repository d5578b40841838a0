//! Atomic slot for the pending terminal signal of a queue-drain loop.
//!
//! Terminal signals never travel through the value queue. Producers publish
//! them here after enqueuing their last value; the drainer reads the slot
//! before draining the queue, so every value published earlier is seen
//! first, and finally claims it for delivery.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::failure::Failure;

#[derive(Debug, Clone)]
pub(crate) enum Terminal {
    Complete,
    /// `skip_ahead` errors are delivered before any queued value.
    Error {
        error: Failure,
        skip_ahead: bool,
    },
    /// Claimed by the drainer; nothing more can be published.
    Delivered,
}

#[derive(Debug, Default)]
pub(crate) struct TerminalCell {
    state: ArcSwapOption<Terminal>,
}

impl TerminalCell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Option<Arc<Terminal>> {
        self.state.load_full()
    }

    /// Publishes `terminal` if the slot is empty.
    pub(crate) fn offer(&self, terminal: &Terminal) -> bool {
        let previous = self.state.rcu(|current| match current {
            None => Some(Arc::new(terminal.clone())),
            Some(_) => current.clone(),
        });
        previous.is_none()
    }

    /// Publishes the producer's error, composing it with a pending
    /// emitter-originated error.
    ///
    /// Fails once a completion is pending or the terminal was delivered.
    pub(crate) fn add_error(&self, error: &Failure, skip_ahead: bool) -> bool {
        let previous = self.state.rcu(|current| match current.as_deref() {
            None => Some(Arc::new(Terminal::Error {
                error: error.clone(),
                skip_ahead,
            })),
            Some(Terminal::Error {
                error: pending,
                skip_ahead: pending_skip,
            }) => Some(Arc::new(Terminal::Error {
                error: Failure::compose(pending.clone(), error.clone()),
                skip_ahead: skip_ahead || *pending_skip,
            })),
            Some(_) => current.clone(),
        });
        matches!(previous.as_deref(), None | Some(Terminal::Error { .. }))
    }

    /// Publishes an emitter-originated error ahead of anything pending.
    ///
    /// A pending completion is superseded; a pending error is composed.
    /// Fails only once the terminal was delivered.
    pub(crate) fn preempt(&self, error: &Failure) -> bool {
        let previous = self.state.rcu(|current| match current.as_deref() {
            None | Some(Terminal::Complete) => Some(Arc::new(Terminal::Error {
                error: error.clone(),
                skip_ahead: true,
            })),
            Some(Terminal::Error { error: pending, .. }) => Some(Arc::new(Terminal::Error {
                error: Failure::compose(pending.clone(), error.clone()),
                skip_ahead: true,
            })),
            Some(Terminal::Delivered) => current.clone(),
        });
        !matches!(previous.as_deref(), Some(Terminal::Delivered))
    }

    /// Takes the pending terminal for delivery, sealing the slot.
    pub(crate) fn claim(&self) -> Option<Arc<Terminal>> {
        self.state
            .swap(Some(Arc::new(Terminal::Delivered)))
            .filter(|t| !matches!(**t, Terminal::Delivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::CompositeError;

    #[test]
    fn test_offer_first_wins() {
        let cell = TerminalCell::new();
        assert!(cell.offer(&Terminal::Complete));
        assert!(!cell.offer(&Terminal::Complete));
        assert!(!cell.add_error(&Failure::msg("late"), false));
    }

    #[test]
    fn test_errors_compose_until_claimed() {
        let cell = TerminalCell::new();
        let a = Failure::msg("a");
        let b = Failure::msg("b");
        assert!(cell.add_error(&a, true));
        assert!(cell.add_error(&b, true));

        let claimed = cell.claim().unwrap();
        let Terminal::Error { error, skip_ahead } = &*claimed else {
            panic!("expected error, got {claimed:?}");
        };
        assert!(*skip_ahead);
        let composite = error.downcast_ref::<CompositeError>().unwrap();
        assert_eq!(composite.len(), 2);

        assert!(!cell.add_error(&Failure::msg("c"), true));
        assert!(cell.claim().is_none());
    }

    #[test]
    fn test_preempt_supersedes_completion() {
        let cell = TerminalCell::new();
        assert!(cell.offer(&Terminal::Complete));
        assert!(cell.preempt(&Failure::msg("overflow")));
        assert!(matches!(
            cell.get().as_deref(),
            Some(Terminal::Error {
                skip_ahead: true,
                ..
            })
        ));
        cell.claim();
        assert!(!cell.preempt(&Failure::msg("again")));
    }
}
