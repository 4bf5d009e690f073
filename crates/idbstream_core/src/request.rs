//! Request state machine.
//!
//! Every store operation moves through the same states:
//!
//! ```text
//! Idle -> Opening -> TransactionPending -> Closed
//!   \         \               \
//!    +---------+---------------+--> Failed
//! ```
//!
//! `Opening` covers starting the transaction, `TransactionPending` covers the
//! request and its commit. `Closed` and `Failed` are terminal; in both the
//! connection lease has been released.

use crate::error::{OperationKind, RequestStateError};

/// State of one store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Created, nothing issued yet.
    Idle,
    /// Starting a transaction on the store.
    Opening,
    /// Request issued, waiting for the result and commit.
    TransactionPending,
    /// Committed and closed.
    Closed,
    /// Failed and closed.
    Failed,
}

impl RequestState {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Closed | RequestState::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::{Closed, Failed, Idle, Opening, TransactionPending};
        matches!(
            (*self, next),
            (Idle, Opening)
                | (Opening, TransactionPending)
                | (TransactionPending, Closed)
                | (Idle | Opening | TransactionPending, Failed)
        )
    }
}

/// Tracks the progress of one operation through [`RequestState`].
#[derive(Debug)]
pub struct PendingRequest {
    database: String,
    store: String,
    operation: OperationKind,
    state: RequestState,
}

impl PendingRequest {
    /// Creates an idle request.
    pub fn new(
        database: impl Into<String>,
        store: impl Into<String>,
        operation: OperationKind,
    ) -> Self {
        Self {
            database: database.into(),
            store: store.into(),
            operation,
            state: RequestState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Operation being performed.
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestStateError`] if the transition is not legal; the
    /// state is left unchanged.
    pub fn transition(&mut self, next: RequestState) -> Result<(), RequestStateError> {
        if !self.state.can_transition_to(next) {
            return Err(RequestStateError {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(
            database = %self.database,
            store = %self.store,
            operation = %self.operation,
            from = ?self.state,
            to = ?next,
            "request state"
        );
        self.state = next;
        Ok(())
    }

    /// Moves to [`RequestState::Failed`] unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = RequestState::Failed;
        }
    }
}
