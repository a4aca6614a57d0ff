//! Status transition engine.
//!
//! Enforces the legal state graph for command statuses. The graph is a
//! straight line with no cycles and no skipping:
//!
//! ```text
//! recorded -> manual_review -> transcribing -> queued -> processing -> completed
//! ```
//!
//! The engine is a pure function of (current, target); side effects such as
//! "retry after failure" live in [`super::retry`] so the two can evolve
//! independently.

use super::CommandStatus;

/// Returns the single legal successor of a status, or `None` for the
/// terminal status.
pub fn successor(status: CommandStatus) -> Option<CommandStatus> {
    match status {
        CommandStatus::Recorded => Some(CommandStatus::ManualReview),
        CommandStatus::ManualReview => Some(CommandStatus::Transcribing),
        CommandStatus::Transcribing => Some(CommandStatus::Queued),
        CommandStatus::Queued => Some(CommandStatus::Processing),
        CommandStatus::Processing => Some(CommandStatus::Completed),
        CommandStatus::Completed => None,
    }
}

/// Returns true iff `to` is in the successor set of `from`.
///
/// `completed` has no outgoing transitions, so any transition out of it is
/// invalid.
pub fn is_valid_transition(from: CommandStatus, to: CommandStatus) -> bool {
    successor(from) == Some(to)
}

/// Checks a transition, producing the error the queue surfaces to callers.
///
/// Must be called before any store write so an illegal transition never
/// reaches the database.
pub fn check_transition(from: CommandStatus, to: CommandStatus) -> Result<(), TransitionError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError::Invalid { from, to })
    }
}

/// An attempted status change not in the legal transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid status transition: {from:?} -> {to:?}")]
    Invalid {
        from: CommandStatus,
        to: CommandStatus,
    },
}
