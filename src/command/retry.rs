//! Retry and recovery policy.
//!
//! Given a command's current status and failed flag, decides what an
//! explicit user retry does: which status the command resets to and
//! whether the failure flags are cleared. The policy never touches the
//! store itself; the queue coordinator applies the plan it produces.

use super::CommandStatus;

/// What a retry should do to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Status the command moves to (may equal the current status).
    pub next_status: CommandStatus,
    /// Whether to clear `failed` and `error_message`.
    pub clear_failure: bool,
}

/// Computes the retry plan for a command, or `None` when retrying is a
/// no-op for this state.
///
/// An unknown combination is a no-op, never an error: the policy must stay
/// safe to call from UI code against any record.
pub fn retry_plan(status: CommandStatus, failed: bool) -> Option<RetryPlan> {
    match status {
        // A stuck or failed dispatch goes back to the queue.
        CommandStatus::Processing => Some(RetryPlan {
            next_status: CommandStatus::Queued,
            clear_failure: true,
        }),
        // Transcription is retried in place, but only after a failure.
        CommandStatus::Transcribing if failed => Some(RetryPlan {
            next_status: CommandStatus::Transcribing,
            clear_failure: true,
        }),
        CommandStatus::Transcribing => None,
        // The human-gated step can always be re-attempted.
        CommandStatus::ManualReview => Some(RetryPlan {
            next_status: CommandStatus::ManualReview,
            clear_failure: true,
        }),
        _ => None,
    }
}

/// Whether a retry makes sense for this state, used to gate retry buttons
/// and automation.
///
/// `queued` is already waiting rather than stuck, and `completed` is
/// terminal; neither is retryable.
pub fn is_retryable(status: CommandStatus, failed: bool) -> bool {
    match status {
        CommandStatus::Processing => true,
        CommandStatus::Transcribing => failed,
        CommandStatus::ManualReview => true,
        CommandStatus::Recorded | CommandStatus::Queued | CommandStatus::Completed => false,
    }
}
