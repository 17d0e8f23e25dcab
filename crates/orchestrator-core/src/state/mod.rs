//! The task status transition graph.
//!
//! A single table of legal edges, consulted by every mutator in
//! [`crate::queue::TaskQueue`] so invalid transitions are rejected
//! explicitly rather than relying on call-site discipline.

use orchestrator_db::models::TaskStatus;

/// Check whether a transition from `from` to `to` is a legal edge.
///
/// ```text
/// queued    -> running              (dequeue)
/// retry     -> running              (dequeue, once due)
/// running   -> processing           (markProcessing)
/// running   -> completed            (markCompleted)
/// processing -> completed           (markCompleted)
/// running   -> retry                (markFailed, retryable, budget left)
/// processing -> retry               (markFailed, retryable, budget left)
/// running   -> failed | dead        (markFailed, terminal)
/// processing -> failed | dead       (markFailed, terminal)
/// {pending, queued, running, processing, retry} -> failed   (cancel)
/// ```
///
/// `pending` is part of the status enum but is never produced by any queue
/// operator in this implementation — `enqueue` creates tasks directly in
/// `queued` — so no edge originates there except the cancel edge, kept for
/// completeness against the data model.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Queued, Running)
            | (Retry, Running)
            | (Running, Processing)
            | (Running, Completed)
            | (Processing, Completed)
            | (Running, Retry)
            | (Processing, Retry)
            | (Running, Failed)
            | (Running, Dead)
            | (Processing, Failed)
            | (Processing, Dead)
            | (Pending, Failed)
            | (Queued, Failed)
            | (Retry, Failed)
    )
}

/// Terminal statuses: no operator transitions a task out of these.
pub fn is_terminal(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Dead
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn dequeue_edges_are_valid() {
        assert!(is_valid_transition(Queued, Running));
        assert!(is_valid_transition(Retry, Running));
    }

    #[test]
    fn completion_edges_are_valid() {
        assert!(is_valid_transition(Running, Processing));
        assert!(is_valid_transition(Running, Completed));
        assert!(is_valid_transition(Processing, Completed));
    }

    #[test]
    fn failure_edges_are_valid() {
        for to in [Retry, Failed, Dead] {
            assert!(is_valid_transition(Running, to));
            assert!(is_valid_transition(Processing, to));
        }
    }

    #[test]
    fn cancel_edges_reach_failed_from_any_non_terminal_status() {
        for from in [Pending, Queued, Running, Processing, Retry] {
            assert!(is_valid_transition(from, Failed));
        }
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in [Completed, Failed, Dead] {
            for to in [Pending, Queued, Running, Processing, Completed, Failed, Retry, Dead] {
                assert!(!is_valid_transition(from, to), "{from} -> {to} should be invalid");
            }
        }
    }

    #[test]
    fn arbitrary_skips_are_invalid() {
        assert!(!is_valid_transition(Queued, Completed));
        assert!(!is_valid_transition(Pending, Running));
        assert!(!is_valid_transition(Completed, Running));
    }

    #[test]
    fn terminal_statuses_are_identified() {
        assert!(is_terminal(Completed));
        assert!(is_terminal(Failed));
        assert!(is_terminal(Dead));
        assert!(!is_terminal(Running));
        assert!(!is_terminal(Retry));
    }
}
