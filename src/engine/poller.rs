//! Polling engine: drives one pending command until it resolves, fails or runs out of
//! attempts.

use super::{BackendError, GameBackend};
use crate::model::{CommandToken, HistoryEntry, StatusReply};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
    Resolved,
    TimedOut,
    Failed,
}

/// A command the backend accepted but has not finished processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWork {
    pub id: CommandToken,
    pub attempts_made: u32,
    pub deadline_attempts: u32,
}

impl PendingWork {
    pub fn new(id: CommandToken, deadline_attempts: u32) -> Self {
        Self {
            id,
            attempts_made: 0,
            deadline_attempts,
        }
    }

    /// Count one more unresolved tick. Returns true once the budget is exhausted.
    pub fn record_attempt(&mut self) -> bool {
        self.attempts_made = self.attempts_made.saturating_add(1);
        self.attempts_made > self.deadline_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub id: CommandToken,
    pub attempts_made: u32,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailure {
    UnknownToken,
    Backend(Option<String>),
    Request(BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Resolved {
        additions: Vec<HistoryEntry>,
        ended: bool,
        final_message: Option<String>,
        /// The backend resent its whole transcript instead of the turn's additions.
        transcript_withheld: bool,
    },
    TimedOut {
        attempts: u32,
    },
    Failed(PollFailure),
    Cancelled,
}

/// Parameters for a single polling cycle.
pub(crate) struct PollParams<'a> {
    pub backend: &'a dyn GameBackend,
    pub work: PendingWork,
    pub interval: Duration,
    pub progress_tx: &'a mpsc::UnboundedSender<PollProgress>,
    pub cancel: Arc<AtomicBool>,
}

/// Poll until the command settles. Ticks are serialized: the next wait starts only after the
/// previous status call has returned.
pub(crate) async fn poll_until_settled(params: PollParams<'_>) -> PollOutcome {
    let PollParams {
        backend,
        mut work,
        interval,
        progress_tx,
        cancel,
    } = params;

    info!(id = %work.id, budget = work.deadline_attempts, "polling started");

    loop {
        tokio::time::sleep(interval).await;
        if cancel.load(Ordering::Relaxed) {
            debug!(id = %work.id, "polling cancelled");
            return PollOutcome::Cancelled;
        }

        let reply = backend.status(&work.id).await;
        if cancel.load(Ordering::Relaxed) {
            debug!(id = %work.id, "discarding status reply after cancel");
            return PollOutcome::Cancelled;
        }

        match reply {
            Err(BackendError::UnknownToken(_)) => {
                return PollOutcome::Failed(PollFailure::UnknownToken);
            }
            Err(e) if e.is_transient() => {
                warn!(id = %work.id, attempt = work.attempts_made + 1, error = %e, "status tick failed, retrying");
                if work.record_attempt() {
                    return timed_out(&work);
                }
            }
            Err(e) => return PollOutcome::Failed(PollFailure::Request(e)),
            Ok(resp) => match resp.into_reply() {
                StatusReply::Processing { message } => {
                    if work.record_attempt() {
                        return timed_out(&work);
                    }
                    debug!(id = %work.id, attempt = work.attempts_made, "still processing");
                    let _ = progress_tx.send(PollProgress {
                        id: work.id.clone(),
                        attempts_made: work.attempts_made,
                        message,
                    });
                }
                StatusReply::Resolved {
                    additions,
                    ended,
                    final_message,
                    full_history_only,
                } => {
                    if full_history_only {
                        warn!(id = %work.id, "status reply carried a full transcript without additions; not appending it");
                    }
                    info!(id = %work.id, additions = additions.len(), attempts = work.attempts_made, "command resolved");
                    return PollOutcome::Resolved {
                        additions,
                        ended,
                        final_message,
                        transcript_withheld: full_history_only,
                    };
                }
                StatusReply::Failed { error } => {
                    return PollOutcome::Failed(PollFailure::Backend(error));
                }
            },
        }
    }
}

fn timed_out(work: &PendingWork) -> PollOutcome {
    warn!(id = %work.id, attempts = work.attempts_made, "polling budget exhausted");
    PollOutcome::TimedOut {
        attempts: work.attempts_made,
    }
}

/// Handle for a polling cycle running on its own task.
pub(crate) struct PollHandle {
    pub id: CommandToken,
    cancel: Arc<AtomicBool>,
    pub handle: Option<tokio::task::JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // Dropping a JoinHandle does not stop the task; abort it explicitly.
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}

/// Spawn a polling cycle for `work` and return its handle.
pub(crate) fn spawn_poll(
    backend: Arc<dyn GameBackend>,
    work: PendingWork,
    interval: Duration,
    progress_tx: mpsc::UnboundedSender<PollProgress>,
) -> PollHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let id = work.id.clone();
    let cancel2 = cancel.clone();
    let handle = tokio::spawn(async move {
        poll_until_settled(PollParams {
            backend: backend.as_ref(),
            work,
            interval,
            progress_tx: &progress_tx,
            cancel: cancel2,
        })
        .await
    });
    PollHandle {
        id,
        cancel,
        handle: Some(handle),
    }
}
