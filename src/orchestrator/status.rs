//! Status projection and user-facing error texts.

use crate::engine::poller::{PollFailure, PollPhase};
use crate::engine::BackendError;
use crate::model::{Severity, StatusMessage};

pub const NOT_STARTED: &str = "Adventure not started. Press Enter to begin.";
pub const STARTING: &str = "Starting adventure…";
pub const READY: &str = "Ready for your next command";
pub const PROCESSING: &str = "Processing command…";
pub const WAITING: &str = "Waiting for the narrator…";
pub const DEFAULT_ENDED: &str = "The session has ended. Thanks for playing!";
pub const TRANSCRIPT_WITHHELD: &str =
    "The narrator answered, but the reply held no new lines to show.";
pub const POLL_TIMEOUT: &str = "The narrator took too long to respond. Try the command again.";

/// Everything the status line depends on.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub started: bool,
    pub starting: bool,
    pub awaiting_result: bool,
    pub phase: PollPhase,
    pub last_error: Option<&'a str>,
    pub progress: Option<&'a str>,
    pub ended_message: Option<&'a str>,
}

pub fn project(i: &StatusInputs<'_>) -> StatusMessage {
    if let Some(msg) = i.ended_message {
        return StatusMessage::new(msg, Severity::Ended);
    }
    if i.starting {
        return StatusMessage::new(STARTING, Severity::Processing);
    }
    if i.awaiting_result {
        let text = match i.phase {
            PollPhase::Polling => i.progress.unwrap_or(WAITING),
            _ => PROCESSING,
        };
        return StatusMessage::new(text, Severity::Processing);
    }
    if let Some(err) = i.last_error {
        return StatusMessage::new(err, Severity::Error);
    }
    if !i.started {
        return StatusMessage::new(NOT_STARTED, Severity::Ready);
    }
    StatusMessage::new(READY, Severity::Ready)
}

pub fn describe_start_failure(error: Option<&str>) -> String {
    match error {
        Some(e) if !e.trim().is_empty() => format!("Could not start the adventure: {e}"),
        _ => "Could not start the adventure.".to_string(),
    }
}

pub fn describe_rejection(error: Option<&str>) -> String {
    match error {
        Some(e) if !e.trim().is_empty() => format!("Error processing command: {e}"),
        _ => "Error processing command.".to_string(),
    }
}

pub fn describe_backend_error(e: &BackendError) -> String {
    match e {
        BackendError::Transport(_) => format!("Connection error ({e})."),
        BackendError::Http { .. } => format!("The game server returned an error ({e})."),
        BackendError::UnknownToken(_) => "The game server lost track of this command.".into(),
        BackendError::Decode(_) => format!("Unreadable reply from the game server ({e})."),
    }
}

pub fn describe_poll_failure(f: &PollFailure) -> String {
    match f {
        PollFailure::UnknownToken => {
            "The game server lost track of this command. Try it again.".into()
        }
        PollFailure::Backend(error) => describe_rejection(error.as_deref()),
        PollFailure::Request(e) => describe_backend_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandToken;

    fn idle() -> StatusInputs<'static> {
        StatusInputs {
            started: false,
            starting: false,
            awaiting_result: false,
            phase: PollPhase::Idle,
            last_error: None,
            progress: None,
            ended_message: None,
        }
    }

    #[test]
    fn not_started_then_ready() {
        assert_eq!(project(&idle()).text, NOT_STARTED);
        let ready = project(&StatusInputs {
            started: true,
            ..idle()
        });
        assert_eq!(ready, StatusMessage::new(READY, Severity::Ready));
    }

    #[test]
    fn polling_shows_progress_text() {
        let base = StatusInputs {
            started: true,
            awaiting_result: true,
            phase: PollPhase::Polling,
            ..idle()
        };
        assert_eq!(project(&base).text, WAITING);
        let with_progress = project(&StatusInputs {
            progress: Some("Thinking..."),
            ..base
        });
        assert_eq!(
            with_progress,
            StatusMessage::new("Thinking...", Severity::Processing)
        );
        let submitting = project(&StatusInputs {
            phase: PollPhase::Idle,
            ..base
        });
        assert_eq!(submitting.text, PROCESSING);
    }

    #[test]
    fn error_wins_over_ready_but_not_over_ended() {
        let err = StatusInputs {
            started: true,
            last_error: Some(POLL_TIMEOUT),
            ..idle()
        };
        assert_eq!(project(&err).severity, Severity::Error);
        let ended = project(&StatusInputs {
            ended_message: Some("Game over"),
            ..err
        });
        assert_eq!(ended, StatusMessage::new("Game over", Severity::Ended));
    }

    #[test]
    fn timeout_and_failure_texts_differ() {
        let failure = describe_poll_failure(&PollFailure::Backend(Some("boom".into())));
        assert_ne!(failure, POLL_TIMEOUT);
        assert!(failure.contains("boom"));
        assert!(describe_backend_error(&BackendError::UnknownToken(CommandToken::new("a")))
            .contains("lost track"));
        assert_eq!(describe_start_failure(Some("  ")), "Could not start the adventure.");
    }
}
