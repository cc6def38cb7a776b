//! Application-level orchestration.
//!
//! This module owns the command lifecycle (start, submit, poll, end), the transcript and the
//! status line. The TUI drives it through `UiCommand`s, text mode through the inline
//! `CommandController` API; both only render the `SessionEvent`s it emits.

mod controller;
mod reconciler;
mod session;
pub(crate) mod status;

pub(crate) use controller::{
    fetch_character, run_controller, CommandController, StartOutcome, SubmitOutcome, UiCommand,
    START_PROMPT,
};
