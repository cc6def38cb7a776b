//! Command lifecycle controller.
//!
//! Owns session state, the single in-flight request and the single polling cycle, and emits
//! events for presentation layers. All state changes happen on the controller task; network
//! calls run on spawned tasks and report back here.

use super::reconciler::Transcript;
use super::session::Session;
use super::status::{self, StatusInputs};
use crate::engine::poller::{
    self, PendingWork, PollFailure, PollHandle, PollOutcome, PollParams, PollPhase, PollProgress,
};
use crate::engine::{BackendError, GameBackend};
use crate::model::{
    CharacterSheet, ClientConfig, ClientToken, CommandReply, CommandRequest, CommandResponse,
    CommandToken, EntryKind, HistoryEntry, PollConfig, SessionEvent, StartResponse, StatusMessage,
};
use anyhow::Result;
use rand::RngCore;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

pub const START_PROMPT: &str = "Your adventure awaits. Press Enter to begin.";

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start,
    Submit(String),
    RefreshCharacter,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    Ignored,
    Started,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubmitOutcome {
    Ignored,
    Completed,
    Ended,
    Pending(PendingWork),
    Failed,
    TimedOut,
}

pub(crate) struct CommandController {
    backend: Arc<dyn GameBackend>,
    poll_cfg: PollConfig,
    session: Session,
    starting: bool,
    outstanding: Option<CommandRequest>,
    pending: Option<PendingWork>,
    phase: PollPhase,
    transcript: Transcript,
    last_error: Option<String>,
    progress: Option<String>,
    ended_message: Option<String>,
    last_token: Option<ClientToken>,
    event_tx: UnboundedSender<SessionEvent>,
}

impl CommandController {
    pub fn new(
        backend: Arc<dyn GameBackend>,
        poll_cfg: PollConfig,
        event_tx: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            backend,
            poll_cfg,
            session: Session::default(),
            starting: false,
            outstanding: None,
            pending: None,
            phase: PollPhase::Idle,
            transcript: Transcript::with_placeholder(START_PROMPT),
            last_error: None,
            progress: None,
            ended_message: None,
            last_token: None,
            event_tx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<&PendingWork> {
        self.pending.as_ref()
    }

    #[cfg(test)]
    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn status(&self) -> StatusMessage {
        status::project(&StatusInputs {
            started: self.session.started(),
            starting: self.starting,
            awaiting_result: self.session.awaiting_result(),
            phase: self.phase,
            last_error: self.last_error.as_deref(),
            progress: self.progress.as_deref(),
            ended_message: self.ended_message.as_deref(),
        })
    }

    /// Push the current status and input state to presentation layers.
    pub fn publish(&self) {
        debug_assert!(self.outstanding.is_none() || self.pending.is_none());
        debug_assert_eq!(
            self.session.awaiting_result(),
            self.outstanding.is_some() || self.pending.is_some()
        );
        let _ = self.event_tx.send(SessionEvent::Status(self.status()));
        let _ = self
            .event_tx
            .send(SessionEvent::InputEnabled(self.session.input_enabled()));
    }

    fn next_client_token(&mut self) -> ClientToken {
        let mut rng = rand::thread_rng();
        loop {
            // 53 bits keeps the id exact for backends that parse JSON numbers as doubles.
            let token = ClientToken(rng.next_u64() >> 11);
            if self.last_token != Some(token) {
                self.last_token = Some(token);
                return token;
            }
        }
    }

    fn append_delivered(&mut self, entries: Vec<HistoryEntry>) {
        if entries.is_empty() {
            return;
        }
        let placeholder_cleared = self.transcript.append_delivered(&entries);
        let _ = self.event_tx.send(SessionEvent::TranscriptAppended {
            entries,
            placeholder_cleared,
        });
    }

    fn append_notice(&mut self, text: &str) {
        let entry = HistoryEntry::new(EntryKind::System, text);
        self.transcript.append_synthetic(entry.clone());
        let _ = self.event_tx.send(SessionEvent::TranscriptAppended {
            entries: vec![entry],
            placeholder_cleared: false,
        });
    }

    fn fail_with(&mut self, message: String) {
        let entry = HistoryEntry::error(message.clone());
        self.transcript.append_synthetic(entry.clone());
        let _ = self.event_tx.send(SessionEvent::TranscriptAppended {
            entries: vec![entry],
            placeholder_cleared: false,
        });
        self.last_error = Some(message);
    }

    /// Guard and begin a start request. Returns false when the call must be ignored.
    pub fn begin_start(&mut self) -> bool {
        if self.starting || !self.session.can_start() {
            debug!("start ignored: session already started or busy");
            return false;
        }
        self.starting = true;
        self.last_error = None;
        info!(backend = self.backend.name(), "starting session");
        self.publish();
        true
    }

    pub fn complete_start(&mut self, res: Result<StartResponse, BackendError>) -> StartOutcome {
        if !self.starting {
            debug!("discarding stale start reply");
            return StartOutcome::Ignored;
        }
        self.starting = false;

        let outcome = match res {
            Ok(resp) if resp.success => {
                self.session.mark_started();
                self.last_error = None;
                self.append_delivered(resp.history);
                info!(entries = self.transcript.len(), "session started");
                StartOutcome::Started
            }
            Ok(resp) => {
                warn!(error = ?resp.error, "backend refused to start the session");
                self.fail_with(status::describe_start_failure(resp.error.as_deref()));
                StartOutcome::Failed
            }
            Err(e) => {
                warn!(error = %e, "start request failed");
                self.fail_with(status::describe_backend_error(&e));
                StartOutcome::Failed
            }
        };
        self.publish();
        outcome
    }

    /// Guard and begin a submission. Returns the request to send, or `None` when the call is
    /// ignored (session not live, a request already in flight, or blank text).
    pub fn begin_submit(&mut self, text: &str) -> Option<CommandRequest> {
        let text = text.trim();
        if text.is_empty() {
            debug!("submit ignored: blank command");
            return None;
        }
        if !self.session.input_enabled() {
            debug!(
                started = self.session.started(),
                awaiting = self.session.awaiting_result(),
                "submit ignored: input locked"
            );
            return None;
        }

        let request = CommandRequest {
            text: text.to_string(),
            client_token: self.next_client_token(),
        };
        self.session.begin_request();
        self.outstanding = Some(request.clone());
        self.phase = PollPhase::Idle;
        self.last_error = None;
        self.progress = None;
        info!(client_token = %request.client_token, command = %request.text, "submitting command");
        self.publish();
        Some(request)
    }

    pub fn complete_submit(
        &mut self,
        token: ClientToken,
        res: Result<CommandResponse, BackendError>,
    ) -> SubmitOutcome {
        match &self.outstanding {
            Some(r) if r.client_token == token => {}
            _ => {
                debug!(%token, "discarding stale command reply");
                return SubmitOutcome::Ignored;
            }
        }
        self.outstanding = None;

        let outcome = match res {
            Err(e) => {
                warn!(%token, error = %e, "command request failed");
                self.session.finish_request();
                self.fail_with(status::describe_backend_error(&e));
                SubmitOutcome::Failed
            }
            Ok(resp) => match resp.into_reply() {
                CommandReply::Rejected { error } => {
                    warn!(%token, error = ?error, "backend rejected command");
                    self.session.finish_request();
                    self.fail_with(status::describe_rejection(error.as_deref()));
                    SubmitOutcome::Failed
                }
                CommandReply::Completed {
                    ended: true,
                    history,
                    final_message,
                } => {
                    self.session.finish_request();
                    self.append_delivered(history);
                    self.end_session(
                        final_message.unwrap_or_else(|| status::DEFAULT_ENDED.to_string()),
                    );
                    return SubmitOutcome::Ended;
                }
                CommandReply::Completed { history, .. } => {
                    self.session.finish_request();
                    self.append_delivered(history);
                    SubmitOutcome::Completed
                }
                CommandReply::Pending { command_id } => {
                    info!(%token, id = %command_id, "command accepted, awaiting result");
                    let work = PendingWork::new(command_id, self.poll_cfg.deadline_attempts);
                    self.pending = Some(work.clone());
                    self.phase = PollPhase::Polling;
                    SubmitOutcome::Pending(work)
                }
            },
        };
        self.publish();
        outcome
    }

    pub fn apply_progress(&mut self, progress: PollProgress) {
        match self.pending.as_mut() {
            Some(work) if work.id == progress.id => {
                work.attempts_made = progress.attempts_made;
                if let Some(message) = progress.message {
                    self.progress = Some(message);
                }
                self.publish();
            }
            _ => debug!(id = %progress.id, "discarding stale poll progress"),
        }
    }

    /// Apply a settled polling cycle. Returns `None` when the outcome belongs to a cycle
    /// that is no longer current.
    pub fn complete_poll(
        &mut self,
        id: &CommandToken,
        outcome: PollOutcome,
    ) -> Option<PollPhase> {
        match &self.pending {
            Some(work) if &work.id == id => {}
            _ => {
                debug!(%id, "discarding stale poll outcome");
                return None;
            }
        }
        self.pending = None;
        self.progress = None;
        self.session.finish_request();

        match outcome {
            PollOutcome::Resolved {
                additions,
                ended,
                final_message,
                transcript_withheld,
            } => {
                self.phase = PollPhase::Resolved;
                self.last_error = None;
                self.append_delivered(additions);
                if transcript_withheld {
                    self.append_notice(status::TRANSCRIPT_WITHHELD);
                }
                if ended {
                    self.end_session(
                        final_message.unwrap_or_else(|| status::DEFAULT_ENDED.to_string()),
                    );
                    return Some(PollPhase::Resolved);
                }
            }
            PollOutcome::TimedOut { attempts } => {
                warn!(%id, attempts, "command timed out");
                self.phase = PollPhase::TimedOut;
                self.fail_with(status::POLL_TIMEOUT.to_string());
            }
            PollOutcome::Failed(failure) => {
                warn!(%id, ?failure, "command failed");
                self.phase = PollPhase::Failed;
                self.fail_with(status::describe_poll_failure(&failure));
            }
            PollOutcome::Cancelled => {
                // Only reachable if the task was stopped from outside the controller.
                warn!(%id, "polling stopped unexpectedly");
                self.phase = PollPhase::Failed;
                self.fail_with("Polling was interrupted. Try the command again.".to_string());
            }
        }
        self.publish();
        Some(self.phase)
    }

    /// Terminal transition. Returns false if the session had already ended.
    pub fn end_session(&mut self, message: impl Into<String>) -> bool {
        if !self.session.end() {
            return false;
        }
        let message = message.into();
        self.starting = false;
        self.outstanding = None;
        self.pending = None;
        self.progress = None;
        self.phase = PollPhase::Idle;
        self.ended_message = Some(message.clone());
        info!(%message, "session ended");
        let _ = self.event_tx.send(SessionEvent::Ended { message });
        self.publish();
        true
    }

    /// Start and wait for the reply on the current task.
    pub async fn start_session(&mut self) -> StartOutcome {
        if !self.begin_start() {
            return StartOutcome::Ignored;
        }
        let backend = self.backend.clone();
        let res = backend.start().await;
        self.complete_start(res)
    }

    /// Submit and, if the backend defers, poll to completion on the current task.
    pub async fn submit_command(&mut self, text: &str) -> SubmitOutcome {
        let Some(request) = self.begin_submit(text) else {
            return SubmitOutcome::Ignored;
        };
        let backend = self.backend.clone();
        let res = backend.command(&request).await;
        match self.complete_submit(request.client_token, res) {
            SubmitOutcome::Pending(work) => self.poll_inline(work).await,
            other => other,
        }
    }

    async fn poll_inline(&mut self, work: PendingWork) -> SubmitOutcome {
        let backend = self.backend.clone();
        let id = work.id.clone();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let poll = poller::poll_until_settled(PollParams {
            backend: backend.as_ref(),
            work,
            interval: self.poll_cfg.interval,
            progress_tx: &progress_tx,
            cancel: Arc::new(AtomicBool::new(false)),
        });
        tokio::pin!(poll);

        let outcome = loop {
            tokio::select! {
                outcome = &mut poll => break outcome,
                Some(p) = progress_rx.recv() => self.apply_progress(p),
            }
        };

        match self.complete_poll(&id, outcome) {
            Some(PollPhase::Resolved) if self.session.ended() => SubmitOutcome::Ended,
            Some(PollPhase::Resolved) => SubmitOutcome::Completed,
            Some(PollPhase::TimedOut) => SubmitOutcome::TimedOut,
            Some(_) => SubmitOutcome::Failed,
            None => SubmitOutcome::Ignored,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Start,
    Command(ClientToken),
}

enum Completion {
    Started(Result<StartResponse, BackendError>),
    Submitted(ClientToken, Result<CommandResponse, BackendError>),
}

impl RequestKind {
    fn failed(self, reason: String) -> Completion {
        let err = BackendError::Transport(reason);
        match self {
            RequestKind::Start => Completion::Started(Err(err)),
            RequestKind::Command(token) => Completion::Submitted(token, Err(err)),
        }
    }
}

/// Internal handle for the single start/command request in flight.
struct InFlight {
    kind: RequestKind,
    handle: Option<tokio::task::JoinHandle<Completion>>,
}

fn spawn_start(backend: &Arc<dyn GameBackend>) -> InFlight {
    let backend = backend.clone();
    let handle = tokio::spawn(async move { Completion::Started(backend.start().await) });
    InFlight {
        kind: RequestKind::Start,
        handle: Some(handle),
    }
}

fn spawn_command(backend: &Arc<dyn GameBackend>, request: CommandRequest) -> InFlight {
    let backend = backend.clone();
    let token = request.client_token;
    let handle = tokio::spawn(async move {
        Completion::Submitted(request.client_token, backend.command(&request).await)
    });
    InFlight {
        kind: RequestKind::Command(token),
        handle: Some(handle),
    }
}

/// Fetch the character sheet for the side panel. Failures are logged and never touch the
/// core state.
pub(crate) async fn fetch_character(backend: &dyn GameBackend) -> Option<CharacterSheet> {
    match backend.character().await {
        Ok(resp) if resp.success => resp.character,
        Ok(resp) => {
            debug!(error = ?resp.error, "character sheet unavailable");
            None
        }
        Err(e) => {
            debug!(error = %e, "character sheet fetch failed");
            None
        }
    }
}

fn spawn_character_refresh(
    backend: &Arc<dyn GameBackend>,
    event_tx: &UnboundedSender<SessionEvent>,
) {
    let backend = backend.clone();
    let event_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Some(sheet) = fetch_character(backend.as_ref()).await {
            let _ = event_tx.send(SessionEvent::Character(Box::new(sheet)));
        }
    });
}

/// Drive the controller from UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    cfg: &ClientConfig,
    backend: Arc<dyn GameBackend>,
    event_tx: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut ctl = CommandController::new(backend.clone(), cfg.poll, event_tx.clone());
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<PollProgress>();
    let mut inflight: Option<InFlight> = None;
    let mut poll: Option<PollHandle> = None;

    ctl.publish();
    spawn_character_refresh(&backend, &event_tx);
    if cfg.start_on_launch && ctl.begin_start() {
        inflight = Some(spawn_start(&backend));
    }

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start) => {
                        if ctl.begin_start() {
                            inflight = Some(spawn_start(&backend));
                        }
                    }
                    Some(UiCommand::Submit(text)) => {
                        if let Some(request) = ctl.begin_submit(&text) {
                            inflight = Some(spawn_command(&backend, request));
                        }
                    }
                    Some(UiCommand::RefreshCharacter) => {
                        spawn_character_refresh(&backend, &event_tx);
                    }
                    Some(UiCommand::Quit) | None => break Ok(()),
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(f) = &mut inflight {
                    if let Some(h) = f.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let (Some(join_res), Some(f)) = (maybe_done, inflight.take()) {
                    let kind = f.kind;
                    let completion = join_res
                        .unwrap_or_else(|e| kind.failed(format!("request task failed: {e}")));
                    match completion {
                        Completion::Started(res) => {
                            if ctl.complete_start(res) == StartOutcome::Started {
                                spawn_character_refresh(&backend, &event_tx);
                            }
                        }
                        Completion::Submitted(token, res) => match ctl.complete_submit(token, res) {
                            SubmitOutcome::Pending(work) => {
                                // At most one polling cycle system-wide.
                                if let Some(mut old) = poll.take() {
                                    old.cancel();
                                }
                                poll = Some(poller::spawn_poll(
                                    backend.clone(),
                                    work,
                                    cfg.poll.interval,
                                    progress_tx.clone(),
                                ));
                            }
                            SubmitOutcome::Completed | SubmitOutcome::Ended => {
                                spawn_character_refresh(&backend, &event_tx);
                            }
                            _ => {}
                        },
                    }
                }
            }
            maybe_polled = async {
                if let Some(p) = &mut poll {
                    if let Some(h) = p.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let (Some(join_res), Some(p)) = (maybe_polled, poll.take()) {
                    let outcome = join_res.unwrap_or_else(|e| {
                        PollOutcome::Failed(PollFailure::Request(BackendError::Transport(
                            format!("poll task failed: {e}"),
                        )))
                    });
                    if ctl.complete_poll(&p.id, outcome) == Some(PollPhase::Resolved) {
                        spawn_character_refresh(&backend, &event_tx);
                    }
                }
            }
            Some(progress) = progress_rx.recv() => ctl.apply_progress(progress),
        }
    };

    if let Some(mut p) = poll.take() {
        p.cancel();
    }
    if let Some(f) = inflight.take() {
        if let Some(h) = f.handle {
            h.abort();
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{pending, resolved, start_ok, still_processing, ScriptedBackend};
    use crate::model::Severity;
    use std::time::Duration;

    fn controller(
        backend: &Arc<ScriptedBackend>,
    ) -> (CommandController, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend: Arc<dyn GameBackend> = backend.clone();
        (CommandController::new(backend, PollConfig::default(), tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn welcome() -> Vec<HistoryEntry> {
        vec![HistoryEntry::new(EntryKind::System, "Welcome")]
    }

    fn texts(ctl: &CommandController) -> Vec<String> {
        ctl.transcript()
            .entries()
            .iter()
            .map(|e| e.text.clone())
            .collect()
    }

    fn error_count(ctl: &CommandController) -> usize {
        ctl.transcript()
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::Error)
            .count()
    }

    async fn started(
        backend: &Arc<ScriptedBackend>,
    ) -> (CommandController, UnboundedReceiver<SessionEvent>) {
        backend.push_start(Ok(start_ok(welcome())));
        let (mut ctl, rx) = controller(backend);
        assert_eq!(ctl.start_session().await, StartOutcome::Started);
        (ctl, rx)
    }

    #[tokio::test]
    async fn start_appends_initial_transcript_and_unlocks_input() {
        let backend = Arc::new(ScriptedBackend::default());
        let (ctl, mut rx) = started(&backend).await;

        assert_eq!(texts(&ctl), vec!["Welcome"]);
        assert!(ctl.session().input_enabled());
        assert_eq!(ctl.transcript().placeholder(), None);
        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::TranscriptAppended {
            entries: welcome(),
            placeholder_cleared: true,
        }));
        assert_eq!(events.last(), Some(&SessionEvent::InputEnabled(true)));
    }

    #[tokio::test]
    async fn start_failure_surfaces_error_and_allows_retry() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_start(Err(BackendError::Transport("refused".into())));
        backend.push_start(Ok(start_ok(welcome())));
        let (mut ctl, _rx) = controller(&backend);

        assert_eq!(ctl.start_session().await, StartOutcome::Failed);
        assert!(!ctl.session().started());
        assert!(!ctl.session().input_enabled());
        assert_eq!(ctl.status().severity, Severity::Error);
        assert_eq!(ctl.transcript().placeholder(), Some(START_PROMPT));

        assert_eq!(ctl.start_session().await, StartOutcome::Started);
        assert_eq!(ctl.status().severity, Severity::Ready);
        assert_eq!(*backend.start_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn start_is_ignored_once_started() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, _rx) = started(&backend).await;

        assert_eq!(ctl.start_session().await, StartOutcome::Ignored);
        assert_eq!(*backend.start_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_before_start_or_blank_is_a_silent_no_op() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, mut rx) = controller(&backend);

        assert_eq!(ctl.submit_command("look").await, SubmitOutcome::Ignored);
        assert!(drain(&mut rx).is_empty());

        let (mut ctl, mut rx) = started(&backend).await;
        drain(&mut rx);
        assert_eq!(ctl.submit_command("   ").await, SubmitOutcome::Ignored);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(backend.command_count(), 0);
    }

    #[tokio::test]
    async fn deferred_command_hands_off_token_and_blocks_second_submit() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, _rx) = started(&backend).await;

        let request = ctl.begin_submit("look").expect("first submit accepted");
        assert_eq!(request.text, "look");
        assert!(ctl.session().awaiting_result());
        assert!(!ctl.session().input_enabled());

        let outcome = ctl.complete_submit(request.client_token, Ok(pending("abc")));
        let work = match outcome {
            SubmitOutcome::Pending(work) => work,
            other => panic!("expected pending, got {other:?}"),
        };
        assert_eq!(work.id, CommandToken::new("abc"));
        assert_eq!(work.deadline_attempts, 30);
        assert_eq!(ctl.pending(), Some(&work));
        assert!(ctl.session().awaiting_result());
        assert_eq!(ctl.phase(), PollPhase::Polling);

        assert!(ctl.begin_submit("look again").is_none());
        assert_eq!(ctl.submit_command("look again").await, SubmitOutcome::Ignored);
        assert_eq!(backend.command_count(), 0);
    }

    #[tokio::test]
    async fn resolved_poll_appends_exactly_the_additions() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, _rx) = started(&backend).await;
        let request = ctl.begin_submit("look").unwrap();
        ctl.complete_submit(request.client_token, Ok(pending("abc")));

        let phase = ctl.complete_poll(
            &CommandToken::new("abc"),
            PollOutcome::Resolved {
                additions: vec![HistoryEntry::new(EntryKind::Narrative, "A dark room.")],
                ended: false,
                final_message: None,
                transcript_withheld: false,
            },
        );

        assert_eq!(phase, Some(PollPhase::Resolved));
        assert_eq!(texts(&ctl), vec!["Welcome", "A dark room."]);
        assert!(!ctl.session().awaiting_result());
        assert!(ctl.session().input_enabled());
        assert!(ctl.pending().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_through_processing_ticks_appends_only_final_additions() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_command(Ok(pending("abc")));
        backend.push_status(Ok(still_processing(Some("Thinking..."))));
        backend.push_status(Ok(still_processing(Some("Still thinking..."))));
        backend.push_status(Ok(resolved(vec![HistoryEntry::new(
            EntryKind::Narrative,
            "A dark room.",
        )])));
        let (mut ctl, mut rx) = started(&backend).await;
        drain(&mut rx);

        assert_eq!(ctl.submit_command("look").await, SubmitOutcome::Completed);

        assert_eq!(texts(&ctl), vec!["Welcome", "A dark room."]);
        assert_eq!(backend.status_count(), 3);
        assert!(ctl.session().input_enabled());
        let appended: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::TranscriptAppended { .. }))
            .collect();
        assert_eq!(appended.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timeout_reenables_input_with_one_error_entry() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_command(Ok(pending("abc")));
        backend.set_status_fallback(Ok(still_processing(None)));
        let (mut ctl, _rx) = started(&backend).await;

        assert_eq!(ctl.submit_command("look").await, SubmitOutcome::TimedOut);

        assert_eq!(ctl.phase(), PollPhase::TimedOut);
        assert!(ctl.session().input_enabled());
        assert!(ctl.pending().is_none());
        assert_eq!(error_count(&ctl), 1);
        assert_eq!(ctl.transcript().len(), 2);
        assert_eq!(ctl.status(), StatusMessage::new(status::POLL_TIMEOUT, Severity::Error));
    }

    #[tokio::test]
    async fn rejected_command_appends_one_error_and_keeps_session() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_command(Ok(CommandResponse {
            success: false,
            error: Some("crew unavailable".into()),
            ..Default::default()
        }));
        let (mut ctl, _rx) = started(&backend).await;

        assert_eq!(ctl.submit_command("look").await, SubmitOutcome::Failed);

        assert!(ctl.session().started());
        assert!(ctl.session().input_enabled());
        assert_eq!(error_count(&ctl), 1);
        assert!(!ctl
            .transcript()
            .entries()
            .iter()
            .any(|e| e.kind == EntryKind::Narrative));
        assert_eq!(ctl.status().severity, Severity::Error);
    }

    #[tokio::test]
    async fn transport_failure_on_submit_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_command(Err(BackendError::Transport("reset".into())));
        let (mut ctl, _rx) = started(&backend).await;

        assert_eq!(ctl.submit_command("look").await, SubmitOutcome::Failed);
        assert_eq!(backend.command_count(), 1);
        assert!(ctl.session().input_enabled());
        assert_eq!(error_count(&ctl), 1);
    }

    #[tokio::test]
    async fn terminal_reply_ends_session_permanently() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_command(Ok(CommandResponse {
            success: true,
            processing: false,
            ended: true,
            history: vec![HistoryEntry::new(EntryKind::Narrative, "You perish.")],
            final_message: Some("Game over".into()),
            ..Default::default()
        }));
        let (mut ctl, mut rx) = started(&backend).await;

        assert_eq!(ctl.submit_command("die").await, SubmitOutcome::Ended);

        assert_eq!(texts(&ctl), vec!["Welcome", "You perish."]);
        assert!(ctl.session().ended());
        assert!(!ctl.session().started());
        assert!(!ctl.session().input_enabled());
        assert_eq!(ctl.status(), StatusMessage::new("Game over", Severity::Ended));
        assert!(drain(&mut rx).contains(&SessionEvent::Ended {
            message: "Game over".into()
        }));

        assert_eq!(ctl.submit_command("look").await, SubmitOutcome::Ignored);
        assert_eq!(ctl.start_session().await, StartOutcome::Ignored);
        assert!(!ctl.end_session("again"));
        assert_eq!(ctl.status().text, "Game over");
        assert_eq!(backend.command_count(), 1);
    }

    #[tokio::test]
    async fn quit_is_sent_to_the_backend_like_any_command() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_command(Ok(CommandResponse {
            success: true,
            ended: true,
            history: vec![HistoryEntry::new(EntryKind::System, "Farewell.")],
            ..Default::default()
        }));
        let (mut ctl, _rx) = started(&backend).await;

        assert_eq!(ctl.submit_command("quit").await, SubmitOutcome::Ended);

        assert_eq!(backend.sent_commands.lock().unwrap()[0].text, "quit");
        assert!(ctl.session().ended());
        assert_eq!(ctl.status().text, status::DEFAULT_ENDED);
    }

    #[tokio::test]
    async fn poll_resolution_can_end_the_session() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, _rx) = started(&backend).await;
        let request = ctl.begin_submit("open the sarcophagus").unwrap();
        ctl.complete_submit(request.client_token, Ok(pending("7")));

        ctl.complete_poll(
            &CommandToken::new("7"),
            PollOutcome::Resolved {
                additions: vec![HistoryEntry::new(EntryKind::Narrative, "Darkness.")],
                ended: true,
                final_message: None,
                transcript_withheld: false,
            },
        );

        assert!(ctl.session().ended());
        assert_eq!(ctl.status().text, status::DEFAULT_ENDED);
    }

    #[tokio::test]
    async fn stale_replies_are_discarded() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, _rx) = started(&backend).await;
        let request = ctl.begin_submit("look").unwrap();

        let stale = ClientToken(request.client_token.0.wrapping_add(1));
        assert_eq!(
            ctl.complete_submit(stale, Ok(pending("zzz"))),
            SubmitOutcome::Ignored
        );
        assert!(ctl.session().awaiting_result());

        ctl.complete_submit(request.client_token, Ok(pending("abc")));
        let before = ctl.transcript().len();
        assert_eq!(
            ctl.complete_poll(
                &CommandToken::new("old"),
                PollOutcome::Resolved {
                    additions: vec![HistoryEntry::new(EntryKind::Narrative, "ghost")],
                    ended: false,
                    final_message: None,
                    transcript_withheld: false,
                },
            ),
            None
        );
        assert_eq!(ctl.transcript().len(), before);
        assert!(ctl.pending().is_some());

        ctl.apply_progress(PollProgress {
            id: CommandToken::new("old"),
            attempts_made: 9,
            message: Some("ghost progress".into()),
        });
        assert_ne!(ctl.status().text, "ghost progress");
    }

    #[tokio::test]
    async fn end_session_clears_pending_work() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, _rx) = started(&backend).await;
        let request = ctl.begin_submit("look").unwrap();
        ctl.complete_submit(request.client_token, Ok(pending("abc")));

        assert!(ctl.end_session("Farewell"));
        assert!(ctl.pending().is_none());
        assert!(!ctl.session().awaiting_result());
        assert_eq!(
            ctl.complete_poll(
                &CommandToken::new("abc"),
                PollOutcome::TimedOut { attempts: 31 }
            ),
            None
        );
        assert_eq!(error_count(&ctl), 0);
    }

    async fn wait_for(
        rx: &mut UnboundedReceiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(600), rx.recv())
                .await
                .expect("event timeout")
                .expect("controller dropped the event channel");
            if pred(&ev) {
                return ev;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn controller_loop_ignores_submits_while_polling() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_start(Ok(start_ok(welcome())));
        backend.push_command(Ok(pending("abc")));
        backend.push_status(Ok(still_processing(Some("Thinking..."))));
        backend.push_status(Ok(resolved(vec![HistoryEntry::new(
            EntryKind::Narrative,
            "A dark room.",
        )])));

        let cfg = loop_config();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let dyn_backend: Arc<dyn GameBackend> = backend.clone();
        let handle =
            tokio::spawn(async move { run_controller(&cfg, dyn_backend, event_tx, cmd_rx).await });

        wait_for(&mut event_rx, |e| *e == SessionEvent::InputEnabled(true)).await;
        cmd_tx.send(UiCommand::Submit("look".into())).unwrap();
        cmd_tx.send(UiCommand::Submit("look again".into())).unwrap();

        let appended = wait_for(&mut event_rx, |e| {
            matches!(e, SessionEvent::TranscriptAppended { .. })
        })
        .await;
        assert_eq!(
            appended,
            SessionEvent::TranscriptAppended {
                entries: vec![HistoryEntry::new(EntryKind::Narrative, "A dark room.")],
                placeholder_cleared: false,
            }
        );
        wait_for(&mut event_rx, |e| *e == SessionEvent::InputEnabled(true)).await;
        assert_eq!(backend.command_count(), 1);
        assert_eq!(backend.status_count(), 2);

        cmd_tx.send(UiCommand::Quit).unwrap();
        handle.await.unwrap().unwrap();
    }

    fn loop_config() -> ClientConfig {
        ClientConfig {
            base_url: "http://test".into(),
            poll: PollConfig::default(),
            request_timeout: Duration::from_secs(5),
            user_agent: "test".into(),
            start_on_launch: true,
            suggestions: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_request_task_reports_one_error_and_unlocks_input() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_start(Ok(start_ok(welcome())));
        backend
            .panic_on_command
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let cfg = loop_config();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let dyn_backend: Arc<dyn GameBackend> = backend.clone();
        let handle =
            tokio::spawn(async move { run_controller(&cfg, dyn_backend, event_tx, cmd_rx).await });

        wait_for(&mut event_rx, |e| *e == SessionEvent::InputEnabled(true)).await;
        cmd_tx.send(UiCommand::Submit("look".into())).unwrap();
        wait_for(&mut event_rx, |e| *e == SessionEvent::InputEnabled(false)).await;

        let appended = wait_for(&mut event_rx, |e| {
            matches!(e, SessionEvent::TranscriptAppended { .. })
        })
        .await;
        match appended {
            SessionEvent::TranscriptAppended { entries, .. } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].kind, EntryKind::Error);
                assert!(entries[0].text.starts_with("Connection error"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        wait_for(&mut event_rx, |e| *e == SessionEvent::InputEnabled(true)).await;

        cmd_tx.send(UiCommand::Quit).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn quitting_while_polling_stops_status_checks() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_start(Ok(start_ok(welcome())));
        backend.push_command(Ok(pending("abc")));
        backend.set_status_fallback(Ok(still_processing(Some("Thinking..."))));

        let cfg = loop_config();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let dyn_backend: Arc<dyn GameBackend> = backend.clone();
        let handle =
            tokio::spawn(async move { run_controller(&cfg, dyn_backend, event_tx, cmd_rx).await });

        wait_for(&mut event_rx, |e| *e == SessionEvent::InputEnabled(true)).await;
        cmd_tx.send(UiCommand::Submit("look".into())).unwrap();
        wait_for(&mut event_rx, |e| {
            *e == SessionEvent::Status(StatusMessage::new("Thinking...", Severity::Processing))
        })
        .await;

        cmd_tx.send(UiCommand::Quit).unwrap();
        handle.await.unwrap().unwrap();
        let polled = backend.status_count();
        assert!(polled >= 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.status_count(), polled);
    }

    #[tokio::test]
    async fn full_transcript_resend_surfaces_one_notice() {
        let backend = Arc::new(ScriptedBackend::default());
        let (mut ctl, mut rx) = started(&backend).await;
        let request = ctl.begin_submit("look").unwrap();
        ctl.complete_submit(request.client_token, Ok(pending("abc")));
        drain(&mut rx);

        let phase = ctl.complete_poll(
            &CommandToken::new("abc"),
            PollOutcome::Resolved {
                additions: Vec::new(),
                ended: false,
                final_message: None,
                transcript_withheld: true,
            },
        );

        assert_eq!(phase, Some(PollPhase::Resolved));
        assert_eq!(texts(&ctl), vec!["Welcome", status::TRANSCRIPT_WITHHELD]);
        assert_eq!(error_count(&ctl), 0);
        assert!(ctl.session().input_enabled());
        assert_eq!(ctl.status().severity, Severity::Ready);
        let appended: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::TranscriptAppended { .. }))
            .collect();
        assert_eq!(appended.len(), 1);
    }
}
