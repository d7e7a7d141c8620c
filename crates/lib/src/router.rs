//! Session state machine: applies stream events to the active chat and reports what changed.
//!
//! `SessionController` owns the one active `ChatSession`. A turn is opened by
//! `begin_turn`, which hands out a `TurnTicket` tagged with the controller's generation;
//! events, failures and end-of-stream are applied against that ticket. Starting a new
//! chat, loading another chat or opening a new turn bumps the generation, so anything still
//! arriving for an older ticket is dropped.

use crate::forms::FormKind;
use crate::render::{self, ThemeMode};
use crate::session::{new_chat_id, ChatId, ChatSession, HistoryMessage, Message};
use crate::stream::StreamEvent;

/// Shown when the transport fails or the relay answers with an error.
pub const TRANSPORT_ERROR_TEXT: &str = "Error: Could not get a response from the server.";
/// Shown when a turn produces no terminal frame within the turn timeout.
pub const TIMEOUT_ERROR_TEXT: &str =
    "Error: The server took too long to respond. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    TurnOpen,
    StreamingAssistantChunk,
}

/// Handle for one open turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTicket {
    generation: u64,
}

impl TurnTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFailure {
    /// Connection error, non-success status or relay error body.
    Transport,
    /// No terminal frame within the turn timeout.
    Timeout,
}

impl TurnFailure {
    pub fn user_text(self) -> &'static str {
        match self {
            Self::Transport => TRANSPORT_ERROR_TEXT,
            Self::Timeout => TIMEOUT_ERROR_TEXT,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("a turn is already in progress")]
    Busy,
}

/// Observable change to the session, for whatever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEffect {
    MessageAppended { index: usize, message: Message },
    MessageUpdated { index: usize, content: String },
    LoadingChanged(bool),
    FormOpened { kind: FormKind, document: serde_json::Value },
    TitleChanged(String),
    SessionReset { chat_id: ChatId },
}

#[derive(Debug)]
pub struct SessionController {
    session: ChatSession,
    state: TurnState,
    generation: u64,
    /// Running text of the current chunk run.
    chunk_buffer: String,
    /// Message the chunk run writes to.
    chunk_index: Option<usize>,
    theme: ThemeMode,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(ThemeMode::default())
    }
}

impl SessionController {
    pub fn new(theme: ThemeMode) -> Self {
        Self::with_session(ChatSession::new(), theme)
    }

    pub fn with_session(mut session: ChatSession, theme: ThemeMode) -> Self {
        session.loading = false;
        Self {
            session,
            state: TurnState::Idle,
            generation: 0,
            chunk_buffer: String::new(),
            chunk_index: None,
            theme,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn snapshot(&self) -> ChatSession {
        self.session.clone()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn chat_id(&self) -> &str {
        &self.session.chat_id
    }

    pub fn theme(&self) -> ThemeMode {
        self.theme
    }

    pub fn set_theme(&mut self, theme: ThemeMode) {
        self.theme = theme;
    }

    /// True while `ticket` is the current, still open turn.
    pub fn is_turn_open(&self, ticket: &TurnTicket) -> bool {
        ticket.generation == self.generation && self.state != TurnState::Idle
    }

    /// Opens a turn: appends the user's message and sets loading.
    pub fn begin_turn(&mut self, message: Message) -> Result<(TurnTicket, Vec<UiEffect>), RouterError> {
        if self.state != TurnState::Idle {
            return Err(RouterError::Busy);
        }
        self.generation += 1;
        self.state = TurnState::TurnOpen;
        self.reset_chunk_run();
        let mut effects = vec![self.push_message(message)];
        self.session.loading = true;
        effects.push(UiEffect::LoadingChanged(true));
        Ok((
            TurnTicket {
                generation: self.generation,
            },
            effects,
        ))
    }

    /// Applies one event of the turn. Events for a stale or closed turn are ignored.
    pub fn apply(&mut self, ticket: &TurnTicket, event: StreamEvent) -> Vec<UiEffect> {
        if !self.is_turn_open(ticket) {
            log::debug!(
                "router: dropping event for closed or stale turn (ticket {}, current {})",
                ticket.generation,
                self.generation
            );
            return Vec::new();
        }
        if !matches!(event, StreamEvent::Chunk(_)) && self.state == TurnState::StreamingAssistantChunk {
            self.state = TurnState::TurnOpen;
            self.reset_chunk_run();
        }

        match event {
            StreamEvent::Chunk(delta) => self.apply_chunk(&delta),
            StreamEvent::Append(text) => {
                let content = render::display_text(&text, self.theme);
                vec![self.push_message(Message::assistant(content))]
            }
            StreamEvent::Replace(text) => {
                let Some(index) = self.session.messages.len().checked_sub(1) else {
                    log::warn!("router: replace with no message to replace, dropping");
                    return Vec::new();
                };
                self.session.messages[index].content = text.clone();
                vec![UiEffect::MessageUpdated {
                    index,
                    content: text,
                }]
            }
            StreamEvent::OpenForm { kind, document } => vec![UiEffect::FormOpened { kind, document }],
            StreamEvent::UnknownForm { tag } => {
                log::warn!("router: no form handles tag {:?}, dropping payload", tag);
                Vec::new()
            }
            StreamEvent::Progress { node } => {
                log::debug!("router: progress {:?}", node);
                Vec::new()
            }
            StreamEvent::Terminal { title } | StreamEvent::Interrupted { title } => self.close_turn(title),
        }
    }

    /// Ends the turn with one error message. No-op when the turn is already closed.
    pub fn fail_turn(&mut self, ticket: &TurnTicket, failure: TurnFailure) -> Vec<UiEffect> {
        if !self.is_turn_open(ticket) {
            return Vec::new();
        }
        let mut effects = vec![self.push_message(Message::assistant(failure.user_text()))];
        effects.extend(self.close_turn(None));
        effects
    }

    /// The response body ended. Closes the turn if no terminal frame did.
    pub fn end_of_stream(&mut self, ticket: &TurnTicket) -> Vec<UiEffect> {
        if !self.is_turn_open(ticket) {
            return Vec::new();
        }
        log::warn!("router: stream ended without a terminal frame, closing turn");
        self.close_turn(None)
    }

    /// Starts a fresh chat with a new id and the greeting; abandons any open turn.
    pub fn new_chat(&mut self) -> Vec<UiEffect> {
        self.reset(new_chat_id(), vec![Message::greeting()])
    }

    /// Replaces the session with a stored conversation; abandons any open turn.
    pub fn load_history(&mut self, chat_id: impl Into<ChatId>, history: Vec<HistoryMessage>) -> Vec<UiEffect> {
        let theme = self.theme;
        let messages = history.into_iter().map(|m| m.into_message(theme)).collect();
        self.reset(chat_id.into(), messages)
    }

    fn reset(&mut self, chat_id: ChatId, messages: Vec<Message>) -> Vec<UiEffect> {
        let was_loading = self.session.loading;
        self.generation += 1;
        self.state = TurnState::Idle;
        self.reset_chunk_run();
        self.session = ChatSession::with_id(chat_id.clone(), messages);

        let mut effects = Vec::new();
        if was_loading {
            effects.push(UiEffect::LoadingChanged(false));
        }
        effects.push(UiEffect::SessionReset { chat_id });
        effects.extend(
            self.session
                .messages
                .iter()
                .enumerate()
                .map(|(index, message)| UiEffect::MessageAppended {
                    index,
                    message: message.clone(),
                }),
        );
        effects
    }

    fn apply_chunk(&mut self, delta: &str) -> Vec<UiEffect> {
        let mut effects = Vec::new();
        let index = match self.chunk_index {
            Some(index) if self.state == TurnState::StreamingAssistantChunk => index,
            _ => {
                self.state = TurnState::StreamingAssistantChunk;
                self.chunk_buffer.clear();
                effects.push(self.push_message(Message::assistant("")));
                let index = self.session.messages.len() - 1;
                self.chunk_index = Some(index);
                index
            }
        };
        self.chunk_buffer.push_str(delta);
        self.session.messages[index].content = self.chunk_buffer.clone();
        effects.push(UiEffect::MessageUpdated {
            index,
            content: self.chunk_buffer.clone(),
        });
        effects
    }

    fn close_turn(&mut self, title: Option<String>) -> Vec<UiEffect> {
        self.state = TurnState::Idle;
        self.reset_chunk_run();
        self.session.loading = false;
        let mut effects = Vec::new();
        if let Some(title) = title {
            self.session.title = Some(title.clone());
            effects.push(UiEffect::TitleChanged(title));
        }
        effects.push(UiEffect::LoadingChanged(false));
        effects
    }

    fn push_message(&mut self, message: Message) -> UiEffect {
        self.session.messages.push(message.clone());
        UiEffect::MessageAppended {
            index: self.session.messages.len() - 1,
            message,
        }
    }

    fn reset_chunk_run(&mut self) {
        self.chunk_buffer.clear();
        self.chunk_index = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Sender, GREETING};
    use serde_json::json;

    fn open(ctrl: &mut SessionController, text: &str) -> TurnTicket {
        let (ticket, _) = ctrl.begin_turn(Message::user(text, Vec::new())).unwrap();
        ticket
    }

    fn loading_matches_state(ctrl: &SessionController) {
        assert_eq!(ctrl.session().loading, ctrl.state() != TurnState::Idle);
    }

    #[test]
    fn begin_turn_appends_user_message_optimistically() {
        let mut ctrl = SessionController::default();
        let (_, effects) = ctrl.begin_turn(Message::user("hello", Vec::new())).unwrap();
        let last = ctrl.session().last().unwrap();
        assert_eq!(last.content, "hello");
        assert!(last.attachments.is_empty());
        assert!(last.is_user());
        assert!(ctrl.session().loading);
        assert_eq!(ctrl.state(), TurnState::TurnOpen);
        assert_eq!(effects.last(), Some(&UiEffect::LoadingChanged(true)));
        loading_matches_state(&ctrl);
    }

    #[test]
    fn second_turn_is_rejected_while_loading() {
        let mut ctrl = SessionController::default();
        open(&mut ctrl, "one");
        let before = ctrl.session().messages.len();
        assert_eq!(
            ctrl.begin_turn(Message::user("two", Vec::new())).unwrap_err(),
            RouterError::Busy
        );
        assert_eq!(ctrl.session().messages.len(), before);
    }

    #[test]
    fn chunks_concatenate_into_one_message() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        let len = ctrl.session().messages.len();
        ctrl.apply(&t, StreamEvent::Chunk("Hel".into()));
        assert_eq!(ctrl.state(), TurnState::StreamingAssistantChunk);
        ctrl.apply(&t, StreamEvent::Chunk("lo".into()));
        assert_eq!(ctrl.session().messages.len(), len + 1);
        let last = ctrl.session().last().unwrap();
        assert_eq!(last.content, "Hello");
        assert_eq!(last.sender, Sender::Assistant);
    }

    #[test]
    fn non_chunk_event_ends_the_chunk_run() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        ctrl.apply(&t, StreamEvent::Chunk("first".into()));
        ctrl.apply(&t, StreamEvent::Progress { node: Some("tool".into()) });
        assert_eq!(ctrl.state(), TurnState::TurnOpen);
        ctrl.apply(&t, StreamEvent::Chunk("second".into()));
        let msgs = &ctrl.session().messages;
        assert_eq!(msgs[msgs.len() - 2].content, "first");
        assert_eq!(msgs[msgs.len() - 1].content, "second");
    }

    #[test]
    fn append_grows_and_replace_keeps_length() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        let len = ctrl.session().messages.len();
        ctrl.apply(&t, StreamEvent::Append("Working".into()));
        assert_eq!(ctrl.session().messages.len(), len + 1);
        let effects = ctrl.apply(&t, StreamEvent::Replace("Done".into()));
        assert_eq!(ctrl.session().messages.len(), len + 1);
        assert_eq!(ctrl.session().last().unwrap().content, "Done");
        assert_eq!(
            effects,
            vec![UiEffect::MessageUpdated { index: len, content: "Done".into() }]
        );
    }

    #[test]
    fn replace_on_empty_session_is_dropped() {
        let mut ctrl = SessionController::default();
        ctrl.load_history("c1", Vec::new());
        let (t, _) = ctrl.begin_turn(Message::user("x", Vec::new())).unwrap();
        ctrl.session.messages.clear();
        assert!(ctrl.apply(&t, StreamEvent::Replace("nope".into())).is_empty());
        assert!(ctrl.session().messages.is_empty());
    }

    #[test]
    fn form_payload_never_adds_a_message() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "new deal");
        let len = ctrl.session().messages.len();
        let effects = ctrl.apply(
            &t,
            StreamEvent::OpenForm { kind: FormKind::Rpa, document: json!({"Address": "1 Main"}) },
        );
        assert_eq!(
            effects,
            vec![UiEffect::FormOpened { kind: FormKind::Rpa, document: json!({"Address": "1 Main"}) }]
        );
        ctrl.apply(&t, StreamEvent::UnknownForm { tag: "LEASE".into() });
        assert_eq!(ctrl.session().messages.len(), len);
        assert!(ctrl.session().loading);
    }

    #[test]
    fn terminal_clears_loading_once_and_sets_title() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        let effects = ctrl.apply(&t, StreamEvent::Terminal { title: Some("Oak Ave".into()) });
        assert_eq!(
            effects,
            vec![
                UiEffect::TitleChanged("Oak Ave".into()),
                UiEffect::LoadingChanged(false)
            ]
        );
        assert_eq!(ctrl.session().title.as_deref(), Some("Oak Ave"));
        assert_eq!(ctrl.state(), TurnState::Idle);
        loading_matches_state(&ctrl);

        assert!(ctrl.apply(&t, StreamEvent::Interrupted { title: None }).is_empty());
        assert!(ctrl.end_of_stream(&t).is_empty());
        assert!(ctrl.fail_turn(&t, TurnFailure::Transport).is_empty());
    }

    #[test]
    fn transport_failure_appends_exactly_one_error() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        ctrl.apply(&t, StreamEvent::Chunk("partial".into()));
        let len = ctrl.session().messages.len();
        ctrl.fail_turn(&t, TurnFailure::Transport);
        ctrl.fail_turn(&t, TurnFailure::Transport);
        assert_eq!(ctrl.session().messages.len(), len + 1);
        assert_eq!(ctrl.session().last().unwrap().content, TRANSPORT_ERROR_TEXT);
        assert!(!ctrl.session().loading);
        loading_matches_state(&ctrl);
    }

    #[test]
    fn timeout_failure_uses_timeout_text() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        ctrl.fail_turn(&t, TurnFailure::Timeout);
        assert_eq!(ctrl.session().last().unwrap().content, TIMEOUT_ERROR_TEXT);
        assert_eq!(ctrl.state(), TurnState::Idle);
    }

    #[test]
    fn end_of_stream_without_terminal_closes_turn() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        ctrl.apply(&t, StreamEvent::Append("answer".into()));
        assert_eq!(ctrl.end_of_stream(&t), vec![UiEffect::LoadingChanged(false)]);
        assert!(!ctrl.session().loading);
    }

    #[test]
    fn new_chat_discards_in_flight_turn() {
        let mut ctrl = SessionController::default();
        let old_id = ctrl.chat_id().to_string();
        let t = open(&mut ctrl, "hi");
        let effects = ctrl.new_chat();
        assert_eq!(effects[0], UiEffect::LoadingChanged(false));
        assert!(matches!(effects[1], UiEffect::SessionReset { .. }));
        assert_ne!(ctrl.chat_id(), old_id);
        assert_eq!(ctrl.session().messages.len(), 1);
        assert_eq!(ctrl.session().messages[0].content, GREETING);

        assert!(ctrl.apply(&t, StreamEvent::Append("late".into())).is_empty());
        assert!(ctrl.fail_turn(&t, TurnFailure::Transport).is_empty());
        assert_eq!(ctrl.session().messages.len(), 1);

        let t2 = open(&mut ctrl, "again");
        assert_ne!(t2.generation(), t.generation());
        assert!(ctrl.is_turn_open(&t2));
    }

    #[test]
    fn load_history_replaces_messages() {
        let mut ctrl = SessionController::default();
        let effects = ctrl.load_history(
            "chat-7",
            vec![
                HistoryMessage { role: "human".into(), content: "q".into() },
                HistoryMessage { role: "ai".into(), content: "a".into() },
            ],
        );
        assert_eq!(ctrl.chat_id(), "chat-7");
        assert_eq!(ctrl.session().messages.len(), 2);
        assert!(ctrl.session().messages[0].is_user());
        assert_eq!(effects.len(), 3);
        assert!(ctrl.session().title.is_none());
    }

    #[test]
    fn appended_templates_are_expanded() {
        let mut ctrl = SessionController::new(ThemeMode::Dark);
        let t = open(&mut ctrl, "status?");
        ctrl.apply(
            &t,
            StreamEvent::Append(r#"@@@{"template":"status_bar","data":[{"id":"1","values":[]}]}"#.into()),
        );
        assert!(ctrl.session().last().unwrap().content.starts_with("<table"));
    }

    #[test]
    fn snapshot_is_detached_from_later_turns() {
        let mut ctrl = SessionController::default();
        let t = open(&mut ctrl, "hi");
        ctrl.apply(&t, StreamEvent::Chunk("Hel".into()));
        let snap = ctrl.snapshot();
        assert_eq!(&snap, ctrl.session());

        ctrl.apply(&t, StreamEvent::Chunk("lo".into()));
        ctrl.apply(&t, StreamEvent::Terminal { title: Some("Greeting".into()) });

        assert_eq!(snap.last().unwrap().content, "Hel");
        assert!(snap.loading);
        assert!(snap.title.is_none());
        assert_eq!(ctrl.session().last().unwrap().content, "Hello");
        assert!(!ctrl.session().loading);
    }
}
