//! Window state and the background turn worker.
//!
//! A turn runs on its own thread with its own tokio runtime. The session
//! is moved into the worker for the duration of the turn and handed back
//! through the channel when it finishes, so the UI never blocks on the
//! backends.

use chat_host::{
    Orchestrator, PaneOutcome, SessionConfig, SessionContext, TurnObserver, TurnOptions,
};
use providers::LocalStatus;
use shared::chat::{History, Message, BUDGET_EXHAUSTED_NOTICE};
use shared::error::ChatError;
use shared::settings::ChatSettings;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::modals::PasswordDialog;
use crate::utils::format_error_message;

#[derive(Debug, Clone, PartialEq)]
pub enum PaneBody {
    Idle,
    /// Waiting on a backend that doesn't stream.
    Working,
    Streaming(String),
    Reply(String),
    Notice(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaneView {
    /// Model name shown in the pane header.
    pub model: String,
    pub body: PaneBody,
    pub latency: Option<Duration>,
}

impl PaneView {
    pub fn idle(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            body: PaneBody::Idle,
            latency: None,
        }
    }

    fn show(&mut self, outcome: &PaneOutcome) {
        self.latency = outcome.latency();
        self.body = match outcome {
            PaneOutcome::Reply { text, .. } => PaneBody::Reply(text.clone()),
            PaneOutcome::BudgetExhausted => PaneBody::Notice(BUDGET_EXHAUSTED_NOTICE.to_string()),
            PaneOutcome::Skipped { notice } => PaneBody::Notice(notice.clone()),
            PaneOutcome::Failed { error, .. } => PaneBody::Error(format_error_message(error)),
        };
    }

    fn push_fragment(&mut self, fragment: &str) {
        match &mut self.body {
            PaneBody::Streaming(text) => text.push_str(fragment),
            _ => self.body = PaneBody::Streaming(fragment.to_string()),
        }
    }
}

pub enum WorkerEvent {
    CloudFragment(String),
    CloudFinished(PaneView),
    LocalStarted,
    LocalFinished(PaneView),
    /// Last event of a turn. Carries the session back to the UI thread.
    Finished(Box<SessionContext>),
}

/// Forwards turn progress to the UI thread and wakes it up.
struct ChannelObserver {
    tx: Sender<WorkerEvent>,
    ctx: Option<egui::Context>,
    cloud_model: String,
}

impl ChannelObserver {
    fn send(&self, event: WorkerEvent) {
        let _ = self.tx.send(event);
        if let Some(ctx) = &self.ctx {
            ctx.request_repaint();
        }
    }
}

impl TurnObserver for ChannelObserver {
    fn cloud_fragment(&self, text: &str) {
        self.send(WorkerEvent::CloudFragment(text.to_string()));
    }

    fn cloud_finished(&self, outcome: &PaneOutcome) {
        let mut view = PaneView::idle(self.cloud_model.clone());
        view.show(outcome);
        self.send(WorkerEvent::CloudFinished(view));
    }

    fn local_started(&self) {
        self.send(WorkerEvent::LocalStarted);
    }
}

pub struct AppState {
    pub settings: ChatSettings,
    orchestrator: Arc<Orchestrator>,
    budget_file: PathBuf,
    admin_secret: Option<Zeroizing<String>>,
    /// `None` while a turn is running.
    session: Option<SessionContext>,
    /// History as it was when the running turn started.
    history_backup: Option<History>,
    /// What the history view shows; refreshed from the session.
    pub transcript: Vec<Message>,
    pub input_text: String,
    pub cloud_pane: PaneView,
    pub local_pane: PaneView,
    pub local_status: LocalStatus,
    pub budget_used: f64,
    pub admin_available: bool,
    pub admin_unlocked: bool,
    pub password_dialog: PasswordDialog,
    pub status: Option<String>,
    worker_rx: Option<Receiver<WorkerEvent>>,
}

impl AppState {
    pub fn new(
        settings: ChatSettings,
        orchestrator: Arc<Orchestrator>,
        budget_file: PathBuf,
        admin_secret: Option<Zeroizing<String>>,
    ) -> Self {
        let local_status = orchestrator.local_backend().status(settings.local_enabled);
        let mut state = Self {
            cloud_pane: PaneView::idle(settings.selected_cloud.clone()),
            local_pane: PaneView::idle(settings.selected_local.clone()),
            settings,
            orchestrator,
            budget_file,
            admin_secret,
            session: None,
            history_backup: None,
            transcript: Vec::new(),
            input_text: String::new(),
            local_status,
            budget_used: 0.0,
            admin_available: false,
            admin_unlocked: false,
            password_dialog: PasswordDialog::new("admin_unlock"),
            status: None,
            worker_rx: None,
        };
        state.start_session();
        state
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            budget_file: self.budget_file.clone(),
            admin_secret: self.admin_secret.clone(),
        }
    }

    fn start_session(&mut self) {
        let session = SessionContext::start(self.session_config());
        self.adopt_session(session);
    }

    fn adopt_session(&mut self, session: SessionContext) {
        self.transcript = session.history().iter().cloned().collect();
        self.budget_used = session.ledger().used();
        self.admin_available = session.admin().is_available();
        self.admin_unlocked = session.admin().is_unlocked();
        self.session = Some(session);
    }

    pub fn is_busy(&self) -> bool {
        self.worker_rx.is_some()
    }

    /// Name of the local runner executable, for display.
    pub fn local_tool(&self) -> &str {
        self.orchestrator.local_backend().tool()
    }

    pub fn remaining_budget(&self) -> f64 {
        chat_host::budget::remaining(self.settings.budget.ceiling, self.budget_used)
    }

    pub fn refresh_local_status(&mut self) {
        self.local_status = self
            .orchestrator
            .local_backend()
            .status(self.settings.local_enabled);
    }

    /// Start a turn with the current input. Blank input and input sent
    /// while a turn is running are ignored.
    pub fn submit(&mut self, ctx: Option<egui::Context>) {
        if self.is_busy() || self.input_text.trim().is_empty() {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        self.history_backup = Some(session.history().clone());
        let input = std::mem::take(&mut self.input_text);
        let options = TurnOptions::from(&self.settings);
        self.transcript.push(Message::user(input.trim()));
        self.cloud_pane = PaneView::idle(options.cloud_model.clone());
        self.cloud_pane.body = if options.stream {
            PaneBody::Streaming(String::new())
        } else {
            PaneBody::Working
        };
        self.local_pane = PaneView::idle(options.local_model.clone());
        self.status = None;

        let (tx, rx) = mpsc::channel();
        self.worker_rx = Some(rx);
        let orchestrator = Arc::clone(&self.orchestrator);

        std::thread::spawn(move || {
            let observer = ChannelObserver {
                tx: tx.clone(),
                ctx,
                cloud_model: options.cloud_model.clone(),
            };
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("failed to start async runtime: {}", e);
                    observer.send(WorkerEvent::Finished(Box::new(session)));
                    return;
                }
            };
            let outcome =
                rt.block_on(orchestrator.run_turn(&mut session, &input, &options, &observer));
            if let Some(outcome) = outcome {
                let mut view = PaneView::idle(options.local_model.clone());
                view.show(&outcome.local);
                observer.send(WorkerEvent::LocalFinished(view));
            }
            observer.send(WorkerEvent::Finished(Box::new(session)));
        });
    }

    /// Drain worker events. Call once per frame.
    pub fn poll_worker(&mut self) {
        let Some(rx) = self.worker_rx.take() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(WorkerEvent::CloudFragment(text)) => self.cloud_pane.push_fragment(&text),
                Ok(WorkerEvent::CloudFinished(view)) => self.cloud_pane = view,
                Ok(WorkerEvent::LocalStarted) => self.local_pane.body = PaneBody::Working,
                Ok(WorkerEvent::LocalFinished(view)) => self.local_pane = view,
                Ok(WorkerEvent::Finished(session)) => {
                    self.history_backup = None;
                    self.adopt_session(*session);
                    return;
                }
                Err(TryRecvError::Empty) => {
                    self.worker_rx = Some(rx);
                    return;
                }
                Err(TryRecvError::Disconnected) => {
                    error!("turn worker exited without returning the session; resuming from the last snapshot");
                    let history = self.history_backup.take().unwrap_or_default();
                    let session = SessionContext::resume(self.session_config(), history);
                    self.adopt_session(session);
                    self.cloud_pane.body = PaneBody::Error("The turn was interrupted.".into());
                    self.local_pane.body = PaneBody::Idle;
                    self.status = Some(
                        "The last turn crashed and its replies were lost. Earlier messages are kept; \
                         admin unlock has to be repeated."
                            .into(),
                    );
                    return;
                }
            }
        }
    }

    pub fn unlock_admin(&mut self, attempt: &str) -> Result<(), ChatError> {
        let Some(session) = self.session.as_mut() else {
            return Err(ChatError::Locked);
        };
        let result = session.unlock_admin(attempt);
        self.admin_unlocked = session.admin().is_unlocked();
        result
    }

    pub fn admin_reset(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.admin_reset() {
            Ok(()) => {
                info!("admin reset from the settings panel");
                let session = self.session.take();
                if let Some(session) = session {
                    self.adopt_session(session);
                }
                self.cloud_pane = PaneView::idle(self.settings.selected_cloud.clone());
                self.local_pane = PaneView::idle(self.settings.selected_local.clone());
                self.status = Some("History and budget cleared.".into());
            }
            Err(e) => {
                warn!("admin reset refused: {}", e);
                self.status = Some(e.to_string());
            }
        }
    }
}
