//! Turn orchestration.
//!
//! One submission runs start to finish before the next is accepted:
//! append the user message, ask the cloud model, then ask the local
//! model. The two calls are sequential. Nothing is retried.
//!
//! Both backends see the history as it stands right after the user's
//! message is appended, so the local model never sees the cloud reply to
//! the same turn.

use anyhow::{anyhow, Result};
use providers::{CloudBackend, CloudReply, CloudRequest, LocalBackend};
use shared::agent_api::StreamChunk;
use shared::chat::{Message, BUDGET_EXHAUSTED_NOTICE};
use shared::error::ChatError;
use shared::settings::{clamp_max_tokens, clamp_temperature, ChatSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::session::SessionContext;

/// Per-turn knobs, taken from the settings at submit time.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOptions {
    pub cloud_model: String,
    pub local_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub local_enabled: bool,
    pub stream: bool,
    pub ceiling: f64,
    pub cost_per_token: f64,
}

impl From<&ChatSettings> for TurnOptions {
    fn from(s: &ChatSettings) -> Self {
        Self {
            cloud_model: s.selected_cloud.clone(),
            local_model: s.selected_local.clone(),
            temperature: clamp_temperature(s.temperature),
            max_tokens: clamp_max_tokens(s.max_tokens),
            local_enabled: s.local_enabled,
            stream: s.stream,
            ceiling: s.budget.ceiling,
            cost_per_token: s.budget.cost_per_token,
        }
    }
}

/// What one backend produced for a turn.
#[derive(Debug)]
pub enum PaneOutcome {
    Reply {
        text: String,
        latency: Duration,
        /// Tokens charged to the budget. `None` for the local model.
        tokens: Option<u64>,
    },
    /// Cloud call skipped because the ceiling was reached.
    BudgetExhausted,
    /// Backend not attempted (local runner off or missing).
    Skipped { notice: String },
    Failed { error: ChatError, latency: Duration },
}

impl PaneOutcome {
    pub fn latency(&self) -> Option<Duration> {
        match self {
            PaneOutcome::Reply { latency, .. } | PaneOutcome::Failed { latency, .. } => {
                Some(*latency)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub cloud: PaneOutcome,
    pub local: PaneOutcome,
}

/// Progress hooks for a running turn. All methods default to no-ops.
pub trait TurnObserver: Send + Sync {
    fn cloud_fragment(&self, _text: &str) {}
    fn cloud_finished(&self, _outcome: &PaneOutcome) {}
    fn local_started(&self) {}
}

impl TurnObserver for () {}

/// Rough token estimate used when the service leaves usage out.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

pub struct Orchestrator {
    cloud: Arc<dyn CloudBackend>,
    local: Arc<dyn LocalBackend>,
}

impl Orchestrator {
    pub fn new(cloud: Arc<dyn CloudBackend>, local: Arc<dyn LocalBackend>) -> Self {
        Self { cloud, local }
    }

    pub fn local_backend(&self) -> &dyn LocalBackend {
        self.local.as_ref()
    }

    /// Run one turn. Blank input is ignored and returns `None`.
    pub async fn run_turn(
        &self,
        session: &mut SessionContext,
        input: &str,
        options: &TurnOptions,
        observer: &dyn TurnObserver,
    ) -> Option<TurnOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        session.append(Message::user(input));
        let cloud_context = session.history().cloud_context();
        let transcript = session.history().transcript();

        let cloud = self.cloud_turn(session, cloud_context, options, observer).await;
        observer.cloud_finished(&cloud);

        let local = self.local_turn(session, &transcript, options, observer).await;

        info!(
            session = %session.id(),
            cloud_model = %options.cloud_model,
            local_model = %options.local_model,
            cloud_latency = ?cloud.latency(),
            local_latency = ?local.latency(),
            history_len = session.history().len(),
            "turn complete"
        );
        Some(TurnOutcome { cloud, local })
    }

    async fn cloud_turn(
        &self,
        session: &mut SessionContext,
        messages: Vec<shared::agent_api::ChatMessage>,
        options: &TurnOptions,
        observer: &dyn TurnObserver,
    ) -> PaneOutcome {
        if !session.ledger().allows(options.ceiling) {
            info!(
                used = session.ledger().used(),
                ceiling = options.ceiling,
                "cloud model skipped: budget exhausted"
            );
            session.append(Message::assistant(BUDGET_EXHAUSTED_NOTICE));
            return PaneOutcome::BudgetExhausted;
        }

        let request = CloudRequest {
            model: options.cloud_model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let start = Instant::now();
        let result = if options.stream {
            self.stream_cloud(&request, observer).await
        } else {
            self.cloud.complete(&request).await
        };
        let latency = start.elapsed();

        match result {
            Ok(reply) => {
                let tokens = reply.total_tokens.unwrap_or_else(|| {
                    let prompt: String = request.messages.iter().map(|m| m.content.as_str()).collect();
                    let estimate = estimate_tokens(&prompt) + estimate_tokens(&reply.text);
                    warn!(estimate, "cloud reply had no usage; charging an estimate");
                    estimate
                });
                session.ledger_mut().record(tokens, options.cost_per_token);
                session.append(Message::assistant(reply.text.clone()));
                PaneOutcome::Reply {
                    text: reply.text,
                    latency,
                    tokens: Some(tokens),
                }
            }
            Err(e) => {
                warn!("cloud call failed: {:#}", e);
                PaneOutcome::Failed {
                    error: ChatError::Service(format!("{:#}", e)),
                    latency,
                }
            }
        }
    }

    /// Drain a streamed reply into one buffer, forwarding each fragment.
    async fn stream_cloud(
        &self,
        request: &CloudRequest,
        observer: &dyn TurnObserver,
    ) -> Result<CloudReply> {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamChunk>();
        let producer = self.cloud.stream(request, tx);
        let consumer = async {
            let mut text = String::new();
            let mut total_tokens = None;
            let mut failure = None;
            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::Text(fragment) => {
                        observer.cloud_fragment(&fragment);
                        text.push_str(&fragment);
                    }
                    StreamChunk::Usage { total_tokens: n } => total_tokens = Some(n),
                    StreamChunk::Done { .. } => {}
                    StreamChunk::Error(e) => failure = Some(e),
                }
            }
            (text, total_tokens, failure)
        };

        let (produced, (text, total_tokens, failure)) = tokio::join!(producer, consumer);
        produced?;
        if let Some(e) = failure {
            return Err(anyhow!(e));
        }
        Ok(CloudReply { text, total_tokens })
    }

    async fn local_turn(
        &self,
        session: &mut SessionContext,
        transcript: &str,
        options: &TurnOptions,
        observer: &dyn TurnObserver,
    ) -> PaneOutcome {
        let status = self.local.status(options.local_enabled);
        if let Some(notice) = status.notice() {
            info!("local model skipped: {}", notice);
            return PaneOutcome::Skipped { notice };
        }

        observer.local_started();
        let start = Instant::now();
        let result = self.local.run(&options.local_model, transcript).await;
        let latency = start.elapsed();

        match result {
            Ok(text) => {
                session.append(Message::assistant_local(text.clone()));
                PaneOutcome::Reply {
                    text,
                    latency,
                    tokens: None,
                }
            }
            Err(e) => {
                warn!("local runner failed: {}", e);
                PaneOutcome::Failed {
                    error: e.into(),
                    latency,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use parking_lot::Mutex;
    use providers::LocalStatus;
    use shared::chat::Role;
    use shared::error::ProcessError;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedSender;

    #[derive(Clone, Copy)]
    enum CloudMode {
        Ok,
        Fail,
        StreamBreaks,
    }

    struct FakeCloud {
        mode: Mutex<CloudMode>,
        tokens: Option<u64>,
        requests: Mutex<Vec<CloudRequest>>,
    }

    impl FakeCloud {
        fn new(tokens: Option<u64>) -> Self {
            Self {
                mode: Mutex::new(CloudMode::Ok),
                tokens,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn set_mode(&self, mode: CloudMode) {
            *self.mode.lock() = mode;
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }

        fn reply_text(&self) -> String {
            format!("cloud reply {}", self.calls())
        }
    }

    #[async_trait::async_trait]
    impl CloudBackend for FakeCloud {
        async fn complete(&self, request: &CloudRequest) -> Result<CloudReply> {
            self.requests.lock().push(request.clone());
            match *self.mode.lock() {
                CloudMode::Fail => Err(anyhow!("openai error: 500 Internal Server Error")),
                _ => Ok(CloudReply {
                    text: self.reply_text(),
                    total_tokens: self.tokens,
                }),
            }
        }

        async fn stream(
            &self,
            request: &CloudRequest,
            tx: UnboundedSender<StreamChunk>,
        ) -> Result<()> {
            self.requests.lock().push(request.clone());
            let mode = *self.mode.lock();
            match mode {
                CloudMode::Fail => return Err(anyhow!("connection refused")),
                CloudMode::StreamBreaks => {
                    let _ = tx.send(StreamChunk::Text("partial".into()));
                    let _ = tx.send(StreamChunk::Error("stream read error: reset".into()));
                    return Ok(());
                }
                CloudMode::Ok => {}
            }
            let _ = tx.send(StreamChunk::Text("Hel".into()));
            let _ = tx.send(StreamChunk::Text("lo".into()));
            if let Some(total_tokens) = self.tokens {
                let _ = tx.send(StreamChunk::Usage { total_tokens });
            }
            let _ = tx.send(StreamChunk::Done {
                stop_reason: Some("stop".into()),
            });
            Ok(())
        }
    }

    enum LocalMode {
        Ok,
        Missing,
        Fail,
    }

    struct FakeLocal {
        mode: Mutex<LocalMode>,
        transcripts: Mutex<Vec<String>>,
    }

    impl FakeLocal {
        fn new(mode: LocalMode) -> Self {
            Self {
                mode: Mutex::new(mode),
                transcripts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LocalBackend for FakeLocal {
        fn tool(&self) -> &str {
            "fake-ollama"
        }

        fn status(&self, enabled: bool) -> LocalStatus {
            if !enabled {
                return LocalStatus::Disabled;
            }
            match *self.mode.lock() {
                LocalMode::Missing => LocalStatus::Unavailable {
                    reason: "`fake-ollama` not found on PATH".into(),
                },
                _ => LocalStatus::Available,
            }
        }

        async fn run(&self, model: &str, transcript: &str) -> Result<String, ProcessError> {
            self.transcripts.lock().push(transcript.to_string());
            match *self.mode.lock() {
                LocalMode::Fail => Err(ProcessError::NonZeroExit {
                    code: Some(1),
                    stderr: format!("pull model manifest: file does not exist ({model})"),
                }),
                _ => Ok(format!("local reply {}", self.transcripts.lock().len())),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        fragments: Mutex<Vec<String>>,
        local_started: Mutex<bool>,
    }

    impl TurnObserver for Recorder {
        fn cloud_fragment(&self, text: &str) {
            self.fragments.lock().push(text.to_string());
        }

        fn local_started(&self) {
            *self.local_started.lock() = true;
        }
    }

    struct Harness {
        _dir: TempDir,
        cloud: Arc<FakeCloud>,
        local: Arc<FakeLocal>,
        orchestrator: Orchestrator,
        session: SessionContext,
        options: TurnOptions,
    }

    fn harness(tokens: Option<u64>, local: LocalMode) -> Harness {
        let dir = TempDir::new().unwrap();
        let cloud = Arc::new(FakeCloud::new(tokens));
        let local = Arc::new(FakeLocal::new(local));
        let orchestrator = Orchestrator::new(cloud.clone(), local.clone());
        let session = SessionContext::start(SessionConfig {
            budget_file: dir.path().join("budget.json"),
            admin_secret: None,
        });
        let mut options = TurnOptions::from(&ChatSettings::default());
        options.stream = false;
        Harness {
            _dir: dir,
            cloud,
            local,
            orchestrator,
            session,
            options,
        }
    }

    impl Harness {
        async fn turn(&mut self, input: &str) -> Option<TurnOutcome> {
            self.orchestrator
                .run_turn(&mut self.session, input, &self.options, &())
                .await
        }

        fn roles(&self) -> Vec<Role> {
            self.session.history().iter().map(|m| m.role()).collect()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn test_turn_appends_user_cloud_and_local() {
        let mut h = harness(Some(10), LocalMode::Ok);
        let outcome = h.turn("hi").await.unwrap();
        assert!(matches!(outcome.cloud, PaneOutcome::Reply { .. }));
        assert!(matches!(outcome.local, PaneOutcome::Reply { tokens: None, .. }));
        assert_eq!(h.roles(), vec![Role::User, Role::Assistant, Role::AssistantLocal]);
    }

    #[tokio::test]
    async fn test_history_grows_three_per_turn() {
        let mut h = harness(Some(10), LocalMode::Ok);
        for n in 1..=4 {
            h.turn(&format!("message {n}")).await.unwrap();
            assert_eq!(h.session.history().len(), n * 3);
        }
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let mut h = harness(Some(10), LocalMode::Ok);
        assert!(h.turn("   \n").await.is_none());
        assert!(h.session.history().is_empty());
        assert_eq!(h.cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_budget_scenario() {
        // ceiling 10, 0.003 per token, 2000 tokens per call.
        let mut h = harness(Some(2000), LocalMode::Ok);

        h.turn("one").await.unwrap();
        assert!(approx(h.session.ledger().used(), 6.0));

        // Still under the ceiling when checked, so this call goes through
        // and lands over it.
        h.turn("two").await.unwrap();
        assert!(approx(h.session.ledger().used(), 12.0));
        assert_eq!(h.cloud.calls(), 2);

        let outcome = h.turn("three").await.unwrap();
        assert!(matches!(outcome.cloud, PaneOutcome::BudgetExhausted));
        assert_eq!(h.cloud.calls(), 2);
        assert!(approx(h.session.ledger().used(), 12.0));

        let cloud_entry = h
            .session
            .history()
            .iter()
            .filter(|m| m.role() == Role::Assistant)
            .last()
            .unwrap();
        assert_eq!(cloud_entry.content(), BUDGET_EXHAUSTED_NOTICE);
        // The local model still answers.
        assert!(matches!(outcome.local, PaneOutcome::Reply { .. }));
        assert_eq!(h.session.history().len(), 9);
    }

    #[tokio::test]
    async fn test_cloud_context_excludes_local_replies() {
        let mut h = harness(Some(10), LocalMode::Ok);
        h.turn("hi").await.unwrap();
        h.turn("again").await.unwrap();

        let requests = h.cloud.requests.lock();
        let second: Vec<String> = requests[1]
            .messages
            .iter()
            .map(|m| format!("{}:{}", m.role, m.content))
            .collect();
        assert_eq!(second, vec!["user:hi", "assistant:cloud reply 1", "user:again"]);
        assert_eq!(requests[1].model, "gpt-4o-mini");
        assert_eq!(requests[1].max_tokens, 250);
    }

    #[tokio::test]
    async fn test_local_transcript_sees_own_replies_but_not_same_turn_cloud() {
        let mut h = harness(Some(10), LocalMode::Ok);
        h.turn("hi").await.unwrap();
        h.turn("again").await.unwrap();

        let transcripts = h.local.transcripts.lock();
        assert_eq!(transcripts[0], "User: hi\nAssistant:");
        assert_eq!(
            transcripts[1],
            "User: hi\nAssistant: cloud reply 1\nAssistant: local reply 1\nUser: again\nAssistant:"
        );
    }

    #[tokio::test]
    async fn test_missing_local_runner_is_skipped() {
        let mut h = harness(Some(10), LocalMode::Missing);
        let outcome = h.turn("hi").await.unwrap();
        assert!(matches!(outcome.cloud, PaneOutcome::Reply { .. }));
        match outcome.local {
            PaneOutcome::Skipped { notice } => assert!(notice.contains("not found")),
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(!h.roles().contains(&Role::AssistantLocal));
        assert_eq!(h.session.history().len(), 2);
        assert!(h.local.transcripts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_local_runner_is_skipped() {
        let mut h = harness(Some(10), LocalMode::Ok);
        h.options.local_enabled = false;
        let outcome = h.turn("hi").await.unwrap();
        assert!(matches!(outcome.local, PaneOutcome::Skipped { .. }));
        assert_eq!(h.roles(), vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_local_failure_keeps_session_usable() {
        let mut h = harness(Some(10), LocalMode::Fail);
        let outcome = h.turn("hi").await.unwrap();
        match outcome.local {
            PaneOutcome::Failed { error, .. } => {
                assert!(matches!(error, ChatError::ExternalProcess(_)))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(h.roles(), vec![Role::User, Role::Assistant]);

        *h.local.mode.lock() = LocalMode::Ok;
        h.turn("again").await.unwrap();
        assert_eq!(h.session.history().len(), 5);
    }

    #[tokio::test]
    async fn test_cloud_failure_leaves_history_and_ledger_alone() {
        let mut h = harness(Some(10), LocalMode::Ok);
        h.cloud.set_mode(CloudMode::Fail);
        let outcome = h.turn("hi").await.unwrap();
        match outcome.cloud {
            PaneOutcome::Failed { error, .. } => {
                assert!(error.to_string().contains("500"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(h.session.ledger().used(), 0.0);
        assert_eq!(h.roles(), vec![Role::User, Role::AssistantLocal]);
    }

    #[tokio::test]
    async fn test_streamed_reply_is_buffered_and_forwarded() {
        let mut h = harness(Some(100), LocalMode::Ok);
        h.options.stream = true;
        let recorder = Recorder::default();
        let outcome = h
            .orchestrator
            .run_turn(&mut h.session, "hi", &h.options, &recorder)
            .await
            .unwrap();

        match outcome.cloud {
            PaneOutcome::Reply { text, tokens, .. } => {
                assert_eq!(text, "Hello");
                assert_eq!(tokens, Some(100));
            }
            other => panic!("expected reply, got {other:?}"),
        }
        assert_eq!(*recorder.fragments.lock(), vec!["Hel", "lo"]);
        assert!(*recorder.local_started.lock());
        assert!(approx(h.session.ledger().used(), 0.3));
        assert_eq!(h.session.history().iter().nth(1).map(|m| m.content()), Some("Hello"));
    }

    #[tokio::test]
    async fn test_stream_without_usage_charges_estimate() {
        let mut h = harness(None, LocalMode::Ok);
        h.options.stream = true;
        let outcome = h.turn("abcdefgh").await.unwrap();
        // 8 chars of prompt -> 2, "Hello" -> 1.
        match outcome.cloud {
            PaneOutcome::Reply { tokens, .. } => assert_eq!(tokens, Some(3)),
            other => panic!("expected reply, got {other:?}"),
        }
        assert!(approx(h.session.ledger().used(), 0.009));
    }

    #[tokio::test]
    async fn test_broken_stream_appends_nothing() {
        let mut h = harness(Some(10), LocalMode::Ok);
        h.options.stream = true;
        h.cloud.set_mode(CloudMode::StreamBreaks);
        let outcome = h.turn("hi").await.unwrap();
        assert!(matches!(outcome.cloud, PaneOutcome::Failed { .. }));
        assert_eq!(h.session.ledger().used(), 0.0);
        assert!(!h.roles().contains(&Role::Assistant));
    }

    #[test]
    fn test_options_from_settings_clamp() {
        let settings = ChatSettings {
            temperature: 4.0,
            max_tokens: 10,
            ..ChatSettings::default()
        };
        let opts = TurnOptions::from(&settings);
        assert_eq!(opts.temperature, 1.0);
        assert_eq!(opts.max_tokens, 50);
        assert_eq!(opts.ceiling, 10.0);
    }

    #[test]
    fn test_default_max_tokens_is_sent_as_is() {
        let settings = ChatSettings::default();
        assert_eq!(TurnOptions::from(&settings).max_tokens, settings.max_tokens);
    }
}
