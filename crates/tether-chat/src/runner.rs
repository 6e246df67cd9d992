//! Per-session chat run lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use tether_gateway::{AgentOps, SendAck};
use tether_proto::{ChatEvent, HistoryResult, RunState};

use crate::errors::ChatError;

/// Idle timeout: total silence, not total wall time. Long but active
/// generations keep resetting it.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How many messages the post-run history refresh asks for.
const HISTORY_REFRESH_LIMIT: u32 = 50;

/// Receives accumulated reply text as it streams in. Each call carries the
/// full text so far, not an increment.
pub type DeltaSink = Arc<dyn Fn(&str) + Send + Sync>;

/// How a run ended.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// The reply completed.
    Final {
        /// Full reply text.
        text: String,
        /// Refreshed transcript. Post-hoc enrichment such as tool-call
        /// formatting is only available here, not in the streamed deltas.
        /// Empty when the refresh failed.
        history: HistoryResult,
    },
    /// The run was aborted before completing.
    Aborted {
        /// Whatever text had accumulated.
        partial: String,
    },
    /// The run failed, or went silent past the idle timeout.
    Error {
        /// Failure description.
        message: String,
    },
}

struct ActiveRun {
    run_id: Option<String>,
}

/// Drives one chat send at a time for one session.
///
/// A run issues the send, streams deltas into the sink, and resolves to
/// exactly one [`RunOutcome`]. Events are matched by session key suffix and
/// by run id; a terminal event for another run never completes this one.
pub struct ChatRunner {
    ops: Arc<dyn AgentOps>,
    session_key: String,
    idle_timeout: Duration,
    active: Mutex<Option<ActiveRun>>,
}

impl ChatRunner {
    /// Runner for one session.
    pub fn new(ops: Arc<dyn AgentOps>, session_key: impl Into<String>) -> Self {
        Self {
            ops,
            session_key: session_key.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            active: Mutex::new(None),
        }
    }

    /// Override the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// The session this runner drives.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// The tracked run id, once the ack or the first matching event named it.
    pub fn current_run_id(&self) -> Option<String> {
        self.active.lock().as_ref().and_then(|run| run.run_id.clone())
    }

    /// Send a message and drive the run to its terminal state.
    ///
    /// Refuses to start while another run is in flight. The sink sees the
    /// accumulated text after every delta; the returned outcome is the only
    /// terminal signal.
    pub async fn run(&self, message: &str, sink: DeltaSink) -> Result<RunOutcome, ChatError> {
        {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(ChatError::RunInProgress);
            }
            *active = Some(ActiveRun { run_id: None });
        }
        let _clear = ActiveGuard { runner: self };

        // Subscribe before sending so no event can slip past.
        let (tx, mut rx) = mpsc::unbounded_channel::<ChatEvent>();
        let _sub = self.ops.subscribe_chat(Arc::new(move |ev| {
            let _ = tx.send(ev);
        }));

        let idempotency_key = uuid::Uuid::new_v4().to_string();
        let ack = self
            .ops
            .send_chat(&self.session_key, message, &idempotency_key)
            .await?;

        match ack {
            // Fallback transport: the whole reply came back synchronously.
            SendAck::Completed { text } => {
                sink(&text);
                return Ok(RunOutcome::Final {
                    text,
                    history: HistoryResult::default(),
                });
            }
            SendAck::Accepted { run_id } => {
                if let Some(id) = run_id {
                    if let Some(run) = self.active.lock().as_mut() {
                        run.run_id = Some(id);
                    }
                }
            }
        }

        let mut accumulated = String::new();
        let mut deadline = Instant::now() + self.idle_timeout;
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(ev) = maybe else {
                        return Ok(RunOutcome::Error {
                            message: "Event stream closed before the run finished".into(),
                        });
                    };
                    if !session_matches(&ev.session_key, &self.session_key) {
                        continue;
                    }
                    if !self.correlate(&ev) {
                        continue;
                    }
                    match ev.state {
                        RunState::Delta => {
                            // Each delta carries the full accumulated text.
                            accumulated = ev.message.unwrap_or_default();
                            sink(&accumulated);
                            deadline = Instant::now() + self.idle_timeout;
                        }
                        RunState::Final => {
                            let text = ev.message.unwrap_or(accumulated);
                            let history = self.refresh_history().await;
                            return Ok(RunOutcome::Final { text, history });
                        }
                        RunState::Aborted => {
                            return Ok(RunOutcome::Aborted { partial: accumulated });
                        }
                        RunState::Error => {
                            return Ok(RunOutcome::Error {
                                message: ev
                                    .error_message
                                    .unwrap_or_else(|| "Run failed".into()),
                            });
                        }
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        session_key = %self.session_key,
                        timeout_s = self.idle_timeout.as_secs(),
                        "run went silent past the idle timeout",
                    );
                    return Ok(RunOutcome::Error {
                        message: format!(
                            "No activity for {}s; giving up on the run",
                            self.idle_timeout.as_secs()
                        ),
                    });
                }
            }
        }
    }

    /// Ask the gateway to stop the in-flight run.
    ///
    /// The gateway is authoritative on what actually stops: the run only
    /// resolves when a terminal frame arrives, never optimistically here.
    /// With no run in flight this is a no-op.
    pub async fn abort(&self) -> Result<(), ChatError> {
        let run_id = match self.active.lock().as_ref() {
            Some(run) => run.run_id.clone(),
            None => {
                debug!(session_key = %self.session_key, "abort with no run in flight");
                return Ok(());
            }
        };
        let _ = self.ops.abort(&self.session_key, run_id.as_deref()).await?;
        Ok(())
    }

    /// Decide whether an event belongs to the tracked run, adopting the run
    /// id from the first matching event when the ack did not name one.
    fn correlate(&self, ev: &ChatEvent) -> bool {
        let mut active = self.active.lock();
        let Some(run) = active.as_mut() else {
            return false;
        };
        match &run.run_id {
            Some(id) if *id == ev.run_id => true,
            Some(id) => {
                // Conservatively discard, but leave a trace: this could be a
                // genuinely different run or a stale id from an abort race.
                debug!(
                    tracked = %id,
                    event_run = %ev.run_id,
                    state = ?ev.state,
                    "event for another run discarded",
                );
                false
            }
            None => {
                run.run_id = Some(ev.run_id.clone());
                true
            }
        }
    }

    async fn refresh_history(&self) -> HistoryResult {
        match self.ops.history(&self.session_key, HISTORY_REFRESH_LIMIT).await {
            Ok(history) => history,
            Err(e) => {
                debug!(error = %e, "post-run history refresh failed");
                HistoryResult::default()
            }
        }
    }
}

struct ActiveGuard<'a> {
    runner: &'a ChatRunner,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.runner.active.lock() = None;
    }
}

/// The gateway may namespace session keys with an agent prefix, so match by
/// suffix in either direction. An empty key matches nothing; it would
/// otherwise be a suffix of everything.
fn session_matches(event_key: &str, session_key: &str) -> bool {
    if event_key.is_empty() || session_key.is_empty() {
        return false;
    }
    event_key.ends_with(session_key) || session_key.ends_with(event_key)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tether_gateway::{ChatEventHandler, ChatSubscription, GatewayError};
    use tether_proto::{AbortResult, SessionsResult};

    struct ScriptedOps {
        handler: Arc<Mutex<Option<ChatEventHandler>>>,
        ack: Mutex<SendAck>,
        aborts: Mutex<Vec<Option<String>>>,
        history_calls: Mutex<u32>,
    }

    impl ScriptedOps {
        fn new(ack: SendAck) -> Arc<Self> {
            Arc::new(Self {
                handler: Arc::new(Mutex::new(None)),
                ack: Mutex::new(ack),
                aborts: Mutex::new(Vec::new()),
                history_calls: Mutex::new(0),
            })
        }

        fn emit(&self, session_key: &str, run_id: &str, state: RunState, message: Option<&str>) {
            let handler = self.handler.lock().clone();
            if let Some(h) = handler {
                h(ChatEvent {
                    session_key: session_key.to_owned(),
                    run_id: run_id.to_owned(),
                    state,
                    message: message.map(ToOwned::to_owned),
                    error_message: None,
                });
            }
        }
    }

    #[async_trait]
    impl AgentOps for ScriptedOps {
        async fn send_chat(
            &self,
            _session_key: &str,
            _message: &str,
            _idempotency_key: &str,
        ) -> Result<SendAck, GatewayError> {
            Ok(self.ack.lock().clone())
        }

        async fn history(&self, _s: &str, _l: u32) -> Result<HistoryResult, GatewayError> {
            *self.history_calls.lock() += 1;
            Ok(HistoryResult {
                messages: vec![serde_json::json!({"role": "assistant"})],
            })
        }

        async fn sessions(&self) -> Result<SessionsResult, GatewayError> {
            Ok(SessionsResult::default())
        }

        async fn delete_session(&self, _k: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn set_model(&self, _s: &str, _m: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn set_thinking(&self, _s: &str, _l: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn abort(
            &self,
            _s: &str,
            run_id: Option<&str>,
        ) -> Result<AbortResult, GatewayError> {
            self.aborts.lock().push(run_id.map(ToOwned::to_owned));
            Ok(AbortResult {
                aborted: true,
                run_ids: run_id.map(ToOwned::to_owned).into_iter().collect(),
            })
        }

        fn subscribe_chat(&self, handler: ChatEventHandler) -> ChatSubscription {
            *self.handler.lock() = Some(handler);
            let slot = Arc::clone(&self.handler);
            ChatSubscription::new(move || {
                *slot.lock() = None;
            })
        }
    }

    fn collecting_sink() -> (DeltaSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: DeltaSink = Arc::new(move |text: &str| {
            sink_seen.lock().push(text.to_owned());
        });
        (sink, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn completed_ack_resolves_without_events() {
        let ops = ScriptedOps::new(SendAck::Completed {
            text: "Hello world".into(),
        });
        let runner = ChatRunner::new(ops, "main");
        let (sink, seen) = collecting_sink();

        let outcome = runner.run("hi", sink).await.unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, .. } if text == "Hello world");
        assert_eq!(*seen.lock(), vec!["Hello world"]);
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_replace_accumulated_text_then_final_resolves() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        // Events arrive on a namespaced key; suffix matching lets them through.
        ops.emit("agent:main", "run_1", RunState::Delta, Some("He"));
        ops.emit("agent:main", "run_1", RunState::Delta, Some("Hello"));
        ops.emit("agent:main", "run_1", RunState::Final, Some("Hello world"));

        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, history }
            if text == "Hello world" && history.messages.len() == 1);
        assert_eq!(*seen.lock(), vec!["He", "Hello"]);
        assert_eq!(*ops.history_calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_terminal_for_another_run_is_ignored() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        ops.emit("main", "run_1", RunState::Delta, Some("partial"));
        ops.emit("main", "run_OTHER", RunState::Final, Some("not ours"));
        settle().await;
        assert!(!task.is_finished(), "foreign terminal must not complete the run");

        ops.emit("main", "run_1", RunState::Final, Some("ours"));
        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, .. } if text == "ours");
        assert_eq!(*seen.lock(), vec!["partial"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_id_adopted_from_first_event_when_ack_names_none() {
        let ops = ScriptedOps::new(SendAck::Accepted { run_id: None });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, _seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;
        assert_eq!(runner.current_run_id(), None);

        ops.emit("main", "run_7", RunState::Delta, Some("x"));
        settle().await;
        assert_eq!(runner.current_run_id().as_deref(), Some("run_7"));

        // A different id now counts as foreign.
        ops.emit("main", "run_8", RunState::Final, Some("wrong"));
        settle().await;
        assert!(!task.is_finished());

        ops.emit("main", "run_7", RunState::Final, Some("right"));
        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, .. } if text == "right");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_run_is_refused() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, _seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("first", sink).await });
        settle().await;
        assert!(runner.is_running());

        let (sink2, _) = collecting_sink();
        let err = runner.run("second", sink2).await.unwrap_err();
        assert_matches!(err, ChatError::RunInProgress);

        ops.emit("main", "run_1", RunState::Final, Some("done"));
        let _ = task.await.unwrap().unwrap();
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_idle_timeout_yields_one_error_outcome() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = ChatRunner::new(ops, "main");
        let (sink, seen) = collecting_sink();

        let outcome = runner.run("hi", sink).await.unwrap();
        assert_matches!(outcome, RunOutcome::Error { message } if message.contains("No activity"));
        assert!(seen.lock().is_empty());
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_keep_resetting_the_idle_timer() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(
            ChatRunner::new(ops.clone(), "main").with_idle_timeout(Duration::from_secs(10)),
        );
        let (sink, _seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        // Each delta lands just inside the window, three windows in a row.
        for text in ["a", "ab", "abc"] {
            tokio::time::sleep(Duration::from_secs(8)).await;
            ops.emit("main", "run_1", RunState::Delta, Some(text));
            settle().await;
            assert!(!task.is_finished());
        }

        ops.emit("main", "run_1", RunState::Final, Some("abc!"));
        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, .. } if text == "abc!");
    }

    #[tokio::test(start_paused = true)]
    async fn abort_resolves_only_on_the_terminal_frame() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, _seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        ops.emit("main", "run_1", RunState::Delta, Some("partial an"));
        settle().await;

        runner.abort().await.unwrap();
        assert_eq!(*ops.aborts.lock(), vec![Some("run_1".to_owned())]);
        settle().await;
        assert!(!task.is_finished(), "abort alone must not finalize the run");

        ops.emit("main", "run_1", RunState::Aborted, None);
        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Aborted { partial } if partial == "partial an");
    }

    #[tokio::test(start_paused = true)]
    async fn abort_without_terminal_frame_resolves_at_idle_timeout() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(
            ChatRunner::new(ops.clone(), "main").with_idle_timeout(Duration::from_secs(30)),
        );
        let (sink, _seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        ops.emit("main", "run_1", RunState::Delta, Some("partial"));
        settle().await;

        // The gateway never answers the abort with a terminal frame.
        runner.abort().await.unwrap();
        assert_eq!(*ops.aborts.lock(), vec![Some("run_1".to_owned())]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!task.is_finished(), "the run stays pending past the abort");

        // The idle window since the last delta elapses and produces the
        // single Error transition.
        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Error { message } if message.contains("No activity"));
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn abort_with_no_run_is_a_noop() {
        let ops = ScriptedOps::new(SendAck::Accepted { run_id: None });
        let runner = ChatRunner::new(ops.clone(), "main");
        runner.abort().await.unwrap();
        assert!(ops.aborts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn events_for_other_sessions_are_filtered_out() {
        let ops = ScriptedOps::new(SendAck::Accepted {
            run_id: Some("run_1".into()),
        });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        ops.emit("agent:scratch", "run_1", RunState::Delta, Some("noise"));
        ops.emit("agent:main", "run_1", RunState::Final, Some("signal"));

        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, .. } if text == "signal");
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn session_suffix_matching_rules() {
        assert!(session_matches("main", "main"));
        assert!(session_matches("agent:main", "main"));
        assert!(session_matches("main", "agent:main"));
        assert!(!session_matches("agent:other", "main"));
        assert!(!session_matches("", "main"));
        assert!(!session_matches("main", ""));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_key_event_cannot_pin_the_run() {
        let ops = ScriptedOps::new(SendAck::Accepted { run_id: None });
        let runner = Arc::new(ChatRunner::new(ops.clone(), "main"));
        let (sink, seen) = collecting_sink();

        let r = Arc::clone(&runner);
        let task = tokio::spawn(async move { r.run("hi", sink).await });
        settle().await;

        // A malformed event with an empty key must not adopt its run id.
        ops.emit("", "run_BAD", RunState::Delta, Some("junk"));
        settle().await;
        assert_eq!(runner.current_run_id(), None);

        ops.emit("main", "run_1", RunState::Final, Some("ok"));
        let outcome = task.await.unwrap().unwrap();
        assert_matches!(outcome, RunOutcome::Final { text, .. } if text == "ok");
        assert!(seen.lock().is_empty());
    }
}
