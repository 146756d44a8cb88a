//! Per-user sessions and single-flight turns.
//!
//! A session is created lazily on the user's first message and lives for
//! the process. Its `turn_lock` serializes turns; the current turn's
//! cancellation token is replaced (and the old one fired) whenever a new
//! message arrives, so the user's latest message always supersedes the
//! one being answered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use troika_core::{mask, UserId};

use crate::error::AiError;
use crate::escalation::should_escalate;
use crate::events::TurnEvent;
use crate::history::HistoryWriter;
use crate::tools::ToolRegistry;
use crate::types::{Message, StreamEvent, ToolCall, ToolCallResult};
use crate::vendor::{AssistantVendor, EventStream};

/// Session-manager tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// System prompt for every run.
    pub system_prompt: String,
    /// Abort a run when the stream is silent this long.
    pub inactivity_timeout: Duration,
    /// Turn event channel capacity.
    pub channel_capacity: usize,
    /// Upper bound on tool rounds within one turn.
    pub max_tool_rounds: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            inactivity_timeout: Duration::from_secs(60),
            channel_capacity: 64,
            max_tool_rounds: 8,
        }
    }
}

struct Session {
    turn_lock: tokio::sync::Mutex<()>,
    current_cancel: std::sync::Mutex<CancellationToken>,
    history: tokio::sync::Mutex<Vec<Message>>,
    last_activity: std::sync::Mutex<DateTime<Utc>>,
}

impl Session {
    fn new() -> Self {
        Self {
            turn_lock: tokio::sync::Mutex::new(()),
            current_cancel: std::sync::Mutex::new(CancellationToken::new()),
            history: tokio::sync::Mutex::new(Vec::new()),
            last_activity: std::sync::Mutex::new(Utc::now()),
        }
    }

    /// Cancel the in-flight turn (if any) and install a fresh token for
    /// the next one.
    fn supersede(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        if let Ok(mut guard) = self.current_cancel.lock() {
            guard.cancel();
            *guard = fresh.clone();
        }
        fresh
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Utc::now();
        }
    }
}

/// What one streamed run produced.
enum RunResult {
    /// Final assistant text.
    Text(String),
    /// The assistant wants tools run.
    ToolCalls(Vec<ToolCall>),
    /// The turn's token fired.
    Cancelled,
    /// The stream failed.
    Failed(AiError),
}

/// Owner of every session; entry point for turns.
pub struct SessionManager {
    vendor: Arc<dyn AssistantVendor>,
    tools: Arc<ToolRegistry>,
    history_writer: Option<HistoryWriter>,
    config: SessionConfig,
    sessions: DashMap<UserId, Arc<Session>>,
}

impl SessionManager {
    /// Manager over a vendor and a tool registry.
    #[must_use]
    pub fn new(
        vendor: Arc<dyn AssistantVendor>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            vendor,
            tools,
            history_writer: None,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Enable chat-history persistence.
    #[must_use]
    pub fn with_history_writer(mut self, writer: HistoryWriter) -> Self {
        self.history_writer = Some(writer);
        self
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Submit a user message, starting a turn.
    ///
    /// Any in-flight turn for the same user is cancelled first; the new
    /// turn begins once the old one observes cancellation and releases
    /// the session. The returned receiver yields chunks followed by one
    /// terminal event.
    pub fn submit(self: &Arc<Self>, user: UserId, text: String) -> mpsc::Receiver<TurnEvent> {
        let session = self.session(user);
        let cancel = session.supersede();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let _turn = session.turn_lock.lock().await;
            if cancel.is_cancelled() {
                debug!(user = %mask::user_id(user), "turn superseded before start");
                let _ = tx.send(TurnEvent::Cancelled).await;
                return;
            }
            manager.run_turn(user, &session, text, &cancel, &tx).await;
            session.touch();
        });

        rx
    }

    fn session(&self, user: UserId) -> Arc<Session> {
        self.sessions
            .entry(user)
            .or_insert_with(|| Arc::new(Session::new()))
            .clone()
    }

    async fn run_turn(
        &self,
        user: UserId,
        session: &Session,
        text: String,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<TurnEvent>,
    ) {
        let user_message = Message::user(&text);
        if let Some(writer) = &self.history_writer {
            writer.append(user, &user_message).await;
        }
        session.history.lock().await.push(user_message);

        let definitions = self.tools.definitions();
        let mut retry_spent = false;
        let mut tool_rounds: u32 = 0;

        loop {
            let snapshot = session.history.lock().await.clone();
            let stream = match self
                .vendor
                .stream_run(&self.config.system_prompt, &snapshot, &definitions)
                .await
            {
                Ok(stream) => stream,
                Err(e) if e.is_transient() && !retry_spent => {
                    warn!(user = %mask::user_id(user), error = %e, "run failed, retrying once");
                    retry_spent = true;
                    continue;
                },
                Err(e) => {
                    self.finish_failed(user, &e, tx).await;
                    return;
                },
            };

            match self.drain(stream, cancel, tx).await {
                RunResult::Cancelled => {
                    info!(user = %mask::user_id(user), "turn cancelled");
                    self.vendor.stop().await;
                    let _ = tx.send(TurnEvent::Cancelled).await;
                    return;
                },
                RunResult::Failed(e) if e.is_transient() && !retry_spent => {
                    warn!(user = %mask::user_id(user), error = %e, "stream failed, retrying once");
                    retry_spent = true;
                },
                RunResult::Failed(e) => {
                    self.finish_failed(user, &e, tx).await;
                    return;
                },
                RunResult::ToolCalls(calls) => {
                    tool_rounds = tool_rounds.saturating_add(1);
                    if tool_rounds > self.config.max_tool_rounds {
                        self.finish_failed(
                            user,
                            &AiError::RequestFailed("tool round limit reached".to_string()),
                            tx,
                        )
                        .await;
                        return;
                    }
                    if self.dispatch_tools(session, calls, cancel).await.is_err() {
                        info!(user = %mask::user_id(user), "turn cancelled during tools");
                        let _ = tx.send(TurnEvent::Cancelled).await;
                        return;
                    }
                },
                RunResult::Text(reply) => {
                    let assistant_message = Message::assistant(&reply);
                    if let Some(writer) = &self.history_writer {
                        writer.append(user, &assistant_message).await;
                    }
                    session.history.lock().await.push(assistant_message);

                    let escalate = should_escalate(&reply);
                    let _ = tx
                        .send(TurnEvent::Final {
                            text: reply,
                            escalate,
                        })
                        .await;
                    return;
                },
            }
        }
    }

    /// Drain one run's stream, forwarding text chunks.
    async fn drain(
        &self,
        mut stream: EventStream,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> RunResult {
        // Tool calls under assembly, in arrival order.
        let mut pending: Vec<(String, String, String)> = Vec::new();
        let mut args_index: HashMap<String, usize> = HashMap::new();
        let mut text = String::new();

        loop {
            if cancel.is_cancelled() {
                return RunResult::Cancelled;
            }

            let next = tokio::select! {
                () = cancel.cancelled() => return RunResult::Cancelled,
                next = tokio::time::timeout(self.config.inactivity_timeout, stream.next()) => next,
            };

            let event = match next {
                Err(_) => return RunResult::Failed(AiError::Stalled),
                Ok(None) => break,
                Ok(Some(Err(e))) => return RunResult::Failed(e),
                Ok(Some(Ok(event))) => event,
            };

            match event {
                StreamEvent::TextDelta(delta) => {
                    if cancel.is_cancelled() {
                        return RunResult::Cancelled;
                    }
                    text.push_str(&delta);
                    let _ = tx.send(TurnEvent::Chunk(delta)).await;
                },
                StreamEvent::ToolCallStart { id, name } => {
                    args_index.insert(id.clone(), pending.len());
                    pending.push((id, name, String::new()));
                },
                StreamEvent::ToolCallDelta { id, args_delta } => {
                    if let Some(&i) = args_index.get(&id) {
                        if let Some(entry) = pending.get_mut(i) {
                            entry.2.push_str(&args_delta);
                        }
                    }
                },
                StreamEvent::ToolCallEnd { .. } => {},
                StreamEvent::Done => break,
            }
        }

        if pending.is_empty() {
            RunResult::Text(text)
        } else {
            let calls = pending
                .into_iter()
                .map(|(id, name, args)| ToolCall {
                    id,
                    name,
                    arguments: serde_json::from_str(&args)
                        .unwrap_or_else(|_| serde_json::json!({})),
                })
                .collect();
            RunResult::ToolCalls(calls)
        }
    }

    /// Run every requested tool and extend the history.
    ///
    /// Returns `Err(())` when the turn was cancelled mid-dispatch.
    async fn dispatch_tools(
        &self,
        session: &Session,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> Result<(), ()> {
        session
            .history
            .lock()
            .await
            .push(Message::assistant_tool_calls(calls.clone()));

        let mut results: Vec<ToolCallResult> = Vec::with_capacity(calls.len());
        for call in &calls {
            if cancel.is_cancelled() {
                return Err(());
            }
            debug!(tool = %call.name, "dispatching tool");
            results.push(self.tools.dispatch(call, cancel).await);
        }

        let mut history = session.history.lock().await;
        for result in results {
            history.push(Message::tool_result(result));
        }
        Ok(())
    }

    async fn finish_failed(&self, user: UserId, error: &AiError, tx: &mpsc::Sender<TurnEvent>) {
        warn!(user = %mask::user_id(user), error = %error, "turn failed");
        let _ = tx
            .send(TurnEvent::Failed {
                message: "The assistant is temporarily unavailable. Please try again in a \
                          moment."
                    .to_string(),
            })
            .await;
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
