//! The predict/stream/store pipeline (spec §4.C9 — the repository's core).
//!
//! Ties access control (`chatflows`), admission (`accounting`), upload
//! storage (`uploads`) and session/message persistence (`sessions`) around
//! the upstream streaming relay itself. One producer task reads the
//! upstream byte stream, feeds it through [`JsonObjectSplitter`], fans
//! parsed events out to the caller over a bounded channel, and — once the
//! stream terminates one way or another — commits the consolidated
//! assistant turn exactly once (spec §4.C9 "Ordering & concurrency
//! guarantees").
//!
//! Grounded on the teacher's `async_stream`-producer / bounded-channel-
//! consumer idiom in `crates/agents/src/providers/openai.rs`; the admission
//! and persistence steps are this pipeline's own, composed from the crates
//! that own each concern.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use flowise_proxy_accounting::AccountingBackend;
use flowise_proxy_chatflows::ChatflowRegistry;
use flowise_proxy_sessions::{derive_session_id, Role, SessionStore};
use flowise_proxy_uploads::{UploadRequest, UploadStore};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    client::{UploadPayload, UpstreamPredictClient},
    error::RelayError,
    event::{
        synthetic_overall_timeout_event, synthetic_partial_error_event, synthetic_session_id_event,
        synthetic_upstream_error_event, StreamEvent,
    },
    parser::JsonObjectSplitter,
    session_lock::{SessionGuard, SessionLocks},
};

/// Channel capacity for the producer/consumer hand-off (spec §5: "a bounded
/// in-process queue (capacity ≥ 64)").
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Detached-persistence timeout (spec §5 "Cancellation": persistence
/// "proceeds on a short-lived detached task with its own timeout").
const PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub chatflow_id: String,
    pub question: String,
    pub session_id: Option<String>,
    pub uploads: Vec<UploadRequest>,
}

/// What `predict_stream_store` hands back to the HTTP surface: the session
/// id the stream is (or will be) keyed under, and the live event stream to
/// forward to the client.
pub struct PredictStream {
    pub session_id: String,
    pub events: Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
}

/// Why the producer loop stopped reading upstream — drives both the
/// `log_transaction` success flag and whether a partial-stream marker is
/// appended to the persisted event list.
enum Termination {
    /// Upstream sent an `end` event and the client was still attached.
    Ended,
    /// The client disconnected (channel send failed) before `end` arrived.
    ClientDisconnected,
    /// No bytes arrived within the idle-read window.
    Idle,
    /// The overall stream cap elapsed.
    OverallTimeout,
    /// The upstream connection itself errored mid-stream.
    UpstreamError,
    /// Upstream closed the body without ever sending `end`.
    UpstreamClosedEarly,
}

impl Termination {
    fn is_success(&self) -> bool {
        matches!(self, Termination::Ended)
    }
}

#[derive(Clone)]
pub struct StreamingRelay {
    chatflows: ChatflowRegistry,
    accounting: Arc<dyn AccountingBackend>,
    sessions: SessionStore,
    uploads: UploadStore,
    upstream: Arc<dyn UpstreamPredictClient>,
    session_locks: SessionLocks,
    idle_timeout: Duration,
    max_stream_duration: Duration,
}

impl StreamingRelay {
    pub fn new(
        chatflows: ChatflowRegistry,
        accounting: Arc<dyn AccountingBackend>,
        sessions: SessionStore,
        uploads: UploadStore,
        upstream: Arc<dyn UpstreamPredictClient>,
        idle_timeout: Duration,
        max_stream_duration: Duration,
    ) -> Self {
        Self {
            chatflows,
            accounting,
            sessions,
            uploads,
            upstream,
            session_locks: SessionLocks::new(),
            idle_timeout,
            max_stream_duration,
        }
    }

    /// Clone of `self` with a different accounting backend — used by the
    /// HTTP surface to scope a remote-accounting backend to the caller's own
    /// bearer token for the lifetime of a single request, without making
    /// every `StreamingRelay` consumer pay for per-request construction.
    pub fn with_accounting(&self, accounting: Arc<dyn AccountingBackend>) -> Self {
        Self { accounting, ..self.clone() }
    }

    /// `predict_stream_store(principal, chatflow_id, question, session_id?,
    /// uploads?[])` (spec §4.C9 "Inputs"). Preconditions are checked, and
    /// uploads stored plus credits debited, before any upstream call — a
    /// failure at any of those steps leaves no chat history and no debit
    /// behind (spec testable property #8).
    pub async fn predict_stream_store(
        &self,
        user_id: &str,
        request: PredictRequest,
    ) -> Result<PredictStream, RelayError> {
        if !self.chatflows.has_access(user_id, &request.chatflow_id).await? {
            return Err(RelayError::Forbidden);
        }

        let cost = self.accounting.cost(&request.chatflow_id).await?;
        let balance = self.accounting.get_balance(user_id).await?.unwrap_or(0);
        if balance < cost {
            return Err(RelayError::PaymentRequired);
        }

        // Preconditions step 3: uploads decoded and stored before upstream
        // is contacted at all.
        let mut file_ids = Vec::with_capacity(request.uploads.len());
        let mut upload_payloads = Vec::with_capacity(request.uploads.len());
        for upload in &request.uploads {
            let stored = self
                .uploads
                .store(user_id, None, Some(&request.chatflow_id), upload)
                .await?;
            let bytes = self.uploads.get_bytes(&stored).await?;
            upload_payloads.push(UploadPayload {
                kind: "file".to_string(),
                name: stored.original_name.clone(),
                mime: stored.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            });
            file_ids.push(stored.file_id);
        }

        // Admission & debit. A debit failure here (e.g. a racing concurrent
        // request won the compare-and-swap) aborts before any upstream call
        // is made, exactly like the precondition check above.
        if !self.accounting.debit(user_id, cost, "predict_stream_store").await? {
            return Err(RelayError::PaymentRequired);
        }

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| derive_session_id(user_id, &request.chatflow_id, &request.question));

        let guard = self.session_locks.try_acquire(&session_id).ok_or_else(|| {
            RelayError::Conflict
        })?;

        self.sessions
            .ensure_session(&session_id, user_id, &request.chatflow_id, &request.question)
            .await?;
        self.sessions
            .append_message(
                &session_id,
                user_id,
                &request.chatflow_id,
                Role::User,
                &request.question,
                None,
                &file_ids,
            )
            .await?;

        let byte_stream = match self
            .upstream
            .predict_stream(&request.chatflow_id, &request.question, &session_id, upload_payloads)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.accounting
                    .log_transaction(user_id, &request.chatflow_id, cost, false)
                    .await
                    .ok();
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(Self::run_producer(
            session_id.clone(),
            user_id.to_string(),
            request.chatflow_id.clone(),
            byte_stream,
            tx,
            self.sessions.clone(),
            self.accounting.clone(),
            cost,
            self.idle_timeout,
            self.max_stream_duration,
            guard,
        ));

        Ok(PredictStream {
            session_id,
            events: Box::pin(ReceiverStream::new(rx)),
        })
    }

    /// Non-streaming variant (spec §6 `POST /chat/predict`): drives the
    /// same pipeline to completion and collects the full transcript.
    pub async fn predict_collect(
        &self,
        user_id: &str,
        request: PredictRequest,
    ) -> Result<(String, Vec<StreamEvent>), RelayError> {
        let stream = self.predict_stream_store(user_id, request).await?;
        let events: Vec<StreamEvent> = stream.events.collect().await;
        let response = events
            .iter()
            .filter_map(|e| e.token_text())
            .collect::<Vec<_>>()
            .join("");
        let metadata: Vec<StreamEvent> = events.into_iter().filter(|e| !e.is_token()).collect();
        Ok((response, metadata))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_producer(
        session_id: String,
        user_id: String,
        chatflow_id: String,
        mut byte_stream: crate::client::ByteStream,
        tx: mpsc::Sender<StreamEvent>,
        sessions: SessionStore,
        accounting: Arc<dyn AccountingBackend>,
        cost: i64,
        idle_timeout: Duration,
        max_stream_duration: Duration,
        _session_guard: SessionGuard,
    ) {
        // Emitted before the first upstream byte is forwarded, unconditionally
        // (spec §9 design note: "implementers SHOULD do so for client
        // simplicity").
        let mut all_events = vec![synthetic_session_id_event(&session_id)];
        if tx.send(all_events[0].clone()).await.is_err() {
            // The caller vanished before the stream even started; keep
            // draining upstream so persistence below still sees a complete
            // transcript rather than nothing.
        }

        let mut splitter = JsonObjectSplitter::new();
        let started = Instant::now();
        let mut termination = Termination::UpstreamClosedEarly;

        'read: loop {
            if started.elapsed() > max_stream_duration {
                termination = Termination::OverallTimeout;
                let event = synthetic_overall_timeout_event();
                all_events.push(event.clone());
                let _ = tx.send(event).await;
                break;
            }

            let next = tokio::time::timeout(idle_timeout, byte_stream.next()).await;
            let chunk = match next {
                Err(_elapsed) => {
                    termination = Termination::Idle;
                    let event = crate::event::synthetic_idle_error_event();
                    all_events.push(event.clone());
                    let _ = tx.send(event).await;
                    break;
                }
                Ok(None) => {
                    termination = Termination::UpstreamClosedEarly;
                    break;
                }
                Ok(Some(Err(err))) => {
                    termination = Termination::UpstreamError;
                    let event = synthetic_upstream_error_event(&err.to_string());
                    all_events.push(event.clone());
                    let _ = tx.send(event).await;
                    break;
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for value in splitter.feed(&chunk) {
                let event: StreamEvent = match serde_json::from_value(value) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                let is_end = event.is_end();
                all_events.push(event.clone());
                if tx.send(event).await.is_err() {
                    termination = Termination::ClientDisconnected;
                    break 'read;
                }
                if is_end {
                    termination = Termination::Ended;
                    break 'read;
                }
            }
        }

        // Dropping the response here is what "cancels the upstream request"
        // on every exit path above — we simply stop polling it.
        drop(byte_stream);

        if matches!(termination, Termination::ClientDisconnected) {
            all_events.push(synthetic_partial_error_event());
        }

        let success = termination.is_success();
        let persist = async {
            let content = serde_json::to_string(&all_events)?;
            let metadata_events: Vec<&StreamEvent> =
                all_events.iter().filter(|e| !e.is_token()).collect();
            let metadata = serde_json::to_string(&metadata_events)?;
            sessions
                .append_message(
                    &session_id,
                    &user_id,
                    &chatflow_id,
                    Role::Assistant,
                    &content,
                    Some(&metadata),
                    &[],
                )
                .await?;
            Ok::<(), flowise_proxy_sessions::SessionError>(())
        };

        match tokio::time::timeout(PERSIST_TIMEOUT, persist).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(session_id = %session_id, error = %err, "failed to persist assistant turn");
            }
            Err(_) => {
                tracing::error!(session_id = %session_id, "assistant-turn persistence timed out");
            }
        }

        // Logged regardless of persistence outcome: the debit already
        // happened, so the audit trail must reflect that even if the
        // assistant turn itself failed to save.
        let _ = accounting.log_transaction(&user_id, &chatflow_id, cost, success).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowise_proxy_accounting::LocalAccounting;
    use flowise_proxy_chatflows::{ChatflowError, UpstreamCatalog, UpstreamChatflow};
    use flowise_proxy_store::{blob::BlobBucket, DocumentStore};
    use sqlx::SqlitePool;

    struct NoopCatalog;

    #[async_trait::async_trait]
    impl UpstreamCatalog for NoopCatalog {
        async fn list_chatflows(&self) -> Result<Vec<UpstreamChatflow>, ChatflowError> {
            Ok(Vec::new())
        }
    }

    struct FakeUpstream {
        chunks: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl UpstreamPredictClient for FakeUpstream {
        async fn predict_stream(
            &self,
            _chatflow_id: &str,
            _question: &str,
            _session_id: &str,
            _uploads: Vec<UploadPayload>,
        ) -> Result<crate::client::ByteStream, RelayError> {
            let items: Vec<Result<bytes::Bytes, reqwest::Error>> = self
                .chunks
                .iter()
                .map(|c| Ok(bytes::Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    /// Upstream that never produces a byte, used to exercise the idle-
    /// timeout and session-conflict paths without racing a real clock.
    struct PendingUpstream;

    #[async_trait::async_trait]
    impl UpstreamPredictClient for PendingUpstream {
        async fn predict_stream(
            &self,
            _chatflow_id: &str,
            _question: &str,
            _session_id: &str,
            _uploads: Vec<UploadPayload>,
        ) -> Result<crate::client::ByteStream, RelayError> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    /// Keeps the tempdir alive alongside the relay so the blob bucket
    /// directory isn't removed out from under the test.
    async fn relay_with(
        credits: i64,
        grant_access: bool,
        upstream: Arc<dyn UpstreamPredictClient>,
        idle_timeout: Duration,
    ) -> (StreamingRelay, tempfile::TempDir) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        sqlx::query(
            "INSERT INTO principals (user_id, username, email, password_hash, role, is_active, credits, created_at, updated_at)
             VALUES ('u1', 'alice', 'a@example.com', 'h', 'EndUser', 1, ?, datetime('now'), datetime('now'))",
        )
        .bind(credits)
        .execute(store.pool())
        .await
        .unwrap();
        if grant_access {
            sqlx::query(
                "INSERT INTO user_chatflows (user_id, chatflow_id, is_active, assigned_at)
                 VALUES ('u1', 'cf1', 1, datetime('now'))",
            )
            .execute(store.pool())
            .await
            .unwrap();
        }

        let chatflows = ChatflowRegistry::new(store.clone(), Arc::new(NoopCatalog));
        let accounting: Arc<dyn AccountingBackend> = Arc::new(LocalAccounting::new(store.clone()));
        let dir = tempfile::tempdir().unwrap();
        let bucket = BlobBucket::new(dir.path());
        let uploads = UploadStore::new(store.clone(), bucket, 25 * 1024 * 1024);
        let sessions = SessionStore::new(store.clone(), uploads.clone());

        let relay = StreamingRelay::new(
            chatflows,
            accounting,
            sessions,
            uploads,
            upstream,
            idle_timeout,
            Duration::from_secs(30),
        );
        (relay, dir)
    }

    fn request(session_id: Option<&str>) -> PredictRequest {
        PredictRequest {
            chatflow_id: "cf1".to_string(),
            question: "hello".to_string(),
            session_id: session_id.map(str::to_string),
            uploads: Vec::new(),
        }
    }

    #[tokio::test]
    async fn rejects_without_chatflow_access() {
        let (relay, _dir) = relay_with(10, false, Arc::new(FakeUpstream { chunks: vec![] }), Duration::from_secs(5)).await;
        let err = relay.predict_stream_store("u1", request(None)).await.unwrap_err();
        assert!(matches!(err, RelayError::Forbidden));
    }

    #[tokio::test]
    async fn rejects_with_insufficient_credits() {
        let (relay, _dir) = relay_with(0, true, Arc::new(FakeUpstream { chunks: vec![] }), Duration::from_secs(5)).await;
        let err = relay.predict_stream_store("u1", request(None)).await.unwrap_err();
        assert!(matches!(err, RelayError::PaymentRequired));
    }

    #[tokio::test]
    async fn happy_path_streams_tokens_debits_and_persists() {
        let chunks = vec![
            r#"{"event":"token","data":"Hel"}"#,
            r#"{"event":"token","data":"lo"}{"event":"end","data":null}"#,
        ];
        let (relay, _dir) = relay_with(1, true, Arc::new(FakeUpstream { chunks }), Duration::from_secs(5)).await;

        let (response, metadata) = relay.predict_collect("u1", request(None)).await.unwrap();
        assert_eq!(response, "Hello");
        assert!(metadata.iter().any(|e| e.event == "session_id"));
        assert!(metadata.iter().any(|e| e.is_end()));

        let balance = relay.accounting.get_balance("u1").await.unwrap();
        assert_eq!(balance, Some(0));
    }

    #[tokio::test]
    async fn debits_credits_before_first_byte() {
        let (relay, _dir) = relay_with(1, true, Arc::new(FakeUpstream {
            chunks: vec![r#"{"event":"end","data":null}"#],
        }), Duration::from_secs(5)).await;
        let _ = relay.predict_collect("u1", request(None)).await.unwrap();
        let balance = relay.accounting.get_balance("u1").await.unwrap();
        assert_eq!(balance, Some(0));
    }

    #[tokio::test]
    async fn second_stream_for_same_session_is_rejected_while_first_in_flight() {
        let (relay, _dir) = relay_with(10, true, Arc::new(PendingUpstream), Duration::from_secs(30)).await;

        let first = relay.predict_stream_store("u1", request(Some("shared-session"))).await.unwrap();
        assert_eq!(first.session_id, "shared-session");

        let second = relay.predict_stream_store("u1", request(Some("shared-session"))).await;
        assert!(matches!(second, Err(RelayError::Conflict)));
    }

    #[tokio::test]
    async fn idle_timeout_emits_synthetic_error_and_logs_failed_transaction() {
        let (relay, _dir) = relay_with(5, true, Arc::new(PendingUpstream), Duration::from_millis(20)).await;

        let stream = relay.predict_stream_store("u1", request(Some("idle-session"))).await.unwrap();
        let events: Vec<StreamEvent> = stream.events.collect().await;

        assert!(events.iter().any(|e| e.is_error()));
        // Credits were still debited even though the stream never produced
        // a token — admission happens before the upstream call, not after.
        let balance = relay.accounting.get_balance("u1").await.unwrap();
        assert_eq!(balance, Some(4));
    }
}
