//! Conversation session controller
//!
//! One controller instance drives one conversation surface. It owns the live
//! transcript, stages an optimistic user turn per submission, races the
//! outbound call against cancellation, rolls the transcript back on cancel,
//! keeps the user turn on failure, and commits completed exchanges into the
//! history store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::remote::{RemoteError, TransformRequest, TransformService};

use super::errors::SessionError;
use super::events::{EventSender, SessionEvent};
use super::history::HistoryStore;
use super::types::{attachment_turn_content, Attachment, FeatureId, Turn};

/// Pending time after which a still-waiting notification is emitted. The
/// call itself is never timed out.
pub const DEFAULT_STILL_WAITING: Duration = Duration::from_secs(15);

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Knowledge base name forwarded to the service for retrieval-augmented
    /// answers. `None` omits the field from the request.
    pub knowledge_base: Option<String>,
}

/// The in-flight state of one outbound call.
struct PendingRequest {
    token: CancellationToken,
    generation: u64,
    started_at: Instant,
}

/// Drives one conversation against one remote endpoint.
///
/// At most one request is in flight at a time; a `submit` while another is
/// pending is rejected with [`SessionError::Busy`]. `cancel` and the read
/// accessors may be called concurrently with `submit` from other tasks.
pub struct SessionController {
    feature: FeatureId,
    service: Arc<dyn TransformService>,
    history: Arc<HistoryStore>,
    events: EventSender,
    // Both locks are only ever held for plain memory operations, never
    // across an await.
    transcript: Mutex<Vec<Turn>>,
    pending: Mutex<Option<PendingRequest>>,
    generation: AtomicU64,
    still_waiting_after: Duration,
}

impl SessionController {
    pub fn new(
        feature: FeatureId,
        service: Arc<dyn TransformService>,
        history: Arc<HistoryStore>,
        events: EventSender,
    ) -> Self {
        Self {
            feature,
            service,
            history,
            events,
            transcript: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
            still_waiting_after: DEFAULT_STILL_WAITING,
        }
    }

    /// Adjust the still-waiting notification threshold.
    pub fn with_still_waiting_after(mut self, threshold: Duration) -> Self {
        self.still_waiting_after = threshold;
        self
    }

    /// The feature this controller is bound to.
    pub fn feature(&self) -> FeatureId {
        self.feature
    }

    /// Snapshot of the live transcript.
    pub fn transcript(&self) -> Vec<Turn> {
        self.transcript.lock().unwrap().clone()
    }

    /// True while a request is in flight.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// How long the current request has been pending, if one is in flight.
    pub fn pending_elapsed(&self) -> Option<Duration> {
        self.pending
            .lock()
            .unwrap()
            .as_ref()
            .map(|request| request.started_at.elapsed())
    }

    /// Send one user input to the remote service.
    ///
    /// The user turn is staged optimistically, then the call resolves to one
    /// of:
    /// - `Ok(transcript)`: the assistant turn was appended and the exchange
    ///   recorded in history.
    /// - `Err(Canceled)`: [`cancel`] won the race; the transcript is exactly
    ///   as it was before this submission.
    /// - `Err(Remote(_))`: the call failed; the staged user turn stays so
    ///   the input remains visible for a manual retry.
    ///
    /// [`cancel`]: SessionController::cancel
    pub async fn submit(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
        options: SubmitOptions,
    ) -> Result<Vec<Turn>, SessionError> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(SessionError::EmptySubmission);
        }

        // Claim the single-flight slot before touching the transcript.
        let (token, generation, started_at) = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_some() {
                return Err(SessionError::Busy);
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let token = CancellationToken::new();
            let started_at = Instant::now();
            *pending = Some(PendingRequest {
                token: token.clone(),
                generation,
                started_at,
            });
            (token, generation, started_at)
        };

        let staged = if text.is_empty() {
            attachment_turn_content(attachments.len())
        } else {
            text.to_string()
        };

        // Optimistic user turn. `snapshot` is the rollback point; `prior` is
        // the context the service receives.
        let (snapshot, prior) = {
            let mut transcript = self.transcript.lock().unwrap();
            let prior = transcript.clone();
            transcript.push(Turn::user(staged));
            (prior.len(), prior)
        };
        let _ = self.events.send(SessionEvent::SubmitStarted {
            feature: self.feature,
        });

        let request = TransformRequest {
            text: text.to_string(),
            history: prior,
            knowledge_base: options.knowledge_base,
            attachments,
        };

        let call = self.service.transform(request, token.clone());
        tokio::pin!(call);
        let warn_timer = tokio::time::sleep(self.still_waiting_after);
        tokio::pin!(warn_timer);
        let mut warned = false;

        let outcome = loop {
            tokio::select! {
                _ = token.cancelled() => break None,
                result = &mut call => break Some(result),
                _ = &mut warn_timer, if !warned => {
                    warned = true;
                    debug!(feature = %self.feature, "request pending past the warning threshold");
                    let _ = self.events.send(SessionEvent::StillWaiting {
                        feature: self.feature,
                        elapsed: started_at.elapsed(),
                    });
                }
            }
        };

        match outcome {
            // Canceled in flight: the call future was dropped above and the
            // staged user turn comes back out.
            None => Err(self.finish_canceled(generation, snapshot)),
            // The call resolved in the same poll as the cancellation.
            // Cancel wins: whatever arrived is no longer wanted.
            Some(_) if token.is_cancelled() => {
                Err(self.finish_canceled(generation, snapshot))
            }
            Some(Ok(reply)) => {
                if !self.clear_pending(generation) {
                    // A different generation owns the controller; this
                    // response is stale and must not touch the transcript.
                    return Err(SessionError::Canceled);
                }
                let transcript = {
                    let mut transcript = self.transcript.lock().unwrap();
                    transcript.push(Turn::assistant(reply));
                    transcript.clone()
                };
                // A persistence failure inside the history store is logged
                // there and must not fail the submission.
                self.history.add_session(self.feature, &transcript);
                let _ = self.events.send(SessionEvent::SubmitCompleted {
                    feature: self.feature,
                    turns: transcript.len(),
                });
                Ok(transcript)
            }
            Some(Err(RemoteError::Canceled)) => Err(self.finish_canceled(generation, snapshot)),
            Some(Err(err)) => {
                self.clear_pending(generation);
                warn!(feature = %self.feature, error = %err, "transformation request failed");
                let _ = self.events.send(SessionEvent::SubmitFailed {
                    feature: self.feature,
                    message: err.to_string(),
                });
                Err(SessionError::Remote(err))
            }
        }
    }

    /// Signal the in-flight request, if any, to cancel. Safe to call at any
    /// time from any task; repeated calls and calls with nothing pending are
    /// no-ops.
    pub fn cancel(&self) {
        let pending = self.pending.lock().unwrap();
        if let Some(request) = pending.as_ref() {
            request.token.cancel();
        }
    }

    /// Replace the live transcript with a deep copy of `transcript`, used
    /// when resuming a stored session. Does not touch in-flight state;
    /// callers cancel first by contract.
    pub fn load_transcript(&self, transcript: &[Turn]) {
        {
            let mut live = self.transcript.lock().unwrap();
            *live = transcript.to_vec();
        }
        let _ = self.events.send(SessionEvent::TranscriptReplaced {
            feature: self.feature,
            turns: transcript.len(),
        });
    }

    /// Roll back to the pre-submit snapshot and release the pending slot.
    fn finish_canceled(&self, generation: u64, snapshot: usize) -> SessionError {
        if self.clear_pending(generation) {
            let mut transcript = self.transcript.lock().unwrap();
            transcript.truncate(snapshot);
            debug!(feature = %self.feature, "request canceled, transcript rolled back");
        }
        let _ = self.events.send(SessionEvent::SubmitCanceled {
            feature: self.feature,
        });
        SessionError::Canceled
    }

    /// Release the pending slot if `generation` still owns it. Returns false
    /// when a different generation has taken over, in which case the caller
    /// must leave all shared state alone.
    fn clear_pending(&self, generation: u64) -> bool {
        let mut pending = self.pending.lock().unwrap();
        match pending.as_ref() {
            Some(current) if current.generation == generation => {
                *pending = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{self, EventReceiver};
    use crate::remote::TransformService;
    use crate::storage::{MemoryStateStore, StateStore};
    use anyhow::bail;
    use async_trait::async_trait;

    /// Deterministic stand-in for the HTTP service.
    struct FakeService {
        behavior: Behavior,
        delay: Duration,
        seen: Mutex<Vec<TransformRequest>>,
    }

    enum Behavior {
        Reply(String),
        FailStatus(u16),
        /// Waits on the token like a well-behaved service.
        Hang,
        /// Ignores the token entirely and sleeps for a long time.
        Deaf,
    }

    impl FakeService {
        fn with_behavior(behavior: Behavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                delay,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn replying(text: &str) -> Arc<Self> {
            Self::with_behavior(Behavior::Reply(text.to_string()), Duration::ZERO)
        }

        fn replying_after(text: &str, delay: Duration) -> Arc<Self> {
            Self::with_behavior(Behavior::Reply(text.to_string()), delay)
        }

        fn failing(status: u16) -> Arc<Self> {
            Self::with_behavior(Behavior::FailStatus(status), Duration::ZERO)
        }

        fn hanging() -> Arc<Self> {
            Self::with_behavior(Behavior::Hang, Duration::ZERO)
        }

        fn deaf() -> Arc<Self> {
            Self::with_behavior(Behavior::Deaf, Duration::ZERO)
        }

        fn requests(&self) -> Vec<TransformRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransformService for FakeService {
        fn name(&self) -> &str {
            "fake"
        }

        async fn transform(
            &self,
            request: TransformRequest,
            cancel: CancellationToken,
        ) -> Result<String, RemoteError> {
            self.seen.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.behavior {
                Behavior::Reply(text) => Ok(text.clone()),
                Behavior::FailStatus(status) => Err(RemoteError::from_status(
                    *status,
                    r#"{"detail": "simulated failure"}"#,
                )),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(RemoteError::Canceled)
                }
                Behavior::Deaf => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("too late".to_string())
                }
            }
        }
    }

    /// State store whose writes always fail.
    struct FailingStateStore;

    impl StateStore for FailingStateStore {
        fn load(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        fn save(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            bail!("disk full")
        }
    }

    fn controller_with(
        service: Arc<FakeService>,
    ) -> (Arc<SessionController>, Arc<HistoryStore>, EventReceiver) {
        let (tx, rx) = events::channel();
        let history = Arc::new(HistoryStore::hydrate(
            Arc::new(MemoryStateStore::new()),
            tx.clone(),
        ));
        let controller = Arc::new(SessionController::new(
            FeatureId::Chat,
            service,
            history.clone(),
            tx,
        ));
        (controller, history, rx)
    }

    async fn wait_until_pending(controller: &SessionController) {
        for _ in 0..200 {
            if controller.is_pending() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("request never became pending");
    }

    fn drain(rx: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_submit_appends_user_then_assistant() {
        let service = FakeService::replying("hi there");
        let (controller, history, _rx) = controller_with(service.clone());

        let transcript = controller
            .submit("hello", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0], Turn::user("hello"));
        assert_eq!(transcript[1], Turn::assistant("hi there"));
        assert_eq!(controller.transcript(), transcript);
        assert!(!controller.is_pending());

        // Exactly one history mutation per successful submission
        let sessions = history.sessions(FeatureId::Chat);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "hello");

        // The service received the prior (empty) transcript as context
        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "hello");
        assert!(requests[0].history.is_empty());
    }

    #[tokio::test]
    async fn test_submit_sends_prior_turns_as_context() {
        let service = FakeService::replying("noted");
        let (controller, _history, _rx) = controller_with(service.clone());
        controller.load_transcript(&[Turn::user("first"), Turn::assistant("reply")]);

        controller
            .submit("second", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();

        let requests = service.requests();
        assert_eq!(requests[0].history.len(), 2);
        assert_eq!(requests[0].history[0], Turn::user("first"));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_input() {
        let (controller, history, _rx) = controller_with(FakeService::replying("unused"));

        let err = controller
            .submit("   \n", Vec::new(), SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::EmptySubmission));
        assert!(controller.transcript().is_empty());
        assert!(!controller.is_pending());
        assert!(history.sessions(FeatureId::Chat).is_empty());
    }

    #[tokio::test]
    async fn test_attachments_substitute_for_text() {
        let service = FakeService::replying("summarized your files");
        let (controller, _history, _rx) = controller_with(service.clone());
        let attachments = vec![
            Attachment::new("a.txt", "text/plain", b"one".to_vec()),
            Attachment::new("b.txt", "text/plain", b"two".to_vec()),
        ];

        let transcript = controller
            .submit("", attachments, SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(transcript[0], Turn::user("[2 attachments]"));
        let requests = service.requests();
        assert_eq!(requests[0].text, "");
        assert_eq!(requests[0].attachments.len(), 2);
    }

    #[tokio::test]
    async fn test_options_forward_knowledge_base() {
        let service = FakeService::replying("from your documents");
        let (controller, _history, _rx) = controller_with(service.clone());

        controller
            .submit(
                "what does the report say",
                Vec::new(),
                SubmitOptions {
                    knowledge_base: Some("reports".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            service.requests()[0].knowledge_base.as_deref(),
            Some("reports")
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_user_turn() {
        let (controller, history, mut rx) = controller_with(FakeService::failing(500));

        let err = controller
            .submit("does this work", Vec::new(), SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Remote(_)));
        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0], Turn::user("does this work"));
        assert!(!controller.is_pending());
        assert!(history.sessions(FeatureId::Chat).is_empty());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::SubmitFailed { .. })));
    }

    #[tokio::test]
    async fn test_cancel_rolls_back_exactly() {
        let (controller, history, mut rx) = controller_with(FakeService::hanging());
        let before = vec![Turn::user("earlier"), Turn::assistant("noted")];
        controller.load_transcript(&before);

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .submit("never answered", Vec::new(), SubmitOptions::default())
                    .await
            })
        };
        wait_until_pending(&controller).await;
        assert_eq!(controller.transcript().len(), 3);

        controller.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(controller.transcript(), before);
        assert!(!controller.is_pending());
        assert!(history.sessions(FeatureId::Chat).is_empty());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::SubmitCanceled { .. })));
    }

    #[tokio::test]
    async fn test_cancel_returns_promptly_when_service_ignores_token() {
        let (controller, _history, _rx) = controller_with(FakeService::deaf());

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .submit("hello", Vec::new(), SubmitOptions::default())
                    .await
            })
        };
        wait_until_pending(&controller).await;
        controller.cancel();

        // Control must come back immediately, not after the service's 60s
        let err = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cancel must return control without waiting for the service")
            .unwrap()
            .unwrap_err();

        assert!(err.is_canceled());
        assert!(controller.transcript().is_empty());
        assert!(!controller.is_pending());
    }

    #[tokio::test]
    async fn test_concurrent_submit_is_rejected() {
        let (controller, _history, _rx) = controller_with(FakeService::hanging());

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .submit("first", Vec::new(), SubmitOptions::default())
                    .await
            })
        };
        wait_until_pending(&controller).await;

        let err = controller
            .submit("second", Vec::new(), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Busy));

        // The rejected call left no trace
        assert_eq!(controller.transcript().len(), 1);

        controller.cancel();
        assert!(task.await.unwrap().unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_safe_when_idle() {
        let (controller, _history, _rx) = controller_with(FakeService::hanging());

        // Nothing pending: no-ops
        controller.cancel();
        controller.cancel();
        assert!(controller.transcript().is_empty());

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .submit("hello", Vec::new(), SubmitOptions::default())
                    .await
            })
        };
        wait_until_pending(&controller).await;

        controller.cancel();
        controller.cancel();
        assert!(task.await.unwrap().unwrap_err().is_canceled());
        assert!(controller.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_pending_elapsed_tracks_in_flight_request() {
        let (controller, _history, _rx) = controller_with(FakeService::hanging());
        assert!(controller.pending_elapsed().is_none());

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .submit("hello", Vec::new(), SubmitOptions::default())
                    .await
            })
        };
        wait_until_pending(&controller).await;
        assert!(controller.pending_elapsed().is_some());

        controller.cancel();
        let _ = task.await.unwrap();
        assert!(controller.pending_elapsed().is_none());
    }

    #[tokio::test]
    async fn test_still_waiting_emitted_once() {
        let service = FakeService::replying_after("slow reply", Duration::from_millis(80));
        let (tx, mut rx) = events::channel();
        let history = Arc::new(HistoryStore::hydrate(
            Arc::new(MemoryStateStore::new()),
            tx.clone(),
        ));
        let controller = SessionController::new(FeatureId::Chat, service, history, tx)
            .with_still_waiting_after(Duration::from_millis(20));

        controller
            .submit("take your time", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();

        let events = drain(&mut rx);
        let warnings = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::StillWaiting { .. }))
            .count();
        assert_eq!(warnings, 1);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::SubmitCompleted { .. })));
    }

    #[tokio::test]
    async fn test_fast_reply_emits_no_still_waiting() {
        let (controller, _history, mut rx) = controller_with(FakeService::replying("quick"));

        controller
            .submit("hello", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|event| matches!(event, SessionEvent::StillWaiting { .. })));
    }

    #[tokio::test]
    async fn test_history_persist_failure_does_not_fail_submit() {
        let (tx, _rx) = events::channel();
        let history = Arc::new(HistoryStore::hydrate(Arc::new(FailingStateStore), tx.clone()));
        let controller =
            SessionController::new(FeatureId::Chat, FakeService::replying("hi"), history, tx);

        let transcript = controller
            .submit("hello", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(transcript.len(), 2);
        assert!(!controller.is_pending());
    }

    #[tokio::test]
    async fn test_resumed_transcript_is_isolated_from_store() {
        let (controller, history, _rx) = controller_with(FakeService::replying("answer"));

        controller
            .submit("original question", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();
        let record = history.sessions(FeatureId::Chat)[0].clone();

        // Resume the stored session, then keep talking
        controller.load_transcript(&record.transcript);
        controller
            .submit("follow-up", Vec::new(), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(controller.transcript().len(), 4);

        // The stored record is unchanged
        let stored = history.find_session(FeatureId::Chat, &record.id).unwrap();
        assert_eq!(stored.transcript.len(), 2);
        assert_eq!(stored.transcript, record.transcript);
    }

    #[tokio::test]
    async fn test_load_transcript_replaces_wholesale() {
        let (controller, _history, mut rx) = controller_with(FakeService::replying("unused"));

        controller.load_transcript(&[Turn::user("a"), Turn::assistant("b")]);
        controller.load_transcript(&[Turn::user("c")]);

        assert_eq!(controller.transcript(), vec![Turn::user("c")]);
        let events = drain(&mut rx);
        let replaced = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::TranscriptReplaced { .. }))
            .count();
        assert_eq!(replaced, 2);
    }
}
