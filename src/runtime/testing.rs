//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{ConversationRuntime, SseEvent};
use crate::config::RetryPolicy;
use crate::conversation::{ConversationAccumulator, ConversationTurn, ConversationUpdate};
use crate::state_machine::{Event, WorkflowContext, WorkflowState};
use crate::workflow::{
    Action, FrameStream, VisualizationPayload, WorkflowClient, WorkflowError, WorkflowFrame,
    WorkflowRequest,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

// ============================================================================
// Mock Workflow Client
// ============================================================================

/// One scripted response: frames (each possibly a mid-stream error) or a
/// failure to open the request at all
type ScriptedResponse = Result<Vec<Result<WorkflowFrame, WorkflowError>>, WorkflowError>;

/// Mock workflow client that replays queued responses
#[allow(dead_code)]
pub struct MockWorkflowClient {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    history: Mutex<Vec<Value>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<WorkflowRequest>>,
}

#[allow(dead_code)]
impl MockWorkflowClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response made of the given raw frames
    pub fn queue_frames(&self, frames: Vec<Value>) {
        let frames = frames
            .into_iter()
            .filter_map(WorkflowFrame::from_value)
            .map(Ok)
            .collect();
        self.responses.lock().unwrap().push_back(Ok(frames));
    }

    /// Queue a response that streams `frames` and then fails
    pub fn queue_broken_stream(&self, frames: Vec<Value>, error: WorkflowError) {
        let mut items: Vec<_> = frames
            .into_iter()
            .filter_map(WorkflowFrame::from_value)
            .map(Ok)
            .collect();
        items.push(Err(error));
        self.responses.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a request that fails before any frame arrives
    pub fn queue_error(&self, error: WorkflowError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn set_history(&self, items: Vec<Value>) {
        *self.history.lock().unwrap() = items;
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<WorkflowRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<FrameStream, WorkflowError> {
        let scripted = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(WorkflowError::network("No mock response queued")));
        scripted.map(|items| stream::iter(items).boxed())
    }
}

impl Default for MockWorkflowClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowClient for MockWorkflowClient {
    async fn open(&self, request: &WorkflowRequest) -> Result<FrameStream, WorkflowError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_response()
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<Value>, WorkflowError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Delayed Mock Workflow Client (for cancellation testing)
// ============================================================================

/// Mock client that holds every request open for a while
pub struct DelayedMockWorkflowClient {
    inner: MockWorkflowClient,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockWorkflowClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockWorkflowClient::new(),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_frames(&self, frames: Vec<Value>) {
        self.inner.queue_frames(frames);
    }

    pub fn recorded_requests(&self) -> Vec<WorkflowRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl WorkflowClient for DelayedMockWorkflowClient {
    async fn open(&self, request: &WorkflowRequest) -> Result<FrameStream, WorkflowError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_response()
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<Value>, WorkflowError> {
        self.inner.load_history(limit).await
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
#[derive(Default)]
pub struct InMemoryStorage {
    turns: Mutex<HashMap<String, Vec<ConversationTurn>>>,
    states: Mutex<HashMap<String, WorkflowState>>,
    visualizations: Mutex<HashMap<String, VisualizationPayload>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all turns for a session (test helper)
    pub fn get_turns(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.turns
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Get current state for a session (test helper)
    pub fn get_current_state(&self, session_id: &str) -> Option<WorkflowState> {
        self.states.lock().unwrap().get(session_id).cloned()
    }

    pub fn get_visualization(&self, session_id: &str) -> Option<VisualizationPayload> {
        self.visualizations.lock().unwrap().get(session_id).cloned()
    }
}

#[async_trait]
impl TurnStore for InMemoryStorage {
    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), String> {
        let mut turns = self.turns.lock().unwrap();
        let list = turns.entry(session_id.to_string()).or_default();
        if list.iter().any(|t| t.sequence_id == turn.sequence_id) {
            return Err(format!("Duplicate sequence id {}", turn.sequence_id));
        }
        list.push(turn.clone());
        Ok(())
    }

    async fn set_visualization(
        &self,
        session_id: &str,
        payload: &VisualizationPayload,
    ) -> Result<(), String> {
        self.visualizations
            .lock()
            .unwrap()
            .insert(session_id.to_string(), payload.clone());
        Ok(())
    }
}

#[async_trait]
impl StateStore for InMemoryStorage {
    async fn update_state(&self, session_id: &str, state: &WorkflowState) -> Result<(), String> {
        self.states
            .lock()
            .unwrap()
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// A runtime wired to in-memory storage, driven through its channels
pub struct TestRuntime<C: WorkflowClient + 'static> {
    pub storage: Arc<InMemoryStorage>,
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_rx: broadcast::Receiver<SseEvent>,
    pub updates_rx: broadcast::Receiver<ConversationUpdate>,
    pub client: Arc<C>,
    session_id: String,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime<MockWorkflowClient> {
    /// Create a simple test runtime with an instant mock client
    pub fn new() -> TestRuntimeBuilder<MockWorkflowClient> {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder<C> {
    session_id: String,
    retry: RetryPolicy,
    initial_state: WorkflowState,
    client: C,
}

impl TestRuntimeBuilder<MockWorkflowClient> {
    pub fn new() -> Self {
        Self {
            session_id: "test-session".to_string(),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(10),
                factor: 2,
                max_delay: Duration::from_millis(40),
                max_attempts: 5,
            },
            initial_state: WorkflowState::Idle,
            client: MockWorkflowClient::new(),
        }
    }
}

impl Default for TestRuntimeBuilder<MockWorkflowClient> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: WorkflowClient + 'static> TestRuntimeBuilder<C> {
    pub fn client<D: WorkflowClient + 'static>(self, client: D) -> TestRuntimeBuilder<D> {
        TestRuntimeBuilder {
            session_id: self.session_id,
            retry: self.retry,
            initial_state: self.initial_state,
            client,
        }
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn initial_state(mut self, state: WorkflowState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn build(self) -> TestRuntime<C> {
        let storage = Arc::new(InMemoryStorage::new());
        let client = Arc::new(self.client);
        let conversation = ConversationAccumulator::new();
        let updates_rx = conversation.subscribe();

        let context = WorkflowContext::new(&self.session_id, self.retry);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(128);

        let runtime = ConversationRuntime::new(
            context,
            self.initial_state,
            storage.clone(),
            client.clone(),
            conversation,
            event_rx,
            event_tx.clone(),
            broadcast_tx,
        );

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            storage,
            event_tx,
            broadcast_rx,
            updates_rx,
            client,
            session_id: self.session_id,
            _runtime_handle: handle,
        }
    }
}

impl<C: WorkflowClient + 'static> TestRuntime<C> {
    /// Send user message to the runtime
    pub async fn send_message(&self, text: &str) {
        self.event_tx
            .send(Event::UserMessage {
                text: text.to_string(),
            })
            .await
            .expect("Failed to send message");
    }

    /// Send an action click
    pub async fn send_action(&self, action: Action) {
        self.event_tx
            .send(Event::UserAction { action })
            .await
            .expect("Failed to send action");
    }

    /// Send cancel event
    pub async fn send_cancel(&self) {
        self.event_tx
            .send(Event::UserCancel)
            .await
            .expect("Failed to send cancel");
    }

    /// Wait for a specific state type with timeout
    pub async fn wait_for_state(&mut self, expected_type: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await {
                Ok(Ok(SseEvent::StateChange { state })) => {
                    if state.get("type").and_then(|v| v.as_str()) == Some(expected_type) {
                        return true;
                    }
                }
                _ => continue,
            }
        }
        false
    }

    /// Wait for an error event, returning its message
    pub async fn wait_for_error(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await {
                Ok(Ok(SseEvent::Error { message })) => return Some(message),
                _ => continue,
            }
        }
        None
    }

    /// Get persisted turns
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.storage.get_turns(&self.session_id)
    }

    /// Contents of persisted turns, in order
    pub fn contents(&self) -> Vec<String> {
        self.turns()
            .into_iter()
            .filter_map(|t| t.content)
            .collect()
    }

    pub fn state(&self) -> Option<WorkflowState> {
        self.storage.get_current_state(&self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::workflow::{ContinuationPointer, RequestBody, RequestTarget, WaitMode};
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_mock_workflow_client() {
        let mock = MockWorkflowClient::new();
        mock.queue_frames(vec![json!({"message": "Hello"}), json!("not a frame")]);

        let request = WorkflowRequest {
            session_id: "s".to_string(),
            target: RequestTarget::Chat,
            body: RequestBody::Resume,
        };

        let frames: Vec<_> = mock.open(&request).await.unwrap().collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().text(), Some("Hello"));

        // Second call should fail (no more responses)
        assert!(mock.open(&request).await.is_err());
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_storage_rejects_duplicate_ids() {
        let storage = InMemoryStorage::new();
        let turn = crate::conversation::NewTurn::user("hello").into_turn(1, chrono::Utc::now());

        storage.add_turn("s", &turn).await.unwrap();
        assert!(storage.add_turn("s", &turn).await.is_err());
        assert_eq!(storage.get_turns("s").len(), 1);
    }

    /// User question, a status line and an answer with an automatic
    /// pointer, then the continuation delivers a chart
    #[tokio::test]
    async fn test_automatic_continuation_to_visualization() {
        let mut rt = TestRuntime::new().build();
        rt.client.queue_frames(vec![
            json!({"message": "Let me check...", "type": "status"}),
            json!({"answer": "312 patients.", "resumeUrl": "https://x/2", "waitType": "automatic"}),
        ]);
        rt.client.queue_frames(vec![
            json!({"embedUrl": "https://bi/chart/9", "type": "visualization"}),
        ]);

        rt.send_message("How many patients were admitted in March?")
            .await;
        assert!(rt.wait_for_state("auto_continuing", WAIT).await);
        assert!(rt.wait_for_state("idle", WAIT).await);

        assert_eq!(
            rt.contents(),
            vec![
                "How many patients were admitted in March?",
                "Let me check...",
                "312 patients."
            ]
        );
        let turns = rt.turns();
        assert_eq!(
            turns.iter().filter(|t| t.role == Role::Assistant).count(),
            2
        );

        let viz = rt.storage.get_visualization("test-session").unwrap();
        assert_eq!(viz.embed_reference, "https://bi/chart/9");
        assert_eq!(rt.state(), Some(WorkflowState::Idle));

        let requests = rt.client.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].target, RequestTarget::Chat);
        assert_eq!(
            requests[1].target,
            RequestTarget::Continuation {
                url: "https://x/2".to_string()
            }
        );
        assert_eq!(requests[1].wire_body(), json!({"sessionId": "test-session"}));
    }

    #[tokio::test]
    async fn test_subscribers_see_turns_and_visualization() {
        let mut rt = TestRuntime::new().build();
        rt.client.queue_frames(vec![
            json!({"message": "Here you go", "embedUrl": "https://bi/chart/4"}),
        ]);

        rt.send_message("chart please").await;
        assert!(rt.wait_for_state("idle", WAIT).await);

        let mut kinds = Vec::new();
        while let Ok(update) = rt.updates_rx.try_recv() {
            kinds.push(match update {
                ConversationUpdate::TurnAppended(t) => t.role.as_str(),
                ConversationUpdate::VisualizationChanged(_) => "visualization",
            });
        }
        assert_eq!(kinds, vec!["user", "visualization", "assistant"]);
    }

    /// Action payload nested in a stringified `value` is parsed once and
    /// sent back unchanged
    #[tokio::test]
    async fn test_interactive_action_round_trip() {
        let mut rt = TestRuntime::new().build();
        rt.client.queue_frames(vec![json!({
            "message": "Which month?",
            "actions": [
                {"label": "March", "value": "{\"month\":3,\"filters\":{\"ward\":\"A\"}}"},
                {"label": "April", "payload": {"month": 4}}
            ],
            "resumeUrl": "https://x/5",
            "waitType": "interactive"
        })]);
        rt.client.queue_frames(vec![json!({"answer": "312 patients in March."})]);

        rt.send_message("How many patients?").await;
        assert!(rt.wait_for_state("awaiting_user_input", WAIT).await);

        let prompt = rt.turns().pop().unwrap();
        assert!(prompt.is_waiting());
        let action = prompt.actions[0].clone();
        assert_eq!(action.payload, json!({"month": 3, "filters": {"ward": "A"}}));

        rt.send_action(action.clone()).await;
        assert!(rt.wait_for_state("idle", WAIT).await);

        let requests = rt.client.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].target,
            RequestTarget::Continuation {
                url: "https://x/5".to_string()
            }
        );
        assert_eq!(
            serde_json::to_string(&requests[1].wire_body()["action"]).unwrap(),
            serde_json::to_string(&action.payload).unwrap()
        );
        assert_eq!(
            rt.contents().last().map(String::as_str),
            Some("312 patients in March.")
        );
    }

    /// A consumed pointer answered with 409 ends quietly
    #[tokio::test]
    async fn test_conflict_terminates_without_error_turn() {
        let pointer = ContinuationPointer {
            url: "https://x/5".to_string(),
            wait_mode: WaitMode::Interactive,
        };
        let mut rt = TestRuntime::new()
            .initial_state(WorkflowState::AwaitingUserInput { pointer })
            .build();
        rt.client
            .queue_error(WorkflowError::conflict("Resume URL already used"));

        rt.send_message("yes").await;
        assert!(rt.wait_for_state("idle", WAIT).await);

        let turns = rt.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
        assert!(!turns.iter().any(|t| t.is_error));
    }

    #[tokio::test]
    async fn test_placeholder_retry_exhaustion_is_silent() {
        let mut rt = TestRuntime::new().max_attempts(2).build();
        rt.client
            .queue_frames(vec![json!({"resumeUrl": "https://x/1", "waitType": "automatic"})]);
        for _ in 0..3 {
            rt.client
                .queue_frames(vec![json!({"message": "Workflow was started"})]);
        }

        rt.send_message("slow question").await;
        assert!(rt.wait_for_state("idle", WAIT).await);

        // Chat request, first continuation and two retries
        let requests = rt.client.recorded_requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[1..].iter().all(|r| r.target
            == RequestTarget::Continuation {
                url: "https://x/1".to_string()
            }));
        assert_eq!(rt.contents(), vec!["slow question"]);
    }

    #[tokio::test]
    async fn test_placeholder_then_answer() {
        let mut rt = TestRuntime::new().build();
        rt.client
            .queue_frames(vec![json!({"resumeUrl": "https://x/1", "waitType": "automatic"})]);
        rt.client
            .queue_frames(vec![json!({"message": "Please wait..."})]);
        rt.client.queue_frames(vec![json!({"answer": "done"})]);

        rt.send_message("q").await;
        assert!(rt.wait_for_state("retry_backoff", WAIT).await);
        assert!(rt.wait_for_state("idle", WAIT).await);

        assert_eq!(rt.contents(), vec!["q", "done"]);
        assert_eq!(rt.client.recorded_requests().len(), 3);
    }

    /// Placeholder and answer in the same response: the pointer is spent
    #[tokio::test]
    async fn test_answer_after_placeholder_in_same_response_is_final() {
        let mut rt = TestRuntime::new().build();
        rt.client
            .queue_frames(vec![json!({"resumeUrl": "https://x/1", "waitType": "automatic"})]);
        rt.client.queue_frames(vec![
            json!({"message": "Please wait"}),
            json!({"answer": "done"}),
        ]);

        rt.send_message("q").await;
        assert!(rt.wait_for_state("auto_continuing", WAIT).await);

        let mut states = Vec::new();
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Ok(SseEvent::StateChange { state })) =
                tokio::time::timeout(Duration::from_millis(50), rt.broadcast_rx.recv()).await
            {
                let name = state["type"].as_str().unwrap_or_default().to_string();
                states.push(name.clone());
                if name == "idle" {
                    break;
                }
            }
        }

        assert_eq!(states, vec!["idle"]);
        assert_eq!(rt.contents(), vec!["q", "done"]);
        assert_eq!(rt.client.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_appends_one_error_turn() {
        let mut rt = TestRuntime::new().build();
        rt.client
            .queue_error(WorkflowError::http(500, "HTTP 500: boom"));

        rt.send_message("Hi").await;
        assert!(rt.wait_for_state("idle", WAIT).await);
        let error = rt.wait_for_error(WAIT).await;
        assert_eq!(error.as_deref(), Some("HTTP 500: boom"));

        let turns = rt.turns();
        assert_eq!(turns.len(), 2);
        assert!(turns[1].is_error);
        assert_eq!(turns.iter().filter(|t| t.is_error).count(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_earlier_frames() {
        let mut rt = TestRuntime::new().build();
        rt.client.queue_broken_stream(
            vec![json!({"message": "Let me check...", "type": "status"})],
            WorkflowError::network("connection reset"),
        );

        rt.send_message("Hi").await;
        assert!(rt.wait_for_state("idle", WAIT).await);

        let turns = rt.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].content.as_deref(), Some("Let me check..."));
        assert!(turns[2].is_error);
    }

    /// Workflow requests are spawned as background tasks and can be
    /// cancelled immediately via `CancellationToken`.
    #[tokio::test]
    async fn test_cancel_during_request() {
        let client = DelayedMockWorkflowClient::new(Duration::from_secs(5));
        client.queue_frames(vec![json!({"answer": "should be discarded"})]);
        let request_started = client.request_started.clone();

        let mut rt = TestRuntime::new().client(client).build();
        let start = tokio::time::Instant::now();
        rt.send_message("Hello").await;

        tokio::time::timeout(Duration::from_secs(1), request_started.notified())
            .await
            .expect("workflow request should start");

        rt.send_cancel().await;
        assert!(rt.wait_for_state("idle", Duration::from_secs(2)).await);

        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_secs(2),
            "Cancellation should be fast, took {elapsed:?}"
        );

        // Only the user turn; the response was discarded
        assert_eq!(rt.contents(), vec!["Hello"]);

        // The engine accepts new input afterwards
        rt.send_message("Again").await;
        assert!(
            rt.wait_for_state("awaiting_initial_response", Duration::from_secs(1))
                .await
        );
        assert_eq!(rt.client.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_busy_session_rejects_second_message() {
        let client = DelayedMockWorkflowClient::new(Duration::from_secs(5));
        let request_started = client.request_started.clone();
        let mut rt = TestRuntime::new().client(client).build();

        rt.send_message("first").await;
        tokio::time::timeout(Duration::from_secs(1), request_started.notified())
            .await
            .expect("workflow request should start");

        rt.send_message("second").await;
        let error = rt.wait_for_error(Duration::from_secs(2)).await;
        assert!(error.is_some_and(|m| m.contains("previous request")));

        assert_eq!(rt.contents(), vec!["first"]);
        assert_eq!(rt.client.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_transport_events_are_dropped() {
        let mut rt = TestRuntime::new().build();
        let frame = WorkflowFrame::from_value(json!({"answer": "from nowhere"})).unwrap();

        rt.event_tx
            .send(Event::FrameReceived {
                request_id: 99,
                frame,
            })
            .await
            .unwrap();
        rt.event_tx
            .send(Event::ResponseComplete { request_id: 99 })
            .await
            .unwrap();

        // A real exchange afterwards is unaffected
        rt.client.queue_frames(vec![json!({"answer": "real"})]);
        rt.send_message("q").await;
        assert!(rt.wait_for_state("idle", WAIT).await);

        assert_eq!(rt.contents(), vec!["q", "real"]);
    }
}
