//! Test doubles for the connection's collaborators.

use crate::executor::{ExecutionError, Executor, ResultStream};
use crate::hooks::{HookError, LifecycleHooks};
use crate::transport::{Transport, TransportError};
use futures_util::{StreamExt, stream};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subwire_core::OperationRequest;
use tokio::sync::mpsc;

/// Records every frame; optionally fails every send.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    sent: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    closes: AtomicUsize,
    fail: bool,
}

impl MockTransport {
    pub(crate) fn failing() -> Self {
        Self {
            state: Arc::new(MockState {
                fail: true,
                ..MockState::default()
            }),
        }
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` frames were sent and return them decoded.
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.sent.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for outbound frames");
        self.sent_json()
    }
}

impl Transport for MockTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.fail {
            return Err(TransportError::Io("Socket closed".into()));
        }
        self.state.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out queued results in call order and records the contexts it saw.
#[derive(Default)]
pub(crate) struct QueueExecutor {
    queue: Mutex<VecDeque<Result<ResultStream, ExecutionError>>>,
    contexts: Mutex<Vec<Option<String>>>,
    panics: bool,
}

impl QueueExecutor {
    pub(crate) fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub(crate) fn push(&self, result: Result<ResultStream, ExecutionError>) {
        self.queue.lock().unwrap().push_back(result);
    }

    pub(crate) fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub(crate) fn contexts(&self) -> Vec<Option<String>> {
        self.contexts.lock().unwrap().clone()
    }
}

impl Executor<String> for QueueExecutor {
    async fn execute(
        &self,
        _request: OperationRequest,
        context: Option<Arc<String>>,
    ) -> Result<ResultStream, ExecutionError> {
        if self.panics {
            panic!("executor exploded");
        }
        self.contexts
            .lock()
            .unwrap()
            .push(context.map(|c| c.as_ref().clone()));
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExecutionError::new("no result queued")))
    }
}

/// Context is the `token` field of the init payload. `{"reject": true}`
/// is refused.
#[derive(Default)]
pub(crate) struct TestHooks {
    closes: Mutex<Vec<bool>>,
    init_delay: Option<Duration>,
}

impl TestHooks {
    /// Init takes `delay` before it resolves.
    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            init_delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.lock().unwrap().len()
    }

    pub(crate) fn closed_with_context(&self) -> Vec<bool> {
        self.closes.lock().unwrap().clone()
    }
}

impl LifecycleHooks for TestHooks {
    type Context = String;

    async fn on_connection_init(&self, payload: Option<Value>) -> Result<String, HookError> {
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        let payload = payload.unwrap_or(Value::Null);
        if payload["reject"] == Value::Bool(true) {
            return Err(HookError::Rejected);
        }
        Ok(payload["token"].as_str().unwrap_or_default().to_string())
    }

    fn on_connection_close(&self, context: Option<Arc<String>>) {
        self.closes.lock().unwrap().push(context.is_some());
    }
}

/// Sets its flag when dropped.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A result stream fed by hand. The flag goes up once the stream is dropped,
/// i.e. once the engine's resources would have been released.
pub(crate) fn feed() -> (
    mpsc::UnboundedSender<Result<Value, ExecutionError>>,
    ResultStream,
    Arc<AtomicBool>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let released = Arc::new(AtomicBool::new(false));
    let guard = ReleaseGuard(released.clone());
    let results = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|item| (item, (rx, guard)))
    })
    .boxed();
    (tx, results, released)
}

/// A result stream that panics when first polled.
pub(crate) fn panicking_stream() -> ResultStream {
    stream::poll_fn(|_| -> std::task::Poll<Option<Result<Value, ExecutionError>>> {
        panic!("result stream exploded")
    })
    .boxed()
}
