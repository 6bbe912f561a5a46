//! Transport layer abstraction.

use async_trait::async_trait;
use entisync_core::codec::JsonValue;
use entisync_core::{Method, SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A transport sends REST requests to the server.
///
/// Paths are relative to the server root (`classes/Score`, `batch`,
/// `files/photo.png`). The `batch` endpoint takes
/// `{"requests": [{"method", "path", "body"}], "transaction"?}` and answers
/// with one `{"success": ...}` or `{"error": {"code", "error"}}` slot per
/// request, in request order.
///
/// Implementations report unreachable servers as
/// `SyncError::ConnectionFailed` and server-side failures through
/// `SyncError::from_server`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the decoded JSON response.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: JsonValue,
        options: &RequestOptions,
    ) -> SyncResult<JsonValue>;
}

/// Per-request options handed to the transport.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Request timeout.
    pub timeout: Duration,
    /// Abort handle of the request, if any.
    pub task: Option<RequestTask>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            task: None,
        }
    }
}

#[derive(Debug, Default)]
struct TaskInner {
    aborted: AtomicBool,
    signal: Notify,
}

/// Abort handle for in-flight requests.
///
/// Clones share the flag. Aborting fails every request carrying the handle
/// with `SyncError::Aborted`; the orchestrator then restores the edits of
/// the affected objects.
#[derive(Debug, Clone, Default)]
pub struct RequestTask {
    inner: Arc<TaskInner>,
}

impl RequestTask {
    /// Creates a handle that has not been aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts every request carrying this handle.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.signal.notify_waiters();
    }

    /// Returns true once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once the handle is aborted.
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.signal.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Relative path.
    pub path: String,
    /// JSON body.
    pub body: JsonValue,
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> SyncResult<JsonValue> + Send + Sync>;

/// A scripted transport for testing.
///
/// Responses are served from a queue in call order; once the queue is empty
/// the handler answers, if one is set. Every call is logged.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<SyncResult<JsonValue>>>,
    handler: Mutex<Option<Handler>>,
    calls: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn push_response(&self, response: JsonValue) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Answers calls the queue does not cover.
    pub fn set_handler(
        &self,
        handler: impl Fn(&RecordedRequest) -> SyncResult<JsonValue> + Send + Sync + 'static,
    ) {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Delays every response.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Returns every request seen so far.
    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of requests seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("queued", &self.responses.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: JsonValue,
        _options: &RequestOptions,
    ) -> SyncResult<JsonValue> {
        let request = RecordedRequest {
            method,
            path: path.to_string(),
            body,
        };
        self.calls.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().pop_front();
        if let Some(response) = scripted {
            return response;
        }
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(&request),
            None => Err(SyncError::ConnectionFailed(format!(
                "no scripted response for {method} {path}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_serves_queue_then_handler() {
        let transport = MockTransport::new();
        transport.push_response(json!({"objectId": "a"}));
        transport.set_handler(|request| Ok(json!({"path": request.path})));

        let options = RequestOptions::default();
        let first = transport
            .request(Method::Post, "classes/Score", json!({}), &options)
            .await
            .unwrap();
        assert_eq!(first, json!({"objectId": "a"}));

        let second = transport
            .request(Method::Get, "classes/Score/a", JsonValue::Null, &options)
            .await
            .unwrap();
        assert_eq!(second, json!({"path": "classes/Score/a"}));
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.calls()[1].method, Method::Get);
    }

    #[tokio::test]
    async fn mock_without_script_reports_connection_failure() {
        let transport = MockTransport::new();
        let err = transport
            .request(Method::Get, "classes/Score", JsonValue::Null, &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn request_task_wakes_waiters() {
        let task = RequestTask::new();
        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.aborted().await })
        };
        tokio::task::yield_now().await;
        assert!(!task.is_aborted());
        task.abort();
        waiter.await.unwrap();
        assert!(task.is_aborted());
    }
}
