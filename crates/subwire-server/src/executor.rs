//! The execution engine seam.

use futures_util::stream::BoxStream;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use subwire_core::OperationRequest;

/// Lazy sequence of results for one operation.
///
/// Dropping the stream is its cancellation: implementations release upstream
/// resources (topic subscriptions, timers) in `Drop`.
pub type ResultStream = BoxStream<'static, Result<Value, ExecutionError>>;

/// Turns a `start` request into a [`ResultStream`].
///
/// `C` is the connection context produced by
/// [`LifecycleHooks::on_connection_init`](crate::LifecycleHooks::on_connection_init).
/// It is `None` when the client started an operation without initializing.
pub trait Executor<C>: Send + Sync + 'static {
    fn execute(
        &self,
        request: OperationRequest,
        context: Option<Arc<C>>,
    ) -> impl Future<Output = Result<ResultStream, ExecutionError>> + Send;
}

/// Failure resolving a request or producing one of its results.
///
/// The message is sent to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
