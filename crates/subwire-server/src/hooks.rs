//! Connection lifecycle hooks.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Host callbacks that build and tear down per-connection context.
pub trait LifecycleHooks: Send + Sync + 'static {
    /// Opaque state handed to the executor for every operation on the
    /// connection.
    type Context: Send + Sync + 'static;

    /// Called for each `connection_init`. An error is reported to the client
    /// as `connection_error`; the connection stays open.
    fn on_connection_init(
        &self,
        payload: Option<Value>,
    ) -> impl Future<Output = Result<Self::Context, HookError>> + Send;

    /// Called exactly once when the connection closes, with the context of
    /// the last successful init.
    fn on_connection_close(&self, _context: Option<Arc<Self::Context>>) {}
}

/// Failure of [`LifecycleHooks::on_connection_init`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    /// The host refused the connection parameters.
    #[error("Forbidden")]
    Rejected,
    #[error("{0}")]
    Failed(String),
}

/// Accepts every init and keeps no context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl LifecycleHooks for NoHooks {
    type Context = ();

    async fn on_connection_init(&self, _payload: Option<Value>) -> Result<(), HookError> {
        Ok(())
    }
}
