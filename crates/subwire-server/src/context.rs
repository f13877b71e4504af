//! One live subscription and its delivery loop.

use crate::connection::Connection;
use crate::executor::{Executor, ResultStream};
use crate::hooks::LifecycleHooks;
use crate::transport::Transport;
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use subwire_core::{OperationId, ServerMessage};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Registry-side handle of an active subscription.
///
/// Dropping it disposes the subscription: the live flag goes down, so no
/// further `data` leaves the connection for it, and the delivery loop is told
/// to stop, which drops the result stream and releases the engine's resources.
#[derive(Debug)]
pub struct SubscriptionContext {
    id: OperationId,
    token: u64,
    live: Arc<AtomicBool>,
    cancel: Option<oneshot::Sender<()>>,
}

/// Task-side half of a [`SubscriptionContext`].
#[derive(Debug)]
pub struct Delivery {
    id: OperationId,
    token: u64,
    live: Arc<AtomicBool>,
    cancelled: oneshot::Receiver<()>,
}

impl SubscriptionContext {
    /// Create a context and the delivery half that drains its results.
    ///
    /// `token` tells apart successive subscriptions that reuse one id.
    pub fn new(id: OperationId, token: u64) -> (Self, Delivery) {
        let live = Arc::new(AtomicBool::new(true));
        let (cancel, cancelled) = oneshot::channel();
        let context = Self {
            id: id.clone(),
            token,
            live: live.clone(),
            cancel: Some(cancel),
        };
        let delivery = Delivery {
            id,
            token,
            live,
            cancelled,
        };
        (context, delivery)
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl Drop for SubscriptionContext {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Delivery {
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Forward every result to the client until the stream ends, fails, or
    /// the subscription is disposed.
    pub(crate) async fn run<T, E, H>(mut self, connection: Connection<T, E, H>, mut results: ResultStream)
    where
        T: Transport,
        H: LifecycleHooks,
        E: Executor<H::Context>,
    {
        loop {
            let item = tokio::select! {
                biased;
                _ = &mut self.cancelled => {
                    debug!(id = %self.id, "subscription disposed");
                    return;
                }
                item = results.next() => item,
            };

            let (message, terminal) = match item {
                Some(Ok(payload)) => (ServerMessage::data(self.id.clone(), payload), false),
                Some(Err(err)) => {
                    debug!(id = %self.id, error = %err, "subscription failed");
                    (ServerMessage::error(Some(self.id.clone()), err.to_string()), true)
                }
                None => {
                    debug!(id = %self.id, "subscription complete");
                    (ServerMessage::complete(self.id.clone()), true)
                }
            };

            let outcome = if !terminal {
                connection.send_live(&self.live, &message).await
            } else if connection.registry().release(&self.id, self.token).await {
                // Only the owner of the id reports its end. A context that was
                // stopped meanwhile stays silent.
                connection.send_message(&message).await.map(|_| false)
            } else {
                Ok(false)
            };

            match outcome {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    error!(id = %self.id, error = %err, "failed to deliver result");
                    connection.close().await;
                    return;
                }
            }
        }
    }
}
