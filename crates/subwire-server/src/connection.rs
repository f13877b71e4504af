//! The subscription connection: protocol state machine for one client.
//!
//! Inbound frames are handled one at a time by [`Connection::serve`] (or
//! [`Connection::handle_message`] directly). Each `start` spawns a delivery
//! task that runs concurrently with dispatch and with every other
//! subscription. All outbound frames, from dispatch, delivery tasks and the
//! keep-alive task, pass through one send lock, which is also where the
//! connection is marked closed. Nothing is sent once that flag is set.
//!
//! Failure policy:
//! - a malformed or rejected message gets an `error` reply, the connection
//!   stays up;
//! - a failed transport send closes the connection, nothing is retried;
//! - a fault escaping dispatch, or a panic in dispatch or in a delivery task,
//!   closes the connection.

use crate::config::ConnectionConfig;
use crate::context::{Delivery, SubscriptionContext};
use crate::error::{ConnectionError, HandlerError};
use crate::executor::{Executor, ResultStream};
use crate::hooks::LifecycleHooks;
use crate::registry::{RegistryError, SubscriptionRegistry};
use crate::transport::Transport;
use futures_util::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use subwire_core::{
    ClientMessage, ConnectionState, OperationId, OperationRequest, ServerMessage, decode, encode,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

/// Handle to one client connection. Clones share the same connection.
pub struct Connection<T, E, H: LifecycleHooks> {
    inner: Arc<Inner<T, E, H>>,
}

struct Inner<T, E, H: LifecycleHooks> {
    transport: T,
    executor: Arc<E>,
    hooks: Arc<H>,
    config: ConnectionConfig,
    registry: SubscriptionRegistry,
    context: RwLock<Option<Arc<H::Context>>>,
    send_lock: Mutex<()>,
    active: AtomicBool,
    closed: AtomicBool,
    keep_alive_started: AtomicBool,
    next_token: AtomicU64,
}

impl<T, E, H: LifecycleHooks> Clone for Connection<T, E, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E, H> Connection<T, E, H>
where
    T: Transport,
    H: LifecycleHooks,
    E: Executor<H::Context>,
{
    pub fn new(transport: T, executor: Arc<E>, hooks: Arc<H>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                executor,
                hooks,
                config,
                registry: SubscriptionRegistry::new(),
                context: RwLock::new(None),
                send_lock: Mutex::new(()),
                active: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                keep_alive_started: AtomicBool::new(false),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else if self.inner.active.load(Ordering::Acquire) {
            ConnectionState::Active
        } else {
            ConnectionState::Init
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Handle inbound frames in arrival order until the stream ends or the
    /// connection closes, then close it.
    pub async fn serve<S>(&self, inbound: S)
    where
        S: Stream<Item = String> + Send,
    {
        let mut inbound = pin!(inbound);
        while let Some(raw) = inbound.next().await {
            match AssertUnwindSafe(self.handle_message(&raw)).catch_unwind().await {
                Ok(Ok(())) => {}
                // Only an outbound encode failure lands here, which the
                // current message types cannot produce.
                Ok(Err(err)) => {
                    error!(error = %err, "unhandled fault, closing connection");
                    self.close().await;
                }
                Err(_) => {
                    error!("message handler panicked, closing connection");
                    self.close().await;
                }
            }
            if self.is_closed() {
                break;
            }
        }
        self.close().await;
    }

    /// Decode and dispatch one inbound frame.
    ///
    /// Protocol and handler failures are answered with an `error` message and
    /// return `Ok`. An `Err` is a fault the caller must treat as fatal.
    pub async fn handle_message(&self, raw: &str) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Ok(());
        }
        self.inner.active.store(true, Ordering::Release);

        let message = match decode(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "malformed message");
                self.send_message(&ServerMessage::error(None, err.to_string()))
                    .await?;
                return Ok(());
            }
        };

        let id = message.id().cloned();
        match self.dispatch(message).await {
            Ok(()) => Ok(()),
            Err(HandlerError::Fault(err)) => Err(err),
            Err(err) => {
                debug!(id = ?id, error = %err, "message rejected");
                self.send_message(&ServerMessage::error(id, err.to_string()))
                    .await?;
                Ok(())
            }
        }
    }

    async fn dispatch(&self, message: ClientMessage) -> Result<(), HandlerError> {
        match message {
            ClientMessage::ConnectionInit { payload } => self.handle_init(payload).await,
            ClientMessage::Start { id, payload } => self.handle_start(id, payload).await,
            ClientMessage::Stop { id } => {
                self.handle_stop(id).await;
                Ok(())
            }
            ClientMessage::ConnectionTerminate => {
                debug!("client terminated connection");
                self.close().await;
                Ok(())
            }
            ClientMessage::Unknown { .. } => Err(HandlerError::InvalidType),
        }
    }

    async fn handle_init(&self, payload: Option<Value>) -> Result<(), HandlerError> {
        match self.inner.hooks.on_connection_init(payload).await {
            Ok(context) => {
                {
                    // `shutdown` sets `closed` before it takes this slot, so a
                    // context installed here is always seen by the close hook.
                    let mut slot = self.inner.context.write().await;
                    if self.is_closed() {
                        debug!("connection closed during init, discarding context");
                        return Ok(());
                    }
                    *slot = Some(Arc::new(context));
                }
                self.send_message(&ServerMessage::ConnectionAck).await?;
                self.start_keep_alive();
            }
            Err(err) => {
                debug!(error = %err, "connection init rejected");
                let message = ServerMessage::ConnectionError {
                    message: err.to_string(),
                };
                self.send_message(&message).await?;
            }
        }
        Ok(())
    }

    async fn handle_start(
        &self,
        id: Option<OperationId>,
        payload: Option<Value>,
    ) -> Result<(), HandlerError> {
        let Some(request) = OperationRequest::from_payload(payload).map_err(HandlerError::Payload)?
        else {
            return Ok(());
        };
        let id = id.ok_or(HandlerError::MissingId)?;

        let registry = self.registry();
        if registry.contains(&id).await {
            return Err(RegistryError::DuplicateId(id).into());
        }
        if let Some(max) = self.inner.config.max_subscriptions {
            if registry.len().await >= max {
                return Err(HandlerError::TooManySubscriptions(max));
            }
        }

        let context = self.inner.context.read().await.clone();
        let results = self.inner.executor.execute(request, context).await?;

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (subscription, delivery) = SubscriptionContext::new(id.clone(), token);
        registry.register(subscription).await?;
        self.spawn_delivery(delivery, results);

        debug!(id = %id, "subscription started");
        Ok(())
    }

    async fn handle_stop(&self, id: Option<OperationId>) {
        let Some(id) = id else {
            return;
        };
        if self.registry().remove(&id).await {
            // A data frame that passed the live check before disposal may
            // still be in flight; it must land before stop returns.
            drop(self.inner.send_lock.lock().await);
            debug!(id = %id, "subscription stopped by client");
        }
    }

    fn spawn_delivery(&self, delivery: Delivery, results: ResultStream) {
        let id = delivery.id().clone();
        let task = tokio::spawn(delivery.run(self.clone(), results));
        let connection = self.clone();
        tokio::spawn(async move {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!(id = %id, "delivery task panicked, closing connection");
                    connection.close().await;
                }
            }
        });
    }

    fn start_keep_alive(&self) {
        let Some(interval) = self.inner.config.keep_alive() else {
            return;
        };
        if self.inner.keep_alive_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let connection = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match connection.send_message(&ServerMessage::KeepAlive).await {
                    Ok(true) => {}
                    _ => break,
                }
            }
        });
    }

    /// Encode and send a message. Returns whether it reached the transport.
    pub async fn send_message(&self, message: &ServerMessage) -> Result<bool, ConnectionError> {
        let raw = encode(message)?;
        Ok(self.deliver(raw, None).await)
    }

    /// Like [`send_message`](Self::send_message), but only while `live` is
    /// set. The flag is checked under the send lock, so once a subscription
    /// is disposed none of its frames can follow.
    pub(crate) async fn send_live(
        &self,
        live: &AtomicBool,
        message: &ServerMessage,
    ) -> Result<bool, ConnectionError> {
        let raw = encode(message)?;
        Ok(self.deliver(raw, Some(live)).await)
    }

    /// Send an already encoded frame. A transport failure closes the
    /// connection.
    pub async fn send_raw(&self, raw: String) -> bool {
        self.deliver(raw, None).await
    }

    async fn deliver(&self, raw: String, live: Option<&AtomicBool>) -> bool {
        let guard = self.inner.send_lock.lock().await;
        if self.is_closed() || live.is_some_and(|live| !live.load(Ordering::Acquire)) {
            return false;
        }
        match self.inner.transport.send(raw).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "send failed, closing connection");
                self.inner.closed.store(true, Ordering::Release);
                drop(guard);
                self.shutdown().await;
                false
            }
        }
    }

    /// Close the connection. Only the first call has any effect.
    pub async fn close(&self) {
        {
            let _guard = self.inner.send_lock.lock().await;
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.shutdown().await;
    }

    // Runs once, after `closed` was set under the send lock.
    async fn shutdown(&self) {
        let disposed = self.inner.registry.remove_all().await;
        let context = self.inner.context.write().await.take();
        self.inner.hooks.on_connection_close(context);
        self.inner.transport.close();
        debug!(subscriptions = disposed, "connection closed");
    }
}
