//! WebSocket hosting for [`Connection`].
//!
//! Accepts TCP connections, performs the WebSocket handshake (selecting the
//! `graphql-ws` sub-protocol when offered), and pumps text frames into a
//! [`Connection`]. Outbound frames go through a bounded queue drained by a
//! per-socket writer task.

use crate::config::{ConnectionConfig, ServerConfig};
use crate::connection::Connection;
use crate::error::ServerError;
use crate::executor::Executor;
use crate::hooks::LifecycleHooks;
use crate::transport::{Transport, TransportError};
use futures_util::{Sink, SinkExt, StreamExt, future};
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use subwire_core::SUBPROTOCOL;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

/// Bind `config.listen` and serve until the listener fails.
pub async fn run<E, H>(config: ServerConfig, executor: Arc<E>, hooks: Arc<H>) -> Result<(), ServerError>
where
    H: LifecycleHooks,
    E: Executor<H::Context>,
{
    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!("Listening on ws://{}", listener.local_addr()?);
    serve(listener, config.connection, executor, hooks).await
}

/// Accept connections from an already bound listener.
pub async fn serve<E, H>(
    listener: TcpListener,
    config: ConnectionConfig,
    executor: Arc<E>,
    hooks: Arc<H>,
) -> Result<(), ServerError>
where
    H: LifecycleHooks,
    E: Executor<H::Context>,
{
    loop {
        let (stream, client_addr) = listener.accept().await?;
        let config = config.clone();
        let executor = executor.clone();
        let hooks = hooks.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, config, executor, hooks).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection<E, H>(
    stream: TcpStream,
    addr: SocketAddr,
    config: ConnectionConfig,
    executor: Arc<E>,
    hooks: Arc<H>,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    H: LifecycleHooks,
    E: Executor<H::Context>,
{
    let ws = tokio_tungstenite::accept_hdr_async(stream, negotiate_subprotocol).await?;
    let (sink, stream) = ws.split();

    tracing::debug!("New connection from {}", addr);

    let (transport, writer) = WsTransport::new(sink, config.outbound_buffer);
    let writer = tokio::spawn(writer);
    let connection = Connection::new(transport, executor, hooks, config);

    let inbound = stream
        .take_while(|frame| {
            let open = match frame {
                Ok(message) => !message.is_close(),
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    false
                }
            };
            future::ready(open)
        })
        .filter_map(|frame| future::ready(frame.ok().and_then(frame_text)));

    connection.serve(inbound).await;
    let _ = writer.await;

    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

/// Text of a data frame. Binary frames are read as (lossy) UTF-8; control
/// frames carry no message.
fn frame_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|p| p.trim() == SUBPROTOCOL));
    if offered {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    }
    Ok(response)
}

/// [`Transport`] over the write half of a WebSocket.
pub struct WsTransport {
    frames: mpsc::Sender<Message>,
    shutdown: Arc<Notify>,
}

impl WsTransport {
    /// Wrap `sink`. The returned future is the writer and must be driven
    /// (usually spawned) for frames to leave.
    pub fn new<S>(sink: S, buffer: usize) -> (Self, impl Future<Output = ()> + Send + 'static)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (frames, rx) = mpsc::channel(buffer.max(1));
        let shutdown = Arc::new(Notify::new());
        let writer = write_frames(sink, rx, shutdown.clone());
        (Self { frames, shutdown }, writer)
    }
}

impl Transport for WsTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.frames
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

async fn write_frames<S>(mut sink: S, mut rx: mpsc::Receiver<Message>, shutdown: Arc<Notify>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::debug!("WebSocket write failed: {}", e);
                        return;
                    }
                }
                None => break,
            },
        }
    }

    // Flush what was queued before the close, then say goodbye.
    rx.close();
    while let Some(frame) = rx.recv().await {
        if sink.send(frame).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}
