//! The network boundary of a connection.

use std::future::Future;

/// Outbound half of a client connection.
///
/// Inbound frames are not part of this trait: the host pumps them into
/// [`Connection::serve`](crate::Connection::serve) and ends the stream when
/// the peer goes away.
pub trait Transport: Send + Sync + 'static {
    /// Deliver one encoded frame. An error means the channel is broken.
    fn send(&self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the underlying channel. Must not block.
    fn close(&self);
}

/// Error reported by a [`Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(String),
}
