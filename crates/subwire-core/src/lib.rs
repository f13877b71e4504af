//! Core types for subwire.
//!
//! This crate provides the wire envelope and its codec. The connection state
//! machine lives in `subwire-server`; nothing here does I/O.

mod id;
mod message;

pub use id::OperationId;
pub use message::{ClientMessage, DecodeError, OperationRequest, ServerMessage, decode, encode, kind};

/// WebSocket sub-protocol name negotiated during the handshake.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no message handled yet.
    Init,
    /// Normal operation.
    Active,
    /// Terminal. Every subscription is disposed and the transport is closed.
    Closed,
}
