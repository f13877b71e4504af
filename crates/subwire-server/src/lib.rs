//! Subscription multiplexing over a single WebSocket.
//!
//! A [`Connection`] speaks the `graphql-ws` message protocol: the client
//! initializes once, then starts and stops any number of operations by id.
//! Results come from an [`Executor`]; per-connection state comes from
//! [`LifecycleHooks`]. The [`ws`] module hosts connections over
//! tokio-tungstenite.

mod config;
mod connection;
mod context;
mod error;
mod executor;
mod hooks;
mod registry;
mod transport;

pub mod pubsub;
pub mod ws;

#[cfg(test)]
mod testutil;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::Connection;
pub use context::SubscriptionContext;
pub use error::{ConfigError, ConnectionError, HandlerError, ServerError};
pub use executor::{ExecutionError, Executor, ResultStream};
pub use hooks::{HookError, LifecycleHooks, NoHooks};
pub use registry::{RegistryError, SubscriptionRegistry};
pub use transport::{Transport, TransportError};
