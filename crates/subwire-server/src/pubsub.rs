//! In-process topic fan-out and an executor that subscribes to it.

use crate::executor::{ExecutionError, Executor, ResultStream};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use subwire_core::OperationRequest;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast};

/// Named broadcast channels, created on first use.
pub struct PubSub {
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    capacity: usize,
}

impl PubSub {
    /// `capacity` is how many values a slow subscriber may fall behind before
    /// it starts skipping.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish to every current subscriber of `topic`. Returns how many
    /// received it.
    pub async fn publish(&self, topic: &str, value: Value) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .and_then(|tx| tx.send(value).ok())
            .unwrap_or(0)
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics.get(topic).map_or(0, broadcast::Sender::receiver_count)
    }

    /// Values published to `topic` from now on. Dropping the stream
    /// unsubscribes.
    pub async fn subscribe(&self, topic: &str) -> BoxStream<'static, Value> {
        let rx = {
            let mut topics = self.topics.write().await;
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        let topic = topic.to_string();
        stream::unfold(rx, move |mut rx| {
            let topic = topic.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(value) => return Some((value, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(topic = %topic, skipped, "subscriber lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Executor whose query text names a [`PubSub`] topic.
///
/// Each published value `v` on topic `t` is delivered as
/// `{"data": {t: v}}`.
#[derive(Clone)]
pub struct TopicExecutor {
    pubsub: Arc<PubSub>,
}

impl TopicExecutor {
    pub fn new(pubsub: Arc<PubSub>) -> Self {
        Self { pubsub }
    }
}

impl<C: Send + Sync + 'static> Executor<C> for TopicExecutor {
    async fn execute(
        &self,
        request: OperationRequest,
        _context: Option<Arc<C>>,
    ) -> Result<ResultStream, ExecutionError> {
        let topic = request
            .query_str()
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .ok_or_else(|| ExecutionError::new("query must name a topic"))?
            .to_string();

        let values = self.pubsub.subscribe(&topic).await;
        Ok(values
            .map(move |value| {
                let mut data = Map::new();
                data.insert(topic.clone(), value);
                Ok(json!({ "data": data }))
            })
            .boxed())
    }
}
