//! Per-connection map from operation id to live subscription.

use crate::context::SubscriptionContext;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use subwire_core::OperationId;
use tokio::sync::Mutex;

/// Active subscriptions of one connection.
///
/// Every mutation happens under one lock, so a client `stop` racing with a
/// delivery loop removing itself resolves to exactly one removal. Removing a
/// context drops it, which disposes it; a context can only be removed once.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    contexts: HashMap<OperationId, SubscriptionContext>,
    closed: bool,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a context under its id.
    ///
    /// A rejected context is dropped, and so disposed, before returning.
    pub async fn register(&self, context: SubscriptionContext) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(RegistryError::Closed);
        }
        match state.contexts.entry(context.id().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateId(entry.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(context);
                Ok(())
            }
        }
    }

    pub async fn contains(&self, id: &OperationId) -> bool {
        self.state.lock().await.contexts.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.contexts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.contexts.is_empty()
    }

    /// Dispose and remove the context for `id`. Absent ids are a no-op.
    ///
    /// Returns whether a context was removed.
    pub async fn remove(&self, id: &OperationId) -> bool {
        self.state.lock().await.contexts.remove(id).is_some()
    }

    /// Remove `id` only if it still belongs to the subscription holding
    /// `token`. Used by a delivery loop to remove itself without touching a
    /// newer subscription that reused the id.
    pub(crate) async fn release(&self, id: &OperationId, token: u64) -> bool {
        let mut state = self.state.lock().await;
        match state.contexts.get(id) {
            Some(context) if context.token() == token => state.contexts.remove(id).is_some(),
            _ => false,
        }
    }

    /// Dispose every context and refuse further registrations.
    ///
    /// Returns how many contexts were disposed.
    pub async fn remove_all(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closed = true;
        let count = state.contexts.len();
        state.contexts.clear();
        count
    }
}

/// Error registering a subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Subscriber for {0} already exists")]
    DuplicateId(OperationId),
    #[error("connection is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(id: impl Into<OperationId>, token: u64) -> (SubscriptionContext, crate::context::Delivery) {
        SubscriptionContext::new(id.into(), token)
    }

    #[tokio::test]
    async fn rejects_duplicate_id() {
        let registry = SubscriptionRegistry::new();
        let (first, first_delivery) = context(1u64, 0);
        let (second, second_delivery) = context(1u64, 1);

        registry.register(first).await.unwrap();
        assert_eq!(
            registry.register(second).await,
            Err(RegistryError::DuplicateId(OperationId::from(1u64)))
        );
        assert_eq!(registry.len().await, 1);
        assert!(first_delivery.is_live());
        assert!(!second_delivery.is_live());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (ctx, delivery) = context("a", 0);
        registry.register(ctx).await.unwrap();

        assert!(registry.remove(&OperationId::from("a")).await);
        assert!(!delivery.is_live());
        assert!(!registry.remove(&OperationId::from("a")).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn removing_absent_id_is_a_no_op() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.remove(&OperationId::from(9u64)).await);
    }

    #[tokio::test]
    async fn release_ignores_reused_id() {
        let registry = SubscriptionRegistry::new();
        let (old, _old_delivery) = context(1u64, 0);
        registry.register(old).await.unwrap();
        assert!(registry.remove(&OperationId::from(1u64)).await);

        let (new, new_delivery) = context(1u64, 1);
        registry.register(new).await.unwrap();

        assert!(!registry.release(&OperationId::from(1u64), 0).await);
        assert!(new_delivery.is_live());
        assert!(registry.release(&OperationId::from(1u64), 1).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn remove_all_disposes_and_closes() {
        let registry = SubscriptionRegistry::new();
        let (a, a_delivery) = context("a", 0);
        let (b, b_delivery) = context("b", 1);
        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();

        assert_eq!(registry.remove_all().await, 2);
        assert!(!a_delivery.is_live());
        assert!(!b_delivery.is_live());

        let (late, late_delivery) = context("c", 2);
        assert_eq!(registry.register(late).await, Err(RegistryError::Closed));
        assert!(!late_delivery.is_live());
        assert!(registry.is_empty().await);
    }
}
