//! Job cancellation registry.
//!
//! One trigger per running export job. Workers hold the receiving side and
//! poll it between pages; the request path fires the trigger on cancel.
//! Entries are removed on every worker exit path so the map cannot leak.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    triggers: Arc<RwLock<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trigger for a job and returns the worker's receiver.
    /// Re-registering a job id replaces the previous trigger.
    pub async fn register(&self, job_id: Uuid) -> watch::Receiver<bool> {
        let (sender, receiver) = watch::channel(false);
        self.triggers.write().await.insert(job_id, sender);
        receiver
    }

    /// Fires the trigger for a job. Returns `false` when no worker is
    /// registered (already finished, or never started here).
    pub async fn trigger(&self, job_id: Uuid) -> bool {
        match self.triggers.read().await.get(&job_id) {
            Some(sender) => sender.send(true).is_ok(),
            None => false,
        }
    }

    pub async fn remove(&self, job_id: Uuid) {
        self.triggers.write().await.remove(&job_id);
    }

    pub async fn contains(&self, job_id: Uuid) -> bool {
        self.triggers.read().await.contains_key(&job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_trigger_remove_lifecycle() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();

        let receiver = registry.register(job_id).await;
        assert!(registry.contains(job_id).await);
        assert!(!*receiver.borrow());

        assert!(registry.trigger(job_id).await);
        assert!(*receiver.borrow());

        registry.remove(job_id).await;
        assert!(!registry.contains(job_id).await);
    }

    #[tokio::test]
    async fn triggering_an_unknown_job_is_a_noop() {
        let registry = CancellationRegistry::new();
        assert!(!registry.trigger(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn triggers_are_independent_per_job() {
        let registry = CancellationRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let first_rx = registry.register(first).await;
        let second_rx = registry.register(second).await;

        registry.trigger(first).await;
        assert!(*first_rx.borrow());
        assert!(!*second_rx.borrow());
    }

    #[tokio::test]
    async fn concurrent_access_does_not_lose_entries() {
        let registry = CancellationRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let job_id = Uuid::new_v4();
                let _rx = registry.register(job_id).await;
                assert!(registry.trigger(job_id).await);
                registry.remove(job_id).await;
                assert!(!registry.contains(job_id).await);
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }
    }
}
