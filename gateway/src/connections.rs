use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Process-wide map from `(owner_id, session_id)` to the prior connection's
/// eviction signal. `register` never holds the lock across an `.await` —
/// only a plain `HashMap` insert/remove under a short-lived guard (§5
/// mutual-exclusion rule, §4.6 supersession).
#[derive(Clone, Default)]
pub struct SupersessionRegistry {
    inner: Arc<Mutex<HashMap<(Uuid, Uuid), oneshot::Sender<()>>>>,
}

impl SupersessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers this connection as the live one for `(owner_id, session_id)`,
    /// evicting and replacing any prior connection. Returns a receiver that
    /// resolves once a *later* connection supersedes this one.
    pub fn register(&self, owner_id: Uuid, session_id: Uuid) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut map = self.inner.lock();
        if let Some(prior) = map.insert((owner_id, session_id), tx) {
            let _ = prior.send(());
        }
        rx
    }

    pub fn unregister(&self, owner_id: Uuid, session_id: Uuid) {
        self.inner.lock().remove(&(owner_id, session_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_registration_evicts_the_first() {
        let registry = SupersessionRegistry::new();
        let owner_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let first = registry.register(owner_id, session_id);
        let _second = registry.register(owner_id, session_id);

        assert!(first.await.is_ok());
    }

    #[test]
    fn unregister_removes_the_entry_without_signaling() {
        let registry = SupersessionRegistry::new();
        let owner_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let _rx = registry.register(owner_id, session_id);
        registry.unregister(owner_id, session_id);
        assert!(registry.inner.lock().is_empty());
    }
}
