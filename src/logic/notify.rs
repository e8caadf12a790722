use std::sync::Arc;

use crate::model::NotificationBatch;

/// Capability invoked after every durable commit. Implementations are
/// registered once at startup; the registry never changes at runtime.
pub trait CommitListener: Send + Sync {
    fn name(&self) -> &str;
    fn commit_completed(&self, batch: &NotificationBatch) -> anyhow::Result<()>;
}

/// Immutable process-wide listener set. Delivery is sequential and happens
/// strictly after the transaction has committed; a listener failure is
/// logged and skipped so the remaining listeners and the already-computed
/// response are unaffected.
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn CommitListener>>,
}

impl ListenerRegistry {
    pub fn new(listeners: Vec<Arc<dyn CommitListener>>) -> Self {
        Self { listeners }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify_commit(&self, batch: &NotificationBatch) {
        for listener in &self.listeners {
            if let Err(err) = listener.commit_completed(batch) {
                log::error!(
                    "commit listener {} failed after commit: {err:#}",
                    listener.name()
                );
            }
        }
    }
}

/// Default listener: records commit effects in the server log.
pub struct LoggingListener;

impl CommitListener for LoggingListener {
    fn name(&self) -> &str {
        "logging"
    }

    fn commit_completed(&self, batch: &NotificationBatch) -> anyhow::Result<()> {
        log::info!(
            "commit on {}: {} created, {} updated, {} deleted",
            batch.request_context.uri,
            batch.created.len(),
            batch.updated.len(),
            batch.deleted.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityRef, RequestContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        calls: AtomicUsize,
    }

    impl CommitListener for CountingListener {
        fn name(&self) -> &str {
            "counting"
        }

        fn commit_completed(&self, _batch: &NotificationBatch) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingListener;

    impl CommitListener for FailingListener {
        fn name(&self) -> &str {
            "failing"
        }

        fn commit_completed(&self, _batch: &NotificationBatch) -> anyhow::Result<()> {
            anyhow::bail!("listener exploded")
        }
    }

    fn sample_batch() -> NotificationBatch {
        NotificationBatch::new(
            vec![EntityRef::new("Person", "1")],
            vec![],
            vec![],
            RequestContext::default(),
        )
    }

    #[test]
    fn each_listener_sees_the_batch_exactly_once() {
        let counting = Arc::new(CountingListener {
            calls: AtomicUsize::new(0),
        });
        let registry = ListenerRegistry::new(vec![counting.clone()]);
        registry.notify_commit(&sample_batch());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_listener_does_not_block_the_rest() {
        let counting = Arc::new(CountingListener {
            calls: AtomicUsize::new(0),
        });
        let registry =
            ListenerRegistry::new(vec![Arc::new(FailingListener), counting.clone()]);
        registry.notify_commit(&sample_batch());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
