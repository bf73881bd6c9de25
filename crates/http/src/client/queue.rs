//! Requests parked behind an in-flight token refresh

use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Outcome handed to every parked request once the refresh settles
pub type RefreshOutcome = Result<(), String>;

/// One stalled caller waiting for the refresh outcome
#[derive(Debug)]
pub struct PendingRequest {
    resolver: oneshot::Sender<RefreshOutcome>,
}

impl PendingRequest {
    /// Create a pending request and the receiver its caller waits on
    pub fn new() -> (Self, oneshot::Receiver<RefreshOutcome>) {
        let (resolver, receiver) = oneshot::channel();
        (Self { resolver }, receiver)
    }

    /// Release the caller; returns false if it already stopped waiting
    pub fn resolve(self, outcome: RefreshOutcome) -> bool {
        self.resolver.send(outcome).is_ok()
    }
}

/// FIFO of requests waiting for the current refresh
#[derive(Debug, Default)]
pub struct RetryQueue {
    pending: VecDeque<PendingRequest>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: PendingRequest) {
        self.pending.push_back(request);
    }

    /// Remove every queued request, oldest first
    pub fn drain_all(&mut self) -> Vec<PendingRequest> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_preserves_insertion_order() {
        let mut queue = RetryQueue::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (pending, receiver) = PendingRequest::new();
            queue.enqueue(pending);
            receivers.push(receiver);
        }
        assert_eq!(queue.len(), 3);

        let drained = queue.drain_all();
        assert!(queue.is_empty());

        for (index, pending) in drained.into_iter().enumerate() {
            let outcome = if index == 1 { Err("denied".to_string()) } else { Ok(()) };
            assert!(pending.resolve(outcome));
        }

        assert_eq!(receivers.remove(0).await.unwrap(), Ok(()));
        assert_eq!(receivers.remove(0).await.unwrap(), Err("denied".to_string()));
        assert_eq!(receivers.remove(0).await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_resolve_after_caller_left() {
        let (pending, receiver) = PendingRequest::new();
        drop(receiver);
        assert!(!pending.resolve(Ok(())));
    }

    #[tokio::test]
    async fn test_dropped_queue_fails_waiters() {
        let mut queue = RetryQueue::new();
        let (pending, receiver) = PendingRequest::new();
        queue.enqueue(pending);
        drop(queue.drain_all());

        assert!(receiver.await.is_err());
    }
}
