//! Single-flight access token refresh
//!
//! When an authorized request is rejected with 401 the client asks the
//! [`SessionManager`] to recover the session. The first caller becomes the
//! leader and performs the refresh call; everyone arriving while it runs is
//! parked in the [`RetryQueue`] and released once the outcome is known.
//! At most one refresh is in flight per manager.

use super::error::ClientError;
use super::listener::{LogListener, SessionListener};
use super::queue::{PendingRequest, RefreshOutcome, RetryQueue};
use super::session::{AccessToken, SessionStore};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default bound on how long a parked request waits for the refresh
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct RefreshState {
    refreshing: bool,
    queue: RetryQueue,
}

enum Role {
    /// Performs the refresh call
    Leader,
    /// Waits for the leader's outcome
    Follower(oneshot::Receiver<RefreshOutcome>),
    /// A refresh already replaced the token this request was sent with
    Replay,
    /// The session was cleared after this request was sent
    Cleared,
}

/// Owns the refresh flag and the queue of requests waiting on it
pub struct SessionManager {
    state: Mutex<RefreshState>,
    queue_timeout: Option<Duration>,
    listener: Arc<dyn SessionListener>,
}

impl SessionManager {
    pub fn new(listener: Arc<dyn SessionListener>) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            queue_timeout: Some(DEFAULT_QUEUE_TIMEOUT),
            listener,
        }
    }

    /// Bound the wait of parked requests; `None` waits for as long as the refresh takes
    #[must_use]
    pub fn with_queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub const fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout
    }

    /// Whether a refresh call is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of requests parked behind the current refresh
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Bring the session back after `stale` was rejected
    ///
    /// `refresh` runs only if this caller becomes the leader. On success the
    /// caller may replay its request with whatever token the session now holds.
    ///
    /// # Errors
    ///
    /// Returns the refresh error for the leader, `RefreshFailed` for parked
    /// requests whose refresh failed or whose session was cleared meanwhile,
    /// and `RefreshTimeout` for parked requests that gave up waiting
    pub async fn recover<F, Fut>(
        &self,
        session: &SessionStore,
        stale: Option<&AccessToken>,
        refresh: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        let role = {
            let mut state = self.lock();
            let current = session.get();
            if state.refreshing {
                let (pending, receiver) = PendingRequest::new();
                state.queue.enqueue(pending);
                debug!(queued = state.queue.len(), "Waiting for in-flight token refresh");
                Role::Follower(receiver)
            } else if stale.is_some() && current.is_none() {
                Role::Cleared
            } else if current.is_some_and(|current| Some(&current) != stale) {
                Role::Replay
            } else {
                state.refreshing = true;
                Role::Leader
            }
        };

        match role {
            Role::Leader => self.lead(session, refresh).await,
            Role::Follower(receiver) => self.wait(receiver).await,
            Role::Replay => {
                debug!("Access token already refreshed, replaying request");
                Ok(())
            }
            Role::Cleared => {
                debug!("Session cleared while the request was in flight");
                Err(ClientError::RefreshFailed(
                    "session was cleared while the request was in flight".to_string(),
                ))
            }
        }
    }

    async fn lead<F, Fut>(&self, session: &SessionStore, refresh: F) -> Result<(), ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        let in_flight = InFlight {
            manager: self,
            finished: false,
        };

        match refresh().await {
            Ok(()) => {
                let waiters = in_flight.finish();
                info!(released = waiters.len(), "Access token refreshed");
                for waiter in waiters {
                    waiter.resolve(Ok(()));
                }
                Ok(())
            }
            Err(error) => {
                let waiters = in_flight.finish();
                warn!(error = %error, released = waiters.len(), "Token refresh failed, clearing session");

                if let Err(e) = session.clear() {
                    error!(error = %e, "Failed to clear session credentials");
                }
                self.listener.session_expired(&error);

                let message = error.to_string();
                for waiter in waiters {
                    waiter.resolve(Err(message.clone()));
                }
                Err(error)
            }
        }
    }

    async fn wait(&self, receiver: oneshot::Receiver<RefreshOutcome>) -> Result<(), ClientError> {
        let outcome = match self.queue_timeout {
            Some(limit) => tokio::time::timeout(limit, receiver).await.map_err(|_| {
                warn!(timeout = ?limit, "Gave up waiting for token refresh");
                ClientError::RefreshTimeout(limit)
            })?,
            None => receiver.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ClientError::RefreshFailed(message)),
            Err(_) => Err(ClientError::RefreshFailed(
                "refresh was abandoned before completing".to_string(),
            )),
        }
    }

    /// Leave the refreshing state and take every parked request
    fn settle(&self) -> Vec<PendingRequest> {
        let mut state = self.lock();
        state.refreshing = false;
        state.queue.drain_all()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(LogListener))
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionManager")
            .field("refreshing", &state.refreshing)
            .field("queued", &state.queue.len())
            .field("queue_timeout", &self.queue_timeout)
            .finish_non_exhaustive()
    }
}

/// Resets the refresh flag even if the leader's future is dropped mid-refresh
struct InFlight<'a> {
    manager: &'a SessionManager,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self) -> Vec<PendingRequest> {
        self.finished = true;
        self.manager.settle()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping the resolvers fails every parked request
            let abandoned = self.manager.settle();
            warn!(abandoned = abandoned.len(), "Token refresh cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn expired_counter() -> (Arc<AtomicUsize>, Arc<dyn SessionListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let listener: Arc<dyn SessionListener> = Arc::new(move |_: &ClientError| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[tokio::test]
    async fn test_followers_wait_for_leader() {
        let manager = Arc::new(SessionManager::default());
        let session = SessionStore::in_memory();
        let stale = AccessToken::new("old");
        session.set(&stale).unwrap();

        let (release, released) = oneshot::channel::<()>();
        let leader = {
            let manager = manager.clone();
            let session = session.clone();
            let writer = session.clone();
            let stale = stale.clone();
            tokio::spawn(async move {
                manager
                    .recover(&session, Some(&stale), move || async move {
                        released.await.ok();
                        writer.set(&AccessToken::new("new"))?;
                        Ok::<(), ClientError>(())
                    })
                    .await
            })
        };

        while !manager.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let follower = {
            let manager = manager.clone();
            let session = session.clone();
            tokio::spawn(async move {
                manager
                    .recover(&session, Some(&stale), || async {
                        Err::<(), _>(ClientError::Configuration("follower refreshed".into()))
                    })
                    .await
            })
        };

        while manager.queued() == 0 {
            tokio::task::yield_now().await;
        }
        release.send(()).unwrap();

        leader.await.unwrap().unwrap();
        follower.await.unwrap().unwrap();
        assert!(!manager.is_refreshing());
        assert_eq!(manager.queued(), 0);
        assert_eq!(session.get(), Some(AccessToken::new("new")));
    }

    #[tokio::test]
    async fn test_replay_when_token_already_replaced() {
        let manager = SessionManager::default();
        let session = SessionStore::in_memory();
        session.set(&AccessToken::new("new")).unwrap();

        let stale = AccessToken::new("old");
        manager
            .recover(&session, Some(&stale), || async {
                Err::<(), _>(ClientError::Configuration("refreshed twice".into()))
            })
            .await
            .unwrap();
        assert!(!manager.is_refreshing());
    }

    #[tokio::test]
    async fn test_failure_clears_session_and_notifies() {
        let (expired, listener) = expired_counter();
        let manager = SessionManager::new(listener);
        let session = SessionStore::in_memory();
        let stale = AccessToken::new("old");
        session.set(&stale).unwrap();

        let result = manager
            .recover(&session, Some(&stale), || async {
                Err::<(), _>(ClientError::AuthenticationFailed("Invalid token".into()))
            })
            .await;

        assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
        assert!(session.get().is_none());
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(!manager.is_refreshing());
    }

    #[tokio::test]
    async fn test_late_401_after_failure_does_not_notify_again() {
        let (expired, listener) = expired_counter();
        let manager = SessionManager::new(listener);
        let session = SessionStore::in_memory();
        let stale = AccessToken::new("old");
        session.set(&stale).unwrap();

        let first = manager
            .recover(&session, Some(&stale), || async {
                Err::<(), _>(ClientError::AuthenticationFailed("Invalid token".into()))
            })
            .await;
        assert!(first.is_err());

        // Sent with the old token before the failure, rejected after it
        let late = manager
            .recover(&session, Some(&stale), || async {
                Err::<(), _>(ClientError::Configuration("refreshed after failure".into()))
            })
            .await;

        assert!(matches!(late, Err(ClientError::RefreshFailed(_))));
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(!manager.is_refreshing());
    }

    #[tokio::test]
    async fn test_queued_request_times_out() {
        let manager = Arc::new(
            SessionManager::default().with_queue_timeout(Some(Duration::from_millis(20))),
        );
        let session = SessionStore::in_memory();

        let (_hold, never) = oneshot::channel::<()>();
        let leader = {
            let manager = manager.clone();
            let session = session.clone();
            tokio::spawn(async move {
                manager
                    .recover(&session, None, move || async move {
                        never.await.ok();
                        Ok::<(), ClientError>(())
                    })
                    .await
            })
        };
        while !manager.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let result = manager
            .recover(&session, None, || async { Ok::<(), ClientError>(()) })
            .await;
        assert!(matches!(result, Err(ClientError::RefreshTimeout(_))));

        leader.abort();
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_followers() {
        let manager = Arc::new(SessionManager::default().with_queue_timeout(None));
        let session = SessionStore::in_memory();

        let leader = {
            let manager = manager.clone();
            let session = session.clone();
            tokio::spawn(async move {
                manager
                    .recover(&session, None, || std::future::pending::<Result<(), ClientError>>())
                    .await
            })
        };
        while !manager.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let follower = {
            let manager = manager.clone();
            let session = session.clone();
            tokio::spawn(async move {
                manager
                    .recover(&session, None, || async { Ok::<(), ClientError>(()) })
                    .await
            })
        };
        while manager.queued() == 0 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let result = follower.await.unwrap();
        assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        assert!(!manager.is_refreshing());
    }
}
