//! Notification hook for sessions that can no longer be refreshed
//!
//! The front end registers a listener to send the user back to the login
//! screen once the refresh credential has been rejected.

use super::error::ClientError;

/// Receives session lifecycle events from the client
pub trait SessionListener: Send + Sync {
    /// The refresh failed and the stored credentials were cleared
    fn session_expired(&self, reason: &ClientError);
}

impl<F> SessionListener for F
where
    F: Fn(&ClientError) + Send + Sync,
{
    fn session_expired(&self, reason: &ClientError) {
        self(reason);
    }
}

/// Listener that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl SessionListener for LogListener {
    fn session_expired(&self, reason: &ClientError) {
        warn!(error = %reason, "Session expired, login required");
    }
}
