use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::manager::SessionManager;

/// Re-validates the session on a fixed interval.
///
/// Observers read the latest outcome through `is_authenticated` or wait for
/// a transition with `changed`. Dropping the monitor stops the timer.
pub struct SessionMonitor {
    status: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl SessionMonitor {
    pub fn spawn(manager: SessionManager, interval: Duration) -> Self {
        let (tx, status) = watch::channel(manager.is_authenticated());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let valid = manager.validate_session().await;
                debug!(valid, "Periodic session validation");

                let changed = tx.send_if_modified(|current| {
                    if *current == valid {
                        false
                    } else {
                        *current = valid;
                        true
                    }
                });
                if changed {
                    info!(authenticated = valid, "Session status changed");
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Self { status, task }
    }

    /// Latest validation outcome
    pub fn is_authenticated(&self) -> bool {
        *self.status.borrow()
    }

    /// Wait for the next status transition. `None` once the monitor stopped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.status.changed().await.ok()?;
        Some(*self.status.borrow_and_update())
    }

    /// A receiver that can outlive borrows of the monitor
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the timer; an in-flight validation is abandoned
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::api::ApiError;
    use crate::auth::provider::{IdentityProvider, ProviderSignUp, SignUpRequest, TokenGrant};
    use crate::auth::session::tests::session_expiring_in;
    use crate::auth::session::{SessionPolicy, UserProfile};
    use crate::storage::MemoryStore;

    struct OfflineProvider;

    #[async_trait]
    impl IdentityProvider for OfflineProvider {
        async fn sign_in(&self, _: &str, _: &str) -> Result<TokenGrant, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn sign_up(&self, _: &SignUpRequest) -> Result<ProviderSignUp, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn refresh_session(&self, _: &str) -> Result<TokenGrant, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn get_user(&self, _: &str) -> Result<UserProfile, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn sign_out(&self, _: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(OfflineProvider),
            SessionPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_monitor_reports_logout() {
        let manager = manager();
        manager
            .save_session(&session_expiring_in(ChronoDuration::minutes(30)))
            .unwrap();

        let mut monitor = SessionMonitor::spawn(manager.clone(), Duration::from_millis(10));
        assert!(monitor.is_authenticated());

        manager.clear_session().unwrap();
        let next = tokio::time::timeout(Duration::from_secs(2), monitor.changed())
            .await
            .unwrap();
        assert_eq!(next, Some(false));
        assert!(!monitor.is_authenticated());
    }

    #[tokio::test]
    async fn test_stopping_monitor_closes_status_channel() {
        let manager = manager();
        manager
            .save_session(&session_expiring_in(ChronoDuration::minutes(30)))
            .unwrap();

        let monitor = SessionMonitor::spawn(manager, Duration::from_millis(10));
        let mut status = monitor.watch();
        monitor.stop();

        let closed = tokio::time::timeout(Duration::from_secs(2), status.changed())
            .await
            .unwrap();
        assert!(closed.is_err());
    }
}
