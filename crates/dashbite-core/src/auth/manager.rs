//! Session lifecycle manager.
//!
//! Owns the single persisted session: saves it, lazily evicts it once
//! expired, refreshes it shortly before expiry and answers "is the user
//! still signed in?" for the rest of the app. Provider failures surface as
//! `false`/`None`; only explicit storage writes return errors.

use std::sync::{Arc, Weak};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::provider::{IdentityProvider, ProviderSignUp, SignUpRequest, TokenGrant};
use super::session::{truncate_to_millis, Session, SessionPolicy, SessionState, UserProfile};
use crate::storage::{KeyValueStore, StorageError, SESSION_KEY};

/// Buffered auth events per subscriber before old ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Auth-state change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut,
    TokenRefreshed,
    SessionExpired,
}

/// Result of a sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationRequired(UserProfile),
}

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

struct Inner {
    store: Arc<dyn KeyValueStore>,
    provider: Arc<dyn IdentityProvider>,
    policy: SessionPolicy,
    in_flight: Mutex<Option<RefreshFuture>>,
    events: broadcast::Sender<AuthEvent>,
}

/// Clone is cheap; clones share storage, the in-flight refresh and the event channel.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        provider: Arc<dyn IdentityProvider>,
        policy: SessionPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                policy,
                in_flight: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// Receive auth-state changes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Persist `session`, replacing any previous one
    pub fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        self.inner.save_session(session)
    }

    /// Load the persisted session, evicting it if it has expired
    pub fn get_session(&self) -> Option<Session> {
        self.inner.get_session()
    }

    pub fn is_session_expired(&self, session: &Session) -> bool {
        session.is_expired(Utc::now())
    }

    /// Mark the user as active now. No-op without a session.
    pub fn update_session_activity(&self) -> Result<(), StorageError> {
        match self.inner.get_session() {
            Some(mut session) => {
                session.last_activity = truncate_to_millis(Utc::now());
                self.inner.save_session(&session)
            }
            None => Ok(()),
        }
    }

    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.inner.clear_session()
    }

    /// Exchange the refresh token for new tokens.
    ///
    /// Only one provider call runs at a time: callers arriving while a refresh
    /// is pending await that refresh and get its result. On failure the stored
    /// session is left as it was.
    pub async fn refresh_access_token(&self) -> bool {
        let refresh = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let weak = Arc::downgrade(&self.inner);
                    let pending = Self::refresh_task(weak).boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        refresh.await
    }

    async fn refresh_task(inner: Weak<Inner>) -> bool {
        let Some(inner) = inner.upgrade() else {
            return false;
        };
        let refreshed = inner.refresh_once().await;
        inner.in_flight.lock().await.take();
        refreshed
    }

    /// Check that the user still holds a usable session.
    ///
    /// Refreshes tokens that are about to expire. Safe to call often: the
    /// network is only touched inside the refresh window.
    pub async fn validate_session(&self) -> bool {
        let Some(mut session) = self.inner.get_session() else {
            return false;
        };
        let now = Utc::now();

        if let Some(idle_timeout) = self.inner.policy.idle_timeout {
            if session.idle_for(now) > idle_timeout {
                info!(
                    idle_minutes = session.idle_for(now).num_minutes(),
                    "Session idle for too long, clearing"
                );
                let _ = self.inner.clear_session();
                self.inner.publish(AuthEvent::SessionExpired);
                return false;
            }
        }

        if session.needs_refresh(now, self.inner.policy.refresh_threshold) {
            debug!(
                minutes_left = session.minutes_until_expiry(now),
                "Session inside refresh window"
            );
            return self.refresh_access_token().await;
        }

        session.last_activity = truncate_to_millis(now);
        if let Err(e) = self.inner.save_session(&session) {
            debug!(error = %e, "Could not record session activity");
        }
        true
    }

    pub fn state(&self) -> SessionState {
        match self.inner.get_session() {
            Some(session) => session.state(Utc::now(), self.inner.policy.refresh_threshold),
            None => SessionState::Absent,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.get_session().is_some()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.get_session().map(|s| s.user)
    }

    /// Get the bearer token if the session is still valid
    pub fn access_token(&self) -> Option<String> {
        self.inner.get_session().map(|s| s.access_token)
    }

    // ===== Login flows =====

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "email and password are required".to_string(),
            ));
        }

        let grant = self.inner.provider.sign_in(email, password).await?;
        let user = self.user_for(&grant).await?;
        Ok(self.establish(grant, user))
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(AuthError::InvalidInput(
                "email and password are required".to_string(),
            ));
        }

        match self.inner.provider.sign_up(request).await? {
            ProviderSignUp::Grant(grant) => {
                let user = self.user_for(&grant).await?;
                Ok(SignUpOutcome::SignedIn(self.establish(grant, user)))
            }
            ProviderSignUp::Pending(user) => {
                info!(user_id = %user.id, "Sign-up awaiting confirmation");
                Ok(SignUpOutcome::ConfirmationRequired(user))
            }
        }
    }

    /// Turn tokens received through a callback link into a session
    pub async fn exchange_callback_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: Option<i64>,
    ) -> Result<Session, AuthError> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(AuthError::InvalidInput(
                "callback is missing tokens".to_string(),
            ));
        }

        let user = self.inner.provider.get_user(access_token).await?;
        let grant = TokenGrant {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in,
            expires_at: None,
            user: Some(user.clone()),
        };
        Ok(self.establish(grant, user))
    }

    /// Sign out with the provider (best effort) and drop the local session
    pub async fn sign_out(&self) -> Result<(), StorageError> {
        if let Some(session) = self.inner.get_session() {
            if let Err(e) = self.inner.provider.sign_out(&session.access_token).await {
                warn!(error = %e, "Provider sign-out failed, clearing local session anyway");
            }
        }
        let cleared = self.inner.clear_session();
        self.inner.publish(AuthEvent::SignedOut);
        info!("Signed out");
        cleared
    }

    async fn user_for(&self, grant: &TokenGrant) -> Result<UserProfile, AuthError> {
        match grant.user {
            Some(ref user) => Ok(user.clone()),
            None => Ok(self.inner.provider.get_user(&grant.access_token).await?),
        }
    }

    fn establish(&self, grant: TokenGrant, user: UserProfile) -> Session {
        let session = Session::from_grant(grant, user, &self.inner.policy, Utc::now());
        if let Err(e) = self.inner.save_session(&session) {
            warn!(error = %e, "Session will not survive a restart");
        }
        info!(user_id = %session.user.id, expires_at = %session.expires_at, "Signed in");
        self.inner.publish(AuthEvent::SignedIn {
            user_id: session.user.id.clone(),
        });
        session
    }
}

impl Inner {
    fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let contents =
            serde_json::to_string(session).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.store.set(SESSION_KEY, &contents).map_err(|e| {
            warn!(error = %e, "Failed to save session");
            e
        })
    }

    fn get_session(&self) -> Option<Session> {
        let contents = match self.store.get(SESSION_KEY) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read session");
                return None;
            }
        };

        let session: Session = match serde_json::from_str(&contents) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Stored session is malformed, ignoring");
                return None;
            }
        };
        if !session.is_complete() {
            warn!("Stored session is incomplete, ignoring");
            return None;
        }

        if session.is_expired(Utc::now()) {
            info!(expired_at = %session.expires_at, "Session expired, clearing");
            let _ = self.clear_session();
            self.publish(AuthEvent::SessionExpired);
            return None;
        }

        Some(session)
    }

    fn clear_session(&self) -> Result<(), StorageError> {
        self.store.delete(SESSION_KEY).map_err(|e| {
            warn!(error = %e, "Failed to clear session");
            e
        })
    }

    async fn refresh_once(&self) -> bool {
        let Some(mut session) = self.get_session() else {
            debug!("No session to refresh");
            return false;
        };

        let grant = match self.provider.refresh_session(&session.refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Token refresh failed");
                return false;
            }
        };

        // A sign-out or new login while the request was out wins over this refresh
        let still_current = self
            .get_session()
            .is_some_and(|current| current.refresh_token == session.refresh_token);
        if !still_current {
            info!("Session changed during refresh, discarding new tokens");
            return false;
        }

        session.apply_grant(grant, &self.policy, Utc::now());
        if let Err(e) = self.save_session(&session) {
            warn!(error = %e, "Refreshed session could not be persisted");
        }
        info!(expires_at = %session.expires_at, "Access token refreshed");
        self.publish(AuthEvent::TokenRefreshed);
        true
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
