//! Authentication: the persisted session and everything that keeps it alive.
//!
//! This module provides:
//! - `Session`: token pair, identity record and expiry bookkeeping
//! - `SessionManager`: persistence, lazy eviction, single-flight refresh, login flows
//! - `SessionMonitor`: periodic re-validation on a timer
//! - `IdentityProvider`: the hosted auth service boundary
//!
//! Tokens are refreshed once fewer than 15 minutes remain (configurable).

pub mod error;
pub mod manager;
pub mod monitor;
pub mod provider;
pub mod session;

pub use error::AuthError;
pub use manager::{AuthEvent, SessionManager, SignUpOutcome};
pub use monitor::SessionMonitor;
pub use provider::{IdentityProvider, ProviderSignUp, SignUpRequest, TokenGrant};
pub use session::{Session, SessionPolicy, SessionState, UserProfile};
