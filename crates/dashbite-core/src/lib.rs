//! Dashbite core library.
//!
//! Client-side core for the Dashbite delivery app: keeps the signed-in
//! session alive against the hosted backend, persists it in a pluggable
//! key-value store, drives mobile-money checkout status polling and holds
//! user preferences.

pub mod api;
pub mod auth;
pub mod config;
pub mod payment;
pub mod preferences;
pub mod storage;
pub mod utils;

pub use api::{ApiClient, ApiError, AuthApi, PaymentApi};
pub use auth::{
    AuthError, AuthEvent, IdentityProvider, Session, SessionManager, SessionMonitor,
    SessionPolicy, SessionState, SignUpOutcome, SignUpRequest, UserProfile,
};
pub use config::{Config, StoreKind};
pub use payment::{
    CheckoutSession, PaymentError, PaymentGateway, PaymentMethod, PaymentPoller, PaymentRequest,
    PaymentStatus, PollConfig, PollHandle, PollOutcome,
};
pub use preferences::{Preferences, PreferencesStore, Theme};
pub use storage::{EncryptedFileStore, KeyValueStore, KeyringStore, MemoryStore, StorageError};
