//! REST clients for the hosted backend.
//!
//! This module provides the shared `ApiClient` plus the two services the
//! core talks to:
//! - `AuthApi`: sign-in, sign-up, token refresh, user lookup, sign-out
//! - `PaymentApi`: hosted checkout creation and payment status
//!
//! Requests carry the project API key; user calls add a JWT bearer token.

pub mod auth;
pub mod client;
pub mod error;
pub mod payment;

pub use auth::AuthApi;
pub use client::ApiClient;
pub use error::ApiError;
pub use payment::PaymentApi;
