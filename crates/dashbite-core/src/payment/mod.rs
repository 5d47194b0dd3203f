//! Mobile-money checkout.
//!
//! The gateway hosts the payment page; this module builds the checkout
//! request and polls the order's payment status until it settles.

pub mod poller;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;
use crate::utils::normalize_phone;

pub use poller::{poll_payment_status, PaymentPoller, PollConfig, PollHandle, PollOutcome};

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    Card,
}

impl std::str::FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile_money" | "mobile-money" | "momo" => Ok(Self::MobileMoney),
            "card" => Ok(Self::Card),
            other => Err(PaymentError::InvalidRequest(format!(
                "unknown payment method: {}",
                other
            ))),
        }
    }
}

/// Checkout request for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub order_id: String,
    /// Amount in the currency's major unit
    pub amount: u64,
    pub currency: String,
    pub method: PaymentMethod,
    pub phone_number: String,
}

impl PaymentRequest {
    pub fn new(
        order_id: impl Into<String>,
        amount: u64,
        currency: impl Into<String>,
        method: PaymentMethod,
        phone_number: &str,
    ) -> Result<Self, PaymentError> {
        let order_id = order_id.into();
        if order_id.trim().is_empty() {
            return Err(PaymentError::InvalidRequest("order id is required".to_string()));
        }
        if amount == 0 {
            return Err(PaymentError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        let phone_number = normalize_phone(phone_number).ok_or_else(|| {
            PaymentError::InvalidRequest(format!("invalid phone number: {}", phone_number))
        })?;

        Ok(Self {
            order_id,
            amount,
            currency: currency.into().to_ascii_uppercase(),
            method,
            phone_number,
        })
    }
}

/// Hosted payment page for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub order_id: String,
    pub payment_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Unknown(String),
}

impl PaymentStatus {
    /// Parse a status string as reported by the gateway
    pub fn from_wire(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "success" | "completed" => Self::Succeeded,
            "failed" | "error" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    /// Succeeded or failed; polling stops here
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create the hosted payment page for an order
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CheckoutSession, ApiError>;

    async fn check_status(&self, order_id: &str) -> Result<PaymentStatus, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_wire() {
        assert_eq!(PaymentStatus::from_wire("pending"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_wire("SUCCESS"), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from_wire("completed"), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from_wire("failed"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_wire(" error "), PaymentStatus::Failed);

        let other = PaymentStatus::from_wire("refunded");
        assert_eq!(other, PaymentStatus::Unknown("refunded".to_string()));
        assert!(!other.is_terminal());
    }

    #[test]
    fn test_payment_request_validation() {
        let request =
            PaymentRequest::new("ord-42", 2500, "xof", PaymentMethod::MobileMoney, "+225 07 08 09 10 11")
                .unwrap();
        assert_eq!(request.currency, "XOF");
        assert_eq!(request.phone_number, "+2250708091011");

        assert!(PaymentRequest::new("", 2500, "XOF", PaymentMethod::Card, "0708091011").is_err());
        assert!(PaymentRequest::new("ord-42", 0, "XOF", PaymentMethod::Card, "0708091011").is_err());
        assert!(matches!(
            PaymentRequest::new("ord-42", 2500, "XOF", PaymentMethod::MobileMoney, "n/a"),
            Err(PaymentError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_method_wire_format() {
        assert_eq!(
            serde_json::to_string(&PaymentMethod::MobileMoney).unwrap(),
            r#""mobile_money""#
        );
        assert_eq!("momo".parse::<PaymentMethod>().unwrap(), PaymentMethod::MobileMoney);
        assert!("cash".parse::<PaymentMethod>().is_err());
    }
}
