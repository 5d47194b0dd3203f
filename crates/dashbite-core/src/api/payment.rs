//! Payment gateway client: hosted checkout pages and status lookups.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ApiClient, ApiError};
use crate::payment::{CheckoutSession, PaymentGateway, PaymentRequest, PaymentStatus};

const PAYMENTS_PATH: &str = "/payments";

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// Gateway endpoints, authenticated with the signed-in user's token.
#[derive(Clone)]
pub struct PaymentApi {
    api: ApiClient,
    token: Option<String>,
}

impl PaymentApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api, token: None }
    }

    /// Create a PaymentApi with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            api: self.api.clone(),
            token: Some(token),
        }
    }
}

#[async_trait]
impl PaymentGateway for PaymentApi {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<CheckoutSession, ApiError> {
        let response: CreatePaymentResponse = self
            .api
            .post_json(PAYMENTS_PATH, request, self.token.as_deref())
            .await?;

        if response.payment_url.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "gateway returned an empty payment URL".to_string(),
            ));
        }

        Ok(CheckoutSession {
            order_id: request.order_id.clone(),
            payment_url: response.payment_url,
        })
    }

    async fn check_status(&self, order_id: &str) -> Result<PaymentStatus, ApiError> {
        let path = format!("{}/{}/status", PAYMENTS_PATH, order_id);
        let response: StatusResponse = self.api.get_json(&path, self.token.as_deref()).await?;
        Ok(PaymentStatus::from_wire(&response.status))
    }
}
