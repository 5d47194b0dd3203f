use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Identity provider error: {0}")]
    Provider(#[from] ApiError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
