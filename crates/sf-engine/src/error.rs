//! Engine error taxonomy.
//!
//! Only preflight rejections and persistence failures are errors here.
//! Provider rejections and transport failures after dispatch has started
//! are recorded per recipient and never unwind an operation.

use thiserror::Error;

use sf_store::{QuotaError, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch has no recipients")]
    EmptyRecipients,

    #[error("insufficient credits for account {account_id}: requested {requested}, available {available}")]
    InsufficientCredits {
        account_id: String,
        requested: i64,
        available: i64,
    },

    #[error("message not found: {id}")]
    MessageNotFound { id: String },

    #[error("campaign not found: {id}")]
    CampaignNotFound { id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QuotaError> for DispatchError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::InsufficientCredits {
                account_id,
                requested,
                available,
            } => DispatchError::InsufficientCredits {
                account_id,
                requested,
                available,
            },
            QuotaError::Store(e) => DispatchError::Store(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
