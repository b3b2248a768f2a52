//! Encrypted API credential rows.

use genbatch_core::types::Timestamp;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `api_credentials` table. Never serialised.
#[derive(Debug, Clone, FromRow)]
pub struct ApiCredential {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider: String,
    pub encrypted_secret: Vec<u8>,
    pub nonce: Vec<u8>,
    pub revoked_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for storing a credential that has already been sealed.
#[derive(Debug, Clone)]
pub struct CreateApiCredential {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider: String,
    pub encrypted_secret: Vec<u8>,
    pub nonce: Vec<u8>,
}
