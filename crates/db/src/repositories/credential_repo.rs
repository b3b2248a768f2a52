//! Repository for the `api_credentials` table.
//!
//! Only sealed secrets are stored; encryption and decryption happen in
//! the caller with the master key.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::credential::{ApiCredential, CreateApiCredential};

/// Column list for `api_credentials` queries.
const COLUMNS: &str = "\
    id, client_id, provider, encrypted_secret, nonce, revoked_at, created_at, updated_at";

/// Provides storage for encrypted provider credentials.
pub struct CredentialRepo;

impl CredentialRepo {
    /// Store a sealed credential.
    pub async fn create(
        pool: &PgPool,
        input: &CreateApiCredential,
    ) -> Result<ApiCredential, sqlx::Error> {
        let query = format!(
            "INSERT INTO api_credentials (id, client_id, provider, encrypted_secret, nonce) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApiCredential>(&query)
            .bind(input.id)
            .bind(input.client_id)
            .bind(&input.provider)
            .bind(&input.encrypted_secret)
            .bind(&input.nonce)
            .fetch_one(pool)
            .await
    }

    /// Find a credential that has not been revoked.
    pub async fn find_active(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<ApiCredential>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM api_credentials WHERE id = $1 AND revoked_at IS NULL"
        );
        sqlx::query_as::<_, ApiCredential>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Revoke a credential. Returns `false` if it was already revoked.
    pub async fn revoke(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE api_credentials SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
