//! Credential collaborator: resolves a credential reference to the API
//! secret used by the generation client.

use async_trait::async_trait;
use genbatch_core::crypto::MasterKey;
use genbatch_db::models::credential::CreateApiCredential;
use genbatch_db::repositories::CredentialRepo;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CredentialError;

/// Provider name stored with generation API credentials.
pub const PROVIDER_GENERATION_API: &str = "generation_api";

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential_ref: Uuid) -> Result<String, CredentialError>;
}

/// Resolves AES-256-GCM sealed secrets from `api_credentials`.
pub struct PgCredentialResolver {
    pool: PgPool,
    key: MasterKey,
}

impl PgCredentialResolver {
    pub fn new(pool: PgPool, key: MasterKey) -> Self {
        Self { pool, key }
    }

    /// Seal and store a secret. Returns the new credential reference.
    pub async fn store(
        &self,
        client_id: Uuid,
        provider: &str,
        secret: &str,
    ) -> Result<Uuid, CredentialError> {
        let id = Uuid::now_v7();
        let sealed = self
            .key
            .seal(secret)
            .map_err(|e| CredentialError::Seal(e.to_string()))?;

        CredentialRepo::create(
            &self.pool,
            &CreateApiCredential {
                id,
                client_id,
                provider: provider.to_string(),
                encrypted_secret: sealed.ciphertext,
                nonce: sealed.nonce,
            },
        )
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl CredentialResolver for PgCredentialResolver {
    async fn resolve(&self, credential_ref: Uuid) -> Result<String, CredentialError> {
        let credential = CredentialRepo::find_active(&self.pool, credential_ref)
            .await?
            .ok_or(CredentialError::NotFound(credential_ref))?;

        self.key
            .open(&credential.encrypted_secret, &credential.nonce)
            .map_err(|e| {
                tracing::error!(credential_id = %credential_ref, error = %e, "Credential decryption failed");
                CredentialError::Undecryptable(credential_ref)
            })
    }
}
