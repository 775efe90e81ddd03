//! Credential vault: encrypted at-rest storage of provider secrets.
//!
//! Each credential is one JSON file (0600) under the vault directory;
//! the plaintext record only ever exists in memory, handed directly to
//! a provider adapter call. Validation outcomes are persisted, never
//! the secrets themselves.

pub mod crypto;

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::Error;
use crate::filesys::Dir;
use crate::models::credential::{Credential, CredentialSummary};
use crate::providers::{Adapter, ProviderKind};
use crate::utils::generate_uuid;
use crate::vault::crypto::VaultCipher;

/// Fields accepted by `update`
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub new_credentials: Option<serde_json::Value>,
}

/// Result of an explicit validation call
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct CredentialVault {
    dir: Dir,
    cipher: VaultCipher,
    index: RwLock<HashMap<String, Credential>>,
}

impl CredentialVault {
    /// Open the vault, loading every persisted credential into the index.
    pub async fn open(dir: Dir, cipher: VaultCipher) -> Result<Self, Error> {
        dir.create().await?;
        let mut index = HashMap::new();

        for path in dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match crate::filesys::File::new(&path).read_json::<Credential>().await {
                Ok(credential) => {
                    index.insert(credential.id.clone(), credential);
                }
                Err(e) => warn!("Skipping unreadable credential file {:?}: {}", path, e),
            }
        }

        info!("Credential vault opened with {} credentials", index.len());
        Ok(Self {
            dir,
            cipher,
            index: RwLock::new(index),
        })
    }

    /// Create, validate and persist a credential.
    ///
    /// Rejects with `Conflict` when an active credential already exists
    /// for `(owner, provider)` and with `InvalidCredential` when the
    /// provider rejects the secret.
    pub async fn create(
        &self,
        owner: &str,
        provider: ProviderKind,
        name: &str,
        plaintext: serde_json::Value,
    ) -> Result<CredentialSummary, Error> {
        {
            let index = self.index.read().await;
            if index
                .values()
                .any(|c| c.owner == owner && c.provider == provider && c.is_active)
            {
                return Err(Error::Conflict(format!(
                    "an active {} credential already exists for this owner",
                    provider
                )));
            }
        }

        check_schema(provider, &plaintext)?;
        self.validate_plaintext(provider, &plaintext).await?;

        let ciphertext = self
            .cipher
            .encrypt(serde_json::to_vec(&plaintext)?.as_slice())?;

        let credential = Credential {
            id: generate_uuid(),
            owner: owner.to_string(),
            provider,
            name: name.to_string(),
            ciphertext,
            is_active: true,
            is_valid: true,
            last_validated_at: Some(Utc::now()),
            created_at: Utc::now(),
        };

        self.persist(&credential).await?;
        let summary = CredentialSummary::from(&credential);
        self.index
            .write()
            .await
            .insert(credential.id.clone(), credential);

        info!("Stored new {} credential {}", provider, summary.id);
        Ok(summary)
    }

    /// Summary lookup by id, no owner filter. Used by the pipeline to
    /// check provider match and activity before decrypting.
    pub async fn get_summary(&self, id: &str) -> Result<CredentialSummary, Error> {
        let index = self.index.read().await;
        index
            .get(id)
            .map(CredentialSummary::from)
            .ok_or_else(|| Error::NotFound(format!("credential {}", id)))
    }

    /// List an owner's credentials (summaries only).
    pub async fn list(&self, owner: &str) -> Vec<CredentialSummary> {
        let index = self.index.read().await;
        let mut summaries: Vec<CredentialSummary> = index
            .values()
            .filter(|c| c.owner == owner)
            .map(CredentialSummary::from)
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Decrypt a credential for use. Enforces `is_active`.
    pub async fn get_decrypted(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> Result<serde_json::Value, Error> {
        let index = self.index.read().await;
        let credential = index
            .get(id)
            .filter(|c| owner.is_none_or(|o| c.owner == o))
            .ok_or_else(|| Error::NotFound(format!("credential {}", id)))?;

        if !credential.is_active {
            return Err(Error::InvalidCredential(format!(
                "credential {} is inactive",
                id
            )));
        }

        let plaintext = self.cipher.decrypt(&credential.ciphertext)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// First active credential for a provider, oldest first.
    ///
    /// Credentials that no longer decrypt (ephemeral-key restart) are
    /// skipped with a warning.
    pub async fn get_first_active(
        &self,
        provider: ProviderKind,
    ) -> Option<(String, serde_json::Value)> {
        let index = self.index.read().await;
        let mut candidates: Vec<&Credential> = index
            .values()
            .filter(|c| c.provider == provider && c.is_active)
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        for credential in candidates {
            match self
                .cipher
                .decrypt(&credential.ciphertext)
                .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?))
            {
                Ok(plaintext) => return Some((credential.id.clone(), plaintext)),
                Err(e) => {
                    warn!("Credential {} is not decryptable: {}", credential.id, e);
                }
            }
        }
        None
    }

    /// Update name/activity/secret. A secret change revalidates and
    /// re-encrypts atomically.
    pub async fn update(
        &self,
        id: &str,
        owner: &str,
        request: UpdateRequest,
    ) -> Result<CredentialSummary, Error> {
        let mut updated = {
            let index = self.index.read().await;
            index
                .get(id)
                .filter(|c| c.owner == owner)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("credential {}", id)))?
        };

        if let Some(name) = request.name {
            updated.name = name;
        }
        if let Some(is_active) = request.is_active {
            updated.is_active = is_active;
        }
        if let Some(plaintext) = request.new_credentials {
            check_schema(updated.provider, &plaintext)?;
            self.validate_plaintext(updated.provider, &plaintext).await?;
            updated.ciphertext = self
                .cipher
                .encrypt(serde_json::to_vec(&plaintext)?.as_slice())?;
            updated.is_valid = true;
            updated.last_validated_at = Some(Utc::now());
        }

        self.persist(&updated).await?;
        let summary = CredentialSummary::from(&updated);
        self.index.write().await.insert(updated.id.clone(), updated);
        Ok(summary)
    }

    /// Hard delete.
    pub async fn delete(&self, id: &str, owner: &str) -> Result<(), Error> {
        {
            let index = self.index.read().await;
            index
                .get(id)
                .filter(|c| c.owner == owner)
                .ok_or_else(|| Error::NotFound(format!("credential {}", id)))?;
        }
        self.dir.file(&format!("{}.json", id)).delete().await?;
        self.index.write().await.remove(id);
        Ok(())
    }

    /// Validate against the provider API and persist the outcome.
    ///
    /// A network failure leaves `is_valid` untouched and surfaces as
    /// `ValidationUnavailable`.
    pub async fn validate(&self, id: &str) -> Result<ValidationOutcome, Error> {
        let credential = {
            let index = self.index.read().await;
            index
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("credential {}", id)))?
        };

        let plaintext_bytes = self.cipher.decrypt(&credential.ciphertext)?;
        let plaintext: serde_json::Value = serde_json::from_slice(&plaintext_bytes)?;

        let adapter = Adapter::new(credential.provider)?;
        let is_valid = adapter.validate(&plaintext).await?;

        let mut updated = credential;
        updated.is_valid = is_valid;
        updated.last_validated_at = Some(Utc::now());
        self.persist(&updated).await?;
        self.index.write().await.insert(updated.id.clone(), updated);

        Ok(ValidationOutcome {
            is_valid,
            error: (!is_valid).then(|| "provider rejected the credential".to_string()),
        })
    }

    async fn validate_plaintext(
        &self,
        provider: ProviderKind,
        plaintext: &serde_json::Value,
    ) -> Result<(), Error> {
        let adapter = Adapter::new(provider)?;
        match adapter.validate(plaintext).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::InvalidCredential(format!(
                "{} rejected the credential",
                provider
            ))),
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, credential: &Credential) -> Result<(), Error> {
        let file = self.dir.file(&format!("{}.json", credential.id));
        file.write_json_atomic(credential).await?;
        file.set_permissions_600().await?;
        Ok(())
    }
}

/// Reject records missing the provider's required credential fields.
fn check_schema(provider: ProviderKind, plaintext: &serde_json::Value) -> Result<(), Error> {
    let capabilities = match provider {
        ProviderKind::Netlify => crate::providers::netlify::capabilities(),
        ProviderKind::Vercel => crate::providers::vercel::capabilities(),
    };
    for field in capabilities.required_credential_fields {
        let present = plaintext
            .get(field)
            .and_then(|v| v.as_str())
            .is_some_and(|v| !v.is_empty());
        if !present {
            return Err(Error::InvalidCredential(format!(
                "missing required field `{}`",
                field
            )));
        }
    }
    Ok(())
}
