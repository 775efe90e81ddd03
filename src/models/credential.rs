//! Provider credential records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// An encrypted provider credential at rest.
///
/// `ciphertext` is `<hex-nonce>:<hex-ciphertext>` and decrypts to a
/// provider-specific JSON record (see the provider's declared
/// credential schema). Plaintext never appears outside the vault and
/// the adapter call it is handed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,

    /// Owner identifier (opaque to the core)
    pub owner: String,

    pub provider: ProviderKind,

    /// Human-readable label
    pub name: String,

    /// Encrypted payload, `<hex-nonce>:<hex-ciphertext>`
    pub ciphertext: String,

    pub is_active: bool,

    /// Last known provider validation outcome
    pub is_valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Listing view of a credential; never carries ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: String,
    pub owner: String,
    pub provider: ProviderKind,
    pub name: String,
    pub is_active: bool,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id.clone(),
            owner: c.owner.clone(),
            provider: c.provider,
            name: c.name.clone(),
            is_active: c.is_active,
            is_valid: c.is_valid,
            last_validated_at: c.last_validated_at,
            created_at: c.created_at,
        }
    }
}
