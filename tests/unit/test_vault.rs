//! Credential vault unit tests.
//!
//! Provider validation needs the network, so these tests exercise the
//! storage/decryption paths against pre-seeded credential files.

use std::path::PathBuf;

use chrono::Utc;
use shipwright::filesys::{Dir, File};
use shipwright::models::credential::Credential;
use shipwright::providers::ProviderKind;
use shipwright::vault::crypto::VaultCipher;
use shipwright::vault::CredentialVault;

const MASTER_KEY: &str = "unit-test-master-key";

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vault-test-{}", uuid::Uuid::new_v4()))
}

async fn seed_credential(
    dir: &PathBuf,
    id: &str,
    owner: &str,
    provider: ProviderKind,
    is_active: bool,
    plaintext: &serde_json::Value,
) {
    let cipher = VaultCipher::from_master_key(MASTER_KEY);
    let credential = Credential {
        id: id.to_string(),
        owner: owner.to_string(),
        provider,
        name: format!("{} token", provider),
        ciphertext: cipher
            .encrypt(serde_json::to_vec(plaintext).unwrap().as_slice())
            .unwrap(),
        is_active,
        is_valid: true,
        last_validated_at: Some(Utc::now()),
        created_at: Utc::now(),
    };
    File::new(dir.join(format!("{}.json", id)))
        .write_json(&credential)
        .await
        .unwrap();
}

async fn cleanup(path: &PathBuf) {
    let _ = Dir::new(path).delete().await;
}

#[tokio::test]
async fn test_open_loads_persisted_credentials() {
    let dir = temp_dir();
    let secret = serde_json::json!({ "access_token": "nfp_123" });
    seed_credential(&dir, "cred-1", "alice", ProviderKind::Netlify, true, &secret).await;

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    let listed = vault.list("alice").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "cred-1");
    assert_eq!(listed[0].provider, ProviderKind::Netlify);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_get_decrypted_roundtrip() {
    let dir = temp_dir();
    let secret = serde_json::json!({ "access_token": "nfp_123", "site_id": "site-9" });
    seed_credential(&dir, "cred-1", "alice", ProviderKind::Netlify, true, &secret).await;

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    let plaintext = vault.get_decrypted("cred-1", Some("alice")).await.unwrap();
    assert_eq!(plaintext, secret);

    // Wrong owner is indistinguishable from absence.
    assert!(vault.get_decrypted("cred-1", Some("bob")).await.is_err());
    assert!(vault.get_decrypted("missing", None).await.is_err());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_inactive_credential_rejected() {
    let dir = temp_dir();
    let secret = serde_json::json!({ "token": "vc_123" });
    seed_credential(&dir, "cred-1", "alice", ProviderKind::Vercel, false, &secret).await;

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    assert!(vault.get_decrypted("cred-1", None).await.is_err());
    assert!(vault.get_first_active(ProviderKind::Vercel).await.is_none());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_get_first_active_prefers_oldest() {
    let dir = temp_dir();
    seed_credential(
        &dir,
        "older",
        "alice",
        ProviderKind::Vercel,
        true,
        &serde_json::json!({ "token": "old" }),
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    seed_credential(
        &dir,
        "newer",
        "bob",
        ProviderKind::Vercel,
        true,
        &serde_json::json!({ "token": "new" }),
    )
    .await;

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    let (id, plaintext) = vault.get_first_active(ProviderKind::Vercel).await.unwrap();
    assert_eq!(id, "older");
    assert_eq!(plaintext["token"], "old");

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_undecryptable_credentials_are_skipped() {
    let dir = temp_dir();
    // Encrypted under a different key, as after an ephemeral-key restart.
    let other = VaultCipher::from_master_key("some-other-key");
    let credential = Credential {
        id: "stale".to_string(),
        owner: "alice".to_string(),
        provider: ProviderKind::Netlify,
        name: "stale token".to_string(),
        ciphertext: other.encrypt(b"{\"access_token\":\"x\"}").unwrap(),
        is_active: true,
        is_valid: true,
        last_validated_at: None,
        created_at: Utc::now(),
    };
    File::new(dir.join("stale.json"))
        .write_json(&credential)
        .await
        .unwrap();

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    // Listed (metadata is readable) but unusable.
    assert_eq!(vault.list("alice").await.len(), 1);
    assert!(vault.get_first_active(ProviderKind::Netlify).await.is_none());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_delete_is_hard() {
    let dir = temp_dir();
    seed_credential(
        &dir,
        "cred-1",
        "alice",
        ProviderKind::Netlify,
        true,
        &serde_json::json!({ "access_token": "x" }),
    )
    .await;

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    vault.delete("cred-1", "alice").await.unwrap();
    assert!(vault.list("alice").await.is_empty());
    assert!(!File::new(dir.join("cred-1.json")).exists().await);

    // Deleting again is NotFound.
    assert!(vault.delete("cred-1", "alice").await.is_err());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_summaries_never_carry_ciphertext() {
    let dir = temp_dir();
    seed_credential(
        &dir,
        "cred-1",
        "alice",
        ProviderKind::Netlify,
        true,
        &serde_json::json!({ "access_token": "super-secret" }),
    )
    .await;

    let vault = CredentialVault::open(Dir::new(&dir), VaultCipher::from_master_key(MASTER_KEY))
        .await
        .unwrap();

    let serialized = serde_json::to_string(&vault.list("alice").await).unwrap();
    assert!(!serialized.contains("super-secret"));
    assert!(!serialized.contains("ciphertext"));

    cleanup(&dir).await;
}
