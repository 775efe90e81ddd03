//! Deployment store unit tests

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use shipwright::filesys::Dir;
use shipwright::models::deployment::{Budget, DeploymentConfig, DeploymentState, Environment};
use shipwright::models::detection::{DetectionResult, PackageManager, ProjectType};
use shipwright::providers::ProviderKind;
use shipwright::store::{DeploymentStore, Intake, ListQuery, StatePatch};

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("store-test-{}", uuid::Uuid::new_v4()))
}

fn intake() -> Intake {
    Intake {
        repo_url: "https://github.com/octocat/hello-world".to_string(),
        branch: "main".to_string(),
        environment: Environment::School,
        budget: Budget::Free,
        preferred_providers: Vec::new(),
        explicit_provider: None,
        explicit_credential_id: None,
        config: DeploymentConfig {
            name: "hello".to_string(),
            build_command: None,
            build_directory: None,
            env_vars: HashMap::new(),
        },
    }
}

fn detection() -> DetectionResult {
    DetectionResult {
        project_type: ProjectType::Static,
        framework: "Static HTML".to_string(),
        has_package_manifest: false,
        has_build_script: false,
        build_command: None,
        build_directory: Some(".".to_string()),
        is_pure_static: true,
        package_manager: PackageManager::Npm,
        estimated_size_mb: 0.1,
        environment_variable_refs: BTreeSet::new(),
    }
}

async fn cleanup(path: &PathBuf) {
    let _ = Dir::new(path).delete().await;
}

#[tokio::test]
async fn test_create_starts_queued() {
    let dir = temp_dir();
    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();

    let deployment = store.create(intake()).await.unwrap();
    assert_eq!(deployment.state, DeploymentState::Queued);
    assert!(deployment.deployment_url.is_none());
    assert!(deployment.error_message.is_none());
    assert!(deployment.started_at.is_none());

    let fetched = store.get(&deployment.id).await.unwrap();
    assert_eq!(fetched.id, deployment.id);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_forward_transitions_and_timestamps() {
    let dir = temp_dir();
    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();
    let deployment = store.create(intake()).await.unwrap();
    let id = deployment.id;

    store
        .update_state(&id, DeploymentState::Cloning, StatePatch::default())
        .await
        .unwrap();
    let building = store
        .update_state(&id, DeploymentState::Building, StatePatch::default())
        .await
        .unwrap();
    assert!(building.started_at.is_some());

    store
        .update_state(&id, DeploymentState::Deploying, StatePatch::default())
        .await
        .unwrap();
    let success = store
        .update_state(
            &id,
            DeploymentState::Success,
            StatePatch {
                deployment_url: Some("https://hello.netlify.app".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(success.completed_at.is_some());
    assert_eq!(
        success.deployment_url.as_deref(),
        Some("https://hello.netlify.app")
    );

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_illegal_transition_rejected() {
    let dir = temp_dir();
    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();
    let deployment = store.create(intake()).await.unwrap();

    // queued -> deploying skips the path
    assert!(store
        .update_state(&deployment.id, DeploymentState::Deploying, StatePatch::default())
        .await
        .is_err());

    // terminal states are frozen
    store
        .update_state(&deployment.id, DeploymentState::Cancelled, StatePatch::default())
        .await
        .unwrap();
    assert!(store
        .update_state(&deployment.id, DeploymentState::Cloning, StatePatch::default())
        .await
        .is_err());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_detected_is_monotonic() {
    let dir = temp_dir();
    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();
    let deployment = store.create(intake()).await.unwrap();

    store
        .update_state(&deployment.id, DeploymentState::Cloning, StatePatch {
            detected: Some(detection()),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut replacement = detection();
    replacement.framework = "Something else".to_string();
    let updated = store
        .update_state(&deployment.id, DeploymentState::Cloning, StatePatch {
            detected: Some(replacement),
            ..Default::default()
        })
        .await
        .unwrap();

    // First detection sticks.
    assert_eq!(updated.detected.unwrap().framework, "Static HTML");

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = temp_dir();

    let id = {
        let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();
        let deployment = store.create(intake()).await.unwrap();
        store
            .update_state(&deployment.id, DeploymentState::Cloning, StatePatch::default())
            .await
            .unwrap();
        deployment.id
    };

    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();
    let recovered = store.get(&id).await.unwrap();
    assert_eq!(recovered.state, DeploymentState::Cloning);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_list_pagination_and_filters() {
    let dir = temp_dir();
    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();

    for _ in 0..5 {
        store.create(intake()).await.unwrap();
    }
    let special = store.create(intake()).await.unwrap();
    store
        .update_state(&special.id, DeploymentState::Cloning, StatePatch {
            chosen_provider: Some(ProviderKind::Netlify),
            ..Default::default()
        })
        .await
        .unwrap();

    let (page, total) = store
        .list(&ListQuery {
            page: Some(1),
            limit: Some(4),
            ..Default::default()
        })
        .await;
    assert_eq!(total, 6);
    assert_eq!(page.len(), 4);

    let (cloning, _) = store
        .list(&ListQuery {
            status: Some(DeploymentState::Cloning),
            ..Default::default()
        })
        .await;
    assert_eq!(cloning.len(), 1);

    let (netlify, _) = store
        .list(&ListQuery {
            provider: Some(ProviderKind::Netlify),
            ..Default::default()
        })
        .await;
    assert_eq!(netlify.len(), 1);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_reset_for_retry_rewinds_to_queued() {
    let dir = temp_dir();
    let store = DeploymentStore::open(Dir::new(&dir)).await.unwrap();
    let deployment = store.create(intake()).await.unwrap();

    store
        .update_state(&deployment.id, DeploymentState::Cloning, StatePatch::default())
        .await
        .unwrap();
    store.reset_for_retry(&deployment.id).await.unwrap();
    assert_eq!(
        store.get(&deployment.id).await.unwrap().state,
        DeploymentState::Queued
    );

    // Terminal deployments cannot be rewound.
    store
        .update_state(&deployment.id, DeploymentState::Cancelled, StatePatch::default())
        .await
        .unwrap();
    assert!(store.reset_for_retry(&deployment.id).await.is_err());

    cleanup(&dir).await;
}
