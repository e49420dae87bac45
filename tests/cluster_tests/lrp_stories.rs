//! Integration tests for the LRP desirer
//!
//! These tests tell the story of an app's processes as the control plane
//! desires, scales, inspects and stops them.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::Api;
use kube::Client;

use bifrost::lrp::statefulset::registry_secret_name;
use bifrost::lrp::LrpDesirer;
use bifrost_common::opi::{Lrp, PrivateRegistry};
use bifrost_common::{Error, LrpIdentifier};

use super::helpers::{create_namespace, delete_namespace, ensure_test_cluster, lrp_desirer};

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_lrp(namespace: &str, guid: &str, instances: i32) -> Lrp {
    Lrp {
        identifier: LrpIdentifier::new(guid, "v1"),
        namespace: namespace.to_string(),
        app_name: "story-app".to_string(),
        image: "busybox".to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), "sleep 3600".to_string()],
        target_instances: instances,
        memory_mb: 64,
        disk_mb: 64,
        last_updated: "1".to_string(),
        ..Default::default()
    }
}

async fn has_pdb(client: &Client, lrp: &Lrp) -> bool {
    let api: Api<PodDisruptionBudget> = Api::namespaced(client.clone(), &lrp.namespace);
    api.get_opt(&lrp.identifier.object_name())
        .await
        .expect("failed to get pdb")
        .is_some()
}

// =============================================================================
// Desire and Scale Stories
// =============================================================================

/// Story: The control plane desires a new app process
///
/// Expected behavior:
/// - A StatefulSet named after the identity exists with the declared replicas
/// - A single instance gets no disruption budget
/// - Desiring the same identity again is rejected as already existing
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_control_plane_desires_an_app() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let namespace = "bifrost-story-desire";
    create_namespace(&client, namespace).await;
    let desirer = lrp_desirer(&client);
    let lrp = sample_lrp(namespace, "desire-guid", 1);

    desirer.desire(&lrp).await.expect("failed to desire lrp");

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let created = statefulsets
        .get(&lrp.identifier.object_name())
        .await
        .expect("statefulset should exist");
    assert_eq!(created.spec.as_ref().and_then(|s| s.replicas), Some(1));
    assert!(!has_pdb(&client, &lrp).await);

    let err = desirer.desire(&lrp).await.unwrap_err();
    assert!(err.is_already_exists());

    delete_namespace(&client, namespace).await;
}

/// Story: An app scales out and back in
///
/// Expected behavior:
/// - Scaling to three instances creates the disruption budget
/// - Scaling back to one removes it
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_app_scales_out_and_in() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let namespace = "bifrost-story-scale";
    create_namespace(&client, namespace).await;
    let desirer = lrp_desirer(&client);

    desirer
        .desire(&sample_lrp(namespace, "scale-guid", 1))
        .await
        .expect("failed to desire lrp");

    let scaled_out = sample_lrp(namespace, "scale-guid", 3);
    desirer.update(&scaled_out).await.expect("failed to scale out");
    assert!(has_pdb(&client, &scaled_out).await);

    let view = desirer
        .get(&scaled_out.identifier)
        .await
        .expect("failed to get lrp");
    assert_eq!(view.lrp.target_instances, 3);

    let scaled_in = sample_lrp(namespace, "scale-guid", 1);
    desirer.update(&scaled_in).await.expect("failed to scale in");
    assert!(!has_pdb(&client, &scaled_in).await);

    delete_namespace(&client, namespace).await;
}

/// Story: The control plane updates an app that was never desired
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_update_of_unknown_app_is_not_found() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let desirer = lrp_desirer(&client);

    let err = desirer
        .update(&sample_lrp("default", "never-desired", 2))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// =============================================================================
// Stop Stories
// =============================================================================

/// Story: A private-registry app is stopped twice
///
/// Expected behavior:
/// - The pull secret exists while the app does
/// - Stop removes the StatefulSet, the disruption budget and the secret
/// - The second stop succeeds without doing anything
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_private_app_is_stopped_twice() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let namespace = "bifrost-story-stop";
    create_namespace(&client, namespace).await;
    let desirer = lrp_desirer(&client);

    let lrp = Lrp {
        private_registry: Some(PrivateRegistry {
            server: "index.docker.io/v1/".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        }),
        ..sample_lrp(namespace, "stop-guid", 2)
    };
    desirer.desire(&lrp).await.expect("failed to desire lrp");

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret_name = registry_secret_name(&lrp.identifier.object_name());
    assert!(secrets.get_opt(&secret_name).await.unwrap().is_some());

    desirer.stop(&lrp.identifier).await.expect("first stop failed");
    desirer.stop(&lrp.identifier).await.expect("second stop failed");

    assert!(secrets.get_opt(&secret_name).await.unwrap().is_none());
    assert!(!has_pdb(&client, &lrp).await);
    let err = desirer.get(&lrp.identifier).await.unwrap_err();
    assert!(err.is_not_found());

    delete_namespace(&client, namespace).await;
}

/// Story: The control plane stops an instance that does not exist
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_stop_instance_out_of_range() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let namespace = "bifrost-story-instance";
    create_namespace(&client, namespace).await;
    let desirer = lrp_desirer(&client);
    let lrp = sample_lrp(namespace, "instance-guid", 2);
    desirer.desire(&lrp).await.expect("failed to desire lrp");

    let err = desirer.stop_instance(&lrp.identifier, 5).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInstanceIndex { index: 5, instances: 2 }));

    delete_namespace(&client, namespace).await;
}
