//! Integration tests for the task desirer
//!
//! These tests follow a one-off task from desire through callback lookup
//! to deletion.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};

use bifrost::task::job::{job_name, task_selector_labels};
use bifrost::task::TaskDesirer;
use bifrost_common::kube_utils::label_selector;
use bifrost_common::opi::{PrivateRegistry, Task};

use super::helpers::{create_namespace, delete_namespace, ensure_test_cluster, task_desirer};

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_task(namespace: &str, guid: &str) -> Task {
    Task {
        guid: guid.to_string(),
        name: "migrate".to_string(),
        namespace: namespace.to_string(),
        app_name: "story-app".to_string(),
        space_name: "story-space".to_string(),
        image: "busybox".to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), "echo done".to_string()],
        completion_callback: "http://cloud-controller/tasks/completed".to_string(),
        memory_mb: 64,
        disk_mb: 64,
        ..Default::default()
    }
}

fn selector(task_guid: &str) -> String {
    label_selector(&task_selector_labels(task_guid))
}

// =============================================================================
// Task Lifecycle Stories
// =============================================================================

/// Story: A task is desired and its callback looked up
///
/// Expected behavior:
/// - A Job with the deterministic name exists
/// - The callback URL is recovered from the Job
/// - Looking up an unknown task is not found
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_task_is_desired_and_callback_found() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let namespace = "bifrost-story-task";
    create_namespace(&client, namespace).await;
    let desirer = task_desirer(&client);
    let task = sample_task(namespace, "task-guid-1");

    desirer.desire(&task).await.expect("failed to desire task");

    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    assert!(jobs.get_opt(&job_name(&task)).await.unwrap().is_some());

    let callback = desirer
        .completion_callback("task-guid-1")
        .await
        .expect("callback should be found");
    assert_eq!(callback.as_deref(), Some(task.completion_callback.as_str()));

    let err = desirer.completion_callback("unknown-task").await.unwrap_err();
    assert!(err.is_not_found());

    delete_namespace(&client, namespace).await;
}

/// Story: A private-registry task is deleted twice
///
/// Expected behavior:
/// - The task's pull secret exists while the Job does
/// - The first delete returns the callback and removes Job and secret
/// - The second delete finds nothing and succeeds
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test cluster -- --ignored"]
async fn story_private_task_is_deleted_twice() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let namespace = "bifrost-story-task-delete";
    create_namespace(&client, namespace).await;
    let desirer = task_desirer(&client);
    let task = Task {
        private_registry: Some(PrivateRegistry {
            server: "index.docker.io/v1/".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        }),
        ..sample_task(namespace, "task-guid-2")
    };

    desirer.desire(&task).await.expect("failed to desire task");

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&selector("task-guid-2"));
    let listed = secrets.list(&params).await.expect("failed to list secrets");
    assert_eq!(listed.items.len(), 1);

    let first = desirer.delete("task-guid-2").await.expect("first delete failed");
    assert_eq!(first.as_deref(), Some(task.completion_callback.as_str()));

    // Foreground deletion keeps the Job until its pods are gone
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    for _ in 0..30 {
        if jobs.get_opt(&job_name(&task)).await.unwrap().is_none() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    let second = desirer.delete("task-guid-2").await.expect("second delete failed");
    assert_eq!(second, None);

    let listed = secrets.list(&params).await.expect("failed to list secrets");
    assert!(listed.items.is_empty());

    delete_namespace(&client, namespace).await;
}
