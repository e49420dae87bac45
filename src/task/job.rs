//! Cluster objects for a task
//!
//! A task runs as a Job with no retries. Its name is derived from the
//! app/space/task names plus a hash of the task GUID, so tasks sharing a
//! name triple get distinct Jobs.

use std::collections::BTreeMap;

use bifrost_common::kube_utils::{deterministic_hash, is_valid_label_value, sanitize_name, MAX_LABEL_LENGTH};
use bifrost_common::opi::Task;
use bifrost_common::{
    Result, ANNOTATION_APP_NAME, ANNOTATION_COMPLETION_CALLBACK, ANNOTATION_ORG_NAME,
    ANNOTATION_REGISTRY_SECRET, ANNOTATION_SPACE_NAME, ANNOTATION_TASK_NAME, LABEL_APP_GUID,
    LABEL_GUID, LABEL_SOURCE_TYPE, SOURCE_TYPE_TASK,
};
use k8s_openapi::api::batch::v1::Job;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;

use crate::lrp::statefulset::{env_list, resources};

/// Name of the single task container
pub const TASK_CONTAINER_NAME: &str = "opi-task";

/// Hex chars of the GUID hash appended to Job names
const JOB_HASH_LENGTH: usize = 10;

/// Random chars appended to task secret names
const SECRET_SUFFIX_LENGTH: usize = 5;

/// Cluster-wide settings applied to every task
#[derive(Clone, Debug, Default)]
pub struct TaskSettings {
    /// Pull secret every pod references, if any
    pub registry_secret_name: String,
    /// Service account pods run as, if any
    pub service_account: String,
}

/// Labels selecting the Job of one task
pub fn task_selector_labels(task_guid: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_GUID.to_string(), task_guid.to_string()),
        (LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_TASK.to_string()),
    ])
}

/// Labels selecting every task Job
pub fn task_source_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_TASK.to_string())])
}

/// Deterministic Job name: `<app>-<space>-<task>-<guid hash>`
pub fn job_name(task: &Task) -> String {
    let hash = deterministic_hash(&task.guid);
    let hash = &hash[..JOB_HASH_LENGTH];
    let prefix = sanitize_name(
        &format!("{}-{}-{}", task.app_name, task.space_name, task.name),
        MAX_LABEL_LENGTH - JOB_HASH_LENGTH - 1,
    );
    if prefix.is_empty() {
        hash.to_string()
    } else {
        format!("{}-{}", prefix, hash)
    }
}

/// Pull secret name for a task: `<app>-<space>-registry-secret-<random>`.
///
/// The random suffix keeps secrets of tasks with the same app and space
/// apart; the Job records the chosen name in an annotation.
pub fn task_secret_name(task: &Task) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_SUFFIX_LENGTH)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    let prefix = sanitize_name(
        &format!("{}-{}-registry-secret", task.app_name, task.space_name),
        MAX_LABEL_LENGTH - SECRET_SUFFIX_LENGTH - 1,
    );
    format!("{}-{}", prefix, suffix)
}

/// Build the Job for a task; `secret_name` is its private registry secret
pub fn build_job(task: &Task, settings: &TaskSettings, secret_name: Option<&str>) -> Result<Job> {
    let mut labels = task_selector_labels(&task.guid);
    if !task.app_guid.is_empty() && is_valid_label_value(&task.app_guid) {
        labels.insert(LABEL_APP_GUID.to_string(), task.app_guid.clone());
    }

    let mut annotations = BTreeMap::from([
        (ANNOTATION_COMPLETION_CALLBACK.to_string(), task.completion_callback.clone()),
        (ANNOTATION_TASK_NAME.to_string(), task.name.clone()),
        (ANNOTATION_APP_NAME.to_string(), task.app_name.clone()),
        (ANNOTATION_SPACE_NAME.to_string(), task.space_name.clone()),
        (ANNOTATION_ORG_NAME.to_string(), task.org_name.clone()),
    ]);
    if let Some(secret) = secret_name {
        annotations.insert(ANNOTATION_REGISTRY_SECRET.to_string(), secret.to_string());
    }

    let mut pull_secrets = Vec::new();
    if !settings.registry_secret_name.is_empty() {
        pull_secrets.push(json!({ "name": settings.registry_secret_name }));
    }
    if let Some(secret) = secret_name {
        pull_secrets.push(json!({ "name": secret }));
    }

    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "automountServiceAccountToken": false,
        "imagePullSecrets": pull_secrets,
        "containers": [{
            "name": TASK_CONTAINER_NAME,
            "image": task.image,
            "command": task.command,
            "env": env_list(&task.env),
            "resources": resources(task.memory_mb, task.disk_mb, task.cpu_weight),
        }],
    });
    if !settings.service_account.is_empty() {
        pod_spec["serviceAccountName"] = json!(settings.service_account);
    }

    let job = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name(task),
            "namespace": task.namespace,
            "labels": labels,
            "annotations": annotations,
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": labels },
                "spec": pod_spec,
            },
        },
    });
    Ok(serde_json::from_value(job)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            guid: "task-guid".to_string(),
            name: "my_task".to_string(),
            namespace: "eirini".to_string(),
            app_guid: "app-guid".to_string(),
            app_name: "my_app".to_string(),
            space_name: "my_space".to_string(),
            image: "busybox".to_string(),
            command: vec!["/bin/echo".to_string(), "hello".to_string()],
            env: BTreeMap::from([("my-env".to_string(), "my-value".to_string())]),
            completion_callback: "http://cc/callback".to_string(),
            ..Default::default()
        }
    }

    fn settings() -> TaskSettings {
        TaskSettings {
            registry_secret_name: "registry-secret".to_string(),
            service_account: "eirini".to_string(),
        }
    }

    #[test]
    fn job_name_is_readable_and_unique_per_guid() {
        let a = task();
        let b = Task {
            guid: "other-guid".to_string(),
            ..task()
        };
        assert!(job_name(&a).starts_with("my-app-my-space-my-task-"));
        assert_eq!(job_name(&a), job_name(&a));
        assert_ne!(job_name(&a), job_name(&b));
    }

    #[test]
    fn job_name_fits_a_label() {
        let long = Task {
            app_name: "a".repeat(80),
            ..task()
        };
        assert!(job_name(&long).len() <= MAX_LABEL_LENGTH);
    }

    #[test]
    fn secret_names_share_prefix_but_differ() {
        let a = task_secret_name(&task());
        assert!(a.starts_with("my-app-my-space-registry-secret-"));
        assert_eq!(a.len(), "my-app-my-space-registry-secret-".len() + SECRET_SUFFIX_LENGTH);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn job_spec_runs_once() {
        let job = build_job(&task(), &settings(), None).unwrap();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["spec"]["backoffLimit"], 0);

        let pod = &value["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(pod["serviceAccountName"], "eirini");
        assert_eq!(pod["imagePullSecrets"], json!([{ "name": "registry-secret" }]));

        let container = &pod["containers"][0];
        assert_eq!(container["name"], TASK_CONTAINER_NAME);
        assert_eq!(container["image"], "busybox");
        assert_eq!(container["command"], json!(["/bin/echo", "hello"]));
        assert_eq!(container["env"], json!([{ "name": "my-env", "value": "my-value" }]));
    }

    #[test]
    fn job_records_callback_and_secret() {
        let job = build_job(&task(), &settings(), Some("my-app-my-space-registry-secret-abcde")).unwrap();
        let annotations = job.metadata.annotations.clone().unwrap();
        assert_eq!(annotations[ANNOTATION_COMPLETION_CALLBACK], "http://cc/callback");
        assert_eq!(
            annotations[ANNOTATION_REGISTRY_SECRET],
            "my-app-my-space-registry-secret-abcde"
        );

        let labels = job.metadata.labels.clone().unwrap();
        assert_eq!(labels[LABEL_GUID], "task-guid");
        assert_eq!(labels[LABEL_SOURCE_TYPE], SOURCE_TYPE_TASK);

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value["spec"]["template"]["spec"]["imagePullSecrets"][1]["name"],
            "my-app-my-space-registry-secret-abcde"
        );
    }
}
