use std::collections::BTreeMap;

use bifrost_common::cf::TaskRequest;
use bifrost_common::opi::Task;
use bifrost_common::{Error, Result};

use super::{merge_env, Converter};

impl Converter {
    /// Convert a task request into a task descriptor
    ///
    /// Tasks take the same lifecycle paths as LRPs but have no legacy droplet
    /// fields, no ports and no health check.
    pub fn convert_task(&self, task_guid: &str, request: &TaskRequest) -> Result<Task> {
        if task_guid.is_empty() {
            return Err(Error::conversion("task guid must not be empty"));
        }
        if self.require_task_completion_callback && request.completion_callback.is_empty() {
            return Err(Error::conversion(format!(
                "task {} has no completion callback",
                task_guid
            )));
        }

        let lifecycle = request.lifecycle.resolve(None)?;
        let resolved = self.resolve_image(lifecycle);

        let baseline = BTreeMap::from([("LANG".to_string(), "en_US.UTF-8".to_string())]);
        let caller: BTreeMap<String, String> = request
            .environment
            .iter()
            .map(|var| (var.name.clone(), var.value.clone()))
            .collect();

        Ok(Task {
            guid: task_guid.to_string(),
            name: request.name.clone(),
            namespace: self.namespace_or_default(request.namespace.as_deref()),
            app_guid: request.app_guid.clone(),
            app_name: request.app_name.clone(),
            space_guid: request.space_guid.clone(),
            space_name: request.space_name.clone(),
            org_guid: request.org_guid.clone(),
            org_name: request.org_name.clone(),
            image: resolved.image,
            command: resolved.command,
            env: merge_env([&baseline, &resolved.env, &caller]),
            completion_callback: request.completion_callback.clone(),
            private_registry: resolved.private_registry,
            memory_mb: request.memory_mb,
            disk_mb: request.disk_mb,
            cpu_weight: request.cpu_weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_common::cf::{
        BuildpackLifecycle, DockerLifecycle, EnvironmentVariable, Lifecycle, LifecycleFields,
    };

    fn buildpack_task() -> TaskRequest {
        TaskRequest {
            name: "my_task".to_string(),
            app_name: "my_app".to_string(),
            space_name: "my_space".to_string(),
            completion_callback: "http://cc/callback".to_string(),
            environment: vec![EnvironmentVariable {
                name: "my-env".to_string(),
                value: "my-value".to_string(),
            }],
            lifecycle: Lifecycle::Buildpack(BuildpackLifecycle {
                droplet_hash: "foo".to_string(),
                droplet_guid: "bar".to_string(),
                start_command: "some command".to_string(),
            })
            .into(),
            ..Default::default()
        }
    }

    #[test]
    fn buildpack_task_resolves_droplet_image() {
        let converter = Converter::new("registry.local", "eirini", true);
        let task = converter.convert_task("task-guid", &buildpack_task()).unwrap();
        assert_eq!(task.guid, "task-guid");
        assert_eq!(task.image, "registry.local/cloudfoundry/bar:foo");
        assert_eq!(task.env["START_COMMAND"], "some command");
        assert_eq!(task.env["my-env"], "my-value");
        assert_eq!(task.namespace, "eirini");
        assert!(task.private_registry.is_none());
    }

    #[test]
    fn docker_task_with_credentials_carries_registry() {
        let converter = Converter::new("registry.local", "eirini", true);
        let mut request = buildpack_task();
        request.lifecycle = Lifecycle::Docker(DockerLifecycle {
            image: "eiriniuser/notdora".to_string(),
            command: vec!["/bin/echo".to_string(), "hello".to_string()],
            registry_username: "eiriniuser".to_string(),
            registry_password: "pw".to_string(),
        })
        .into();
        let task = converter.convert_task("t", &request).unwrap();
        assert_eq!(task.image, "eiriniuser/notdora");
        assert_eq!(task.command, vec!["/bin/echo", "hello"]);
        assert!(task.private_registry.is_some());
    }

    #[test]
    fn missing_callback_is_rejected_when_required() {
        let mut request = buildpack_task();
        request.completion_callback.clear();

        let strict = Converter::new("r", "eirini", true);
        assert!(matches!(
            strict.convert_task("t", &request),
            Err(Error::Conversion { .. })
        ));

        let lenient = Converter::new("r", "eirini", false);
        assert!(lenient.convert_task("t", &request).is_ok());
    }

    #[test]
    fn task_needs_exactly_one_lifecycle() {
        let converter = Converter::new("r", "eirini", false);
        let mut request = buildpack_task();
        request.lifecycle = LifecycleFields::default();
        assert!(matches!(
            converter.convert_task("t", &request),
            Err(Error::Conversion { .. })
        ));
    }
}
