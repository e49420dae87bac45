//! Instance status projection
//!
//! Instance state is derived from pod status on every read; nothing is
//! cached. The ordinal comes from the StatefulSet pod name suffix.

use bifrost_common::opi::{Instance, InstanceState};
use k8s_openapi::api::core::v1::Pod;

const CRASH_LOOP_REASON: &str = "CrashLoopBackOff";
const UNSCHEDULABLE_REASON: &str = "Unschedulable";

/// Ordinal of a StatefulSet pod, parsed from its `<name>-<ordinal>` name
pub fn pod_ordinal(pod: &Pod) -> Option<i32> {
    let name = pod.metadata.name.as_deref()?;
    let (_, ordinal) = name.rsplit_once('-')?;
    ordinal.parse().ok()
}

/// Scheduler message for a pod that could not be placed
fn placement_error(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| {
            c.type_ == "PodScheduled"
                && c.status == "False"
                && c.reason.as_deref() == Some(UNSCHEDULABLE_REASON)
        })
        .map(|c| c.message.clone().unwrap_or_else(|| UNSCHEDULABLE_REASON.to_string()))
}

/// True if the pod's application container is running
pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|cs| cs.state.as_ref())
        .is_some_and(|state| state.running.is_some())
}

fn container_state(pod: &Pod) -> InstanceState {
    let Some(state) = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|cs| cs.state.as_ref())
    else {
        return InstanceState::Starting;
    };

    if state.running.is_some() {
        InstanceState::Running
    } else if state.terminated.is_some() {
        InstanceState::Crashed
    } else if state
        .waiting
        .as_ref()
        .is_some_and(|w| w.reason.as_deref() == Some(CRASH_LOOP_REASON))
    {
        InstanceState::Crashed
    } else {
        InstanceState::Starting
    }
}

/// Project one pod onto an instance; `None` for pods without an ordinal
pub fn project_instance(pod: &Pod) -> Option<Instance> {
    let index = pod_ordinal(pod)?;
    let since = pod
        .status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .and_then(|t| t.0.timestamp_nanos_opt())
        .unwrap_or_default();

    let (state, placement_error) = match placement_error(pod) {
        Some(message) => (InstanceState::Error, message),
        None => (container_state(pod), String::new()),
    };

    Some(Instance {
        index,
        state,
        since,
        placement_error,
    })
}

/// Project pods onto instances ordered by ordinal, with the running count
pub fn project_instances<'a>(pods: impl IntoIterator<Item = &'a Pod>) -> (Vec<Instance>, i32) {
    let mut running = 0;
    let mut instances = Vec::new();
    for pod in pods {
        if is_running(pod) {
            running += 1;
        }
        if let Some(instance) = project_instance(pod) {
            instances.push(instance);
        }
    }
    instances.sort_by_key(|i| i.index);
    (instances, running)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn three_instances_with_one_crashed() {
        let labels = json!({});
        let pods = vec![
            pod("app-2", labels.clone(), terminated()),
            pod("app-0", labels.clone(), running()),
            pod("app-1", labels.clone(), running()),
        ];
        let (instances, running_count) = project_instances(&pods);
        assert_eq!(running_count, 2);
        let states: Vec<_> = instances.iter().map(|i| i.state).collect();
        assert_eq!(
            states,
            vec![
                InstanceState::Running,
                InstanceState::Running,
                InstanceState::Crashed
            ]
        );
        assert_eq!(instances[0].index, 0);
        assert_eq!(instances[2].index, 2);
    }

    #[test]
    fn crash_loop_counts_as_crashed() {
        let instance = project_instance(&pod("app-0", json!({}), crash_looping())).unwrap();
        assert_eq!(instance.state, InstanceState::Crashed);
    }

    #[test]
    fn waiting_pod_is_starting() {
        let instance = project_instance(&pod("app-0", json!({}), pending())).unwrap();
        assert_eq!(instance.state, InstanceState::Starting);
        assert!(instance.since > 0);
    }

    #[test]
    fn unschedulable_pod_reports_placement_error() {
        let instance = project_instance(&unschedulable("app-4", json!({}))).unwrap();
        assert_eq!(instance.index, 4);
        assert_eq!(instance.state, InstanceState::Error);
        assert!(instance.placement_error.contains("Insufficient memory"));
        assert_eq!(instance.since, 0);
    }

    #[test]
    fn ordinal_parsing() {
        let labels = json!({});
        assert_eq!(pod_ordinal(&pod("my-app-abc-12", labels.clone(), running())), Some(12));
        assert_eq!(pod_ordinal(&pod("noordinal", labels, running())), None);
    }
}
