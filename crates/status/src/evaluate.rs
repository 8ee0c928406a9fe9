use kset_core::ResourceStatus;
use kube::core::DynamicObject;
use serde_json::Value as Json;

/// Classify a live object. Well-known workload kinds are checked through
/// their replica / phase fields; everything else through standard conditions.
pub fn compute_status(obj: &DynamicObject) -> (ResourceStatus, String) {
    if obj.metadata.deletion_timestamp.is_some() {
        return (ResourceStatus::InProgress, "Resource scheduled for deletion".into());
    }
    let status = obj.data.get("status").unwrap_or(&Json::Null);
    let observed = status.get("observedGeneration").and_then(Json::as_i64);
    if let (Some(gen), Some(seen)) = (obj.metadata.generation, observed) {
        if seen < gen {
            return (ResourceStatus::InProgress, format!("Generation {} not yet observed (at {})", gen, seen));
        }
    }
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
    match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" => replicas_status(obj, status, kind),
        "DaemonSet" => daemonset_status(status),
        "Pod" => pod_status(status),
        "Job" => job_status(status),
        "PersistentVolumeClaim" => match status.get("phase").and_then(Json::as_str) {
            Some("Bound") => (ResourceStatus::Current, "PVC is Bound".into()),
            other => (ResourceStatus::InProgress, format!("PVC is {}", other.unwrap_or("Pending"))),
        },
        _ => generic_status(status),
    }
}

fn int(v: &Json, key: &str) -> i64 { v.get(key).and_then(Json::as_i64).unwrap_or(0) }

fn condition<'a>(status: &'a Json, ty: &str) -> Option<(&'a str, &'a str)> {
    status.get("conditions")?.as_array()?.iter().find(|c| c.get("type").and_then(Json::as_str) == Some(ty)).map(|c| {
        (c.get("status").and_then(Json::as_str).unwrap_or("Unknown"), c.get("message").and_then(Json::as_str).unwrap_or(""))
    })
}

fn replicas_status(obj: &DynamicObject, status: &Json, kind: &str) -> (ResourceStatus, String) {
    let want = obj.data.get("spec").and_then(|s| s.get("replicas")).and_then(Json::as_i64).unwrap_or(1);
    let ready = int(status, "readyReplicas");
    if kind == "Deployment" {
        if let Some(("False", msg)) = condition(status, "Progressing") {
            return (ResourceStatus::Failed, format!("Progress deadline exceeded: {}", msg));
        }
        let updated = int(status, "updatedReplicas");
        let available = int(status, "availableReplicas");
        if updated < want { return (ResourceStatus::InProgress, format!("Updated: {}/{}", updated, want)); }
        if available < want { return (ResourceStatus::InProgress, format!("Available: {}/{}", available, want)); }
    }
    if ready < want {
        return (ResourceStatus::InProgress, format!("Ready: {}/{}", ready, want));
    }
    (ResourceStatus::Current, format!("{} is available. Replicas: {}", kind, want))
}

fn daemonset_status(status: &Json) -> (ResourceStatus, String) {
    let desired = int(status, "desiredNumberScheduled");
    let ready = int(status, "numberReady");
    if ready < desired { (ResourceStatus::InProgress, format!("Ready: {}/{}", ready, desired)) } else { (ResourceStatus::Current, format!("All replicas scheduled as expected. Replicas: {}", desired)) }
}

fn pod_status(status: &Json) -> (ResourceStatus, String) {
    match status.get("phase").and_then(Json::as_str) {
        Some("Succeeded") => (ResourceStatus::Current, "Pod has completed successfully".into()),
        Some("Failed") => (ResourceStatus::Failed, "Pod has completed, but not successfully".into()),
        Some("Running") => match condition(status, "Ready") {
            Some(("True", _)) => (ResourceStatus::Current, "Pod is Ready".into()),
            _ => (ResourceStatus::InProgress, "Pod is running but not ready".into()),
        },
        other => (ResourceStatus::InProgress, format!("Pod phase: {}", other.unwrap_or("Pending"))),
    }
}

fn job_status(status: &Json) -> (ResourceStatus, String) {
    if let Some(("True", _)) = condition(status, "Complete") {
        return (ResourceStatus::Current, "Job Completed".into());
    }
    if let Some(("True", msg)) = condition(status, "Failed") {
        return (ResourceStatus::Failed, format!("Job Failed: {}", msg));
    }
    (ResourceStatus::InProgress, format!("Job in progress. success: {}, active: {}", int(status, "succeeded"), int(status, "active")))
}

fn generic_status(status: &Json) -> (ResourceStatus, String) {
    if let Some(("True", msg)) = condition(status, "Stalled") { return (ResourceStatus::Failed, msg.to_string()); }
    if let Some(("True", msg)) = condition(status, "Reconciling") { return (ResourceStatus::InProgress, msg.to_string()); }
    match condition(status, "Ready") {
        Some(("False", msg)) => (ResourceStatus::InProgress, msg.to_string()),
        _ => (ResourceStatus::Current, "Resource is current".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: Json) -> DynamicObject { serde_json::from_value(v).unwrap() }

    #[test]
    fn configmap_is_current_immediately() {
        let cm = obj(serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "a" } }));
        assert_eq!(compute_status(&cm).0, ResourceStatus::Current);
    }

    #[test]
    fn deployment_waits_for_available_replicas() {
        let mut d = serde_json::json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": { "name": "web", "generation": 2 },
            "spec": { "replicas": 3 },
            "status": { "observedGeneration": 2, "updatedReplicas": 3, "readyReplicas": 2, "availableReplicas": 2 }
        });
        let (st, msg) = compute_status(&obj(d.clone()));
        assert_eq!(st, ResourceStatus::InProgress);
        assert_eq!(msg, "Available: 2/3");
        d["status"]["readyReplicas"] = 3.into();
        d["status"]["availableReplicas"] = 3.into();
        assert_eq!(compute_status(&obj(d)).0, ResourceStatus::Current);
    }

    #[test]
    fn unobserved_generation_is_in_progress() {
        let d = obj(serde_json::json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": { "name": "web", "generation": 3 },
            "status": { "observedGeneration": 2 }
        }));
        assert_eq!(compute_status(&d).0, ResourceStatus::InProgress);
    }

    #[test]
    fn failed_job_and_stalled_custom_resource() {
        let job = obj(serde_json::json!({
            "apiVersion": "batch/v1", "kind": "Job", "metadata": { "name": "j" },
            "status": { "conditions": [{ "type": "Failed", "status": "True", "message": "BackoffLimitExceeded" }] }
        }));
        assert_eq!(compute_status(&job).0, ResourceStatus::Failed);
        let cr = obj(serde_json::json!({
            "apiVersion": "example.io/v1", "kind": "Widget", "metadata": { "name": "w" },
            "status": { "conditions": [{ "type": "Stalled", "status": "True", "message": "bad spec" }] }
        }));
        assert_eq!(compute_status(&cr), (ResourceStatus::Failed, "bad spec".to_string()));
    }
}
