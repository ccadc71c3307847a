//! Names and ports shared by the managed objects and the injected agent.

use std::collections::BTreeMap;

/// Name of the manager deployment, its container, service account and cluster role.
pub const MANAGER_APP_NAME: &str = "traffic-manager";

/// Namespace the manager is installed into unless told otherwise.
pub const DEFAULT_MANAGER_NAMESPACE: &str = "ambassador";

/// Port of the manager's API.
pub const MANAGER_PORT_HTTP: i32 = 8081;

/// Port of the manager's agent-injection webhook.
pub const MANAGER_PORT_HTTPS: i32 = 8443;

/// Secret holding the injection webhook's TLS material.
pub const AGENT_INJECTOR_TLS_NAME: &str = "mutator-webhook-tls";

/// Externally managed secret whose presence enables the license volume.
pub const MANAGER_LICENSE_NAME: &str = "systema-license";

/// Name of the license volume in the manager's pod spec.
pub const LICENSE_VOLUME_NAME: &str = "license";

/// Name of the sidecar container injected into intercepted pods.
pub const AGENT_CONTAINER_NAME: &str = "traffic-agent";

/// Downward-API volume exposing the pod's annotations to the agent.
pub const AGENT_ANNOTATION_VOLUME_NAME: &str = "traffic-annotations";

/// Directory under which the agent sees the app container's mounts.
pub const TEL_APP_MOUNT_POINT: &str = "/tel_app_mounts";

/// Labels selecting the manager's pods.
pub fn manager_selector() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_owned(), MANAGER_APP_NAME.to_owned()),
        ("telepresence".to_owned(), "manager".to_owned()),
    ])
}
