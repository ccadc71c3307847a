//! The traffic-agent sidecar injected next to an intercepted app container.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, DownwardAPIVolumeFile, DownwardAPIVolumeSource, EnvFromSource,
    EnvVar, EnvVarSource, ExecAction, ObjectFieldSelector, Probe, Volume, VolumeMount,
};

use crate::install::{
    AGENT_ANNOTATION_VOLUME_NAME, AGENT_CONTAINER_NAME, MANAGER_APP_NAME, TEL_APP_MOUNT_POINT,
};

/// Prefix of every variable the agent passes through from the app container.
pub const ENV_PREFIX: &str = "TEL_APP_";

const SERVICE_ACCOUNT_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const POD_INFO_MOUNT_PATH: &str = "/tel_pod_info";
const MAX_PORT_NAME_LEN: usize = 15;

/// Builds the agent container for `app_container`.
///
/// The agent sees the app's environment under [`ENV_PREFIX`] and the app's mounts under
/// [`TEL_APP_MOUNT_POINT`], so that both can be forwarded to the intercepting client.
pub fn agent_container(
    name: &str,
    image: &str,
    app_container: &Container,
    port: ContainerPort,
    app_port: u16,
    manager_namespace: &str,
) -> Container {
    Container {
        name: AGENT_CONTAINER_NAME.to_owned(),
        image: Some(image.to_owned()),
        args: Some(vec!["agent".to_owned()]),
        ports: Some(vec![port]),
        env: Some(agent_environment(
            name,
            app_container,
            app_port,
            manager_namespace,
        )),
        env_from: agent_env_from(app_container.env_from.as_deref()),
        volume_mounts: Some(agent_volume_mounts(
            app_container.volume_mounts.as_deref().unwrap_or_default(),
        )),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec!["/bin/stat".to_owned(), "/tmp/agent/ready".to_owned()]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The downward-API volume behind the agent's `/tel_pod_info` mount.
pub fn agent_volume() -> Volume {
    Volume {
        name: AGENT_ANNOTATION_VOLUME_NAME.to_owned(),
        downward_api: Some(DownwardAPIVolumeSource {
            items: Some(vec![DownwardAPIVolumeFile {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.annotations".to_owned(),
                    api_version: None,
                }),
                path: "annotations".to_owned(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn field_ref(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_owned(),
                api_version: None,
            }),
            ..Default::default()
        }),
    }
}

fn agent_environment(
    agent_name: &str,
    app_container: &Container,
    app_port: u16,
    manager_namespace: &str,
) -> Vec<EnvVar> {
    let mut env = app_environment(app_container);
    env.extend([
        value("LOG_LEVEL", "debug"),
        value("AGENT_NAME", agent_name),
        field_ref("AGENT_NAMESPACE", "metadata.namespace"),
        field_ref("AGENT_POD_IP", "status.podIP"),
        value("APP_PORT", app_port.to_string()),
    ]);

    let mounts = app_container.volume_mounts.as_deref().unwrap_or_default();
    if !mounts.is_empty() {
        env.push(value("APP_MOUNTS", TEL_APP_MOUNT_POINT));
        // lets the local app symlink the mounts it expects
        let mount_paths: Vec<&str> = mounts
            .iter()
            .map(|mount| mount.mount_path.as_str())
            .collect();
        env.push(value(
            &format!("{ENV_PREFIX}TELEPRESENCE_MOUNTS"),
            mount_paths.join(":"),
        ));
    }

    env.push(value(
        "MANAGER_HOST",
        format!("{MANAGER_APP_NAME}.{manager_namespace}"),
    ));
    env
}

fn app_environment(app_container: &Container) -> Vec<EnvVar> {
    app_container
        .env
        .iter()
        .flatten()
        .map(|var| EnvVar {
            name: format!("{ENV_PREFIX}{}", var.name),
            ..var.clone()
        })
        .chain([value("TELEPRESENCE_CONTAINER", &app_container.name)])
        .collect()
}

fn agent_env_from(app_env_from: Option<&[EnvFromSource]>) -> Option<Vec<EnvFromSource>> {
    let app_env_from = app_env_from.filter(|sources| !sources.is_empty())?;
    Some(
        app_env_from
            .iter()
            .map(|source| EnvFromSource {
                prefix: Some(format!(
                    "{ENV_PREFIX}{}",
                    source.prefix.as_deref().unwrap_or_default()
                )),
                ..source.clone()
            })
            .collect(),
    )
}

fn agent_volume_mounts(mounts: &[VolumeMount]) -> Vec<VolumeMount> {
    mounts
        .iter()
        .map(|mount| {
            let mut mount = mount.clone();
            // a rewritten service account mount would make the kubelet generate another one
            if mount.mount_path != SERVICE_ACCOUNT_MOUNT_PATH {
                mount.mount_path = format!(
                    "{TEL_APP_MOUNT_POINT}/{}",
                    mount.mount_path.trim_start_matches('/')
                );
            }
            mount
        })
        .chain([VolumeMount {
            name: AGENT_ANNOTATION_VOLUME_NAME.to_owned(),
            mount_path: POD_INFO_MOUNT_PATH.to_owned(),
            ..Default::default()
        }])
        .collect()
}

/// Prefixes `name` with `tm-` and truncates the result to 15 characters, the limit for
/// port names. When truncation is needed and `ordinal` is greater than zero, the name
/// ends in the ordinal as two hexadecimal digits to keep truncated names distinct.
pub fn hidden_port_name(name: &str, ordinal: usize) -> String {
    let hidden = format!("tm-{name}");
    if hidden.chars().count() <= MAX_PORT_NAME_LEN {
        return hidden;
    }
    if ordinal == 0 {
        return hidden.chars().take(MAX_PORT_NAME_LEN).collect();
    }

    let suffix = format!("{ordinal:02x}");
    let keep = MAX_PORT_NAME_LEN.saturating_sub(suffix.len());
    hidden.chars().take(keep).chain(suffix.chars()).collect()
}
