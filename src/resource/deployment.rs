//! The traffic-manager deployment.
//!
//! Unlike the other resources the deployment is brought up to date on every upgrade, but
//! only two things are tracked: the manager image and whether the license secret is
//! mounted. When both already match, no write is issued and no rollout is triggered.

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
            PodTemplateSpec, Secret, SecretVolumeSource, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube_core::ObjectMeta;

use crate::{
    cluster::{ClusterApi, QualifiedName},
    error::Error,
    install::{
        AGENT_INJECTOR_TLS_NAME, LICENSE_VOLUME_NAME, MANAGER_APP_NAME, MANAGER_LICENSE_NAME,
        MANAGER_PORT_HTTP, MANAGER_PORT_HTTPS,
    },
    scope::Scope,
};

use super::{log_name, Probe};

const LICENSE_MOUNT_PATH: &str = "/home/telepresence/";
const TLS_VOLUME_NAME: &str = "tls";
const TLS_MOUNT_PATH: &str = "/var/run/secrets/tls";

/// The manager deployment, together with the copy last observed by
/// [`exists`](Self::exists).
#[derive(Debug, Default)]
pub struct ManagerDeployment {
    found: Option<Deployment>,
}

pub fn name<C: ClusterApi>(scope: &Scope<C>) -> QualifiedName {
    QualifiedName::namespaced(MANAGER_APP_NAME, scope.namespace())
}

/// `<registry>/tel2:<version>`, with any leading `v` dropped from the version.
pub fn image_name<C: ClusterApi>(scope: &Scope<C>) -> String {
    let version = scope.version();
    format!(
        "{}/tel2:{}",
        scope.env().registry,
        version.strip_prefix('v').unwrap_or(version)
    )
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn field_env_var(name: &str, field_path: &str) -> EnvVar {
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

fn secret_volume(name: &str, secret_name: &str, optional: Option<bool>) -> Volume {
    Volume {
        name: name.to_owned(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_owned()),
            optional,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: mount_path.to_owned(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// The deployment as it should be, mounting the license secret iff `add_license`.
pub fn desired_deployment<C: ClusterApi>(scope: &Scope<C>, add_license: bool) -> Deployment {
    let env = scope.env();
    let mut container_env = vec![
        env_var("LOG_LEVEL", "info"),
        env_var("SYSTEMA_HOST", &env.systema_host),
        env_var("SYSTEMA_PORT", &env.systema_port),
        env_var("CLUSTER_ID", scope.cluster_id()),
        env_var("TELEPRESENCE_REGISTRY", &env.registry),
        // propagated to the agents it injects
        field_env_var("MANAGER_NAMESPACE", "metadata.namespace"),
    ];
    if let Some(agent_image) = &env.agent_image {
        container_env.push(env_var("TELEPRESENCE_AGENT_IMAGE", agent_image));
    }

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    if add_license {
        volumes.push(secret_volume(LICENSE_VOLUME_NAME, MANAGER_LICENSE_NAME, None));
        volume_mounts.push(read_only_mount(LICENSE_VOLUME_NAME, LICENSE_MOUNT_PATH));
    }
    // optional so that the pod starts before the injector secret exists
    volumes.push(secret_volume(
        TLS_VOLUME_NAME,
        AGENT_INJECTOR_TLS_NAME,
        Some(true),
    ));
    volume_mounts.push(read_only_mount(TLS_VOLUME_NAME, TLS_MOUNT_PATH));

    let selector = scope.selector().clone();
    Deployment {
        metadata: ObjectMeta {
            name: Some(MANAGER_APP_NAME.to_owned()),
            namespace: Some(scope.namespace().to_owned()),
            labels: Some(selector.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    volumes: Some(volumes),
                    containers: vec![Container {
                        name: MANAGER_APP_NAME.to_owned(),
                        image: Some(image_name(scope)),
                        env: Some(container_env),
                        ports: Some(vec![
                            ContainerPort {
                                name: Some("api".to_owned()),
                                container_port: MANAGER_PORT_HTTP,
                                ..Default::default()
                            },
                            ContainerPort {
                                name: Some("https".to_owned()),
                                container_port: MANAGER_PORT_HTTPS,
                                ..Default::default()
                            },
                        ]),
                        volume_mounts: Some(volume_mounts),
                        ..Default::default()
                    }],
                    service_account_name: Some(MANAGER_APP_NAME.to_owned()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Whether `found` already runs `image` and mounts the license exactly when `has_license`.
pub fn is_converged(found: &Deployment, image: &str, has_license: bool) -> bool {
    let Some(pod_spec) = found
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
    else {
        return false;
    };

    let has_license_volume = pod_spec
        .volumes
        .iter()
        .flatten()
        .any(|volume| volume.name == LICENSE_VOLUME_NAME);

    has_license_volume == has_license
        && pod_spec
            .containers
            .iter()
            .any(|container| container.image.as_deref() == Some(image))
}

impl ManagerDeployment {
    /// The copy observed by the last [`exists`](Self::exists), if it could be read.
    pub fn found(&self) -> Option<&Deployment> {
        self.found.as_ref()
    }

    async fn has_license<C: ClusterApi>(scope: &Scope<C>) -> Result<bool, Error> {
        let license = QualifiedName::namespaced(MANAGER_LICENSE_NAME, scope.namespace());
        super::exists::<C, Secret>(scope, &license).await
    }

    pub(super) async fn exists<C: ClusterApi>(&mut self, scope: &Scope<C>) -> Result<bool, Error> {
        let (found, exists) = match super::probe::<C, Deployment>(scope, &name(scope)).await? {
            Probe::Found(deployment) => (Some(deployment), true),
            Probe::Absent => (None, false),
            Probe::Hidden => (None, true),
        };
        self.found = found;
        Ok(exists)
    }

    pub(super) async fn create<C: ClusterApi>(&mut self, scope: &Scope<C>) -> Result<(), Error> {
        let has_license = Self::has_license(scope).await?;
        super::create(scope, &name(scope), &desired_deployment(scope, has_license)).await?;
        Ok(())
    }

    /// Replaces the deployment unless [`is_converged`], then waits for the rollout.
    ///
    /// The replacement carries the resource version observed by `exists`, so a deployment
    /// changed by someone else in between makes the update fail rather than overwrite it.
    /// Does nothing when the deployment could not be read.
    pub(super) async fn update<C: ClusterApi>(&mut self, scope: &Scope<C>) -> Result<(), Error> {
        let Some(found) = self.found.take() else {
            return Ok(());
        };

        let name = name(scope);
        let image = image_name(scope);
        let has_license = Self::has_license(scope).await?;
        if is_converged(&found, &image, has_license) {
            log::info!(
                "{} is up-to-date. Image: {image}, License {has_license}",
                log_name::<Deployment>(&name)
            );
            return Ok(());
        }

        let mut desired = desired_deployment(scope, has_license);
        desired.metadata.resource_version = found.metadata.resource_version;
        log::info!(
            "Updating {}. Image: {image}, License {has_license}",
            log_name::<Deployment>(&name)
        );
        let updated = super::replace(scope, &name, &desired).await?;

        scope
            .wait_for_rollout(&name, updated.metadata.generation)
            .await
            .map_err(|source| Error::Rollout { name, source })
    }

    pub(super) async fn delete<C: ClusterApi>(&self, scope: &Scope<C>) -> Result<(), Error> {
        super::remove::<C, Deployment>(scope, &name(scope)).await
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::Env, tests::FakeCluster};

    use super::*;

    fn scope() -> Scope<FakeCluster> {
        let env = Env {
            registry: "ghcr.io/acme".to_owned(),
            ..Env::default()
        };
        Scope::new(FakeCluster::default(), "ambassador", "cluster-1", env).with_version("v2.1.0")
    }

    fn pod_spec(deployment: &Deployment) -> &PodSpec {
        deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
    }

    fn volume_names(deployment: &Deployment) -> Vec<&str> {
        pod_spec(deployment)
            .volumes
            .iter()
            .flatten()
            .map(|volume| volume.name.as_str())
            .collect()
    }

    #[test]
    fn image_drops_leading_v() {
        assert_eq!(image_name(&scope()), "ghcr.io/acme/tel2:2.1.0");
        assert_eq!(
            image_name(&scope().with_version("2.1.0")),
            "ghcr.io/acme/tel2:2.1.0"
        );
    }

    #[test]
    fn desired_deployment_shape() {
        let scope = scope();
        let deployment = desired_deployment(&scope, false);

        assert_eq!(deployment.metadata.name.as_deref(), Some("traffic-manager"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("ambassador"));
        assert_eq!(deployment.metadata.labels.as_ref(), Some(scope.selector()));

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.selector.match_labels.as_ref(), Some(scope.selector()));

        let pod = pod_spec(&deployment);
        assert_eq!(pod.service_account_name.as_deref(), Some("traffic-manager"));
        assert_eq!(pod.containers.len(), 1);
        let container = &pod.containers[0];
        assert_eq!(container.name, "traffic-manager");
        assert_eq!(container.image.as_deref(), Some("ghcr.io/acme/tel2:2.1.0"));

        let ports: Vec<_> = container
            .ports
            .iter()
            .flatten()
            .map(|port| (port.name.as_deref().unwrap(), port.container_port))
            .collect();
        assert_eq!(
            ports,
            [("api", MANAGER_PORT_HTTP), ("https", MANAGER_PORT_HTTPS)]
        );

        let env = container.env.as_ref().unwrap();
        let value = |name: &str| {
            env.iter()
                .find(|var| var.name == name)
                .and_then(|var| var.value.as_deref())
        };
        assert_eq!(value("LOG_LEVEL"), Some("info"));
        assert_eq!(value("SYSTEMA_HOST"), Some("app.getambassador.io"));
        assert_eq!(value("SYSTEMA_PORT"), Some("443"));
        assert_eq!(value("CLUSTER_ID"), Some("cluster-1"));
        assert_eq!(value("TELEPRESENCE_REGISTRY"), Some("ghcr.io/acme"));
        assert!(env.iter().all(|var| var.name != "TELEPRESENCE_AGENT_IMAGE"));

        let namespace = env.iter().find(|var| var.name == "MANAGER_NAMESPACE").unwrap();
        let field_ref = namespace
            .value_from
            .as_ref()
            .and_then(|source| source.field_ref.as_ref())
            .unwrap();
        assert_eq!(field_ref.field_path, "metadata.namespace");
    }

    #[test]
    fn license_volume_follows_license_presence() {
        let scope = scope();
        assert_eq!(volume_names(&desired_deployment(&scope, false)), ["tls"]);
        assert_eq!(
            volume_names(&desired_deployment(&scope, true)),
            ["license", "tls"]
        );
    }

    #[test]
    fn custom_selector_labels_everything() {
        let selector: std::collections::BTreeMap<_, _> =
            [("app".to_owned(), "tm-canary".to_owned())].into();
        let scope = scope().with_selector(selector.clone());
        let deployment = desired_deployment(&scope, false);

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(deployment.metadata.labels.as_ref(), Some(&selector));
        assert_eq!(spec.selector.match_labels.as_ref(), Some(&selector));
        assert_eq!(
            spec.template.metadata.as_ref().unwrap().labels.as_ref(),
            Some(&selector)
        );
    }

    #[test]
    fn tls_volume_is_optional() {
        let deployment = desired_deployment(&scope(), false);
        let tls = pod_spec(&deployment)
            .volumes
            .iter()
            .flatten()
            .find(|volume| volume.name == "tls")
            .and_then(|volume| volume.secret.as_ref())
            .unwrap();
        assert_eq!(tls.secret_name.as_deref(), Some(AGENT_INJECTOR_TLS_NAME));
        assert_eq!(tls.optional, Some(true));
    }

    #[test]
    fn agent_image_override_is_passed_on() {
        let env = Env {
            agent_image: Some("ghcr.io/acme/agent:7".to_owned()),
            ..Env::default()
        };
        let scope = Scope::new(FakeCluster::default(), "ambassador", "c", env);
        let deployment = desired_deployment(&scope, false);
        let env = pod_spec(&deployment).containers[0].env.clone().unwrap();
        assert!(env.iter().any(|var| var.name == "TELEPRESENCE_AGENT_IMAGE"
            && var.value.as_deref() == Some("ghcr.io/acme/agent:7")));
    }

    #[test]
    fn convergence_tracks_image_and_license() {
        let scope = scope();
        let image = image_name(&scope);
        let with_license = desired_deployment(&scope, true);
        let without_license = desired_deployment(&scope, false);

        assert!(is_converged(&with_license, &image, true));
        assert!(is_converged(&without_license, &image, false));
        assert!(!is_converged(&with_license, &image, false));
        assert!(!is_converged(&without_license, &image, true));
        assert!(!is_converged(&without_license, "ghcr.io/acme/tel2:2.0.0", false));
        assert!(!is_converged(&Deployment::default(), &image, false));
    }
}
