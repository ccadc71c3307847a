//! Access to the cluster's API server.
//!
//! Reconciliation only ever needs four verbs on a handful of fixed kinds, plus a way to
//! block until a deployment has rolled out. [`ClusterApi`] captures exactly that so the
//! engine can run against [`KubeCluster`] in production and an in-memory cluster in tests.

use std::{error::Error as StdError, fmt, future::Future};

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Secret},
    rbac::v1::ClusterRoleBinding,
};
use kube_client::{
    api::{DeleteParams, PostParams},
    Api, Client,
};
use kube_core::{ErrorResponse, Resource};
use kube_runtime::wait::{await_condition, Condition};
use serde::{de::DeserializeOwned, Serialize};

/// Uniquely identifies an object of a known type by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, or `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Returns `None` if the object has no name yet.
    pub fn from_resource<K: Resource>(resource: &K) -> Option<Self> {
        Some(Self {
            namespace: resource.meta().namespace.clone(),
            name: resource.meta().name.clone()?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}.{}", self.name, namespace),
            None => f.write_str(&self.name),
        }
    }
}

/// The outcome classes of a cluster call that reconciliation distinguishes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl ApiError {
    pub fn other(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }
}

impl From<kube_client::Error> for ApiError {
    fn from(err: kube_client::Error) -> Self {
        match err {
            kube_client::Error::Api(ErrorResponse { code: 404, .. }) => Self::NotFound,
            kube_client::Error::Api(ErrorResponse {
                code: 403, message, ..
            }) => Self::Forbidden(message),
            err => Self::Other(Box::new(err)),
        }
    }
}

/// A kind the installer manages.
pub trait Object:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The API handle for objects of this kind in `namespace`.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

impl Object for Secret {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::default_namespaced(client),
        }
    }
}

impl Object for Deployment {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::default_namespaced(client),
        }
    }
}

impl Object for ClusterRoleBinding {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

/// The subset of the API server used by reconciliation.
pub trait ClusterApi: Send + Sync {
    fn get<K: Object>(&self, name: &QualifiedName)
        -> impl Future<Output = Result<K, ApiError>> + Send;

    fn create<K: Object>(&self, object: &K) -> impl Future<Output = Result<K, ApiError>> + Send;

    /// Replaces the whole object. The object's `resourceVersion` must match the stored one.
    fn replace<K: Object>(&self, object: &K) -> impl Future<Output = Result<K, ApiError>> + Send;

    fn delete<K: Object>(
        &self,
        name: &QualifiedName,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Resolves once the deployment has observed `generation` and all its replicas run the
    /// current template.
    fn wait_for_rollout(
        &self,
        name: &QualifiedName,
        generation: Option<i64>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// [`ClusterApi`] backed by a real API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects using the local kubeconfig or the in-cluster service account.
    pub async fn try_default() -> Result<Self, ApiError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Identifies the cluster by the UID of its `default` namespace.
    pub async fn cluster_id(&self) -> Result<String, ApiError> {
        let namespace = Api::<Namespace>::all(self.client.clone())
            .get("default")
            .await?;
        namespace
            .metadata
            .uid
            .ok_or_else(|| ApiError::other("namespace default has no uid"))
    }
}

impl ClusterApi for KubeCluster {
    async fn get<K: Object>(&self, name: &QualifiedName) -> Result<K, ApiError> {
        let api = K::api(self.client.clone(), name.namespace.as_deref());
        Ok(api.get(&name.name).await?)
    }

    async fn create<K: Object>(&self, object: &K) -> Result<K, ApiError> {
        let api = K::api(self.client.clone(), object.meta().namespace.as_deref());
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace<K: Object>(&self, object: &K) -> Result<K, ApiError> {
        let name = object
            .meta()
            .name
            .as_deref()
            .ok_or_else(|| ApiError::other("cannot replace an object without a name"))?;
        let api = K::api(self.client.clone(), object.meta().namespace.as_deref());
        Ok(api.replace(name, &PostParams::default(), object).await?)
    }

    async fn delete<K: Object>(&self, name: &QualifiedName) -> Result<(), ApiError> {
        let api = K::api(self.client.clone(), name.namespace.as_deref());
        api.delete(&name.name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn wait_for_rollout(
        &self,
        name: &QualifiedName,
        generation: Option<i64>,
    ) -> Result<(), ApiError> {
        let api = Deployment::api(self.client.clone(), name.namespace.as_deref());
        await_condition(api, &name.name, rollout_complete(generation))
            .await
            .map_err(ApiError::other)?;
        Ok(())
    }
}

/// Condition satisfied once the deployment's rollout of `generation` has completed.
pub fn rollout_complete(generation: Option<i64>) -> impl Condition<Deployment> {
    move |deployment: Option<&Deployment>| {
        deployment.map_or(false, |deployment| is_rolled_out(deployment, generation))
    }
}

fn is_rolled_out(deployment: &Deployment, generation: Option<i64>) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    if let Some(generation) = generation {
        if status.observed_generation.unwrap_or(0) < generation {
            return false;
        }
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    // old replica sets still count towards status.replicas until they are scaled down
    status.replicas.unwrap_or(0) == desired
        && status.updated_replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use kube_core::ObjectMeta;

    use super::*;

    fn deployment(replicas: i32, status: DeploymentStatus) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(2),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(status),
        }
    }

    #[test]
    fn completed_rollout() {
        let dep = deployment(
            1,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(1),
                updated_replicas: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            },
        );
        assert!(rollout_complete(Some(2)).matches_object(Some(&dep)));
    }

    #[test]
    fn stale_generation_is_not_rolled_out() {
        let dep = deployment(
            1,
            DeploymentStatus {
                observed_generation: Some(1),
                replicas: Some(1),
                updated_replicas: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            },
        );
        assert!(!rollout_complete(Some(2)).matches_object(Some(&dep)));
    }

    #[test]
    fn old_replicas_still_running() {
        let dep = deployment(
            1,
            DeploymentStatus {
                observed_generation: Some(2),
                replicas: Some(2),
                updated_replicas: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            },
        );
        assert!(!rollout_complete(Some(2)).matches_object(Some(&dep)));
    }

    #[test]
    fn missing_deployment_is_not_rolled_out() {
        assert!(!rollout_complete(None).matches_object(None));
    }

    #[test]
    fn qualified_name_display() {
        assert_eq!(
            QualifiedName::namespaced("traffic-manager", "ambassador").to_string(),
            "traffic-manager.ambassador"
        );
        assert_eq!(
            QualifiedName::cluster("traffic-manager").to_string(),
            "traffic-manager"
        );
    }

    #[test]
    fn kube_errors_are_classified() {
        let response = |code| {
            kube_client::Error::Api(ErrorResponse {
                status: "Failure".to_owned(),
                message: "nope".to_owned(),
                reason: "".to_owned(),
                code,
            })
        };
        assert!(matches!(ApiError::from(response(404)), ApiError::NotFound));
        assert!(matches!(
            ApiError::from(response(403)),
            ApiError::Forbidden(message) if message == "nope"
        ));
        assert!(matches!(ApiError::from(response(409)), ApiError::Other(_)));
    }
}
