//! The managed resources and the engine that converges them.
//!
//! Each [`Resource`] answers four questions: does it exist, how to create it, how to bring
//! an existing copy up to date, and how to delete it. [`ensure`] turns those into a single
//! convergence step and [`Resources`] applies a whole batch in dependency order.

use crate::{
    cluster::{ApiError, ClusterApi, Object, QualifiedName},
    error::{Error, Op},
    scope::Scope,
};

pub mod cluster_role_binding;
pub mod deployment;
pub mod injector_secret;

pub use deployment::ManagerDeployment;

/// One managed object.
#[derive(Debug)]
pub enum Resource {
    /// TLS material for the agent-injection webhook.
    InjectorSecret,
    /// Grants the manager's service account its cluster role.
    ClusterRoleBinding,
    /// The traffic manager itself.
    Deployment(ManagerDeployment),
}

impl Resource {
    pub fn deployment() -> Self {
        Self::Deployment(ManagerDeployment::default())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InjectorSecret => "Secret",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Deployment(_) => "Deployment",
        }
    }

    /// `Ok(true)` also when the API server refuses to tell; see [`exists`].
    pub async fn exists<C: ClusterApi>(&mut self, scope: &Scope<C>) -> Result<bool, Error> {
        match self {
            Self::InjectorSecret => injector_secret::exists(scope).await,
            Self::ClusterRoleBinding => cluster_role_binding::exists(scope).await,
            Self::Deployment(deployment) => deployment.exists(scope).await,
        }
    }

    /// Creates the object without checking for an existing copy first.
    pub async fn create<C: ClusterApi>(&mut self, scope: &mut Scope<C>) -> Result<(), Error> {
        match self {
            Self::InjectorSecret => injector_secret::create(scope).await,
            Self::ClusterRoleBinding => cluster_role_binding::create(scope).await,
            Self::Deployment(deployment) => deployment.create(scope).await,
        }
    }

    pub async fn update<C: ClusterApi>(&mut self, scope: &Scope<C>) -> Result<(), Error> {
        match self {
            // issued material and role bindings are never changed in place
            Self::InjectorSecret | Self::ClusterRoleBinding => Ok(()),
            Self::Deployment(deployment) => deployment.update(scope).await,
        }
    }

    /// Deleting an object that is already gone succeeds.
    pub async fn delete<C: ClusterApi>(&self, scope: &Scope<C>) -> Result<(), Error> {
        match self {
            Self::InjectorSecret => injector_secret::delete(scope).await,
            Self::ClusterRoleBinding => cluster_role_binding::delete(scope).await,
            Self::Deployment(deployment) => deployment.delete(scope).await,
        }
    }
}

/// Converges a single resource: updates it if it exists, creates it otherwise.
pub async fn ensure<C: ClusterApi>(
    resource: &mut Resource,
    scope: &mut Scope<C>,
) -> Result<(), Error> {
    if resource.exists(scope).await? {
        resource.update(scope).await
    } else {
        resource.create(scope).await
    }
}

/// An ordered batch of resources. Dependencies must precede their dependents.
#[derive(Debug)]
pub struct Resources(Vec<Resource>);

impl Resources {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self(resources)
    }

    /// Everything the traffic manager needs, in apply order.
    pub fn traffic_manager() -> Self {
        Self::new(vec![
            Resource::InjectorSecret,
            Resource::ClusterRoleBinding,
            Resource::deployment(),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.0.iter()
    }

    /// Converges the resources in order, stopping at the first failure.
    pub async fn ensure<C: ClusterApi>(&mut self, scope: &mut Scope<C>) -> Result<(), Error> {
        for resource in &mut self.0 {
            ensure(resource, scope).await?;
        }
        Ok(())
    }

    /// Deletes the resources in the reverse of their apply order, stopping at the first
    /// failure.
    pub async fn delete<C: ClusterApi>(&self, scope: &Scope<C>) -> Result<(), Error> {
        for resource in self.0.iter().rev() {
            resource.delete(scope).await?;
        }
        Ok(())
    }
}

/// Outcome of looking an object up.
pub(crate) enum Probe<K> {
    Found(K),
    Absent,
    /// The API server refused to say.
    Hidden,
}

/// `Kind name.namespace`, e.g. `Deployment traffic-manager.ambassador`.
pub(crate) fn log_name<K: Object>(name: &QualifiedName) -> String {
    format!("{} {}", K::kind(&()), name)
}

fn api_error<K: Object>(op: Op, name: &QualifiedName, source: ApiError) -> Error {
    Error::Api {
        op,
        kind: K::kind(&()).into_owned(),
        name: name.clone(),
        source,
    }
}

pub(crate) async fn probe<C: ClusterApi, K: Object>(
    scope: &Scope<C>,
    name: &QualifiedName,
) -> Result<Probe<K>, Error> {
    match scope.get::<K>(name).await {
        Ok(found) => {
            log::debug!("Found {}", log_name::<K>(name));
            Ok(Probe::Found(found))
        }
        Err(ApiError::NotFound) => {
            log::debug!("Unable to find {}", log_name::<K>(name));
            Ok(Probe::Absent)
        }
        Err(ApiError::Forbidden(reason)) => {
            log::warn!(
                "Not allowed to read {}, assuming it exists: {reason}",
                log_name::<K>(name)
            );
            Ok(Probe::Hidden)
        }
        Err(source) => Err(api_error::<K>(Op::Get, name, source)),
    }
}

/// Forbidden counts as present.
pub(crate) async fn exists<C: ClusterApi, K: Object>(
    scope: &Scope<C>,
    name: &QualifiedName,
) -> Result<bool, Error> {
    Ok(match probe::<C, K>(scope, name).await? {
        Probe::Found(_) | Probe::Hidden => true,
        Probe::Absent => false,
    })
}

pub(crate) async fn create<C: ClusterApi, K: Object>(
    scope: &Scope<C>,
    name: &QualifiedName,
    object: &K,
) -> Result<K, Error> {
    log::info!("Creating {}", log_name::<K>(name));
    scope
        .create(object)
        .await
        .map_err(|source| api_error::<K>(Op::Create, name, source))
}

pub(crate) async fn replace<C: ClusterApi, K: Object>(
    scope: &Scope<C>,
    name: &QualifiedName,
    object: &K,
) -> Result<K, Error> {
    scope
        .replace(object)
        .await
        .map_err(|source| api_error::<K>(Op::Update, name, source))
}

pub(crate) async fn remove<C: ClusterApi, K: Object>(
    scope: &Scope<C>,
    name: &QualifiedName,
) -> Result<(), Error> {
    log::info!("Deleting {}", log_name::<K>(name));
    match scope.delete::<K>(name).await {
        Ok(()) | Err(ApiError::NotFound) => Ok(()),
        Err(source) => Err(api_error::<K>(Op::Delete, name, source)),
    }
}
