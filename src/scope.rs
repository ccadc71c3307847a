use std::{collections::BTreeMap, future::Future};

use tokio_util::sync::CancellationToken;

use crate::{
    certs::{CertError, CertificateBundle, CertificateIssuer, SelfSignedIssuer},
    cluster::{ApiError, ClusterApi, Object, QualifiedName},
    config::Env,
    install,
};

/// Per-run context shared by every resource of one install, upgrade or uninstall.
///
/// Everything but the certificate material is fixed at construction. The certificate
/// material goes from absent to issued at most once per run, by the first resource that
/// needs it.
pub struct Scope<C> {
    namespace: String,
    cluster_id: String,
    selector: BTreeMap<String, String>,
    client: C,
    env: Env,
    version: String,
    issuer: Box<dyn CertificateIssuer>,
    certificates: Certificates,
    cancel: CancellationToken,
}

enum Certificates {
    Absent,
    Issued(CertificateBundle),
}

impl<C: ClusterApi> Scope<C> {
    pub fn new(
        client: C,
        namespace: impl Into<String>,
        cluster_id: impl Into<String>,
        env: Env,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            issuer: Box::new(SelfSignedIssuer::new(namespace.clone())),
            namespace,
            cluster_id: cluster_id.into(),
            selector: install::manager_selector(),
            client,
            env,
            version: env!("CARGO_PKG_VERSION").to_owned(),
            certificates: Certificates::Absent,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_selector(mut self, selector: BTreeMap<String, String>) -> Self {
        self.selector = selector;
        self
    }

    /// Overrides the release version the manager image is tagged with.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_issuer(mut self, issuer: impl CertificateIssuer + 'static) -> Self {
        self.issuer = Box::new(issuer);
        self
    }

    /// Every cluster call of this run fails with [`ApiError::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn selector(&self) -> &BTreeMap<String, String> {
        &self.selector
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The issued certificate material, if any resource has issued it during this run.
    pub fn certificates(&self) -> Option<&CertificateBundle> {
        match &self.certificates {
            Certificates::Absent => None,
            Certificates::Issued(bundle) => Some(bundle),
        }
    }

    /// Issues the certificate material on first use; later calls return the same bundle.
    pub fn issue_certificates(&mut self) -> Result<CertificateBundle, CertError> {
        match &self.certificates {
            Certificates::Issued(bundle) => Ok(bundle.clone()),
            Certificates::Absent => {
                let bundle = self.issuer.generate_keys()?;
                log::debug!("Issued TLS material for namespace {}", self.namespace);
                self.certificates = Certificates::Issued(bundle.clone());
                Ok(bundle)
            }
        }
    }

    async fn cancellable<T>(
        &self,
        call: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ApiError::Cancelled),
            result = call => result,
        }
    }

    pub async fn get<K: Object>(&self, name: &QualifiedName) -> Result<K, ApiError> {
        self.cancellable(self.client.get(name)).await
    }

    pub async fn create<K: Object>(&self, object: &K) -> Result<K, ApiError> {
        self.cancellable(self.client.create(object)).await
    }

    pub async fn replace<K: Object>(&self, object: &K) -> Result<K, ApiError> {
        self.cancellable(self.client.replace(object)).await
    }

    pub async fn delete<K: Object>(&self, name: &QualifiedName) -> Result<(), ApiError> {
        self.cancellable(self.client.delete::<K>(name)).await
    }

    pub async fn wait_for_rollout(
        &self,
        name: &QualifiedName,
        generation: Option<i64>,
    ) -> Result<(), ApiError> {
        self.cancellable(self.client.wait_for_rollout(name, generation))
            .await
    }
}
