use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube_core::ObjectMeta;

use crate::{
    certs::CertificateBundle,
    cluster::{ClusterApi, QualifiedName},
    error::Error,
    install::AGENT_INJECTOR_TLS_NAME,
    scope::Scope,
};

pub fn name<C: ClusterApi>(scope: &Scope<C>) -> QualifiedName {
    QualifiedName::namespaced(AGENT_INJECTOR_TLS_NAME, scope.namespace())
}

/// The secret carrying `bundle` under the keys the webhook reads.
pub fn secret(name: &QualifiedName, bundle: CertificateBundle) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.name.clone()),
            namespace: name.namespace.clone(),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("crt.pem".to_owned(), ByteString(bundle.crt_pem)),
            ("key.pem".to_owned(), ByteString(bundle.key_pem)),
            ("ca.pem".to_owned(), ByteString(bundle.ca_pem)),
        ])),
        ..Default::default()
    }
}

pub(super) async fn exists<C: ClusterApi>(scope: &Scope<C>) -> Result<bool, Error> {
    super::exists::<C, Secret>(scope, &name(scope)).await
}

pub(super) async fn create<C: ClusterApi>(scope: &mut Scope<C>) -> Result<(), Error> {
    let bundle = scope.issue_certificates()?;
    let name = name(scope);
    super::create(scope, &name, &secret(&name, bundle)).await?;
    Ok(())
}

pub(super) async fn delete<C: ClusterApi>(scope: &Scope<C>) -> Result<(), Error> {
    super::remove::<C, Secret>(scope, &name(scope)).await
}
