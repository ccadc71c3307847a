use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use kube_core::ObjectMeta;

use crate::{
    cluster::{ClusterApi, QualifiedName},
    error::Error,
    install::{DEFAULT_MANAGER_NAMESPACE, MANAGER_APP_NAME},
    scope::Scope,
};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub fn name() -> QualifiedName {
    QualifiedName::cluster(MANAGER_APP_NAME)
}

/// Binds the manager's service account to the manager's cluster role.
pub fn role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(MANAGER_APP_NAME.to_owned()),
            ..Default::default()
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name: MANAGER_APP_NAME.to_owned(),
            namespace: Some(DEFAULT_MANAGER_NAMESPACE.to_owned()),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_owned(),
            kind: "ClusterRole".to_owned(),
            name: MANAGER_APP_NAME.to_owned(),
        },
    }
}

pub(super) async fn exists<C: ClusterApi>(scope: &Scope<C>) -> Result<bool, Error> {
    super::exists::<C, ClusterRoleBinding>(scope, &name()).await
}

pub(super) async fn create<C: ClusterApi>(scope: &Scope<C>) -> Result<(), Error> {
    super::create(scope, &name(), &role_binding()).await?;
    Ok(())
}

pub(super) async fn delete<C: ClusterApi>(scope: &Scope<C>) -> Result<(), Error> {
    super::remove::<C, ClusterRoleBinding>(scope, &name()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_manager_service_account() {
        let binding = role_binding();
        assert_eq!(binding.metadata.name.as_deref(), Some("traffic-manager"));
        assert_eq!(binding.metadata.namespace, None);

        let subjects = binding.subjects.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].kind, "ServiceAccount");
        assert_eq!(subjects[0].name, "traffic-manager");
        assert_eq!(subjects[0].namespace.as_deref(), Some("ambassador"));

        assert_eq!(binding.role_ref.kind, "ClusterRole");
        assert_eq!(binding.role_ref.name, "traffic-manager");
        assert_eq!(binding.role_ref.api_group, "rbac.authorization.k8s.io");
    }
}
