//! TLS material for the agent-injection webhook.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};

use crate::install::{AGENT_INJECTOR_TLS_NAME, MANAGER_APP_NAME};

/// PEM encoded key, certificate and CA certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub crt_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("crt_pem", &String::from_utf8_lossy(&self.crt_pem))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &String::from_utf8_lossy(&self.ca_pem))
            .finish()
    }
}

/// Produces fresh TLS material.
pub trait CertificateIssuer: Send + Sync {
    fn generate_keys(&self) -> Result<CertificateBundle, CertError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate generation failed: {0}")]
    Certificate(String),
}

/// Issues a self-signed CA and a server certificate for the manager's webhook service.
#[derive(Debug, Clone)]
pub struct SelfSignedIssuer {
    namespace: String,
}

impl SelfSignedIssuer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// DNS names the webhook is reached by.
    fn subject_alt_names(&self) -> Vec<String> {
        vec![
            MANAGER_APP_NAME.to_owned(),
            format!("{MANAGER_APP_NAME}.{}", self.namespace),
            format!("{MANAGER_APP_NAME}.{}.svc", self.namespace),
        ]
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_owned()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("Telepresence".to_owned()),
    );
    dn
}

impl CertificateIssuer for SelfSignedIssuer {
    fn generate_keys(&self) -> Result<CertificateBundle, CertError> {
        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = distinguished_name(AGENT_INJECTOR_TLS_NAME);
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_key = KeyPair::generate()
            .map_err(|e| CertError::KeyGeneration(format!("CA key: {e}")))?;
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .map_err(|e| CertError::Certificate(format!("CA certificate: {e}")))?;
        let issuer = Issuer::new(ca_params, ca_key);

        let mut params = CertificateParams::new(self.subject_alt_names())
            .map_err(|e| CertError::Certificate(format!("subject alt names: {e}")))?;
        params.distinguished_name =
            distinguished_name(&format!("{MANAGER_APP_NAME}.{}.svc", self.namespace));
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let key = KeyPair::generate()
            .map_err(|e| CertError::KeyGeneration(format!("server key: {e}")))?;
        let cert = params
            .signed_by(&key, &issuer)
            .map_err(|e| CertError::Certificate(format!("server certificate: {e}")))?;

        Ok(CertificateBundle {
            crt_pem: cert.pem().into_bytes(),
            key_pem: key.serialize_pem().into_bytes(),
            ca_pem: ca_cert.pem().into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_pem_triad() {
        let bundle = SelfSignedIssuer::new("ambassador").generate_keys().unwrap();
        let crt = String::from_utf8(bundle.crt_pem).unwrap();
        let key = String::from_utf8(bundle.key_pem).unwrap();
        let ca = String::from_utf8(bundle.ca_pem).unwrap();
        assert!(crt.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY-----"));
        assert_ne!(crt, ca);
    }

    #[test]
    fn debug_hides_private_key() {
        let bundle = CertificateBundle {
            crt_pem: b"crt".to_vec(),
            key_pem: b"secret".to_vec(),
            ca_pem: b"ca".to_vec(),
        };
        assert!(!format!("{bundle:?}").contains("secret"));
    }
}
