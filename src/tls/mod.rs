//! TLS certificate management for published virtual hosts
//!
//! - `certificate`: PEM/X.509 inspection and the storage key naming rule
//! - `lifecycle`: per-build certificate lookup and secret materialization
//! - `issuer`: certificate issuing with a local certificate authority
//! - `provisioner`: background issuing for hosts without a usable certificate

pub mod certificate;
pub mod issuer;
pub mod lifecycle;
pub mod provisioner;

pub use certificate::{storage_key, CertificateInfo};
pub use issuer::{CertificateIssuer, IssuedCertificate, LocalCaIssuer};
pub use lifecycle::{
    store_certificate, vhost_storage_key, CertificateLifecycle, CertificateStatus, SecretRef,
};
pub use provisioner::{CertificateProvisioner, ProvisioningRequest};
