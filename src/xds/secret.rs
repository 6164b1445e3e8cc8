//! Secret rendering using envoy-types

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, Secret, TlsCertificate,
};

use crate::domain;

/// Render a certificate secret with the PEM material inlined
pub fn render_secret(secret: &domain::Secret) -> Secret {
    Secret {
        name: secret.name.clone(),
        r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
            certificate_chain: Some(inline_bytes(&secret.certificate_chain)),
            private_key: Some(inline_bytes(&secret.private_key)),
            ..Default::default()
        })),
    }
}

fn inline_bytes(bytes: &[u8]) -> DataSource {
    DataSource { specifier: Some(Specifier::InlineBytes(bytes.to_vec())), ..Default::default() }
}
