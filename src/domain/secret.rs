//! TLS secret domain type

use std::fmt;

/// Certificate chain and private key served over SDS.
///
/// The name is the certificate storage key of the covered domain set, so the
/// same domains always map to the same secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub certificate_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("certificate_chain_bytes", &self.certificate_chain.len())
            .field("private_key", &"[redacted]")
            .finish()
    }
}
