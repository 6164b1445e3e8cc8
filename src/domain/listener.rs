//! Listener domain types

/// TLS termination settings of a filter chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamTls {
    /// Secret holding the certificate chain and key
    pub secret_name: String,
    /// SNI names this chain is selected for
    pub server_names: Vec<String>,
}

/// One filter chain: an HTTP connection manager bound to a route
/// configuration, optionally terminating TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChain {
    pub name: String,
    pub route_config_name: String,
    pub tls: Option<DownstreamTls>,
}

impl FilterChain {
    pub fn plaintext(name: impl Into<String>, route_config_name: impl Into<String>) -> Self {
        Self { name: name.into(), route_config_name: route_config_name.into(), tls: None }
    }

    pub fn tls(
        name: impl Into<String>,
        route_config_name: impl Into<String>,
        secret_name: impl Into<String>,
        server_names: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            route_config_name: route_config_name.into(),
            tls: Some(DownstreamTls { secret_name: secret_name.into(), server_names }),
        }
    }

    pub fn secret_name(&self) -> Option<&str> {
        self.tls.as_ref().map(|tls| tls.secret_name.as_str())
    }
}

/// A listening port with its filter chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub filter_chains: Vec<FilterChain>,
}

impl Listener {
    /// Whether any filter chain terminates TLS, which requires SNI inspection
    pub fn terminates_tls(&self) -> bool {
        self.filter_chains.iter().any(|chain| chain.tls.is_some())
    }
}
