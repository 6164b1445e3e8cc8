//! Service routing labels
//!
//! Services describe how they want to be exposed with `envoy.*` labels:
//!
//! | Label | Meaning |
//! |---|---|
//! | `envoy.endpoint.port` | upstream port (required) |
//! | `envoy.endpoint.protocol` | `tcp` (default) or `udp` |
//! | `envoy.endpoint.timeout` | request timeout, `30`, `30s`, `5m`, `1h` (default 15s) |
//! | `envoy.route.domain` | primary domain (required) |
//! | `envoy.route.extra-domains` | comma separated alias domains |
//! | `envoy.route.path` | path prefix (default `/`) |
//! | `envoy.route.upstream-host` | upstream host and `Host` rewrite |

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;
use validator::{Validate, ValidationError};

use crate::domain::Protocol;
use crate::utils::is_dns_name;

/// Request timeout used when a service does not set one
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 15;

const LABEL_PREFIX: &str = "envoy.";

/// Typed routing declaration of one service
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct ServiceLabels {
    #[validate(
        length(min = 1, message = "there is no route.domain label specified"),
        custom(function = "validate_dns_name", message = "the route.domain is not a valid DNS name")
    )]
    pub domain: String,

    #[validate(custom(
        function = "validate_dns_names",
        message = "the route.extra-domains contains an invalid DNS name"
    ))]
    pub extra_domains: Vec<String>,

    pub path_prefix: String,

    pub upstream_host: Option<String>,

    #[validate(range(min = 1, max = 65535, message = "there is no endpoint.port label specified"))]
    pub upstream_port: u32,

    pub protocol: Protocol,

    #[validate(range(min = 0, message = "the endpoint.timeout can't be a negative number"))]
    pub timeout_seconds: i64,
}

impl Default for ServiceLabels {
    fn default() -> Self {
        Self {
            domain: String::new(),
            extra_domains: Vec::new(),
            path_prefix: "/".to_string(),
            upstream_host: None,
            upstream_port: 0,
            protocol: Protocol::Tcp,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl ServiceLabels {
    /// Parse the `envoy.*` entries of a label map. Unknown labels are ignored
    /// and unparsable values fall back to their defaults; use
    /// [`Validate::validate`] to find out whether the result is usable.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let mut parsed = Self::default();

        for (key, value) in labels {
            let Some(rest) = strip_prefix_ignore_case(key, LABEL_PREFIX) else {
                continue;
            };
            let Some((kind, property)) = rest.split_once('.') else {
                continue;
            };

            match kind.to_ascii_lowercase().as_str() {
                "endpoint" => parsed.set_endpoint_property(property, value),
                "route" => parsed.set_route_property(property, value),
                _ => {}
            }
        }

        parsed
    }

    fn set_endpoint_property(&mut self, property: &str, value: &str) {
        match property.to_ascii_lowercase().as_str() {
            "port" => self.upstream_port = value.trim().parse().unwrap_or(0),
            "protocol" => self.protocol = Protocol::from_label(value),
            "timeout" => match parse_timeout_seconds(value) {
                Some(seconds) => self.timeout_seconds = seconds,
                None => warn!(value = %value, "Ignoring unparsable endpoint.timeout label"),
            },
            _ => {}
        }
    }

    fn set_route_property(&mut self, property: &str, value: &str) {
        match property.to_ascii_lowercase().as_str() {
            "domain" => self.domain = value.trim().to_ascii_lowercase(),
            "extra-domains" => {
                self.extra_domains = value
                    .split(',')
                    .map(|domain| domain.trim().to_ascii_lowercase())
                    .filter(|domain| !domain.is_empty())
                    .collect();
            }
            "path" => self.path_prefix = normalize_path_prefix(value),
            "upstream-host" => {
                let host = value.trim();
                self.upstream_host = (!host.is_empty()).then(|| host.to_string());
            }
            _ => {}
        }
    }

    /// Request timeout; negative values (rejected by validation) clamp to zero
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(0) as u64)
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}

/// Normalize a path label to exactly one leading `/`.
pub fn normalize_path_prefix(value: &str) -> String {
    format!("/{}", value.trim().trim_start_matches('/'))
}

/// Parse `30`, `30s`, `5m` or `1h` into whole seconds. Negative values parse
/// so validation can reject them with a meaningful message.
pub fn parse_timeout_seconds(value: &str) -> Option<i64> {
    let value = value.trim();
    let (digits, multiplier) = if let Some(v) = value.strip_suffix('h') {
        (v, 3600)
    } else if let Some(v) = value.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = value.strip_suffix('s') {
        (v, 1)
    } else {
        (value, 1)
    };

    digits.trim().parse::<i64>().ok().and_then(|n| n.checked_mul(multiplier))
}

fn validate_dns_name(domain: &str) -> Result<(), ValidationError> {
    if is_dns_name(domain) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_dns_name"))
    }
}

fn validate_dns_names(domains: &Vec<String>) -> Result<(), ValidationError> {
    for domain in domains {
        validate_dns_name(domain)?;
    }
    Ok(())
}
