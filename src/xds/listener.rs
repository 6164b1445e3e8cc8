//! Listener rendering using envoy-types
//!
//! Every filter chain carries an HTTP connection manager that fetches its
//! route configuration over RDS through the aggregated stream. Chains that
//! terminate TLS are selected by SNI and fetch their certificate over SDS.

use std::time::Duration;

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, http_protocol_options::HeadersWithUnderscoresAction,
    socket_address, transport_socket::ConfigType as TransportSocketConfigType,
    AggregatedConfigSource, ConfigSource, Http2ProtocolOptions, HttpProtocolOptions,
    TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, listener_filter::ConfigType as ListenerFilterConfigType,
    Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    http_filter::ConfigType as HttpFilterConfigType,
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    tls_parameters::TlsProtocol, CommonTlsContext, DownstreamTlsContext, SdsSecretConfig,
    TlsParameters,
};
use envoy_types::pb::google::protobuf::{BoolValue, UInt32Value};

use crate::domain::cluster::PER_CONNECTION_BUFFER_LIMIT_BYTES;
use crate::domain::{self, DownstreamTls};
use crate::xds::resources::{any_from_message, to_duration};

pub const HTTP_CONNECTION_MANAGER_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
pub const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const TLS_INSPECTOR_FILTER_NAME: &str = "envoy.filters.listener.tls_inspector";
pub const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
pub const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

const LISTENER_ADDRESS: &str = "0.0.0.0";
const HTTP_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_CONCURRENT_HTTP2_STREAMS: u32 = 100;
const INITIAL_HTTP2_STREAM_WINDOW_SIZE: u32 = 65_536;
const INITIAL_HTTP2_CONNECTION_WINDOW_SIZE: u32 = 1_048_576;
const ALPN_PROTOCOLS: [&str; 2] = ["h2", "http/1.1"];

/// Render a domain listener. `server_name` is reported in the `server`
/// response header of every proxied request.
pub fn render_listener(listener: &domain::Listener, server_name: &str) -> Listener {
    let listener_filters = if listener.terminates_tls() {
        vec![ListenerFilter {
            name: TLS_INSPECTOR_FILTER_NAME.to_string(),
            config_type: Some(ListenerFilterConfigType::TypedConfig(any_from_message(
                TLS_INSPECTOR_TYPE_URL,
                &TlsInspector::default(),
            ))),
            ..Default::default()
        }]
    } else {
        Vec::new()
    };

    Listener {
        name: listener.name.clone(),
        address: Some(crate::xds::cluster::socket_address(
            LISTENER_ADDRESS,
            listener.port,
            socket_address::Protocol::Tcp,
        )),
        listener_filters,
        filter_chains: listener
            .filter_chains
            .iter()
            .map(|chain| render_filter_chain(chain, server_name))
            .collect(),
        per_connection_buffer_limit_bytes: Some(UInt32Value {
            value: PER_CONNECTION_BUFFER_LIMIT_BYTES,
        }),
        ..Default::default()
    }
}

fn render_filter_chain(chain: &domain::FilterChain, server_name: &str) -> FilterChain {
    let mut filter_chain = FilterChain {
        name: chain.name.clone(),
        filters: vec![http_connection_manager_filter(chain, server_name)],
        ..Default::default()
    };

    if let Some(tls) = &chain.tls {
        filter_chain.filter_chain_match =
            Some(FilterChainMatch { server_names: tls.server_names.clone(), ..Default::default() });
        filter_chain.transport_socket = Some(downstream_transport_socket(tls));
    }

    filter_chain
}

fn http_connection_manager_filter(chain: &domain::FilterChain, server_name: &str) -> Filter {
    let router = HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(any_from_message(
            ROUTER_TYPE_URL,
            &Router::default(),
        ))),
        ..Default::default()
    };

    let hcm = HttpConnectionManager {
        server_name: server_name.to_string(),
        codec_type: CodecType::Auto as i32,
        stat_prefix: chain.name.clone(),
        use_remote_address: Some(BoolValue { value: true }),
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: chain.route_config_name.clone(),
            config_source: Some(ads_config_source()),
        })),
        // Router must be the last filter.
        http_filters: vec![router],
        common_http_protocol_options: Some(HttpProtocolOptions {
            idle_timeout: Some(to_duration(HTTP_IDLE_TIMEOUT)),
            headers_with_underscores_action: HeadersWithUnderscoresAction::RejectRequest as i32,
            ..Default::default()
        }),
        http2_protocol_options: Some(Http2ProtocolOptions {
            max_concurrent_streams: Some(UInt32Value { value: MAX_CONCURRENT_HTTP2_STREAMS }),
            initial_stream_window_size: Some(UInt32Value {
                value: INITIAL_HTTP2_STREAM_WINDOW_SIZE,
            }),
            initial_connection_window_size: Some(UInt32Value {
                value: INITIAL_HTTP2_CONNECTION_WINDOW_SIZE,
            }),
            ..Default::default()
        }),
        stream_idle_timeout: Some(to_duration(REQUEST_TIMEOUT)),
        request_timeout: Some(to_duration(REQUEST_TIMEOUT)),
        ..Default::default()
    };

    Filter {
        name: HTTP_CONNECTION_MANAGER_FILTER_NAME.to_string(),
        config_type: Some(FilterConfigType::TypedConfig(any_from_message(
            HTTP_CONNECTION_MANAGER_TYPE_URL,
            &hcm,
        ))),
    }
}

fn downstream_transport_socket(tls: &DownstreamTls) -> TransportSocket {
    let context = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            alpn_protocols: ALPN_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: tls.secret_name.clone(),
                sds_config: Some(ads_config_source()),
            }],
            tls_params: Some(TlsParameters {
                tls_minimum_protocol_version: TlsProtocol::TlSv12 as i32,
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
            DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
            &context,
        ))),
    }
}

/// Config source pointing back at the aggregated discovery stream
fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        ..Default::default()
    }
}
