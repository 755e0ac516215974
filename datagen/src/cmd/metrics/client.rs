use std::time::Duration;

use rama::{
    Layer as _, Service as _,
    error::{ErrorContext as _, OpaqueError},
    http::{
        Body, Request, Response, client::EasyHttpWebClient,
        layer::map_response_body::MapResponseBodyLayer,
    },
    layer::{AddInputExtensionLayer, MapErrLayer, TimeoutLayer},
    net::address::ProxyAddress,
    service::BoxService,
};

/// Upper bound for establishing a connection to the ingest endpoint (or proxy).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Web client used to reach the ingest endpoint,
/// optionally routed through the given upstream proxy.
pub(super) fn new_ingest_client(
    proxy: Option<ProxyAddress>,
) -> Result<BoxService<Request, Response, OpaqueError>, OpaqueError> {
    let client = (
        MapErrLayer::new(OpaqueError::from_std),
        MapResponseBodyLayer::new(Body::new),
    )
        .into_layer(
            EasyHttpWebClient::connector_builder()
                .with_default_transport_connector()
                .without_tls_proxy_support()
                .with_proxy_support()
                .with_tls_support_using_boringssl(None)
                .with_custom_connector(TimeoutLayer::new(CONNECT_TIMEOUT))
                .with_default_http_connector()
                .try_with_default_connection_pool()
                .context("create connection pool for ingest web client")?
                .build_client(),
        );

    Ok(match proxy {
        Some(proxy) => AddInputExtensionLayer::new(proxy)
            .into_layer(client)
            .boxed(),
        None => client.boxed(),
    })
}
