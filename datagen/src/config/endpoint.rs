use std::time::Duration;

use rama::{error::OpaqueError, http::Uri, net::address::ProxyAddress};

use crate::sink::{HttpSinkConfig, default_ingest_endpoint};

/// Where and how datapoints are shipped.
#[derive(Debug, Clone, clap::Args)]
pub struct EndpointConfig {
    /// Access token used to authenticate with the ingest endpoint.
    #[arg(long, env = "SFX_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Realm of the ingest endpoint, ignored when --endpoint is set.
    #[arg(long, default_value = "us0")]
    pub realm: String,

    /// Full datapoint ingest url, overrides the realm based default.
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<Uri>,

    /// Value of the `X-Debug-Id` header added to each request.
    #[arg(long, value_name = "ID")]
    pub header_debug_id: Option<String>,

    /// Upstream proxy used for all ingest requests.
    #[arg(
        long,
        env = "HTTPS_PROXY",
        value_name = "<scheme>://[user:[password]@]<host>[:port]"
    )]
    pub proxy: Option<ProxyAddress>,

    /// Timeout of a single ingest request.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub http_timeout: Duration,
}

impl EndpointConfig {
    pub fn sink_config(&self) -> Result<HttpSinkConfig, OpaqueError> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => default_ingest_endpoint(&self.realm)?,
        };
        Ok(HttpSinkConfig {
            endpoint,
            access_token: self.access_token.clone().filter(|token| !token.is_empty()),
            debug_id: self.header_debug_id.clone().filter(|id| !id.is_empty()),
            timeout: self.http_timeout,
        })
    }
}
