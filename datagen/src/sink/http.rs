use std::{collections::HashMap, time::Duration};

use rama::{
    Service,
    error::{BoxError, ErrorContext as _, OpaqueError},
    http::{Request, Response, Uri, service::client::HttpClientExt as _},
    service::BoxService,
    telemetry::tracing,
};
use serde::Serialize;

use crate::{
    datapoint::{Datapoint, MetricKind, Value},
    utils::env::network_service_identifier,
    writer::TransientError,
};

use super::DatapointSink;

/// Connection parameters of the ingest endpoint.
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub endpoint: Uri,
    /// Sent as `X-SF-Token` when set.
    pub access_token: Option<String>,
    /// Sent as `X-Debug-Id` when set, handy to find the requests back in endpoint logs.
    pub debug_id: Option<String>,
    /// Upper bound of a single request, exceeding it is reported as a transient error.
    pub timeout: Duration,
}

/// Datapoint ingest endpoint for the given realm.
pub fn default_ingest_endpoint(realm: &str) -> Result<Uri, OpaqueError> {
    format!("https://ingest.{realm}.signalfx.com/v2/datapoint")
        .parse()
        .with_context(|| format!("create ingest endpoint uri for realm '{realm}'"))
}

/// Ships batches as JSON to a SignalFx-compatible `/v2/datapoint` endpoint.
#[derive(Clone)]
pub struct HttpSink {
    client: BoxService<Request, Response, OpaqueError>,
    cfg: HttpSinkConfig,
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("endpoint", &self.cfg.endpoint)
            .field("timeout", &self.cfg.timeout)
            .finish()
    }
}

impl HttpSink {
    pub fn new(
        client: impl Service<Request, Output = Response, Error = OpaqueError>,
        cfg: HttpSinkConfig,
    ) -> Self {
        Self {
            client: client.boxed(),
            cfg,
        }
    }
}

impl DatapointSink for HttpSink {
    async fn send(&self, batch: &[Datapoint]) -> Result<(), BoxError> {
        tracing::debug!(length = batch.len(), "trying to send datapoints");

        let mut req_builder = self
            .client
            .post(self.cfg.endpoint.clone())
            .header("User-Agent", network_service_identifier())
            .json(&DatapointsPayload::from_batch(batch));

        if let Some(token) = self.cfg.access_token.as_deref() {
            req_builder = req_builder.header("X-SF-Token", token);
        }
        if let Some(debug_id) = self.cfg.debug_id.as_deref() {
            req_builder = req_builder.header("X-Debug-Id", debug_id);
        }

        let resp = match tokio::time::timeout(self.cfg.timeout, req_builder.send()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransientError::new(OpaqueError::from_display(format!(
                    "datapoint request to '{}' timed out after {:?}",
                    self.cfg.endpoint, self.cfg.timeout
                )))
                .into());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(OpaqueError::from_display(format!(
                "ingest endpoint '{}' returned non-success status: {status}",
                self.cfg.endpoint
            ))
            .into());
        }

        tracing::debug!(length = batch.len(), "datapoints sent");
        Ok(())
    }
}

/// JSON body of the `/v2/datapoint` endpoint: points grouped by their kind.
#[derive(Debug, Default, Serialize)]
struct DatapointsPayload<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gauge: Vec<WireDatapoint<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    counter: Vec<WireDatapoint<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cumulative_counter: Vec<WireDatapoint<'a>>,
}

#[derive(Debug, Serialize)]
struct WireDatapoint<'a> {
    metric: &'a str,
    dimensions: &'a HashMap<String, String>,
    value: WireValue,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireValue {
    Int(i64),
    Float(f64),
}

impl<'a> DatapointsPayload<'a> {
    fn from_batch(batch: &'a [Datapoint]) -> Self {
        let mut payload = Self::default();
        for dp in batch {
            let wire = WireDatapoint {
                metric: &dp.metric,
                dimensions: &dp.dimensions,
                value: match dp.value {
                    Value::Int(v) => WireValue::Int(v),
                    Value::Float(v) => WireValue::Float(v),
                },
                timestamp: dp.timestamp_ms(),
            };
            match dp.kind {
                MetricKind::Gauge => payload.gauge.push(wire),
                MetricKind::Counter => payload.counter.push(wire),
                MetricKind::CumulativeCounter => payload.cumulative_counter.push(wire),
            }
        }
        payload
    }
}
