//! Destinations for datapoint batches.
//!
//! The delivery engine only knows about the [`DatapointSink`] capability,
//! wire encoding, authentication and timeouts are the sink's business.

use std::future::Future;

use rama::error::BoxError;

use crate::datapoint::Datapoint;

mod http;
mod memory;

pub use self::{
    http::{HttpSink, HttpSinkConfig, default_ingest_endpoint},
    memory::MemorySink,
};

/// Capability to ship a batch of datapoints somewhere.
///
/// Called concurrently from multiple dispatch slots.
/// Errors are returned as [`BoxError`] so the delivery engine can
/// inspect the cause chain to decide if a retry is worth it,
/// see [`crate::writer::is_transient`].
pub trait DatapointSink: Send + Sync + 'static {
    fn send(&self, batch: &[Datapoint]) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<S: DatapointSink> DatapointSink for std::sync::Arc<S> {
    fn send(&self, batch: &[Datapoint]) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).send(batch)
    }
}
