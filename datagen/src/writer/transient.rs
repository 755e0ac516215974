use std::{error::Error, io};

use rama::error::BoxError;

/// Error explicitly marked as temporary by the sink that produced it,
/// e.g. a request timeout.
///
/// Batches failing with such an error (anywhere in the cause chain)
/// are retried once by the delivery engine.
#[derive(Debug)]
pub struct TransientError {
    inner: BoxError,
}

impl TransientError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self { inner: err.into() }
    }
}

impl std::fmt::Display for TransientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "temporary error: {}", self.inner)
    }
}

impl Error for TransientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Walks the cause chain of `err` looking for a failure
/// which is likely to go away when trying again.
///
/// Stops at the first level that is either a [`TransientError`],
/// a reset connection or an unexpected end of stream.
pub fn is_transient(err: &(dyn Error + 'static)) -> bool {
    let mut candidate = Some(err);
    while let Some(err) = candidate {
        if err.is::<TransientError>() {
            return true;
        }

        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
            // io::Error::source skips its own payload
            if io_err.get_ref().is_some_and(|inner| inner.is::<TransientError>()) {
                return true;
            }
        }

        candidate = err.source();
    }
    false
}
