use rama::telemetry::tracing;

/// Notified each time the write buffer overflows and a buffered batch is dropped.
pub trait OverflowSink: Send + Sync + 'static {
    fn on_overflow(&self);
}

impl<F> OverflowSink for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn on_overflow(&self) {
        (self)()
    }
}

/// Default [`OverflowSink`]: tell the operator the buffer is too small.
#[derive(Debug, Clone, Copy)]
pub struct LogOverflow {
    max_buffered: usize,
}

impl LogOverflow {
    pub fn new(max_buffered: usize) -> Self {
        Self { max_buffered }
    }
}

impl OverflowSink for LogOverflow {
    fn on_overflow(&self) {
        tracing::warn!(
            "a batch was dropped from the write buffer, please consider increasing --max-buffered to something greater than {}",
            self.max_buffered
        );
    }
}
