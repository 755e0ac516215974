use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Create the one-way "keep producing" latch shared by all generators.
///
/// The [`StopLatch`] is the single writer and stays with the orchestrator,
/// the [`RunState`] readers are cloned into every generator.
pub fn run_state() -> (StopLatch, RunState) {
    let flag = Arc::new(AtomicBool::new(true));
    (StopLatch(flag.clone()), RunState(flag))
}

#[derive(Debug)]
pub struct StopLatch(Arc<AtomicBool>);

impl StopLatch {
    /// Flip the flag to stopped.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone)]
pub struct RunState(Arc<AtomicBool>);

impl RunState {
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
