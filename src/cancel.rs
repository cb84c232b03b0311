use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the orchestrator and the
/// running engines. Checked between files/archives and inside chunk loops;
/// there is no pre-emption. A flag that has fired is never reused: each
/// orchestration run installs a fresh one.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget cancellation request from the host.
    pub fn request(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
