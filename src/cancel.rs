use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The cooperative cancellation signal threaded through the pipeline and
/// every injected service call (§5, §6 "`ctx` is a cancellation carrier").
///
/// Cloning shares the same underlying flag; cancelling one handle cancels
/// every clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
