//! Safe, non-blocking teardown of backend sessions.
//!
//! A backend's shutdown is asynchronous: `stop()` is advisory and the worker
//! confirms completion by setting its finished flag. Retired handles sit in
//! the pending-removal set until that confirmation; only then is the worker
//! joined and the handle dropped. A handle in the set is never reachable
//! from any client session.

use tg_backend::TraderSession;

/// Owns the pending-removal set. Accessed only from the dispatcher task.
pub struct LifecycleManager {
    pending: Vec<Box<dyn TraderSession>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Request shutdown of a backend and hold it until its worker confirms.
    ///
    /// Sweeps opportunistically so each teardown also releases any earlier
    /// handles whose workers have since finished.
    pub fn retire(&mut self, session: Box<dyn TraderSession>) {
        session.stop();
        self.pending.push(session);
        self.sweep();
    }

    /// Release every pending handle whose worker has exited.
    ///
    /// Joining only after `is_finished()` guarantees the worker can no
    /// longer touch shared structures when the handle is dropped, and each
    /// handle is released exactly once.
    pub fn sweep(&mut self) {
        let before = self.pending.len();
        self.pending.retain_mut(|session| {
            if session.is_finished() {
                session.join();
                false
            } else {
                true
            }
        });
        let released = before - self.pending.len();
        if released > 0 {
            tracing::debug!(released, remaining = self.pending.len(), "released retired backends");
        }
    }

    /// Number of retired backends still awaiting worker exit.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
