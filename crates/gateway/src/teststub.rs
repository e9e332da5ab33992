//! Scriptable backend stub shared by the dispatcher unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tg_backend::TraderSession;
use tg_core::types::ReqLogin;

/// Shared handle observing and driving one stub backend instance.
#[derive(Clone, Default)]
pub(crate) struct StubHandle {
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
    join_count: Arc<AtomicUsize>,
    queue: Arc<Mutex<Vec<String>>>,
    started_with: Arc<Mutex<Option<ReqLogin>>>,
}

impl StubHandle {
    pub(crate) fn boxed(&self) -> Box<dyn TraderSession> {
        Box::new(StubBackend {
            handle: self.clone(),
        })
    }

    /// Simulate the worker honoring stop and exiting.
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub(crate) fn request_reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.join_count() > 0
    }

    pub(crate) fn join_count(&self) -> usize {
        self.join_count.load(Ordering::Acquire)
    }

    pub(crate) fn queued(&self) -> Vec<String> {
        self.queue.lock().unwrap().clone()
    }

    pub(crate) fn started_with(&self) -> Option<ReqLogin> {
        self.started_with.lock().unwrap().clone()
    }
}

pub(crate) struct StubBackend {
    handle: StubHandle,
}

impl TraderSession for StubBackend {
    fn start(&mut self, req: ReqLogin) -> Result<()> {
        *self.handle.started_with.lock().unwrap() = Some(req);
        Ok(())
    }

    fn enqueue(&self, raw: String) {
        self.handle.queue.lock().unwrap().push(raw);
    }

    fn stop(&self) {
        self.handle.stopped.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.handle.finished.load(Ordering::Acquire)
    }

    fn needs_reset(&self) -> bool {
        self.handle.reset.load(Ordering::Acquire)
    }

    fn join(&mut self) {
        self.handle.join_count.fetch_add(1, Ordering::AcqRel);
    }
}
