use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

/// A spawned background loop that is aborted when its handle goes away.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Abort the task and wait for it to unwind.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            debug!(task = self.name, "Background task stopped");
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
