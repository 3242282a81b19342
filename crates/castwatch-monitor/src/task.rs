//! Explicit handles for background tasks.
//!
//! Periodic work is owned through [`TaskHandle`] values with a `cancel()`
//! method rather than detached tasks or closure disposers, so a component's
//! teardown can enumerate and stop exactly what it started.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TaskHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawns `make_future` with a child token of `parent`; the task is
    /// expected to exit promptly once the token is cancelled.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, make_future: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let future = make_future(token.clone());
        let join = tokio::spawn(async move {
            future.await;
            tracing::debug!(task = name, "background task finished");
        });
        Self { token, join }
    }

    /// Requests cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        // A dropped handle must not leave an orphaned periodic task running.
        self.token.cancel();
        self.join.abort();
    }
}
