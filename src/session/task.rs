//! Cancellable background task owned by a session.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// A spawned task paired with the token that asks it to stop.
///
/// The task is expected to watch its token and return promptly once it is
/// cancelled. Dropping the handle detaches the task.
pub struct TaskHandle {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let join = tokio::spawn(task(token.clone()));
        Self { name, token, join }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request cancellation and wait for the task to exit.
    pub async fn cancel_and_wait(self) {
        self.token.cancel();
        match self.join.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                warn!("{} task was aborted before it finished", self.name);
            }
            Err(e) => {
                error!("{} task panicked: {}", self.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_and_wait_stops_task() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        let handle = TaskHandle::spawn("test", move |token| async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
            }
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!handle.is_finished());
        handle.cancel_and_wait().await;
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_finished_task_is_noop() {
        let handle = TaskHandle::spawn("quick", |_token| async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
        handle.cancel_and_wait().await;
    }
}
