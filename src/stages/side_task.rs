use std::future::Future;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::JobError;

/// Best-effort work detached from the stage that started it.
///
/// The outcome is only logged. Dropping the handle does not cancel the
/// task; [`SideTask::join`] lets a caller wait for it anyway.
#[derive(Debug)]
pub struct SideTask {
    label: &'static str,
    job_id: Uuid,
    handle: JoinHandle<()>,
}

impl SideTask {
    pub fn spawn<F>(label: &'static str, job_id: Uuid, task: F) -> Self
    where
        F: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => tracing::debug!(job_id = %job_id, task = label, "Side task finished"),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, task = label, error = %e, "Side task failed, ignoring");
                }
            }
        });
        Self {
            label,
            job_id,
            handle,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task. A panic inside it is logged, not propagated.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!(job_id = %self.job_id, task = self.label, error = %e, "Side task aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn failure_is_swallowed() {
        let task = SideTask::spawn("plot", Uuid::nil(), async {
            Err(JobError::PreconditionFailed("nothing to plot".into()))
        });
        assert_eq!(task.label(), "plot");
        assert_eq!(task.job_id(), Uuid::nil());
        task.join().await;
    }

    #[tokio::test]
    async fn runs_without_being_joined() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = SideTask::spawn("plot", Uuid::nil(), async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }
        drop(task);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let task = SideTask::spawn("plot", Uuid::nil(), async {
            if Uuid::nil().is_nil() {
                panic!("renderer crashed");
            }
            Ok(())
        });
        task.join().await;
    }
}
