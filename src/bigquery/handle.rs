// ABOUTME: Completion handle for an in-flight BigQuery load job
// ABOUTME: One oneshot signal, awaited by `wait` or checked without blocking by `poll`

use anyhow::{anyhow, Result};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Result of a non-blocking check on a [`LoadHandle`]
#[derive(Debug)]
pub enum LoadPoll {
    /// The job has not reported back yet
    Pending,
    /// The job finished; this is only ever returned once
    Ready(Result<()>),
    /// The outcome was already taken by an earlier poll
    Consumed,
}

/// Token for a submitted load job
///
/// Dropping the handle does not cancel the job, it only stops anyone from
/// listening for its outcome.
#[derive(Debug)]
pub struct LoadHandle {
    job_id: String,
    receiver: Option<oneshot::Receiver<Result<()>>>,
}

/// Producer side of a [`LoadHandle`], held by whatever watches the job
#[derive(Debug)]
pub struct LoadCompletion {
    sender: oneshot::Sender<Result<()>>,
}

impl LoadHandle {
    /// Create a handle together with the sender that resolves it
    pub fn channel(job_id: impl Into<String>) -> (LoadCompletion, LoadHandle) {
        let (sender, receiver) = oneshot::channel();
        (
            LoadCompletion { sender },
            LoadHandle {
                job_id: job_id.into(),
                receiver: Some(receiver),
            },
        )
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Block until the job reports success or failure
    pub async fn wait(mut self) -> Result<()> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| anyhow!("outcome of load job {} was already consumed", self.job_id))?;

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "load job {} stopped reporting before it finished",
                self.job_id
            )),
        }
    }

    /// Check for an outcome without waiting
    pub fn poll(&mut self) -> LoadPoll {
        let Some(receiver) = self.receiver.as_mut() else {
            return LoadPoll::Consumed;
        };

        let outcome = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return LoadPoll::Pending,
            Err(TryRecvError::Closed) => Err(anyhow!(
                "load job {} stopped reporting before it finished",
                self.job_id
            )),
        };
        self.receiver = None;
        LoadPoll::Ready(outcome)
    }
}

impl LoadCompletion {
    /// Resolve the handle; a no-op if the handle has been dropped
    pub fn complete(self, result: Result<()>) {
        let _ = self.sender.send(result);
    }

    /// Resolves once the matching [`LoadHandle`] is dropped
    pub async fn abandoned(&mut self) {
        self.sender.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_success() {
        let (completion, handle) = LoadHandle::channel("job-1");
        completion.complete(Ok(()));
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_returns_job_error() {
        let (completion, handle) = LoadHandle::channel("job-1");
        completion.complete(Err(anyhow!("invalid: too many bad records")));

        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("too many bad records"));
    }

    #[tokio::test]
    async fn test_wait_errors_when_watcher_disappears() {
        let (completion, handle) = LoadHandle::channel("job-9");
        drop(completion);

        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("job-9"));
    }

    #[test]
    fn test_poll_is_pending_then_ready_once() {
        let (completion, mut handle) = LoadHandle::channel("job-2");
        assert!(matches!(handle.poll(), LoadPoll::Pending));

        completion.complete(Ok(()));
        assert!(matches!(handle.poll(), LoadPoll::Ready(Ok(()))));
        assert!(matches!(handle.poll(), LoadPoll::Consumed));
    }

    #[tokio::test]
    async fn test_wait_after_poll_consumed_errors() {
        let (completion, mut handle) = LoadHandle::channel("job-3");
        completion.complete(Ok(()));
        assert!(matches!(handle.poll(), LoadPoll::Ready(Ok(()))));

        assert!(handle.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_abandoned_fires_when_handle_dropped() {
        let (mut completion, handle) = LoadHandle::channel("job-4");
        drop(handle);
        completion.abandoned().await;
    }
}
