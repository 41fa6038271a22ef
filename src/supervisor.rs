use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the background loops of one component and the token that stops them.
pub struct TaskSupervisor {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskSupervisor {
    /// Child of `parent`, so cancelling the caller's context stops these tasks too.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("Spawning background task {}", name);
        self.handles.push((name, tokio::spawn(task)));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for it, aborting tasks that outlive the grace period.
    pub async fn shutdown(self) {
        self.token.cancel();

        for (name, mut handle) in self.handles {
            match timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Background task {} stopped", name),
                Ok(Err(e)) => warn!("Background task {} ended abnormally: {}", name, e),
                Err(_) => {
                    warn!("Background task {} did not stop within {:?}, aborting", name, SHUTDOWN_GRACE);
                    handle.abort();
                }
            }
        }
    }
}
