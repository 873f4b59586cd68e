//! Marshalling work onto the thread that owns UI state.
//!
//! State lives with exactly one owner, the [`UiQueue`]. Everyone else holds a
//! [`UiHandle`] and submits closures; the owner runs them one at a time, in
//! submission order.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ClientError, Result};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

pub struct UiHandle<S> {
    jobs: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for UiHandle<S> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

pub struct UiQueue<S> {
    jobs: mpsc::UnboundedReceiver<Job<S>>,
}

/// Create a connected handle/queue pair.
pub fn ui_queue<S>() -> (UiHandle<S>, UiQueue<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiHandle { jobs: tx }, UiQueue { jobs: rx })
}

/// Own `state` on a dedicated task and return a handle to it.
///
/// The task ends once every handle is dropped and yields the final state.
pub fn spawn_ui_thread<S: Send + 'static>(state: S) -> (UiHandle<S>, JoinHandle<S>) {
    let (handle, queue) = ui_queue();
    let task = tokio::spawn(queue.run(state));
    (handle, task)
}

impl<S: 'static> UiHandle<S> {
    /// Fire-and-forget.
    pub fn run(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<()> {
        self.jobs.send(Box::new(job)).map_err(|_| ClientError::Closed)
    }

    /// Run `job` on the owner and wait for its result.
    pub async fn query<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.run(move |state| {
            let _ = reply.send(job(state));
        })?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}

impl<S> UiQueue<S> {
    /// Run every job queued right now. For frameworks that own their main loop.
    pub fn pump(&mut self, state: &mut S) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.jobs.try_recv() {
            job(state);
            ran += 1;
        }
        ran
    }

    /// Run jobs as they arrive until every handle is gone.
    pub async fn run(mut self, mut state: S) -> S {
        while let Some(job) = self.jobs.recv().await {
            job(&mut state);
        }
        state
    }
}
