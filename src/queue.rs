//! Single-consumer FIFO of asynchronous operations.
//!
//! Each queued job receives a [`Completion`]; the next job starts only once
//! the current one has signalled it. A job that drops its completion without
//! signalling releases the queue as well, so a panicking job cannot stall it.
//! [`OperationsQueue::clear`] drops waiting jobs but never the running one;
//! jobs enqueued afterwards still start only once it completes.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce(Completion) -> BoxFuture<'static, ()> + Send>;

/// Handle a job uses to release the queue
#[derive(Debug)]
pub struct Completion {
  tx: oneshot::Sender<()>,
}

impl Completion {
  pub fn complete(self) {
    let _ = self.tx.send(());
  }
}

#[derive(Default)]
struct QueueState {
  jobs: VecDeque<Job>,
  draining: bool,
}

#[derive(Clone, Default)]
pub struct OperationsQueue {
  state: Arc<Mutex<QueueState>>,
}

impl OperationsQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a job and start draining if the queue is idle.
  ///
  /// Must be called from within a tokio runtime.
  pub fn enqueue<F, Fut>(&self, job: F)
  where
    F: FnOnce(Completion) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let job: Job = Box::new(move |done| Box::pin(job(done)));

    let mut state = self.state.lock();
    state.jobs.push_back(job);
    if !state.draining {
      state.draining = true;
      tokio::spawn(drain(Arc::clone(&self.state)));
    }
  }

  /// Drop every waiting job without running it. The running job, if any,
  /// keeps the queue busy until it completes.
  pub fn clear(&self) {
    let mut state = self.state.lock();
    let dropped = state.jobs.len();
    state.jobs.clear();
    if dropped > 0 {
      tracing::debug!(dropped, "operations queue cleared");
    }
  }

  pub fn len(&self) -> usize {
    self.state.lock().jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_idle(&self) -> bool {
    !self.state.lock().draining
  }
}

async fn drain(state: Arc<Mutex<QueueState>>) {
  loop {
    let job = {
      let mut state = state.lock();
      match state.jobs.pop_front() {
        Some(job) => job,
        None => {
          state.draining = false;
          return;
        }
      }
    };

    let (tx, rx) = oneshot::channel();
    tokio::spawn(job(Completion { tx }));
    // Err means the job dropped its completion; the queue moves on either way.
    let _ = rx.await;
  }
}
