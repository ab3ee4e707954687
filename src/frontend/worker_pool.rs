use std::{future::Future, pin::Pin, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc, mpsc::error::TrySendError},
    task::JoinHandle,
};
use tracing::debug;

// -----------------------------------------------------------------------------
// ----- WorkerPool ------------------------------------------------------------

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Bounded pool for BIZ dispatch, off the connection's read loop.
///
/// When the queue is full the job runs on the submitting task instead of
/// being dropped, which stalls that connection's reads until it finishes.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        match next {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self { tx, workers }
    }

    pub async fn submit(&self, job: Job) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                debug!("worker queue full; running job on caller");
                job.await;
            }
            Err(TrySendError::Closed(job)) => job.await,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
