//! Per-sender dispatcher — messages from one sender are processed strictly
//! in arrival order, different senders run independently.
//!
//! Unauthorized senders are answered inline and never get a queue. A queue
//! whose sender stays quiet for the idle timeout is torn down.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error};

use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::types::{InboundMessage, PipelineOutcome};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

struct Job {
    message: InboundMessage,
    done: oneshot::Sender<PipelineOutcome>,
}

struct Worker {
    /// Distinguishes a worker from its replacement under the same sender.
    generation: u64,
    tx: mpsc::UnboundedSender<Job>,
}

type Workers = Arc<Mutex<HashMap<String, Worker>>>;

/// One worker queue per sender, created on first use.
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    workers: Workers,
    idle_timeout: Duration,
    generations: AtomicU64,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            generations: AtomicU64::new(0),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queue `message` behind earlier messages from the same sender. The
    /// receiver resolves with the outcome once it has been processed.
    pub async fn submit(&self, message: InboundMessage) -> oneshot::Receiver<PipelineOutcome> {
        let (done, outcome) = oneshot::channel();

        if let Err(denied) = self.orchestrator.authorize(&message) {
            let _ = done.send(denied);
            return outcome;
        }

        let sender = message.sender_id.clone();
        let mut job = Job { message, done };

        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get(&sender) {
            match worker.tx.send(job) {
                Ok(()) => return outcome,
                // Worker is gone; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let worker = self.spawn_worker(&sender);
        // A just-spawned worker cannot have dropped its receiver yet.
        let _ = worker.tx.send(job);
        workers.insert(sender, worker);
        outcome
    }

    /// Submit and wait for the outcome.
    pub async fn process(&self, message: InboundMessage) -> Option<PipelineOutcome> {
        self.submit(message).await.await.ok()
    }

    /// Number of live sender queues.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    fn spawn_worker(&self, sender: &str) -> Worker {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let orchestrator = Arc::clone(&self.orchestrator);
        let workers = Arc::clone(&self.workers);
        let idle_timeout = self.idle_timeout;
        let sender = sender.to_string();
        debug!(sender = %sender, "Starting sender worker");

        tokio::spawn(async move {
            loop {
                let job = match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(_) => {
                        // Submitters enqueue under this lock, so an empty queue
                        // here stays empty once the entry is gone.
                        let mut map = workers.lock().await;
                        match rx.try_recv() {
                            Ok(job) => job,
                            Err(_) => {
                                if map.get(&sender).is_some_and(|w| w.generation == generation) {
                                    map.remove(&sender);
                                }
                                debug!(sender = %sender, "Sender worker idle, stopping");
                                break;
                            }
                        }
                    }
                };

                let outcome = match AssertUnwindSafe(orchestrator.process(&job.message))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(id = %job.message.id, sender = %sender, "Message processing panicked");
                        orchestrator.crashed(&job.message)
                    }
                };
                // The submitter may have stopped waiting.
                let _ = job.done.send(outcome);
            }
        });

        Worker { generation, tx }
    }
}
