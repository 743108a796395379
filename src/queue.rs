//! Process-wide sequential executor for encoder jobs.
//!
//! Any number of producers hand jobs to a single consumer task, which runs
//! them strictly one at a time. When several producers are ready at once the
//! order in which their jobs are picked up is unspecified; callers that need
//! ordering wait for completions (see [`crate::barrier::StageBarrier`]).

use crate::job::Job;
use crate::transcoder::{JobOutcome, Transcoder, invoke};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

// A producer waits until the consumer has room for its job.
const QUEUE_CAPACITY: usize = 1;

/// Advisory count of job completions still owed, shown to users as "items left".
#[derive(Clone, Debug, Default)]
pub struct QueueDepth(Arc<AtomicUsize>);

impl QueueDepth {
    pub fn add(&self, jobs: usize) {
        self.0.fetch_add(jobs, Ordering::SeqCst);
    }

    pub fn complete_one(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct QueuedJob {
    job: Job,
    done: oneshot::Sender<JobOutcome>,
}

struct Consumer {
    receiver: mpsc::Receiver<QueuedJob>,
    transcoder: Arc<dyn Transcoder>,
}

struct Inner {
    sender: mpsc::Sender<QueuedJob>,
    // Taken exactly once, when the consumer task is spawned.
    consumer: Mutex<Option<Consumer>>,
    depth: QueueDepth,
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(transcoder: Arc<dyn Transcoder>, depth: QueueDepth) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sender,
                consumer: Mutex::new(Some(Consumer {
                    receiver,
                    transcoder,
                })),
                depth,
            }),
        }
    }

    pub fn depth(&self) -> &QueueDepth {
        &self.inner.depth
    }

    /// Spawn the consumer task if it is not running yet. Returns true only for
    /// the call that started it.
    pub fn ensure_started(&self) -> bool {
        let Some(consumer) = self.inner.consumer.lock().take() else {
            return false;
        };

        let depth = self.inner.depth.clone();
        tokio::spawn(consume(consumer, depth));
        info!("work queue consumer started");
        true
    }

    /// Hand a job to the consumer and wait until it has finished running.
    pub async fn submit(&self, job: Job) -> JobOutcome {
        self.ensure_started();

        let video_id = job.video_id.clone();
        let rendition = job.rendition();
        let (done, finished) = oneshot::channel();

        if self
            .inner
            .sender
            .send(QueuedJob { job, done })
            .await
            .is_err()
        {
            // The consumer never exits while a sender is alive, so this only
            // happens if its task panicked.
            self.inner.depth.complete_one();
            return JobOutcome::Failed("work queue is closed".to_string());
        }
        debug!(video_id = %video_id, rendition = %rendition, "job accepted by work queue");

        finished
            .await
            .unwrap_or_else(|_| JobOutcome::Failed("job dropped by work queue".to_string()))
    }
}

async fn consume(consumer: Consumer, depth: QueueDepth) {
    let Consumer {
        mut receiver,
        transcoder,
    } = consumer;

    while let Some(QueuedJob { job, done }) = receiver.recv().await {
        let outcome = invoke(transcoder.as_ref(), &job, &depth).await;
        let _ = done.send(outcome);
    }
}
