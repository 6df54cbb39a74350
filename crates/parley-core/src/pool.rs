//! Worker pool for large-room fan-out.
//!
//! Each worker owns one small bounded job queue and drains it in FIFO
//! order, enqueueing the job's frame into every target client's outbound
//! queue. Submission round-robins across workers and never blocks: a full
//! worker queue drops the job and records a warning. Best-effort delivery;
//! history replay on rejoin is the compensating mechanism.

use crate::client::Client;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Capacity of each worker's job queue.
const WORKER_QUEUE_CAPACITY: usize = 16;

/// One formatted frame plus the membership snapshot it goes to.
///
/// Created per broadcast once a room is pool-activated; consumed exactly
/// once by exactly one worker.
pub struct BroadcastJob {
    frame: Bytes,
    targets: Vec<Arc<Client>>,
}

impl BroadcastJob {
    /// Create a job for delivering `frame` to `targets`.
    #[must_use]
    pub fn new(frame: Bytes, targets: Vec<Arc<Client>>) -> Self {
        Self { frame, targets }
    }
}

/// A fixed set of broadcast workers.
pub struct BroadcastPool {
    queues: Mutex<Vec<mpsc::Sender<BroadcastJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    worker_count: usize,
}

impl BroadcastPool {
    /// Spawn `worker_count` workers, each with its own bounded job queue.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut queues = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            queues.push(tx);
            handles.push(tokio::spawn(worker(index, rx)));
        }

        Self {
            queues: Mutex::new(queues),
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
            worker_count,
        }
    }

    /// Dispatch a job to one worker, chosen round-robin.
    ///
    /// Non-blocking: if the chosen worker's queue is full the job is
    /// dropped and a warning is recorded.
    pub fn submit(&self, job: BroadcastJob) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.worker_count;
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = queues.get(index) else {
            // Shutdown already dropped the queues.
            warn!("broadcast pool is shut down, dropping job");
            return;
        };
        match queue.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(worker = index, "broadcast worker queue full, dropping job");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close every worker queue and wait for the workers to drain and exit.
    ///
    /// Jobs already queued at the time of the call are still processed; no
    /// worker task survives this returning. Idempotent.
    pub async fn shutdown(&self) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Worker loop: FIFO-drain the queue, fan each job out to its targets.
///
/// Each per-client enqueue is itself non-blocking drop-on-full.
async fn worker(index: usize, mut jobs: mpsc::Receiver<BroadcastJob>) {
    while let Some(job) = jobs.recv().await {
        for target in &job.targets {
            target.send_raw(job.frame.clone());
        }
    }
    trace!(worker = index, "broadcast worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Identity;
    use std::time::Duration;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn client(capacity: usize) -> (Arc<Client>, mpsc::Receiver<Bytes>) {
        Client::new(
            Uuid::new_v4(),
            Identity {
                user_id: 1,
                room_row_id: 1,
                display_name: "worker-target".to_string(),
            },
            capacity,
        )
    }

    #[tokio::test]
    async fn jobs_reach_every_target() {
        let pool = BroadcastPool::start(2);
        let (a, mut rx_a) = client(8);
        let (b, mut rx_b) = client(8);

        pool.submit(BroadcastJob::new(
            Bytes::from_static(b"hi"),
            vec![a.clone(), b.clone()],
        ));

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("delivery timed out")
                .unwrap();
            assert_eq!(frame, Bytes::from_static(b"hi"));
        }

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_processes_already_queued_jobs() {
        let pool = BroadcastPool::start(1);
        let (target, mut rx) = client(64);

        for _ in 0..10 {
            pool.submit(BroadcastJob::new(
                Bytes::from_static(b"queued"),
                vec![target.clone()],
            ));
        }
        pool.shutdown().await;

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 10, "no queued job may be discarded mid-shutdown");

        // Idempotent, and submits after shutdown are silently dropped.
        pool.shutdown().await;
        pool.submit(BroadcastJob::new(Bytes::from_static(b"late"), vec![target]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn submit_never_blocks() {
        let pool = BroadcastPool::start(1);
        let (target, _rx) = client(1);

        // Far more jobs than one worker queue can hold; the overflow is
        // dropped, the caller is never stalled.
        let flood = async {
            for _ in 0..1000 {
                pool.submit(BroadcastJob::new(
                    Bytes::from_static(b"x"),
                    vec![target.clone()],
                ));
            }
        };
        timeout(Duration::from_secs(1), flood)
            .await
            .expect("submit blocked");

        pool.shutdown().await;
    }
}
