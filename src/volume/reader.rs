//! Volume reader-thread pool (§4.4 Read queue; §5 Scheduling model).
//!
//! Zones never read the backing store directly: a page miss is handed
//! to this pool, which loads the page and replies on a per-request
//! channel. The pool is the crate's one `read_threads_mutex`-equivalent
//! serialization point for actual device I/O; zones themselves never
//! block on a lock other than waiting for this reply.

use crate::error::Result;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info_span};

/// Anything capable of reading one physical page's raw bytes. The
/// volume implements this over its backing file; tests implement it
/// over an in-memory `Vec<Vec<u8>>`.
pub trait PageSource: Send + Sync {
    /// Read `physical_page`'s raw bytes.
    fn read_page(&self, physical_page: u64) -> Result<Vec<u8>>;
}

struct ReadJob {
    physical_page: u64,
    reply: Sender<Result<Vec<u8>>>,
}

/// A fixed pool of reader threads draining a shared job queue.
pub struct ReaderPool {
    jobs: Sender<ReadJob>,
    workers: Vec<JoinHandle<()>>,
}

impl ReaderPool {
    /// Spawn `thread_count` reader threads pulling from a shared queue
    /// and reading through `source`.
    pub fn new(thread_count: u32, source: Arc<dyn PageSource>) -> Self {
        let (jobs_tx, jobs_rx) = bounded::<ReadJob>(1024);
        let mut workers = Vec::new();
        for worker_id in 0..thread_count.max(1) {
            let jobs_rx: Receiver<ReadJob> = jobs_rx.clone();
            let source = source.clone();
            let handle = std::thread::Builder::new()
                .name(format!("uds-reader-{worker_id}"))
                .spawn(move || {
                    let span = info_span!("uds_index::volume::reader", worker_id);
                    let _guard = span.enter();
                    while let Ok(job) = jobs_rx.recv() {
                        let result = source.read_page(job.physical_page);
                        if result.is_err() {
                            error!(physical_page = job.physical_page, "reader thread I/O failure");
                        }
                        let _ = job.reply.send(result);
                    }
                })
                .expect("failed to spawn reader thread");
            workers.push(handle);
        }
        Self { jobs: jobs_tx, workers }
    }

    /// Enqueue a read and return a one-shot receiver for the result.
    pub fn submit(&self, physical_page: u64) -> Receiver<Result<Vec<u8>>> {
        let (reply_tx, reply_rx) = bounded(1);
        // Reader threads outlive every submit call for the pool's
        // lifetime; a send failure only happens after `shutdown`.
        let _ = self.jobs.send(ReadJob {
            physical_page,
            reply: reply_tx,
        });
        reply_rx
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        // Dropping `jobs` (the only sender we hold) closes the channel;
        // each worker's `recv` loop then exits on its own.
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct MemSource(Mutex<Vec<Vec<u8>>>);

    impl PageSource for MemSource {
        fn read_page(&self, physical_page: u64) -> Result<Vec<u8>> {
            Ok(self.0.lock()[physical_page as usize].clone())
        }
    }

    #[test]
    fn submit_reads_through_the_pool() {
        let pages = vec![vec![1u8], vec![2u8], vec![3u8]];
        let source = Arc::new(MemSource(Mutex::new(pages)));
        let pool = ReaderPool::new(2, source);
        let a = pool.submit(0);
        let b = pool.submit(2);
        assert_eq!(a.recv().unwrap().unwrap(), vec![1]);
        assert_eq!(b.recv().unwrap().unwrap(), vec![3]);
    }
}
