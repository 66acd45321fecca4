use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool size used when the caller does not pick one: a small multiple of the
/// available parallelism, suited to work that mixes decode and blocking I/O.
pub fn default_pool_size() -> usize {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    2 * cores + 1
}

/// Fixed-size worker pool with global pause/resume.
///
/// While the feed is actively scrolling the UI calls [`WorkerPool::pause`] so
/// no decode or network work is spent on rows about to scroll away; on scroll
/// settle it calls [`WorkerPool::resume`]. Pausing defers queued work, it
/// never drops it. Each worker blocks at a single gate immediately before
/// executing a dequeued job, re-checking the flag on every wake.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    queue: Mutex<Queue>,
    queue_cv: Condvar,
    /// One lock guards both the flag and the condition the workers block on;
    /// pause/resume and mid-check workers all serialize here.
    gate: Mutex<bool>,
    gate_cv: Condvar,
}

struct Queue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "the pool size must be larger than 0");
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            queue_cv: Condvar::new(),
            gate: Mutex::new(false),
            gate_cv: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("photo-load-{}", i))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
        debug!("WorkerPool: started {} workers", size);

        WorkerPool {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job for execution. Returns whether the job was accepted; after
    /// shutdown nothing is queued and the job is dropped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.shutdown {
            warn!("WorkerPool: submit after shutdown, job dropped");
            return false;
        }
        queue.jobs.push_back(Box::new(job));
        self.shared.queue_cv.notify_one();
        true
    }

    /// Stop executing queued jobs until [`WorkerPool::resume`]
    pub fn pause(&self) {
        let mut paused = self.shared.gate.lock().unwrap();
        *paused = true;
        debug!("WorkerPool: paused");
    }

    /// Clear the pause flag and wake every blocked worker
    pub fn resume(&self) {
        let mut paused = self.shared.gate.lock().unwrap();
        *paused = false;
        self.shared.gate_cv.notify_all();
        debug!("WorkerPool: resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.gate.lock().unwrap()
    }

    /// Stop accepting work, wake everyone and join the workers. Jobs already
    /// queued are abandoned; jobs already dequeued finish first.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            queue.jobs.clear();
            self.shared.queue_cv.notify_all();
        }
        // A worker parked at the pause gate must be released to observe the
        // shutdown flag.
        self.resume();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.join();
        }
        debug!("WorkerPool: shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                queue = shared.queue_cv.wait(queue).unwrap();
            }
        };

        // The pause gate. The while loop guards against spurious wakes and
        // against a pause() racing in between wake and re-check.
        {
            let mut paused = shared.gate.lock().unwrap();
            while *paused {
                paused = shared.gate_cv.wait(paused).unwrap();
            }
        }

        job();
    }
}
