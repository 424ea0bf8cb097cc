use std::{
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
};

use log::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads serving client connections for [`PseudoServer`](super::PseudoServer).
#[derive(Debug)]
pub struct ConnectionPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ConnectionPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| Worker::new(id, Arc::clone(&receiver)))
            .collect();

        Self {
            workers,
            sender: Some(sender),
        }
    }

    /// Queues `f` for the next idle worker. Returns false once the pool is shutting down.
    pub fn execute<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender.send(Box::new(f)).is_ok(),
            None => false,
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("waiting on connection worker {}", worker.id);
            if worker.thread.join().is_err() {
                warn!("connection worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Self {
        let thread = thread::spawn(move || {
            loop {
                let msg = receiver
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
                match msg {
                    Ok(job) => {
                        debug!("worker {id} serving a client");
                        job();
                    }
                    Err(_) => {
                        debug!("worker {id} stopping");
                        break;
                    }
                }
            }
        });

        Self { id, thread }
    }
}
